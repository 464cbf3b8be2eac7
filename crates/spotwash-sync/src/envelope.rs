//! The `{ success, data, error }` envelope every `/api` endpoint returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

const FALLBACK_ERROR_MESSAGE: &str = "request failed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ApiEnvelope {
    pub fn parse(body: &[u8]) -> Result<Self, GatewayError> {
        serde_json::from_slice(body).map_err(|error| GatewayError::Decode {
            message: error.to_string(),
        })
    }

    /// Unwrap `data`, turning `success:false` into an application error.
    pub fn into_data(self) -> Result<Value, GatewayError> {
        if self.success {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        let message = self
            .error
            .map(|error| error.message)
            .filter(|message| !message.trim().is_empty())
            .or(self.message)
            .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string());
        Err(GatewayError::Application { message })
    }
}
