//! Read models for the endpoints the sync layer polls.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `/api/dashboard-stats` payload. This endpoint answers with a bare object,
/// not the usual envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub active_queue: u64,
    pub today_revenue: f64,
    pub today_orders: u64,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: u64,
    pub order_number: String,
    pub status: String,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub amount_paid: f64,
    #[serde(default)]
    pub balance_due: f64,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
}

impl OrderSummary {
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "pending" | "in_progress")
    }
}

/// `data` of `GET /api/orders/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub order: OrderSummary,
}

/// `data` of `GET /api/orders/queue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderQueue {
    pub queue: Vec<OrderSummary>,
    pub queue_length: usize,
}

/// `data` of `GET /api/search`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub results: SearchBuckets,
    #[serde(default)]
    pub total_results: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchBuckets {
    #[serde(default)]
    pub customers: Vec<Value>,
    #[serde(default)]
    pub vehicles: Vec<Value>,
    #[serde(default)]
    pub orders: Vec<Value>,
    #[serde(default)]
    pub services: Vec<Value>,
}
