use url::Url;

use crate::transport::HttpRequest;

/// Which caching strategy an intercepted request gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Different origin; never intercepted.
    CrossOrigin,
    /// Same origin under the API prefix; network first.
    Api,
    /// Any other same-origin request; cache first.
    Static,
}

impl RequestClass {
    #[must_use]
    pub fn classify(request: &HttpRequest, origin: &Url, api_prefix: &str) -> Self {
        if request.url.origin() != origin.origin() {
            return Self::CrossOrigin;
        }
        let prefix = api_prefix.trim_end_matches('/');
        let path = request.url.path();
        let under_prefix = path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'));
        if under_prefix { Self::Api } else { Self::Static }
    }
}
