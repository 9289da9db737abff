/// Outbound API client factory.
///
/// The rest of the app issues domain requests through an `ApiClient`;
/// this factory (re)builds one whenever the connection subsystem
/// confirms a base URL. Request semantics beyond "base URL + path" are
/// not this subsystem's business.

use std::sync::RwLock;
use std::time::Duration;

use tracing::info;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Absolute URL for an API path.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Holds the current client; swapped atomically on (re)initialization.
pub struct ApiClientFactory {
    current: RwLock<Option<ApiClient>>,
}

impl ApiClientFactory {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// (Re)build the client against a confirmed base URL.
    pub fn initialize(&self, base_url: &str) {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        let client = ApiClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        };
        info!(url = %base_url, "API client initialized");
        *self.current.write().unwrap() = Some(client);
    }

    /// Current client, if one has been initialized.
    pub fn current(&self) -> Option<ApiClient> {
        self.current.read().unwrap().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.current.read().unwrap().is_some()
    }
}

impl Default for ApiClientFactory {
    fn default() -> Self {
        Self::new()
    }
}
