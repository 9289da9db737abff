/// HTTP probing primitive shared by discovery and health checking.
///
/// Every transport error — timeout, refused connection, bad JSON — is
/// absorbed here and becomes a `None`/`false` outcome. Callers never see
/// an error from a probe.

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use cloudbite_protocol::discovery::DiscoveryResponse;
use cloudbite_protocol::{DISCOVERY_PATH, HEALTH_PATH};

/// Probe seam. Object-safe so engines can hold `Arc<dyn Probe>` and
/// tests can script responses.
pub trait Probe: Send + Sync {
    /// Fetch and parse the discovery payload. `None` on any failure.
    fn discovery<'a>(
        &'a self,
        base_url: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Option<DiscoveryResponse>>;

    /// Whether the health endpoint answered 2xx within the timeout.
    fn health<'a>(&'a self, base_url: &'a str, timeout: Duration) -> BoxFuture<'a, bool>;

    /// Whether `url` produced any HTTP response at all. Used for gateway
    /// detection, where a router's 401 page counts as a responder.
    fn reachable<'a>(&'a self, url: &'a str, timeout: Duration) -> BoxFuture<'a, bool>;
}

/// reqwest-backed probe. One shared client, per-request timeouts.
pub struct HttpProbe {
    http: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder().build().unwrap_or_default(),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for HttpProbe {
    fn discovery<'a>(
        &'a self,
        base_url: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Option<DiscoveryResponse>> {
        Box::pin(async move {
            let url = format!("{}{}", base_url.trim_end_matches('/'), DISCOVERY_PATH);
            let resp = match self.http.get(&url).timeout(timeout).send().await {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    debug!(url = %url, status = r.status().as_u16(), "Discovery probe rejected");
                    return None;
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "Discovery probe failed");
                    return None;
                }
            };

            match resp.json::<DiscoveryResponse>().await {
                Ok(payload) => Some(payload),
                Err(e) => {
                    debug!(url = %url, error = %e, "Discovery payload unparseable");
                    None
                }
            }
        })
    }

    fn health<'a>(&'a self, base_url: &'a str, timeout: Duration) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let url = format!("{}{}", base_url.trim_end_matches('/'), HEALTH_PATH);
            match self.http.get(&url).timeout(timeout).send().await {
                Ok(r) => r.status().is_success(),
                Err(e) => {
                    debug!(url = %url, error = %e, "Health probe failed");
                    false
                }
            }
        })
    }

    fn reachable<'a>(&'a self, url: &'a str, timeout: Duration) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.http.get(url).timeout(timeout).send().await.is_ok()
        })
    }
}
