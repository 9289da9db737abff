/// LAN discovery engine.
///
/// Finds a compatible backend by probing the local /24 subnet over HTTP.
/// Candidate addresses are ordered by how likely a venue server is to
/// sit on them, probed in bounded concurrent waves, and the first
/// compatible responder (in candidate order) wins. The winning URL is
/// cached in memory and persisted so later sessions can skip the scan.
///
/// One scan runs process-wide at a time; concurrent callers attach to
/// the in-flight scan. Forced rediscovery is rate-limited while a known
/// URL exists.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use cloudbite_protocol::discovery::DiscoveryResponse;

use crate::config::DiscoverySection;
use crate::error::{ConnectError, ConnectResult};
use crate::netwatch;
use crate::probe::Probe;
use crate::singleflight::SingleFlight;
use crate::storage::ConnectionStore;
use crate::ServerDescriptor;

/// Gateways probed (best-effort) to guess the local subnet when the
/// interface list gives no answer.
const COMMON_GATEWAYS: &[&str] = &[
    "192.168.1.1",
    "192.168.0.1",
    "10.0.0.1",
    "10.0.1.1",
    "172.16.0.1",
    "192.168.2.1",
    "192.168.50.1",
    "192.168.100.1",
];

pub struct DiscoveryEngine {
    config: DiscoverySection,
    probe: Arc<dyn Probe>,
    store: Arc<ConnectionStore>,
    cached: RwLock<Option<ServerDescriptor>>,
    scan: SingleFlight<ConnectResult<String>>,
    last_scan: Mutex<Option<Instant>>,
}

impl DiscoveryEngine {
    pub fn new(
        config: DiscoverySection,
        probe: Arc<dyn Probe>,
        store: Arc<ConnectionStore>,
    ) -> Self {
        Self {
            config,
            probe,
            store,
            cached: RwLock::new(None),
            scan: SingleFlight::new("discovery.scan"),
            last_scan: Mutex::new(None),
        }
    }

    /// Current best URL: the in-memory cache, then the persisted last
    /// known URL, each behind a quick revalidation probe. Never scans.
    pub async fn get_api_url(&self) -> ConnectResult<String> {
        let quick = Duration::from_millis(self.config.quick_check_timeout_ms);

        let cached_url = self.cached.read().await.as_ref().map(|d| d.url.clone());
        if let Some(url) = cached_url {
            if self.probe.health(&url, quick).await {
                return Ok(url);
            }
            warn!(url = %url, "Cached URL failed revalidation, dropping it");
            *self.cached.write().await = None;
        }

        if let Some(url) = self.store.last_api_url().await {
            if self.probe.health(&url, quick).await {
                debug!(url = %url, "Persisted URL revalidated");
                *self.cached.write().await = Some(ServerDescriptor::new(url.clone()));
                return Ok(url);
            }
        }

        Err(ConnectError::ServerNotFound)
    }

    /// Drop everything and scan the subnet from scratch.
    ///
    /// If the minimum rescan interval has not elapsed and a known URL
    /// still exists, that URL is returned without any probing.
    pub async fn force_rediscovery(self: &Arc<Self>) -> ConnectResult<String> {
        let within_interval = {
            let last = self.last_scan.lock().unwrap();
            let min = Duration::from_secs(self.config.min_rescan_interval_secs);
            last.map(|at| at.elapsed() < min).unwrap_or(false)
        };
        if within_interval {
            if let Some(url) = self.get_last_known_url().await {
                debug!(url = %url, "Rediscovery rate-limited, returning known URL");
                return Ok(url);
            }
        }

        let engine = Arc::clone(self);
        self.scan
            .run(move || {
                let engine = Arc::clone(&engine);
                async move { engine.scan_and_persist().await }
            })
            .await
    }

    /// Cache else persisted URL, no network I/O.
    pub async fn get_last_known_url(&self) -> Option<String> {
        if let Some(desc) = self.cached.read().await.as_ref() {
            return Some(desc.url.clone());
        }
        self.store.last_api_url().await
    }

    /// Drop the in-memory descriptor. The persisted copy survives; a
    /// forced rediscovery is what clears both.
    pub async fn clear_cache(&self) {
        *self.cached.write().await = None;
    }

    /// Manual "test connection": one discovery probe against an
    /// operator-entered URL, with the generous manual-test timeout.
    pub async fn test_connection(&self, url: &str) -> Option<DiscoveryResponse> {
        let timeout = Duration::from_millis(self.config.test_timeout_ms);
        let payload = self.probe.discovery(url, timeout).await?;
        payload.is_compatible().then_some(payload)
    }

    async fn scan_and_persist(self: Arc<Self>) -> ConnectResult<String> {
        *self.last_scan.lock().unwrap() = Some(Instant::now());
        *self.cached.write().await = None;
        if let Err(e) = self.store.set_last_api_url(None).await {
            warn!(error = %e, "Failed to clear persisted URL");
        }

        let url = self.run_scan().await?;

        *self.cached.write().await = Some(ServerDescriptor::new(url.clone()));
        if let Err(e) = self.store.set_last_api_url(Some(url.clone())).await {
            // The descriptor is still usable this session.
            warn!(error = %e, "Failed to persist discovered URL");
        }
        Ok(url)
    }

    async fn run_scan(&self) -> ConnectResult<String> {
        let subnet = self.detect_subnet().await;
        info!(subnet = %subnet, port = self.config.api_port, "Scanning for server");

        let urls: Vec<String> = candidate_hosts()
            .into_iter()
            .map(|host| {
                cloudbite_protocol::base_url(
                    &format!("{}.{}", subnet, host),
                    self.config.api_port,
                )
            })
            .collect();

        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let chunk_size = self.config.chunk_size.max(1);

        for (wave_no, chunk) in urls.chunks(chunk_size).enumerate() {
            let mut wave = JoinSet::new();
            for (idx, url) in chunk.iter().enumerate() {
                let probe = Arc::clone(&self.probe);
                let url = url.clone();
                wave.spawn(async move {
                    let compatible = probe
                        .discovery(&url, timeout)
                        .await
                        .map(|payload| payload.is_compatible())
                        .unwrap_or(false);
                    (idx, url, compatible)
                });
            }

            // Let the wave settle (each probe is bounded by its timeout),
            // then pick the responder earliest in candidate order so the
            // winner never depends on which request finished first.
            let mut best: Option<(usize, String)> = None;
            while let Some(joined) = wave.join_next().await {
                let Ok((idx, url, compatible)) = joined else {
                    continue;
                };
                if compatible && best.as_ref().map(|(b, _)| idx < *b).unwrap_or(true) {
                    best = Some((idx, url));
                }
            }

            if let Some((_, url)) = best {
                info!(url = %url, "Found compatible server");
                return Ok(url);
            }
            debug!(wave = wave_no, probed = chunk.len(), "No responder in wave");
        }

        warn!(subnet = %subnet, "Scan exhausted without a compatible server");
        Err(ConnectError::ServerNotFound)
    }

    /// Subnet /24 prefix: config override, then the local interface
    /// address, then best-effort gateway probing, then the configured
    /// fallback.
    async fn detect_subnet(&self) -> String {
        if let Some(subnet) = &self.config.subnet_override {
            return subnet.clone();
        }

        if let Some(ip) = netwatch::local_ipv4() {
            let prefix = slash24(ip);
            debug!(subnet = %prefix, "Subnet from local interface");
            return prefix;
        }

        if let Some(prefix) = self.probe_gateways().await {
            debug!(subnet = %prefix, "Subnet from gateway probe");
            return prefix;
        }

        debug!(subnet = %self.config.fallback_subnet, "Subnet detection fell back to default");
        self.config.fallback_subnet.clone()
    }

    async fn probe_gateways(&self) -> Option<String> {
        let timeout = Duration::from_millis(self.config.gateway_timeout_ms);

        let mut probes = JoinSet::new();
        for gateway in COMMON_GATEWAYS {
            let probe = Arc::clone(&self.probe);
            probes.spawn(async move {
                let url = format!("http://{}", gateway);
                probe.reachable(&url, timeout).await.then_some(*gateway)
            });
        }

        // First responder wins; the rest are aborted on drop.
        while let Some(joined) = probes.join_next().await {
            if let Ok(Some(gateway)) = joined {
                let ip: Ipv4Addr = gateway.parse().ok()?;
                return Some(slash24(ip));
            }
        }
        None
    }
}

/// Hosts ordered by priority: the ranges venue servers usually occupy
/// first, then the rest of the /24.
fn candidate_hosts() -> Vec<u8> {
    let priority: Vec<u8> = (1..=50).chain(100..=110).chain(200..=210).collect();
    let mut hosts = priority.clone();
    hosts.extend((1..=254).filter(|h| !priority.contains(h)));
    hosts
}

fn slash24(ip: Ipv4Addr) -> String {
    let octets = ip.octets();
    format!("{}.{}.{}", octets[0], octets[1], octets[2])
}
