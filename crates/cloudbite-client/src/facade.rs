/// Connection manager facade.
///
/// One long-lived instance composes the network watcher, discovery
/// engine, health monitor and reconnect orchestrator into a single
/// `ConnectionState` stream. The UI layer only ever talks to this type:
/// `subscribe()` for state, `retry()` to force a fresh attempt.
///
/// Reaction rules, enforced by three watcher tasks:
/// 1. link lost while connected → tear down, stop monitoring, cancel
///    any reconnect
/// 2. link present + disconnected + no cycle running → auto-reconnect
///    (with explicit backoff between failed cycles)
/// 3. healthy→unhealthy while connected → disconnect, debounce, then
///    auto-reconnect
/// 4. reconnect reaches Connected → re-fetch the confirmed URL, restart
///    the health monitor after a settle delay, re-init the API client
/// 5. reconnect reaches RunningDiscovery → surface `is_searching`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiClientFactory;
use crate::config::ClientConfig;
use crate::config::ReconnectSection;
use crate::discovery::DiscoveryEngine;
use crate::error::ConnectError;
use crate::health::HealthMonitor;
use crate::netwatch::LinkStatus;
use crate::probe::Probe;
use crate::reconnect::{ReconnectOrchestrator, ReconnectStatus};
use crate::storage::ConnectionStore;
use crate::ConnectionMode;

/// Immutable snapshot pushed to every subscriber on each change.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub is_searching: bool,
    pub is_connected: bool,
    pub is_healthy: bool,
    pub has_wifi: bool,
    pub server_url: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

pub struct ConnectionManager {
    config: ReconnectSection,
    engine: Arc<DiscoveryEngine>,
    health: Arc<HealthMonitor>,
    reconnect: Arc<ReconnectOrchestrator>,
    api: Arc<ApiClientFactory>,
    store: Arc<ConnectionStore>,
    link: watch::Receiver<LinkStatus>,
    state: watch::Sender<ConnectionState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    init: OnceCell<()>,
    closed: AtomicBool,
}

impl ConnectionManager {
    /// Build the full subsystem. Created once at startup and shared by
    /// reference; nothing here is a global.
    pub fn new(
        config: &ClientConfig,
        probe: Arc<dyn Probe>,
        store: Arc<ConnectionStore>,
        link: watch::Receiver<LinkStatus>,
    ) -> Arc<Self> {
        let engine = Arc::new(DiscoveryEngine::new(
            config.discovery.clone(),
            Arc::clone(&probe),
            Arc::clone(&store),
        ));
        let health = Arc::new(HealthMonitor::new(config.health.clone(), probe));
        let reconnect = Arc::new(ReconnectOrchestrator::new(Arc::clone(&engine), link.clone()));

        let (state, _) = watch::channel(ConnectionState {
            has_wifi: link.borrow().is_connected,
            ..ConnectionState::default()
        });

        Arc::new(Self {
            config: config.reconnect.clone(),
            engine,
            health,
            reconnect,
            api: Arc::new(ApiClientFactory::new()),
            store,
            link,
            state,
            tasks: Mutex::new(Vec::new()),
            init: OnceCell::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// First connection attempt + reactive wiring. Idempotent:
    /// concurrent callers join the one in-flight initialization.
    pub async fn initialize(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        self.init
            .get_or_init(|| async move {
                // Watchers first: a reconnect cycle started by the first
                // connect must not be able to finish unobserved.
                manager.spawn_watchers();
                manager.first_connect().await;
            })
            .await;
    }

    /// Subscribe to state snapshots. The current snapshot is readable
    /// synchronously on the returned receiver; dropping it unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Force a full fresh connection attempt, bypassing every cache.
    pub async fn retry(self: &Arc<Self>) {
        info!("Manual retry requested");
        match self.store.mode().await {
            ConnectionMode::Auto => {
                self.reconnect.stop_auto_reconnect();
                self.engine.clear_cache().await;
                self.state.send_modify(|state| {
                    state.error = None;
                    state.is_searching = true;
                });
                self.reconnect.start_forced_reconnect();
            }
            ConnectionMode::Manual | ConnectionMode::Remote => {
                self.connect_via_override().await;
            }
        }
    }

    /// Unsubscribe from all collaborators and stop the monitors. Safe
    /// to call repeatedly.
    pub fn cleanup(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.health.stop_monitoring();
        self.reconnect.stop_auto_reconnect();
        debug!("Connection manager cleaned up");
    }

    pub fn engine(&self) -> &Arc<DiscoveryEngine> {
        &self.engine
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn reconnector(&self) -> &Arc<ReconnectOrchestrator> {
        &self.reconnect
    }

    pub fn api(&self) -> &Arc<ApiClientFactory> {
        &self.api
    }

    // ── First connection ────────────────────────────────────────────────

    async fn first_connect(self: &Arc<Self>) {
        match self.store.mode().await {
            ConnectionMode::Manual | ConnectionMode::Remote => {
                self.connect_via_override().await;
            }
            ConnectionMode::Auto => {
                self.state.send_modify(|state| state.is_searching = true);
                match self.engine.get_api_url().await {
                    Ok(url) => self.mark_connected(&url),
                    Err(e) => {
                        debug!(error = %e, "No known server, starting auto-reconnect");
                        self.state.send_modify(|state| state.is_searching = false);
                        self.reconnect.start_auto_reconnect();
                    }
                }
            }
        }
    }

    /// Manual/remote modes: validate the operator-entered URL, no scan.
    async fn connect_via_override(self: &Arc<Self>) {
        let Some(url) = self.store.manual_url().await else {
            warn!("Manual/remote mode selected but no server URL configured");
            self.state.send_modify(|state| {
                state.error = Some("no server URL configured".to_string());
            });
            return;
        };

        if self.engine.test_connection(&url).await.is_some() {
            self.mark_connected(&url);
        } else {
            warn!(url = %url, "Configured server did not validate");
            self.state.send_modify(|state| {
                state.is_connected = false;
                state.error = Some(ConnectError::ServerUnhealthy { url: url.clone() }.to_string());
            });
        }
    }

    fn mark_connected(self: &Arc<Self>, url: &str) {
        self.api.initialize(url);
        self.health.start_monitoring(url);
        self.state.send_modify(|state| {
            state.is_connected = true;
            state.is_healthy = true;
            state.is_searching = false;
            state.server_url = Some(url.to_string());
            state.error = None;
        });
        info!(url = %url, "Connected");
    }

    // ── Reaction watchers ───────────────────────────────────────────────

    fn spawn_watchers(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(tokio::spawn(Self::watch_link(Arc::clone(self))));
        tasks.push(tokio::spawn(Self::watch_health(Arc::clone(self))));
        tasks.push(tokio::spawn(Self::watch_reconnect(Arc::clone(self))));
    }

    async fn watch_link(manager: Arc<Self>) {
        let mut link = manager.link.clone();
        loop {
            if link.changed().await.is_err() {
                break;
            }
            let status = *link.borrow();

            if !status.is_connected {
                // Rule 1: tear down immediately, cancel any cycle.
                info!("Network link lost");
                manager.state.send_modify(|state| {
                    state.has_wifi = false;
                    state.is_connected = false;
                    state.is_healthy = false;
                    state.server_url = None;
                });
                manager.health.stop_monitoring();
                manager.reconnect.stop_auto_reconnect();
                continue;
            }

            manager.state.send_modify(|state| state.has_wifi = true);

            // Rule 2: link is back and nothing is connected or running.
            let disconnected = !manager.state.borrow().is_connected;
            if disconnected && !manager.reconnect.state().is_reconnecting {
                info!("Network link available, starting auto-reconnect");
                manager.reconnect.start_auto_reconnect();
            }
        }
    }

    async fn watch_health(manager: Arc<Self>) {
        let mut rx = manager.health.subscribe();
        let mut was_available = rx.borrow().is_available;
        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let health = rx.borrow().clone();
            manager
                .state
                .send_modify(|state| state.is_healthy = health.is_available);

            // Rule 3: healthy → unhealthy while connected.
            if was_available && !health.is_available && manager.state.borrow().is_connected {
                let url = manager.state.borrow().server_url.clone().unwrap_or_default();
                warn!(url = %url, "Connected server became unhealthy");
                manager.state.send_modify(|state| {
                    state.is_connected = false;
                    state.server_url = None;
                    state.error =
                        Some(ConnectError::ServerUnhealthy { url: url.clone() }.to_string());
                });
                manager.health.stop_monitoring();

                // Debounce so this cannot race the link watcher into a
                // duplicate cycle.
                let debounce = Duration::from_millis(manager.config.health_debounce_ms);
                let mgr = Arc::clone(&manager);
                tokio::spawn(async move {
                    tokio::time::sleep(debounce).await;
                    if mgr.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    if mgr.link.borrow().is_connected
                        && !mgr.state.borrow().is_connected
                        && !mgr.reconnect.state().is_reconnecting
                    {
                        mgr.reconnect.start_auto_reconnect();
                    }
                });
            }
            was_available = health.is_available;
        }
    }

    async fn watch_reconnect(manager: Arc<Self>) {
        let mut rx = manager.reconnect.subscribe();
        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let cycle = rx.borrow().clone();
            manager
                .state
                .send_modify(|state| state.attempts = cycle.attempts);

            match cycle.status {
                // Rule 5: searching is visible as soon as the scan starts.
                ReconnectStatus::RunningDiscovery => {
                    manager.state.send_modify(|state| state.is_searching = true);
                }
                ReconnectStatus::CheckingNetwork | ReconnectStatus::CheckingHealth => {}
                ReconnectStatus::Connected => {
                    // Rule 4: confirm the URL, restart monitoring after a
                    // settle delay, re-initialize the API client.
                    let Some(url) = manager.engine.get_last_known_url().await else {
                        warn!("Reconnect reported connected but no URL is known");
                        continue;
                    };
                    manager.api.initialize(&url);
                    manager.state.send_modify(|state| {
                        state.is_connected = true;
                        state.is_healthy = true;
                        state.is_searching = false;
                        state.server_url = Some(url.clone());
                        state.error = None;
                    });

                    manager.health.stop_monitoring();
                    tokio::time::sleep(Duration::from_millis(manager.config.settle_delay_ms))
                        .await;
                    if !manager.closed.load(Ordering::SeqCst) {
                        manager.health.start_monitoring(url.as_str());
                    }
                }
                ReconnectStatus::Failed => {
                    manager.state.send_modify(|state| {
                        state.is_connected = false;
                        state.is_searching = false;
                        state.error = cycle.last_error.clone();
                    });

                    // Rule 2, automatic flavor: retry after an explicit
                    // backoff while the link is still up.
                    let delay = manager.backoff_delay(cycle.attempts);
                    debug!(attempts = cycle.attempts, delay_ms = delay.as_millis() as u64,
                        "Scheduling reconnect retry");
                    let mgr = Arc::clone(&manager);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if mgr.closed.load(Ordering::SeqCst) {
                            return;
                        }
                        if mgr.link.borrow().is_connected
                            && !mgr.state.borrow().is_connected
                            && !mgr.reconnect.state().is_reconnecting
                        {
                            mgr.reconnect.start_auto_reconnect();
                        }
                    });
                }
                ReconnectStatus::NoWifi => {
                    manager.state.send_modify(|state| {
                        state.has_wifi = false;
                        state.is_searching = false;
                        state.error = cycle.last_error.clone();
                    });
                }
                ReconnectStatus::Idle => {
                    manager.state.send_modify(|state| state.is_searching = false);
                }
            }
        }
    }

    /// Delay before the next automatic cycle: zero until something has
    /// failed, then initial × multiplier^(attempts-1), capped.
    fn backoff_delay(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let initial = self.config.backoff_initial_ms as f64;
        let multiplier = self.config.backoff_multiplier.max(1.0);
        let exponent = (attempts - 1).min(16) as i32;
        let ms = (initial * multiplier.powi(exponent)).min(self.config.backoff_max_ms as f64);
        Duration::from_millis(ms as u64)
    }
}
