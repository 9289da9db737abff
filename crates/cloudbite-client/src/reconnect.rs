/// Automatic reconnect state machine.
///
/// On connectivity loss the cycle walks: checking-network →
/// checking-health (quick revalidation of the last known URL) →
/// running-discovery (full scan) → connected | failed, with no-wifi as
/// an early sink when the device has no usable link. Every phase
/// appends a human-readable log line and publishes the state to watch
/// subscribers. Nothing in the cycle panics or returns an error — all
/// outcomes land in `ReconnectState`.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::DiscoveryEngine;
use crate::error::ConnectError;
use crate::netwatch::LinkStatus;

/// Closed status set — consumers match exhaustively, so a new phase
/// cannot be silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStatus {
    Idle,
    CheckingNetwork,
    CheckingHealth,
    RunningDiscovery,
    NoWifi,
    Failed,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ReconnectState {
    pub status: ReconnectStatus,
    pub is_reconnecting: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub logs: Vec<String>,
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self {
            status: ReconnectStatus::Idle,
            is_reconnecting: false,
            attempts: 0,
            last_error: None,
            logs: Vec::new(),
        }
    }
}

/// Keep the log readable for a status modal, not unbounded.
const MAX_LOG_LINES: usize = 50;

pub struct ReconnectOrchestrator {
    engine: Arc<DiscoveryEngine>,
    link: watch::Receiver<LinkStatus>,
    state: watch::Sender<ReconnectState>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl ReconnectOrchestrator {
    pub fn new(engine: Arc<DiscoveryEngine>, link: watch::Receiver<LinkStatus>) -> Self {
        let (state, _) = watch::channel(ReconnectState::default());
        Self {
            engine,
            link,
            state,
            cancel: Mutex::new(None),
        }
    }

    /// Start a reconnect cycle. No-op while one is already running.
    pub fn start_auto_reconnect(self: &Arc<Self>) {
        self.start(false);
    }

    /// Start a cycle that skips the cached-URL quick check and goes
    /// straight to a full scan (the facade's `retry()`).
    pub fn start_forced_reconnect(self: &Arc<Self>) {
        self.start(true);
    }

    fn start(self: &Arc<Self>, force_discovery: bool) {
        let mut cancel = self.cancel.lock().unwrap();
        if self.state.borrow().is_reconnecting {
            debug!("Reconnect cycle already in progress");
            return;
        }

        let token = CancellationToken::new();
        *cancel = Some(token.clone());

        self.state.send_modify(|state| {
            state.is_reconnecting = true;
            state.status = ReconnectStatus::CheckingNetwork;
            state.last_error = None;
            state.logs.clear();
        });

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Reconnect cycle cancelled");
                }
                _ = orchestrator.run_cycle(force_discovery) => {}
            }
        });
    }

    /// Cancel the in-flight cycle. Logs are preserved until the next
    /// explicit start. Idempotent.
    pub fn stop_auto_reconnect(&self) {
        let token = self.cancel.lock().unwrap().take();
        if let Some(token) = token {
            token.cancel();
        }
        // Only notify when a cycle was actually cancelled; a stale
        // re-notification would make subscribers reprocess the previous
        // terminal status.
        if self.state.borrow().is_reconnecting {
            self.state.send_modify(|state| {
                state.is_reconnecting = false;
                state.status = ReconnectStatus::Idle;
                push_log(state, "Reconnect cancelled");
            });
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconnectState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ReconnectState {
        self.state.borrow().clone()
    }

    async fn run_cycle(&self, force_discovery: bool) {
        self.transition(ReconnectStatus::CheckingNetwork, "Checking network connectivity");

        let link = *self.link.borrow();
        if !link.is_connected {
            warn!("Reconnect aborted: no active network link");
            self.state.send_modify(|state| {
                state.status = ReconnectStatus::NoWifi;
                state.is_reconnecting = false;
                state.last_error = Some(ConnectError::NetworkUnavailable.to_string());
                push_log(state, "No active WiFi or ethernet link");
            });
            return;
        }

        if !force_discovery {
            self.transition(ReconnectStatus::CheckingHealth, "Checking the last known server");
            match self.engine.get_api_url().await {
                Ok(url) => {
                    info!(url = %url, "Reconnected to last known server");
                    self.finish_connected(&format!("Reconnected to {}", url));
                    return;
                }
                Err(_) => {
                    self.push_log("Last known server did not respond");
                }
            }
        }

        self.transition(ReconnectStatus::RunningDiscovery, "Scanning the local network for a server");
        match self.engine.force_rediscovery().await {
            Ok(url) => {
                info!(url = %url, "Discovery found a server");
                self.finish_connected(&format!("Connected to {}", url));
            }
            Err(e) => {
                warn!(error = %e, "Reconnect cycle failed");
                self.state.send_modify(|state| {
                    state.status = ReconnectStatus::Failed;
                    state.is_reconnecting = false;
                    state.attempts += 1;
                    state.last_error = Some(e.to_string());
                    push_log(state, &format!("Reconnect failed: {}", e));
                });
            }
        }
    }

    fn finish_connected(&self, log_line: &str) {
        self.state.send_modify(|state| {
            state.status = ReconnectStatus::Connected;
            state.is_reconnecting = false;
            state.attempts = 0;
            state.last_error = None;
            push_log(state, log_line);
        });
    }

    fn transition(&self, status: ReconnectStatus, log_line: &str) {
        self.state.send_modify(|state| {
            state.status = status;
            push_log(state, log_line);
        });
    }

    fn push_log(&self, line: &str) {
        self.state.send_modify(|state| push_log(state, line));
    }
}

fn push_log(state: &mut ReconnectState, line: &str) {
    if state.logs.len() >= MAX_LOG_LINES {
        state.logs.remove(0);
    }
    state.logs.push(line.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::DiscoverySection;
    use crate::probe::Probe;
    use crate::storage::ConnectionStore;
    use crate::testutil::ScriptedProbe;

    struct Fixture {
        probe: Arc<ScriptedProbe>,
        engine: Arc<DiscoveryEngine>,
        link_tx: watch::Sender<LinkStatus>,
        orchestrator: Arc<ReconnectOrchestrator>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(last_url: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ConnectionStore::with_path(dir.path().join("state.json"))
                .await
                .unwrap(),
        );
        if let Some(url) = last_url {
            store.set_last_api_url(Some(url.to_string())).await.unwrap();
        }

        let probe = Arc::new(ScriptedProbe::new());
        let config = DiscoverySection {
            subnet_override: Some("192.168.1".to_string()),
            ..DiscoverySection::default()
        };
        let engine = Arc::new(DiscoveryEngine::new(
            config,
            Arc::clone(&probe) as Arc<dyn Probe>,
            store,
        ));

        let (link_tx, link_rx) = watch::channel(LinkStatus {
            is_connected: true,
            kind: crate::netwatch::LinkKind::Wifi,
        });

        let orchestrator = Arc::new(ReconnectOrchestrator::new(Arc::clone(&engine), link_rx));

        Fixture {
            probe,
            engine,
            link_tx,
            orchestrator,
            _dir: dir,
        }
    }

    async fn wait_until_settled(orchestrator: &Arc<ReconnectOrchestrator>) {
        let mut rx = orchestrator.subscribe();
        loop {
            if !rx.borrow().is_reconnecting {
                return;
            }
            rx.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_no_wifi_is_a_terminal_state() {
        let fx = fixture(None).await;
        fx.link_tx
            .send(LinkStatus::disconnected())
            .unwrap();

        fx.orchestrator.start_auto_reconnect();
        wait_until_settled(&fx.orchestrator).await;

        let state = fx.orchestrator.state();
        assert_eq!(state.status, ReconnectStatus::NoWifi);
        assert!(!state.is_reconnecting);
        assert!(state.last_error.is_some());
        assert!(!state.logs.is_empty());
        assert_eq!(fx.probe.discovery_calls(), 0);
    }

    #[tokio::test]
    async fn test_quick_check_reconnects_without_scan() {
        let fx = fixture(Some("http://192.168.1.50:3737")).await;
        fx.probe.add_server("http://192.168.1.50:3737");

        fx.orchestrator.start_auto_reconnect();
        wait_until_settled(&fx.orchestrator).await;

        let state = fx.orchestrator.state();
        assert_eq!(state.status, ReconnectStatus::Connected);
        assert_eq!(state.attempts, 0);
        assert_eq!(fx.probe.discovery_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_discovery_when_quick_check_fails() {
        let fx = fixture(Some("http://192.168.1.50:3737")).await;
        // .50 is gone; a server now answers at .42.
        fx.probe.add_server("http://192.168.1.42:3737");
        fx.probe.set_healthy("http://192.168.1.50:3737", false);

        fx.orchestrator.start_auto_reconnect();
        wait_until_settled(&fx.orchestrator).await;

        let state = fx.orchestrator.state();
        assert_eq!(state.status, ReconnectStatus::Connected);
        assert_eq!(
            fx.engine.get_last_known_url().await.as_deref(),
            Some("http://192.168.1.42:3737")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_increments_attempts_and_records_error() {
        let fx = fixture(None).await;

        fx.orchestrator.start_auto_reconnect();
        wait_until_settled(&fx.orchestrator).await;

        let state = fx.orchestrator.state();
        assert_eq!(state.status, ReconnectStatus::Failed);
        assert_eq!(state.attempts, 1);
        assert!(state
            .last_error
            .as_deref()
            .unwrap()
            .contains("no compatible server"));

        fx.orchestrator.start_auto_reconnect();
        wait_until_settled(&fx.orchestrator).await;
        assert_eq!(fx.orchestrator.state().attempts, 2);
    }

    #[tokio::test]
    async fn test_overlapping_starts_run_one_cycle() {
        let fx = fixture(Some("http://192.168.1.50:3737")).await;
        fx.probe.add_server("http://192.168.1.50:3737");
        fx.probe
            .set_delay("http://192.168.1.50:3737", Duration::from_millis(50));

        fx.orchestrator.start_auto_reconnect();
        fx.orchestrator.start_auto_reconnect();
        fx.orchestrator.start_auto_reconnect();
        wait_until_settled(&fx.orchestrator).await;

        // One cycle, one quick check.
        assert_eq!(fx.probe.health_calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_cancels_and_preserves_logs() {
        let fx = fixture(Some("http://192.168.1.50:3737")).await;
        fx.probe.add_server("http://192.168.1.50:3737");
        fx.probe
            .set_delay("http://192.168.1.50:3737", Duration::from_secs(10));

        fx.orchestrator.start_auto_reconnect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        fx.orchestrator.stop_auto_reconnect();

        let state = fx.orchestrator.state();
        assert!(!state.is_reconnecting);
        assert_eq!(state.status, ReconnectStatus::Idle);
        assert!(state.logs.iter().any(|l| l.contains("cancelled")));

        // Next start clears the old logs.
        fx.probe.set_delay("http://192.168.1.50:3737", Duration::ZERO);
        fx.orchestrator.start_auto_reconnect();
        wait_until_settled(&fx.orchestrator).await;
        let state = fx.orchestrator.state();
        assert!(!state.logs.iter().any(|l| l.contains("cancelled")));
        assert_eq!(state.status, ReconnectStatus::Connected);

        fx.orchestrator.stop_auto_reconnect(); // idempotent after completion
    }
}
