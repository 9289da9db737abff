/// Periodic health verification of the connected server.
///
/// A single failed probe never flips the state: venue WiFi stalls for a
/// second all the time. Only `failure_threshold` consecutive failures
/// mark the server unavailable; one success flips it back. No probe
/// outcome ever escapes the loop as an error — every result becomes a
/// state update on the watch channel.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HealthSection;
use crate::probe::Probe;

#[derive(Debug, Clone)]
pub struct HealthState {
    pub is_available: bool,
    pub message: Option<String>,
    pub last_checked: Option<SystemTime>,
}

impl Default for HealthState {
    fn default() -> Self {
        // Optimistic until a probe says otherwise; monitoring only runs
        // while a server is connected.
        Self {
            is_available: true,
            message: None,
            last_checked: None,
        }
    }
}

pub struct HealthMonitor {
    config: HealthSection,
    probe: Arc<dyn Probe>,
    state: watch::Sender<HealthState>,
    target: Mutex<Option<String>>,
    consecutive_failures: AtomicU32,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(config: HealthSection, probe: Arc<dyn Probe>) -> Self {
        let (state, _) = watch::channel(HealthState::default());
        Self {
            config,
            probe,
            state,
            target: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
            task: Mutex::new(None),
        }
    }

    /// Begin periodic polling of `base_url`. Restarts cleanly if a
    /// monitor is already running.
    pub fn start_monitoring(self: &Arc<Self>, base_url: impl Into<String>) {
        self.stop_monitoring();

        let url = base_url.into();
        info!(url = %url, interval_secs = self.config.interval_secs, "Health monitoring started");
        *self.target.lock().unwrap() = Some(url);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.state.send_replace(HealthState::default());

        let monitor = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(monitor.config.interval_secs));
            loop {
                interval.tick().await;
                monitor.check_once().await;
            }
        });
        *self.task.lock().unwrap() = Some(task);
    }

    /// Cancel the polling loop. Idempotent.
    pub fn stop_monitoring(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
            debug!("Health monitoring stopped");
        }
    }

    /// One immediate probe of the monitored server. Resolves to `false`
    /// on any failure, including no target being set; never panics.
    pub async fn force_check(&self) -> bool {
        self.check_once().await
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> HealthState {
        self.state.borrow().clone()
    }

    async fn check_once(&self) -> bool {
        let target = self.target.lock().unwrap().clone();
        let Some(url) = target else {
            return false;
        };

        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let ok = self.probe.health(&url, timeout).await;
        self.apply_outcome(&url, ok);
        ok
    }

    fn apply_outcome(&self, url: &str, ok: bool) {
        let now = SystemTime::now();

        if ok {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            self.state.send_modify(|state| {
                if !state.is_available {
                    info!(url = %url, "Server healthy again");
                }
                state.is_available = true;
                state.message = None;
                state.last_checked = Some(now);
            });
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let threshold = self.config.failure_threshold.max(1);
        self.state.send_modify(|state| {
            state.last_checked = Some(now);
            if failures >= threshold {
                if state.is_available {
                    warn!(url = %url, failures = failures, "Server marked unavailable");
                }
                state.is_available = false;
                state.message = Some(format!(
                    "health check failed {} times in a row",
                    failures
                ));
            } else {
                debug!(url = %url, failures = failures, "Health probe failed, tolerating");
            }
        });
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedProbe;

    const URL: &str = "http://192.168.1.50:3737";

    fn monitor(probe: &Arc<ScriptedProbe>) -> Arc<HealthMonitor> {
        Arc::new(HealthMonitor::new(
            HealthSection::default(),
            Arc::clone(probe) as Arc<dyn Probe>,
        ))
    }

    #[tokio::test]
    async fn test_force_check_without_target_is_false() {
        let probe = Arc::new(ScriptedProbe::new());
        let monitor = monitor(&probe);
        assert!(!monitor.force_check().await);
        assert_eq!(probe.health_calls(), 0);
    }

    #[tokio::test]
    async fn test_force_check_absorbs_probe_failure() {
        let probe = Arc::new(ScriptedProbe::new());
        let monitor = monitor(&probe);
        *monitor.target.lock().unwrap() = Some(URL.to_string());

        // URL is not in the healthy set — the probe fails; no panic,
        // just `false` and a state update.
        assert!(!monitor.force_check().await);
        assert!(monitor.state().last_checked.is_some());
    }

    #[tokio::test]
    async fn test_single_failure_does_not_flip() {
        let probe = Arc::new(ScriptedProbe::new());
        let monitor = monitor(&probe);
        *monitor.target.lock().unwrap() = Some(URL.to_string());

        monitor.force_check().await;
        assert!(monitor.state().is_available);
    }

    #[tokio::test]
    async fn test_two_consecutive_failures_flip_unavailable() {
        let probe = Arc::new(ScriptedProbe::new());
        let monitor = monitor(&probe);
        *monitor.target.lock().unwrap() = Some(URL.to_string());

        monitor.force_check().await;
        monitor.force_check().await;
        let state = monitor.state();
        assert!(!state.is_available);
        assert!(state.message.is_some());
    }

    #[tokio::test]
    async fn test_one_success_flips_back_and_resets_counter() {
        let probe = Arc::new(ScriptedProbe::new());
        let monitor = monitor(&probe);
        *monitor.target.lock().unwrap() = Some(URL.to_string());

        monitor.force_check().await;
        monitor.force_check().await;
        assert!(!monitor.state().is_available);

        probe.add_server(URL);
        assert!(monitor.force_check().await);
        assert!(monitor.state().is_available);

        // Counter was reset: one new failure is tolerated again.
        probe.set_healthy(URL, false);
        monitor.force_check().await;
        assert!(monitor.state().is_available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_loop_polls_periodically() {
        let probe = Arc::new(ScriptedProbe::new());
        probe.add_server(URL);
        let monitor = monitor(&probe);

        monitor.start_monitoring(URL);
        tokio::time::sleep(Duration::from_secs(45)).await;
        monitor.stop_monitoring();

        // Ticks at 0s/20s/40s.
        assert!(probe.health_calls() >= 3);
        assert!(monitor.state().is_available);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let probe = Arc::new(ScriptedProbe::new());
        let monitor = monitor(&probe);
        monitor.stop_monitoring();
        monitor.start_monitoring(URL);
        monitor.stop_monitoring();
        monitor.stop_monitoring();
    }
}
