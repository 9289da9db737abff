/// Device connectivity watcher.
///
/// Polls the OS interface list and publishes a `LinkStatus` over a watch
/// channel whenever it changes. Consumers treat this as the device
/// connectivity collaborator: current value readable at any time,
/// changes observable via `subscribe()`.

use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Kind of the active link, classified from the interface name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Wifi,
    Ethernet,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub is_connected: bool,
    pub kind: LinkKind,
}

impl LinkStatus {
    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            kind: LinkKind::Other,
        }
    }
}

/// Snapshot of the current link by enumerating interfaces.
///
/// Name classification is heuristic: `wl*` (Linux wireless), `ath*` →
/// WiFi; `eth*`, `enp*`/`eno*`, macOS `en*` → Ethernet-or-better. Either
/// counts as connected for our purposes.
pub fn current_link_status() -> LinkStatus {
    let interfaces = match get_if_addrs::get_if_addrs() {
        Ok(list) => list,
        Err(e) => {
            debug!(error = %e, "Interface enumeration failed");
            return LinkStatus::disconnected();
        }
    };

    for iface in interfaces {
        if iface.is_loopback() {
            continue;
        }
        // Only IPv4 links matter for subnet scanning.
        if !matches!(iface.ip(), IpAddr::V4(_)) {
            continue;
        }
        let kind = classify(&iface.name);
        return LinkStatus {
            is_connected: true,
            kind,
        };
    }

    LinkStatus::disconnected()
}

fn classify(name: &str) -> LinkKind {
    let name = name.to_ascii_lowercase();
    if name.starts_with("wl") || name.starts_with("ath") || name.starts_with("wifi") {
        LinkKind::Wifi
    } else if name.starts_with("eth") || name.starts_with("en") {
        LinkKind::Ethernet
    } else {
        LinkKind::Other
    }
}

/// Local IPv4 address, found by opening a UDP socket toward a public
/// address. No packet is sent; this only resolves the outbound
/// interface.
pub fn local_ipv4() -> Option<std::net::Ipv4Addr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(_) => None,
    }
}

/// Polling watcher task wrapping `current_link_status()`.
pub struct NetworkWatcher {
    tx: watch::Sender<LinkStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkWatcher {
    /// Start polling. The first status is published immediately.
    pub fn spawn(poll_interval: Duration) -> Self {
        let (tx, _) = watch::channel(current_link_status());

        let task = {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(poll_interval);
                loop {
                    interval.tick().await;
                    let status = current_link_status();
                    tx.send_if_modified(|current| {
                        if *current != status {
                            info!(
                                connected = status.is_connected,
                                kind = ?status.kind,
                                "Network link changed"
                            );
                            *current = status;
                            true
                        } else {
                            false
                        }
                    });
                }
            })
        };

        Self {
            tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> LinkStatus {
        *self.tx.borrow()
    }

    /// Stop polling. Idempotent.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for NetworkWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
