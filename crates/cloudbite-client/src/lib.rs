//! Client-side server discovery and resilient-connection subsystem.
//!
//! The backend lives on an unpredictable LAN: no DNS, DHCP reassigns its
//! address, and venue WiFi drops. This crate finds a compatible server by
//! probing the local subnet, keeps verifying it is alive, and runs an
//! automatic reconnect cycle when it is not. The [`facade::ConnectionManager`]
//! aggregates everything into one [`facade::ConnectionState`] stream that
//! the UI layer consumes.

pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod facade;
pub mod health;
pub mod netwatch;
pub mod probe;
pub mod reconnect;
pub mod singleflight;
pub mod storage;

#[cfg(test)]
pub(crate) mod testutil;

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

pub use error::{ConnectError, ConnectResult};

/// A validated base URL of a compatible server.
#[derive(Debug, Clone)]
pub struct ServerDescriptor {
    pub url: String,
    pub discovered_at: SystemTime,
}

impl ServerDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            discovered_at: SystemTime::now(),
        }
    }
}

/// How the client decides which server to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Scan the LAN and follow the server wherever DHCP puts it.
    #[default]
    Auto,
    /// Fixed URL entered by the operator; no scanning.
    Manual,
    /// Off-LAN URL (tunnel, cloud relay); no scanning.
    Remote,
}
