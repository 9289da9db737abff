//! Scripted probe for unit tests: responses and delays are declared up
//! front, call counts are observable, and no sockets are involved.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use cloudbite_protocol::discovery::DiscoveryResponse;
use cloudbite_protocol::PRODUCT_TYPE;

use crate::probe::Probe;

pub(crate) struct ScriptedProbe {
    /// base_url -> discovery payload served there.
    servers: Mutex<HashMap<String, DiscoveryResponse>>,
    /// URLs whose health endpoint answers 2xx.
    healthy: Mutex<HashSet<String>>,
    /// URLs that respond at all (gateway detection).
    reachable: Mutex<HashSet<String>>,
    /// Optional per-URL response delay.
    delays: Mutex<HashMap<String, Duration>>,
    discovery_calls: AtomicUsize,
    health_calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
            healthy: Mutex::new(HashSet::new()),
            reachable: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            discovery_calls: AtomicUsize::new(0),
            health_calls: AtomicUsize::new(0),
        }
    }

    /// A compatible server at `base_url`: answers discovery and health.
    pub fn add_server(&self, base_url: &str) {
        self.servers
            .lock()
            .unwrap()
            .insert(base_url.to_string(), payload(PRODUCT_TYPE));
        self.healthy.lock().unwrap().insert(base_url.to_string());
    }

    /// Something that answers discovery with a foreign product type.
    pub fn add_foreign_server(&self, base_url: &str) {
        self.servers
            .lock()
            .unwrap()
            .insert(base_url.to_string(), payload("other-product"));
    }

    pub fn set_healthy(&self, base_url: &str, healthy: bool) {
        let mut set = self.healthy.lock().unwrap();
        if healthy {
            set.insert(base_url.to_string());
        } else {
            set.remove(base_url);
        }
    }

    pub fn set_reachable(&self, url: &str) {
        self.reachable.lock().unwrap().insert(url.to_string());
    }

    pub fn set_delay(&self, base_url: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(base_url.to_string(), delay);
    }

    pub fn discovery_calls(&self) -> usize {
        self.discovery_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.discovery_calls.store(0, Ordering::SeqCst);
        self.health_calls.store(0, Ordering::SeqCst);
    }

    fn delay_for(&self, url: &str) -> Option<Duration> {
        self.delays.lock().unwrap().get(url).copied()
    }
}

fn payload(kind: &str) -> DiscoveryResponse {
    DiscoveryResponse {
        kind: kind.to_string(),
        name: "test server".to_string(),
        version: "0.0.0".to_string(),
        port: cloudbite_protocol::DEFAULT_API_PORT,
        features: Vec::new(),
        timestamp: 0,
    }
}

impl Probe for ScriptedProbe {
    fn discovery<'a>(
        &'a self,
        base_url: &'a str,
        _timeout: Duration,
    ) -> BoxFuture<'a, Option<DiscoveryResponse>> {
        Box::pin(async move {
            self.discovery_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay_for(base_url) {
                tokio::time::sleep(delay).await;
            }
            self.servers.lock().unwrap().get(base_url).cloned()
        })
    }

    fn health<'a>(&'a self, base_url: &'a str, _timeout: Duration) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.health_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay_for(base_url) {
                tokio::time::sleep(delay).await;
            }
            self.healthy.lock().unwrap().contains(base_url)
        })
    }

    fn reachable<'a>(&'a self, url: &'a str, _timeout: Duration) -> BoxFuture<'a, bool> {
        Box::pin(async move { self.reachable.lock().unwrap().contains(url) })
    }
}
