use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    pub socket_id: String,
    pub last_seen: Instant,
    pub messages_in: u64,
}

impl ConnectionMetrics {
    pub fn new(socket_id: String) -> Self {
        Self {
            socket_id,
            last_seen: Instant::now(),
            messages_in: 0,
        }
    }
}

/// Liveness bookkeeping for every signaling connection, swept periodically so
/// departed sockets don't accumulate.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<RwLock<HashMap<String, ConnectionMetrics>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self, socket_id: &str) {
        let mut metrics = self.inner.write();
        let entry = metrics
            .entry(socket_id.to_string())
            .or_insert_with(|| ConnectionMetrics::new(socket_id.to_string()));
        entry.last_seen = Instant::now();
        entry.messages_in += 1;
    }

    pub fn remove(&self, socket_id: &str) {
        self.inner.write().remove(socket_id);
    }

    pub fn cleanup_stale(&self, max_age: Duration) {
        self.inner
            .write()
            .retain(|_, m| m.last_seen.elapsed() < max_age);
    }

    pub fn get(&self, socket_id: &str) -> Option<ConnectionMetrics> {
        self.inner.read().get(socket_id).cloned()
    }
}
