//! Small per-key TTL cache. Shared by every EWMS read operation so a burst
//! of status polling doesn't stampede the remote service.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct TtlCache<V: Clone> {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).and_then(|(inserted_at, value)| {
            if inserted_at.elapsed() < self.ttl {
                Some(value.clone())
            } else {
                None
            }
        })
    }

    pub fn set(&self, key: String, value: V) {
        self.entries.lock().unwrap().insert(key, (Instant::now(), value));
    }

    /// Evicts every entry, forcing the next read to hit the network. Tests
    /// use this instead of sleeping past the real TTL.
    pub fn invalidate_all(&self) {
        self.entries.lock().unwrap().clear();
    }
}
