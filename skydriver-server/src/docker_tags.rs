//! Docker tag resolution: `"latest"` resolves to the newest semver tag via
//! a 5-minute TTL cache (spec.md §4.1); `vX.Y.Z` is normalised to `X.Y.Z`;
//! anything else is looked up verbatim. Cache shape mirrors
//! `skydriver-ewms`'s `TtlCache` (§4.6) for consistency, reimplemented
//! here since that one is private to its crate.

use skydriver_core::validation::DockerTagResolver;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const TTL: Duration = Duration::from_secs(300);

pub struct DockerTagCache {
    /// Registry of tags this deployment actually ships, newest-first.
    known_tags: Vec<String>,
    cached_latest: Mutex<Option<(String, Instant)>>,
    resolved: Mutex<HashMap<String, (Option<String>, Instant)>>,
}

impl DockerTagCache {
    pub fn new(known_tags: Vec<String>) -> Self {
        Self {
            known_tags,
            cached_latest: Mutex::new(None),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    fn latest(&self) -> Option<String> {
        let mut cached = self.cached_latest.lock().unwrap();
        if let Some((tag, set_at)) = cached.as_ref() {
            if set_at.elapsed() < TTL {
                return Some(tag.clone());
            }
        }
        let newest = self.known_tags.first().cloned();
        if let Some(tag) = &newest {
            *cached = Some((tag.clone(), Instant::now()));
        }
        newest
    }
}

impl DockerTagResolver for DockerTagCache {
    fn resolve(&self, requested: &str) -> Option<String> {
        if requested == "latest" {
            return self.latest();
        }

        let mut cache = self.resolved.lock().unwrap();
        if let Some((value, set_at)) = cache.get(requested) {
            if set_at.elapsed() < TTL {
                return value.clone();
            }
        }

        let normalized = requested.strip_prefix('v').unwrap_or(requested);
        let resolved = if self.known_tags.iter().any(|t| t == normalized) {
            Some(normalized.to_string())
        } else {
            None
        };
        cache.insert(requested.to_string(), (resolved.clone(), Instant::now()));
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_resolves_to_newest_known_tag() {
        let cache = DockerTagCache::new(vec!["1.2.3".to_string(), "1.2.2".to_string()]);
        assert_eq!(cache.resolve("latest"), Some("1.2.3".to_string()));
    }

    #[test]
    fn v_prefixed_tags_normalize() {
        let cache = DockerTagCache::new(vec!["1.2.3".to_string()]);
        assert_eq!(cache.resolve("v1.2.3"), Some("1.2.3".to_string()));
    }

    #[test]
    fn unknown_tag_resolves_to_none() {
        let cache = DockerTagCache::new(vec!["1.2.3".to_string()]);
        assert_eq!(cache.resolve("9.9.9"), None);
    }
}
