//! Per-URL fetch-rate cache.
//!
//! A process-global mapping from repository URL to the Unix timestamp of its last successful
//! fetch, guarded by a mutex. `needs_fetch` answers whether a `cloneOrFetch` should actually hit
//! the network again, or whether the existing mirror is still "fresh enough" per the TTL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default TTL window: a mirror fetched within the last 60 seconds is not re-fetched.
/// Injectable rather than hard-coded, so tests can shrink it to something observable.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Tracks the last-fetch time of every mirrored repository URL.
pub struct FetchCache {
    ttl: Duration,
    last_fetch_unix_secs: Mutex<HashMap<String, i64>>,
}

impl FetchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last_fetch_unix_secs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_TTL)
    }

    /// Whether `url` should be fetched again: true if there is no record of a previous fetch, or
    /// if the elapsed time since the last fetch falls outside `[0, ttl]`. A negative delta (the
    /// system clock moved backwards since the last fetch) is treated the same as "too stale" —
    /// the cache never withholds a fetch it can't vouch for.
    pub fn needs_fetch(&self, url: &str) -> bool {
        let map = self.last_fetch_unix_secs.lock().expect("fetch cache lock poisoned");
        match map.get(url) {
            None => true,
            Some(&last) => {
                let delta = now_unix_secs() - last;
                !(0..=self.ttl.as_secs() as i64).contains(&delta)
            }
        }
    }

    /// Record that `url` was successfully fetched just now.
    pub fn mark_fetched(&self, url: &str) {
        let mut map = self.last_fetch_unix_secs.lock().expect("fetch cache lock poisoned");
        map.insert(url.to_string(), now_unix_secs());
    }
}

fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_url_needs_fetch() {
        let cache = FetchCache::with_default_ttl();
        assert!(cache.needs_fetch("https://example.com/o/a.git"));
    }

    #[test]
    fn fresh_fetch_is_not_repeated_within_ttl() {
        let cache = FetchCache::new(Duration::from_secs(60));
        cache.mark_fetched("https://example.com/o/a.git");
        assert!(!cache.needs_fetch("https://example.com/o/a.git"));
    }

    #[test]
    fn expired_ttl_triggers_refetch() {
        let cache = FetchCache::new(Duration::from_secs(0));
        cache.mark_fetched("https://example.com/o/a.git");
        // A zero-second TTL window means any elapsed time, however small, is already outside
        // `[0, 0]` the moment it's non-zero; give the clock a tick of room.
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.needs_fetch("https://example.com/o/a.git"));
    }

    #[test]
    fn backwards_clock_forces_refetch() {
        let cache = FetchCache::new(Duration::from_secs(60));
        let mut map = cache.last_fetch_unix_secs.lock().unwrap();
        map.insert("https://example.com/o/a.git".to_string(), now_unix_secs() + 1_000);
        drop(map);
        assert!(cache.needs_fetch("https://example.com/o/a.git"));
    }
}
