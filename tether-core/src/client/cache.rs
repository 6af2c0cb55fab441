//! Single-value time-to-live cache

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry<T> {
    stored_at: Instant,
    value: Arc<T>,
}

/// Holds one value until `ttl` has elapsed since it was stored
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    entry: Mutex<Option<Entry<T>>>,
}

impl<T> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Entry<T>>> {
        self.entry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached value if it is still fresh
    pub fn get(&self) -> Option<Arc<T>> {
        self.lock()
            .as_ref()
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Age of the cached value, fresh or not
    pub fn age(&self) -> Option<Duration> {
        self.lock().as_ref().map(|entry| entry.stored_at.elapsed())
    }

    pub fn store(&self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        *self.lock() = Some(Entry {
            stored_at: Instant::now(),
            value: Arc::clone(&value),
        });
        value
    }

    pub fn invalidate(&self) {
        *self.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_ttl() {
        let cache = TtlCache::new(Duration::from_secs(300));
        assert!(cache.get().is_none());

        cache.store(vec![1, 2, 3]);
        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get().as_deref(), Some(&vec![1, 2, 3]));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get().is_none());
        assert_eq!(cache.age(), Some(Duration::from_secs(300)));

        cache.store(vec![4]);
        cache.invalidate();
        assert!(cache.get().is_none());
    }
}
