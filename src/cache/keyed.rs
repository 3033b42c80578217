use super::KeyedFetch;
use crate::error::{EngineError, StaleRead};
use std::collections::HashMap;
use std::fmt::Debug;
use tokio::sync::Mutex;

type ExpiryPredicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Per-key cache whose expiry is decided by looking at the cached value
///
/// Useful when freshness is a property of the payload, e.g. "the newest point in
/// this ROI series is older than an hour", rather than of the time it was fetched.
pub struct KeyedCache<T> {
    fetcher: Box<dyn KeyedFetch<T>>,
    has_expired: ExpiryPredicate<T>,
    entries: Mutex<HashMap<String, T>>,
}

impl<T: Clone + Debug + Send> KeyedCache<T> {
    pub fn new(
        fetcher: impl KeyedFetch<T> + 'static,
        has_expired: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            has_expired: Box::new(has_expired),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the value for `key`, fetching it when absent or expired
    ///
    /// The map lock covers check, fetch and install, so two callers asking for the
    /// same expired key never fetch it twice.
    pub async fn get(&self, key: &str) -> Result<T, StaleRead<T>> {
        let mut entries = self.entries.lock().await;

        if let Some(value) = entries.get(key) {
            if !(self.has_expired)(value) {
                return Ok(value.clone());
            }
        }

        match self.fetcher.fetch(key).await {
            Ok(value) => {
                entries.insert(key.to_string(), value.clone());
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(key = %key, "Keyed cache refresh failed: {:#}", e);
                Err(StaleRead {
                    stale: entries.get(key).cloned(),
                    error: EngineError::UpstreamFetch(e),
                })
            }
        }
    }

    pub async fn peek(&self, key: &str) -> Option<T> {
        self.entries.lock().await.get(key).cloned()
    }

    pub async fn invalidate_key(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
