use super::Fetch;
use crate::error::{EngineError, StaleRead};
use std::fmt::Debug;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

struct Slot<T> {
    value: T,
    fetched_at: Instant,
}

/// Single value refreshed once its TTL has elapsed
///
/// The lock is held through the upstream fetch, so concurrent readers of a stale
/// value wait for the one refresh instead of issuing their own.
pub struct TtlCache<T> {
    ttl: Duration,
    fetcher: Box<dyn Fetch<T>>,
    slot: Mutex<Option<Slot<T>>>,
}

impl<T: Clone + Debug + Send> TtlCache<T> {
    pub fn new(ttl: Duration, fetcher: impl Fetch<T> + 'static) -> Self {
        Self {
            ttl,
            fetcher: Box::new(fetcher),
            slot: Mutex::new(None),
        }
    }

    /// Return the cached value, refreshing it first when `now >= fetched_at + ttl`
    ///
    /// On a failed refresh the previous value (if any) comes back inside the error and
    /// stays cached, so the next call retries.
    pub async fn get(&self) -> Result<T, StaleRead<T>> {
        let mut slot = self.slot.lock().await;

        if let Some(current) = slot.as_ref() {
            if Instant::now() < current.fetched_at + self.ttl {
                return Ok(current.value.clone());
            }
        }

        match self.fetcher.fetch().await {
            Ok(value) => {
                *slot = Some(Slot {
                    value: value.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(value)
            }
            Err(e) => {
                tracing::warn!("Cache refresh failed, serving stale value: {:#}", e);
                Err(StaleRead {
                    stale: slot.as_ref().map(|s| s.value.clone()),
                    error: EngineError::UpstreamFetch(e),
                })
            }
        }
    }

    /// Current value without refreshing, fresh or not
    pub async fn peek(&self) -> Option<T> {
        self.slot.lock().await.as_ref().map(|s| s.value.clone())
    }

    /// Force the next `get` to fetch
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
