// Expiring caches in front of upstream calls
pub mod keyed;
pub mod ttl;

pub use keyed::KeyedCache;
pub use ttl::TtlCache;

use async_trait::async_trait;
use std::future::Future;

/// Source of a single cached value
#[async_trait]
pub trait Fetch<T>: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<T>;
}

/// Source of a keyed cached value
#[async_trait]
pub trait KeyedFetch<T>: Send + Sync {
    async fn fetch(&self, key: &str) -> anyhow::Result<T>;
}

#[async_trait]
impl<T, F, Fut> Fetch<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    async fn fetch(&self) -> anyhow::Result<T> {
        (self)().await
    }
}

#[async_trait]
impl<T, F, Fut> KeyedFetch<T> for F
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    async fn fetch(&self, key: &str) -> anyhow::Result<T> {
        (self)(key.to_string()).await
    }
}
