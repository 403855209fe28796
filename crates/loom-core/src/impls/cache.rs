//! TtlCache / CachingPluginCatalog - 期限付きキャッシュ
//!
//! - 読み取りは `RwLock::read` で並行
//! - 期限切れ時の再取得は `refresh` Mutex で直列化（同じキーを同時に取りに行かない）
//! - `flush` で全エントリを破棄（組織が増えたとき Scheduler が呼ぶ）

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{ExternalServiceError, Organisation, Plugin};
use crate::ports::PluginCatalog;

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, (Instant, V)>>,
    refresh: Mutex<()>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            refresh: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries
            .write()
            .await
            .insert(key, (Instant::now(), value));
    }

    /// Cached value, or the result of `fetch` stored under `key`.
    /// Errors are returned as-is and not cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }

        let _refresh = self.refresh.lock().await;
        // another caller may have refreshed while we waited
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }
        let value = fetch().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    pub async fn flush(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Wraps any catalog with a TTL cache per organisation.
pub struct CachingPluginCatalog<C> {
    inner: C,
    organisations: TtlCache<(), Vec<Organisation>>,
    plugins: TtlCache<String, Vec<Plugin>>,
}

impl<C: PluginCatalog> CachingPluginCatalog<C> {
    pub fn new(inner: C, ttl: Duration) -> Self {
        Self {
            inner,
            organisations: TtlCache::new(ttl),
            plugins: TtlCache::new(ttl),
        }
    }

    pub async fn flush(&self) {
        self.organisations.flush().await;
        self.plugins.flush().await;
    }
}

#[async_trait]
impl<C: PluginCatalog> PluginCatalog for CachingPluginCatalog<C> {
    async fn list_organisations(&self) -> Result<Vec<Organisation>, ExternalServiceError> {
        self.organisations
            .get_or_try_insert_with((), || self.inner.list_organisations())
            .await
    }

    async fn get_enabled_plugins(
        &self,
        organisation: &str,
    ) -> Result<Vec<Plugin>, ExternalServiceError> {
        self.plugins
            .get_or_try_insert_with(organisation.to_string(), || {
                self.inner.get_enabled_plugins(organisation)
            })
            .await
    }

    async fn flush_cache(&self) {
        debug!("flushing plugin catalog cache");
        self.flush().await;
    }

    async fn health(&self) -> bool {
        self.inner.health().await
    }
}
