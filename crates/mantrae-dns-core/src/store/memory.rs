// # Memory Config Store
//
// In-memory implementation of ProviderStore and RouterSource.
//
// ## When to Use
//
// - Embedding the engine in a process that owns its configuration
// - Tests
//
// Detected IPs are kept for the lifetime of the process only.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::{RouterDns, StoredProvider};
use crate::traits::{ProviderStore, RouterSource};

/// In-memory configuration store
///
/// # Example
///
/// ```rust,no_run
/// use mantrae_dns_core::store::MemoryConfigStore;
/// use mantrae_dns_core::traits::ProviderStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryConfigStore::new(Vec::new(), Vec::new());
///     assert!(store.list_providers().await?.is_empty());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    providers: BTreeMap<i64, StoredProvider>,
    routers: Vec<RouterDns>,
}

impl MemoryConfigStore {
    /// Create a store seeded with providers and routers
    pub fn new(providers: Vec<StoredProvider>, routers: Vec<RouterDns>) -> Self {
        let providers = providers.into_iter().map(|p| (p.id, p)).collect();
        Self {
            inner: Arc::new(RwLock::new(Inner { providers, routers })),
        }
    }

    /// Insert or replace a provider
    pub async fn upsert_provider(&self, provider: StoredProvider) {
        let mut guard = self.inner.write().await;
        guard.providers.insert(provider.id, provider);
    }

    /// Insert or replace a router by name
    pub async fn upsert_router(&self, router: RouterDns) {
        let mut guard = self.inner.write().await;
        match guard.routers.iter_mut().find(|r| r.name == router.name) {
            Some(existing) => *existing = router,
            None => guard.routers.push(router),
        }
    }

    /// Remove a router by name, returning it
    pub async fn remove_router(&self, name: &str) -> Option<RouterDns> {
        let mut guard = self.inner.write().await;
        let idx = guard.routers.iter().position(|r| r.name == name)?;
        Some(guard.routers.remove(idx))
    }
}

#[async_trait]
impl ProviderStore for MemoryConfigStore {
    async fn get_provider(&self, id: i64) -> Result<StoredProvider, Error> {
        let guard = self.inner.read().await;
        guard
            .providers
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("provider {}", id)))
    }

    async fn list_providers(&self) -> Result<Vec<StoredProvider>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.providers.values().cloned().collect())
    }

    async fn update_provider_ip(&self, id: i64, ip: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let provider = guard
            .providers
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("provider {}", id)))?;
        provider.config.ip = ip.to_string();
        Ok(())
    }
}

#[async_trait]
impl RouterSource for MemoryConfigStore {
    async fn active_routers(&self) -> Result<Vec<RouterDns>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.routers.iter().filter(|r| r.enabled).cloned().collect())
    }
}
