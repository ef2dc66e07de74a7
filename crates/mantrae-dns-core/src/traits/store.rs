// # Configuration collaborators
//
// The engine itself keeps no record state. What it does need from the
// outside world is where providers are configured and which routing rules
// are active; both come through these traits.
//
// ## Implementations
//
// - In-memory: [`crate::store::MemoryConfigStore`]
// - JSON file: [`crate::store::FileConfigStore`]

use async_trait::async_trait;

use crate::config::{RouterDns, StoredProvider};

/// Source of provider configuration rows
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// Load one provider by id
    ///
    /// # Returns
    ///
    /// - `Ok(StoredProvider)`: The stored row
    /// - `Err(Error::NotFound)`: No provider with that id
    async fn get_provider(&self, id: i64) -> Result<StoredProvider, crate::Error>;

    /// All configured providers
    async fn list_providers(&self) -> Result<Vec<StoredProvider>, crate::Error>;

    /// Persist a freshly detected target IP for an `auto_update` provider
    async fn update_provider_ip(&self, id: i64, ip: &str) -> Result<(), crate::Error>;
}

/// Source of routing rules
#[async_trait]
pub trait RouterSource: Send + Sync {
    /// Enabled routers with their DNS provider bindings
    async fn active_routers(&self) -> Result<Vec<RouterDns>, crate::Error>;
}
