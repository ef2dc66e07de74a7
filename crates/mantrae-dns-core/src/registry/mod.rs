//! Plugin-based provider registry
//!
//! The registry maps provider type tags to factories, so a stored provider
//! row can be turned into an adapter without a hard-coded match.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mantrae_dns_core::ProviderRegistry;
//!
//! let registry = ProviderRegistry::new();
//! mantrae_dns_provider_cloudflare::register(&registry);
//! mantrae_dns_provider_powerdns::register(&registry);
//!
//! let provider = registry.resolve(&store, 1).await?;
//! provider.upsert_record("app.example.com").await?;
//! ```
//!
//! ## Registration
//!
//! Adapter crates register themselves:
//!
//! ```rust,ignore
//! pub fn register(registry: &ProviderRegistry) {
//!     registry.register_provider("cloudflare", Box::new(CloudflareFactory));
//! }
//! ```

use crate::config::StoredProvider;
use crate::error::{Error, Result};
use crate::traits::{DnsProvider, DnsProviderFactory, ProviderStore};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Provider registry for plugin-based DNS provider creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ProviderRegistry {
    /// Registered DNS provider factories, keyed by type tag
    providers: RwLock<HashMap<String, Box<dyn DnsProviderFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a DNS provider factory
    ///
    /// # Parameters
    ///
    /// - `name`: Provider type tag (e.g., "cloudflare", "powerdns")
    /// - `factory`: Factory object for creating provider instances
    pub fn register_provider(
        &self,
        name: impl Into<String>,
        factory: Box<dyn DnsProviderFactory>,
    ) {
        let name = type_tag(&name.into());
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        providers.insert(name, factory);
    }

    /// Create a DNS provider from a stored provider row
    ///
    /// The factory always receives the stored row's own configuration.
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn DnsProvider>)`: Created provider instance
    /// - `Err(Error::UnknownProviderType)`: No factory for the row's type tag
    /// - `Err(Error::InvalidConfig)`: The factory rejected the configuration
    pub fn create_provider(&self, stored: &StoredProvider) -> Result<Box<dyn DnsProvider>> {
        let provider_type = type_tag(&stored.provider_type);
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);

        let factory = providers
            .get(&provider_type)
            .ok_or_else(|| Error::UnknownProviderType(stored.provider_type.clone()))?;

        factory.create(&stored.config).map_err(|e| match e {
            Error::InvalidConfig(msg) => Error::config(format!(
                "provider '{}' ({}): {}",
                stored.name, provider_type, msg
            )),
            other => other,
        })
    }

    /// Load a provider row by id and build its adapter
    pub async fn resolve(
        &self,
        store: &dyn ProviderStore,
        provider_id: i64,
    ) -> Result<Arc<dyn DnsProvider>> {
        let stored = store.get_provider(provider_id).await?;
        debug!(
            "Resolving provider {} ({}) as {}",
            stored.id, stored.name, stored.provider_type
        );
        self.create_provider(&stored).map(Arc::from)
    }

    /// List all registered provider types
    pub fn list_providers(&self) -> Vec<String> {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider type is registered
    pub fn has_provider(&self, name: &str) -> bool {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        providers.contains_key(&type_tag(name))
    }
}

/// Type tags match case-insensitively and ignore surrounding whitespace
fn type_tag(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
