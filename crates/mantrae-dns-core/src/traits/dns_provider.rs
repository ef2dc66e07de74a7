// # DNS Provider Trait
//
// The capability set every backend adapter implements. Nothing else in the
// system depends on a concrete backend.
//
// ## Implementations
//
// - Cloudflare: `mantrae-dns-provider-cloudflare`
// - PowerDNS: `mantrae-dns-provider-powerdns`
// - Technitium: `mantrae-dns-provider-technitium`
// - Pi-hole: `mantrae-dns-provider-pihole`
//
// ## Usage
//
// ```rust,ignore
// use mantrae_dns_core::DnsProvider;
//
// let provider = registry.resolve(&store, provider_id).await?;
// provider.upsert_record("app.example.com").await?;
// provider.delete_record("old.example.com").await?;
// ```

use async_trait::async_trait;

use crate::manager::{DeleteOutcome, UpsertOutcome};
use crate::record::DnsRecord;

/// Trait for DNS provider adapters
///
/// Each adapter composes an HTTP client with the shared
/// [`RecordManager`](crate::manager::RecordManager): it supplies
/// backend-specific create/update/delete primitives and lets the manager
/// decide which of them run.
///
/// # Statelessness
///
/// Adapters re-list the provider on every call and keep no record cache
/// between calls. Records changed outside mantrae are therefore always seen.
///
/// # Concurrency
///
/// Two reconciliations of the same subdomain may overlap. Upserts are
/// idempotent and deletes re-verify the ownership marker, so overlapping
/// runs converge to the same end state.
///
/// # Cancellation
///
/// Dropping the returned future aborts in-flight requests. Work that was
/// interrupted between steps (address record written, marker not yet) is
/// completed by the next upsert.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Address records named exactly `subdomain` plus its ownership marker
    ///
    /// Substring matches returned by provider search APIs are filtered out.
    async fn list_records(&self, subdomain: &str) -> Result<Vec<DnsRecord>, crate::Error>;

    /// Point `subdomain` at the provider's target IP and assert ownership
    ///
    /// # Idempotency
    ///
    /// A second call with unchanged inputs performs no writes.
    async fn upsert_record(&self, subdomain: &str) -> Result<UpsertOutcome, crate::Error>;

    /// Remove `subdomain`'s address records and marker
    ///
    /// Succeeds trivially when nothing exists. Fails with
    /// [`Error::NotManaged`](crate::Error::NotManaged) when records exist but
    /// the marker does not.
    async fn delete_record(&self, subdomain: &str) -> Result<DeleteOutcome, crate::Error>;

    /// Provider type tag, for logging
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing DNS providers from configuration
///
/// Construction validates the configuration and never performs network I/O.
pub trait DnsProviderFactory: Send + Sync {
    /// Create a provider from the stored provider's own configuration
    fn create(
        &self,
        config: &crate::config::ProviderConfig,
    ) -> Result<Box<dyn DnsProvider>, crate::Error>;
}
