// # mantrae-dns-core
//
// Provider-agnostic DNS reconciliation for Mantrae.
//
// ## Architecture Overview
//
// Routers declare hostnames; this library makes DNS providers agree:
// - **RecordManager**: Pure upsert/delete decisions, including the ownership gate
// - **DnsProvider**: Trait every backend adapter implements
// - **ProviderRegistry**: Plugin-based registry mapping type tags to factories
// - **SyncDriver**: Periodic and trigger-driven reconciliation with failure isolation
// - **ProviderStore / RouterSource**: Where provider settings and routers come from
//
// ## Ownership
//
// Every subdomain mantrae publishes carries a TXT record named
// `_mantrae-<subdomain>` with content `managed-by=mantrae`. Records without
// that marker are never deleted.

pub mod config;
pub mod error;
pub mod manager;
pub mod record;
pub mod registry;
pub mod rule;
pub mod store;
pub mod sync;
pub mod traits;
pub mod zone;

// Re-export core types for convenience
pub use config::{DnsConfigFile, ProviderConfig, RouterDns, StoredProvider, SyncConfig, ZoneType};
pub use error::{Error, Result};
pub use manager::{
    AddressAction, DeleteOperations, DeleteOutcome, RecordManager, RecordOperations,
    UpsertOutcome,
};
pub use record::{DnsRecord, RecordType};
pub use registry::ProviderRegistry;
pub use store::{FileConfigStore, MemoryConfigStore};
pub use sync::{SyncDriver, SyncEvent, SyncHandle, SyncReport, SyncTrigger};
pub use traits::{DnsProvider, DnsProviderFactory, IpSource, ProviderStore, RouterSource};
pub use zone::extract_base_domain;
