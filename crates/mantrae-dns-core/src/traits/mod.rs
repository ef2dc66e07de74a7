//! Core traits for the DNS reconciliation engine
//!
//! - [`DnsProvider`]: the capability set every backend adapter implements
//! - [`ProviderStore`] / [`RouterSource`]: configuration collaborators
//! - [`IpSource`]: public IP detection for `auto_update` providers

pub mod dns_provider;
pub mod ip_source;
pub mod store;

pub use dns_provider::{DnsProvider, DnsProviderFactory};
pub use ip_source::IpSource;
pub use store::{ProviderStore, RouterSource};
