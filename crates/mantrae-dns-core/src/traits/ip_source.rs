// # IP Source Trait
//
// Public IP detection for providers with `auto_update` enabled. The sync
// driver asks for the current address once per cycle and stores it as the
// provider's target IP when it changed.
//
// ## Implementations
//
// - HTTP-based: `mantrae-dns-ip-http` crate

use async_trait::async_trait;
use std::net::IpAddr;

/// Trait for IP source implementations
///
/// Implementations must be thread-safe and usable across async tasks.
#[async_trait]
pub trait IpSource: Send + Sync {
    /// Get the current public IP address
    ///
    /// # Returns
    ///
    /// - `Ok(IpAddr)`: The current IP address
    /// - `Err(Error)`: If unable to determine the current IP
    async fn current(&self) -> Result<IpAddr, crate::Error>;

    /// Name for logging
    fn source_name(&self) -> &'static str;
}
