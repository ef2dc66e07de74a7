//! Configuration types for the DNS reconciliation engine
//!
//! Provider settings are read from a configuration store (see
//! [`crate::store`]); the engine never invents a configuration for a
//! provider it resolved.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Top-level configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsConfigFile {
    /// Sync driver settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Configured DNS providers
    #[serde(default)]
    pub providers: Vec<StoredProvider>,

    /// Routing rules and the providers they publish to
    #[serde(default)]
    pub routers: Vec<RouterDns>,
}

impl DnsConfigFile {
    /// Validate the document
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.sync.validate()?;

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id) {
                return Err(crate::Error::config(format!(
                    "Duplicate provider id: {}",
                    provider.id
                )));
            }
        }

        for router in &self.routers {
            if let Some(missing) = router.provider_ids.iter().find(|id| !seen.contains(*id)) {
                return Err(crate::Error::config(format!(
                    "Router '{}' references unknown provider id {}",
                    router.name, missing
                )));
            }
        }

        Ok(())
    }
}

/// Zone kind for backends that distinguish authoritative and forwarding zones
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    /// Authoritative zone
    #[default]
    Primary,
    /// Conditional forwarder zone
    Forwarder,
}

/// Per-provider settings
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key, token or password
    #[serde(alias = "apiKey")]
    pub api_key: String,

    /// API base URL
    #[serde(default, alias = "apiUrl")]
    pub api_url: String,

    /// Target IP every managed record should resolve to
    #[serde(default)]
    pub ip: String,

    /// Route traffic through the provider's CDN (Cloudflare only)
    #[serde(default)]
    pub proxied: bool,

    /// Refresh `ip` from public IP detection before each sync
    #[serde(default, alias = "autoUpdate")]
    pub auto_update: bool,

    /// Zone kind hint
    #[serde(default, alias = "zoneType")]
    pub zone_type: ZoneType,
}

// Keep the API key out of logs
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"<REDACTED>")
            .field("api_url", &self.api_url)
            .field("ip", &self.ip)
            .field("proxied", &self.proxied)
            .field("auto_update", &self.auto_update)
            .field("zone_type", &self.zone_type)
            .finish()
    }
}

impl ProviderConfig {
    /// Validate the provider configuration
    ///
    /// `require_url` is set by backends that have no well-known endpoint.
    pub fn validate(&self, require_url: bool) -> Result<(), crate::Error> {
        if self.api_key.trim().is_empty() {
            return Err(crate::Error::config("API key cannot be empty"));
        }

        let url = self.api_url.trim();
        if url.is_empty() {
            if require_url {
                return Err(crate::Error::config("API URL cannot be empty"));
            }
        } else if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(crate::Error::config(format!(
                "API URL must use HTTP or HTTPS scheme. Got: {}",
                url
            )));
        }

        let ip = self.ip.trim();
        if ip.is_empty() {
            if !self.auto_update {
                return Err(crate::Error::config(
                    "Target IP is required unless auto_update is enabled",
                ));
            }
        } else if ip.parse::<IpAddr>().is_err() {
            return Err(crate::Error::config(format!(
                "Target IP '{}' is not a valid IP address",
                ip
            )));
        }

        Ok(())
    }

    /// API base URL without trailing slash, or `default` when unset
    pub fn base_url(&self, default: &str) -> String {
        let url = self.api_url.trim();
        if url.is_empty() {
            default.to_string()
        } else {
            url.trim_end_matches('/').to_string()
        }
    }
}

/// A provider row from the configuration store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredProvider {
    /// Store-assigned id
    pub id: i64,

    /// Display name
    pub name: String,

    /// Provider type tag (`cloudflare`, `powerdns`, `technitium`, `pihole`)
    #[serde(rename = "type")]
    pub provider_type: String,

    /// Backend settings
    pub config: ProviderConfig,

    /// Inactive providers are skipped by the sync driver
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// A routing rule and the DNS providers it publishes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterDns {
    /// Router name
    pub name: String,

    /// Traefik rule, e.g. ``Host(`app.example.com`)``
    pub rule: String,

    /// Providers that should carry records for the rule's hostnames
    #[serde(default)]
    pub provider_ids: Vec<i64>,

    /// Disabled routers publish nothing
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RouterDns {
    /// Create an enabled router bound to the given providers
    pub fn new(name: impl Into<String>, rule: impl Into<String>, provider_ids: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            rule: rule.into(),
            provider_ids,
            enabled: true,
        }
    }

    /// Hostnames referenced by the rule
    pub fn hostnames(&self) -> Vec<String> {
        crate::rule::extract_hostnames(&self.rule)
    }
}

/// Sync driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between full reconciliation cycles (in seconds)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound for a single upsert or delete (in seconds)
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Capacity of the trigger queue
    ///
    /// When full, new triggers are rejected and the submitter is told so;
    /// the next periodic cycle still converges.
    #[serde(default = "default_trigger_channel_capacity")]
    pub trigger_channel_capacity: usize,

    /// Capacity of the event channel
    ///
    /// When full, new events are dropped with a warning log.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl SyncConfig {
    /// Validate the sync configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.interval_secs == 0 {
            return Err(crate::Error::config("Sync interval must be > 0"));
        }
        if self.operation_timeout_secs == 0 {
            return Err(crate::Error::config("Operation timeout must be > 0"));
        }
        if self.trigger_channel_capacity == 0 || self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Channel capacities must be > 0"));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            trigger_channel_capacity: default_trigger_channel_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    300
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_trigger_channel_capacity() -> usize {
    256
}

fn default_event_channel_capacity() -> usize {
    1000
}
