// # PowerDNS Provider
//
// PowerDNS Authoritative Server adapter for the Mantrae DNS reconciliation
// engine.
//
// ## Behavior
//
// - Zones are addressed by their canonical name (`example.com.`)
// - The whole zone is fetched and filtered to the subdomain's rrsets
// - Writes are rrset PATCHes (`REPLACE` / `DELETE`), TTL 300
// - A `REPLACE` carries every entry of the current rrset, so values
//   mantrae did not write survive an update
// - TXT content is sent in quoted presentation format
//
// ## API Reference
//
// - Zone: GET `/api/v1/servers/localhost/zones/:zone`
// - RRset changes: PATCH `/api/v1/servers/localhost/zones/:zone`
// - Authentication: `X-API-Key` header

use async_trait::async_trait;
use mantrae_dns_core::config::ProviderConfig;
use mantrae_dns_core::manager::{
    DeleteOperations, DeleteOutcome, RecordManager, RecordOperations, UpsertOutcome,
};
use mantrae_dns_core::record::{self, DnsRecord, RecordType};
use mantrae_dns_core::traits::{DnsProvider, DnsProviderFactory};
use mantrae_dns_core::{Error, ProviderRegistry, Result, extract_base_domain};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Server id used by the PowerDNS HTTP API
const SERVER_ID: &str = "localhost";

/// TTL for rrsets written by mantrae
const DEFAULT_TTL: u32 = 300;

const PROVIDER: &str = "powerdns";

#[derive(Debug, Deserialize)]
struct Zone {
    #[serde(default)]
    rrsets: Vec<RrSet>,
}

#[derive(Debug, Deserialize)]
struct RrSet {
    name: String,
    #[serde(rename = "type")]
    rrtype: String,
    #[serde(default)]
    records: Vec<RrContent>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
struct RrContent {
    content: String,
    #[serde(default)]
    disabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
enum ChangeType {
    Replace,
    Delete,
}

#[derive(Debug, Serialize)]
struct RrSetChange {
    name: String,
    #[serde(rename = "type")]
    rrtype: &'static str,
    changetype: ChangeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    records: Vec<RrContent>,
}

#[derive(Debug, Serialize)]
struct PatchBody {
    rrsets: Vec<RrSetChange>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
}

/// PowerDNS provider
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the API key.
pub struct PowerDnsProvider {
    /// API key
    /// ⚠️ NEVER log this value
    api_key: String,

    /// API server root without trailing slash
    base_url: String,

    /// Target IP every managed record should resolve to
    target_ip: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for PowerDnsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerDnsProvider")
            .field("api_key", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .field("target_ip", &self.target_ip)
            .finish()
    }
}

/// Zone contents relevant to one subdomain
struct Loaded {
    /// Canonical zone name
    zone: String,

    /// Enabled address and marker entries
    records: Vec<DnsRecord>,

    /// Full address rrsets of the subdomain, disabled entries included
    address_sets: Vec<(RecordType, Vec<RrContent>)>,
}

/// Canonical (trailing-dot) form of a name
fn canonical(name: &str) -> String {
    format!("{}.", record::normalize_name(name))
}

impl PowerDnsProvider {
    /// Create a new PowerDNS provider
    ///
    /// `api_url` is required and points at the API server root
    /// (e.g. `http://pdns:8081`).
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        config.validate(true)?;

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key: config.api_key.trim().to_string(),
            base_url: config.base_url(""),
            target_ip: config.ip.trim().to_string(),
            client,
        })
    }

    /// `/api/v1/servers/localhost/zones/<zone>.` with the zone name encoded
    fn zone_url(&self, zone: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("Invalid PowerDNS API URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::config("PowerDNS API URL cannot be a base"))?
            .pop_if_empty()
            .extend(["api", "v1", "servers", SERVER_ID, "zones", zone]);
        Ok(url)
    }

    /// Fetch the zone for a subdomain and keep its address and marker rrsets
    ///
    /// Records get one entry per enabled rrset value, with id `<name>/<type>`.
    async fn load(&self, subdomain: &str) -> Result<Loaded> {
        let zone = canonical(&extract_base_domain(subdomain)?);
        let wanted_address = canonical(subdomain);
        let wanted_marker = canonical(&record::marker_name(subdomain));

        tracing::debug!("Fetching PowerDNS zone {}", zone);
        let response = self
            .client
            .get(self.zone_url(&zone)?)
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::http(format!("PowerDNS zone request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response".to_string());

        if matches!(status.as_u16(), 404 | 422) {
            return Err(Error::zone_not_found(zone.trim_end_matches('.')));
        }
        if !status.is_success() {
            return Err(map_status(status, "get zone", &body));
        }

        let parsed: Zone = serde_json::from_str(&body).map_err(|e| {
            Error::provider(PROVIDER, "get zone", format!("Failed to parse response: {}", e))
        })?;

        let mut records = Vec::new();
        let mut address_sets = Vec::new();
        for rrset in parsed.rrsets {
            let Ok(record_type) = rrset.rrtype.parse::<RecordType>() else {
                continue;
            };
            let name = rrset.name.to_ascii_lowercase();
            let wanted = if record_type.is_address() {
                name == wanted_address
            } else {
                name == wanted_marker
            };
            if !wanted {
                continue;
            }
            let id = format!("{}/{}", name, record_type);
            for entry in rrset.records.iter().filter(|r| !r.disabled) {
                records.push(DnsRecord::new(id.clone(), &name, record_type, &entry.content));
            }
            if record_type.is_address() {
                address_sets.push((record_type, rrset.records));
            }
        }

        tracing::debug!("{} has {} matching record(s)", subdomain, records.len());
        Ok(Loaded {
            zone,
            records,
            address_sets,
        })
    }

    /// Apply rrset changes to a zone
    async fn patch(&self, zone: &str, rrsets: Vec<RrSetChange>, operation: &str) -> Result<()> {
        let response = self
            .client
            .patch(self.zone_url(zone)?)
            .header("X-API-Key", &self.api_key)
            .json(&PatchBody { rrsets })
            .send()
            .await
            .map_err(|e| Error::http(format!("PowerDNS {} request failed: {}", operation, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response".to_string());
        Err(map_status(status, operation, &body))
    }

    fn manager(&self, subdomain: &str) -> Result<RecordManager> {
        RecordManager::new(subdomain, &self.target_ip)
    }
}

/// Map a non-2xx status to a specific error
fn map_status(status: reqwest::StatusCode, operation: &str, body: &str) -> Error {
    // PowerDNS error bodies are {"error": "..."}
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.to_string());

    match status.as_u16() {
        401 | 403 => Error::auth(format!("PowerDNS rejected the API key. Status: {}", status)),
        404 => Error::not_found(format!("PowerDNS {}: {}", operation, message)),
        429 => Error::rate_limited(format!("PowerDNS rate limit exceeded. Status: {}", status)),
        500..=599 => Error::provider(
            PROVIDER,
            operation,
            format!("PowerDNS server error (transient): {} - {}", status, message),
        ),
        _ => Error::provider(PROVIDER, operation, format!("{} - {}", status, message)),
    }
}

/// Entries of `current` with the first enabled `stale` value set to `target`
///
/// With no `stale` value (or none matching) the target is appended.
fn swap_content(current: &[RrContent], stale: Option<&str>, target: String) -> Vec<RrContent> {
    let mut entries = current.to_vec();
    let position = stale.and_then(|stale| {
        entries
            .iter()
            .position(|entry| !entry.disabled && entry.content == stale)
    });
    match position {
        Some(i) => entries[i].content = target,
        None => entries.push(RrContent {
            content: target,
            disabled: false,
        }),
    }
    entries
}

/// PowerDNS primitives bound to one zone and one subdomain
struct ZoneOps<'a> {
    provider: &'a PowerDnsProvider,
    zone: &'a str,
    manager: &'a RecordManager,
    address_sets: &'a [(RecordType, Vec<RrContent>)],
}

impl ZoneOps<'_> {
    fn replace(&self, name: &str, record_type: RecordType, records: Vec<RrContent>) -> RrSetChange {
        RrSetChange {
            name: canonical(name),
            rrtype: record_type.as_str(),
            changetype: ChangeType::Replace,
            ttl: Some(DEFAULT_TTL),
            records,
        }
    }

    /// REPLACE for the subdomain's `record_type` rrset with `stale` swapped out
    fn address_change(&self, record_type: RecordType, stale: Option<&str>) -> RrSetChange {
        let current = self
            .address_sets
            .iter()
            .find(|(t, _)| *t == record_type)
            .map(|(_, entries)| entries.as_slice())
            .unwrap_or_default();
        let records = swap_content(current, stale, self.manager.content());
        self.replace(self.manager.subdomain(), record_type, records)
    }
}

#[async_trait]
impl RecordOperations for ZoneOps<'_> {
    async fn create_record(&self, record_type: RecordType) -> Result<()> {
        tracing::info!(
            "Creating PowerDNS {} rrset {} -> {}",
            record_type,
            self.manager.subdomain(),
            self.manager.target_ip()
        );
        let change = self.address_change(record_type, None);
        self.provider.patch(self.zone, vec![change], "create record").await
    }

    async fn update_record(&self, existing: &DnsRecord, record_type: RecordType) -> Result<()> {
        tracing::info!(
            "Replacing PowerDNS {} rrset {} -> {} (was: {})",
            record_type,
            self.manager.subdomain(),
            self.manager.target_ip(),
            existing.content
        );
        let change = self.address_change(record_type, Some(&existing.content));
        self.provider.patch(self.zone, vec![change], "update record").await
    }

    async fn create_marker(&self) -> Result<()> {
        tracing::info!("Creating ownership marker {}", self.manager.marker_name());
        let change = self.replace(
            self.manager.marker_name(),
            RecordType::Txt,
            vec![RrContent {
                content: record::quote_txt(self.manager.marker_content()),
                disabled: false,
            }],
        );
        self.provider.patch(self.zone, vec![change], "create marker").await
    }
}

/// Deletes are per rrset; later records of an already deleted rrset are no-ops
struct DeleteOps<'a> {
    provider: &'a PowerDnsProvider,
    zone: &'a str,
    deleted: tokio::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl DeleteOperations for DeleteOps<'_> {
    async fn delete_record(&self, record: &DnsRecord) -> Result<()> {
        let mut deleted = self.deleted.lock().await;
        if deleted.contains(&record.id) {
            return Ok(());
        }

        tracing::info!("Deleting PowerDNS {} rrset {}", record.record_type, record.name);
        let change = RrSetChange {
            name: canonical(&record.name),
            rrtype: record.record_type.as_str(),
            changetype: ChangeType::Delete,
            ttl: None,
            records: Vec::new(),
        };
        self.provider.patch(self.zone, vec![change], "delete record").await?;
        deleted.push(record.id.clone());
        Ok(())
    }
}

#[async_trait]
impl DnsProvider for PowerDnsProvider {
    async fn list_records(&self, subdomain: &str) -> Result<Vec<DnsRecord>> {
        let subdomain = record::normalize_name(subdomain);
        Ok(self.load(&subdomain).await?.records)
    }

    async fn upsert_record(&self, subdomain: &str) -> Result<UpsertOutcome> {
        let manager = self.manager(subdomain)?;
        let loaded = self.load(manager.subdomain()).await?;

        let ops = ZoneOps {
            provider: self,
            zone: &loaded.zone,
            manager: &manager,
            address_sets: &loaded.address_sets,
        };
        manager.execute_upsert(&loaded.records, &ops).await
    }

    async fn delete_record(&self, subdomain: &str) -> Result<DeleteOutcome> {
        let manager = self.manager(subdomain)?;
        let loaded = self.load(manager.subdomain()).await?;

        let ops = DeleteOps {
            provider: self,
            zone: &loaded.zone,
            deleted: tokio::sync::Mutex::new(Vec::new()),
        };
        manager.execute_delete(&loaded.records, &ops).await
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Factory for creating PowerDNS providers
pub struct PowerDnsFactory;

impl DnsProviderFactory for PowerDnsFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        Ok(Box::new(PowerDnsProvider::new(config)?))
    }
}

/// Register the PowerDNS provider with a registry
///
/// # Example
///
/// ```rust
/// use mantrae_dns_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// mantrae_dns_provider_powerdns::register(&registry);
/// assert!(registry.has_provider("powerdns"));
/// ```
pub fn register(registry: &ProviderRegistry) {
    registry.register_provider(PROVIDER, Box::new(PowerDnsFactory));
}
