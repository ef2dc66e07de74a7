// # Technitium DNS Provider
//
// Technitium DNS Server adapter for the Mantrae DNS reconciliation engine.
//
// ## Behavior
//
// - Every call carries the API token as a `token` query parameter
// - The zone is created on first write when the server does not have it
//   (`Primary` or `Forwarder`, per the provider's `zone_type`)
// - Records have no ids; updates and deletes address records by content
// - Responses are inspected for `status` even on HTTP 200
//
// ## API Reference
//
// - List zones: GET `/api/zones/list`
// - Create zone: POST `/api/zones/create`
// - Get records: GET `/api/zones/records/get`
// - Add / update / delete record: POST `/api/zones/records/{add,update,delete}`

use async_trait::async_trait;
use mantrae_dns_core::config::{ProviderConfig, ZoneType};
use mantrae_dns_core::manager::{
    DeleteOperations, DeleteOutcome, RecordManager, RecordOperations, UpsertOutcome,
};
use mantrae_dns_core::record::{self, DnsRecord, RecordType};
use mantrae_dns_core::traits::{DnsProvider, DnsProviderFactory};
use mantrae_dns_core::{Error, ProviderRegistry, Result, extract_base_domain};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// TTL for records written by mantrae
const DEFAULT_TTL: &str = "3600";

const PROVIDER: &str = "technitium";

/// Response envelope shared by every endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    response: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ZoneList {
    #[serde(default)]
    zones: Vec<ZoneInfo>,
}

#[derive(Debug, Deserialize)]
struct ZoneInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RecordList {
    #[serde(default)]
    records: Vec<TechnitiumRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TechnitiumRecord {
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    r_data: RecordData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordData {
    ip_address: Option<String>,
    text: Option<String>,
}

/// Technitium DNS provider
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the API token.
pub struct TechnitiumProvider {
    /// API token
    /// ⚠️ NEVER log this value (it also appears in request URLs)
    api_token: String,

    /// Server root without trailing slash
    base_url: String,

    /// Target IP every managed record should resolve to
    target_ip: String,

    /// Kind of zone to create when missing
    zone_type: ZoneType,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for TechnitiumProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TechnitiumProvider")
            .field("api_token", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .field("target_ip", &self.target_ip)
            .field("zone_type", &self.zone_type)
            .finish()
    }
}

impl TechnitiumProvider {
    /// Create a new Technitium provider
    ///
    /// `api_url` is required and points at the server root
    /// (e.g. `http://technitium:5380`).
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        config.validate(true)?;

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_token: config.api_key.trim().to_string(),
            base_url: config.base_url(""),
            target_ip: config.ip.trim().to_string(),
            zone_type: config.zone_type,
            client,
        })
    }

    /// Call an endpoint and unwrap the `status` envelope
    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        params: &[(&str, &str)],
        operation: &str,
    ) -> Result<Option<T>> {
        let response = request
            .query(&[("token", self.api_token.as_str())])
            .query(params)
            .send()
            .await
            // reqwest errors carry the URL, which carries the token
            .map_err(|e| {
                Error::http(format!(
                    "Technitium {} request failed: {}",
                    operation,
                    e.without_url()
                ))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response".to_string());

        if !status.is_success() {
            return Err(map_status(status, operation, &body));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            Error::provider(PROVIDER, operation, format!("Failed to parse response: {}", e))
        })?;

        match envelope.status.as_str() {
            "ok" => Ok(envelope.response),
            "invalid-token" => Err(Error::auth("Technitium rejected the API token")),
            _ => Err(Error::provider(
                PROVIDER,
                operation,
                envelope
                    .error_message
                    .unwrap_or_else(|| format!("status '{}'", envelope.status)),
            )),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint)
    }

    /// Whether the server hosts `zone`
    async fn zone_exists(&self, zone: &str) -> Result<bool> {
        let list: Option<ZoneList> = self
            .call(self.client.get(self.url("zones/list")), &[], "list zones")
            .await?;
        Ok(list
            .map(|l| l.zones.iter().any(|z| z.name.eq_ignore_ascii_case(zone)))
            .unwrap_or(false))
    }

    /// Create `zone` unless the server already hosts it
    async fn ensure_zone(&self, zone: &str) -> Result<()> {
        if self.zone_exists(zone).await? {
            return Ok(());
        }

        tracing::info!("Creating Technitium {:?} zone {}", self.zone_type, zone);
        let mut params = vec![("zone", zone)];
        match self.zone_type {
            ZoneType::Primary => params.push(("type", "Primary")),
            ZoneType::Forwarder => {
                params.push(("type", "Forwarder"));
                params.push(("forwarder", "this-server"));
            }
        }
        let request = self.client.post(self.url("zones/create"));
        self.call::<serde_json::Value>(request, &params, "create zone")
            .await
            .map(|_| ())
    }

    /// Records named exactly `domain` inside `zone`
    async fn get_records(&self, zone: &str, domain: &str) -> Result<Vec<TechnitiumRecord>> {
        let params = [("domain", domain), ("zone", zone), ("listZone", "false")];
        let list: Option<RecordList> = self
            .call(self.client.get(self.url("zones/records/get")), &params, "list records")
            .await?;
        Ok(list.map(|l| l.records).unwrap_or_default())
    }

    /// Address records of `subdomain` plus its marker records
    async fn load(&self, zone: &str, subdomain: &str) -> Result<Vec<DnsRecord>> {
        let marker = record::marker_name(subdomain);
        let mut records = Vec::new();

        for raw in self.get_records(zone, subdomain).await? {
            if let Some(snapshot) = to_snapshot(raw, RecordType::is_address)
                && snapshot.has_name(subdomain)
            {
                records.push(snapshot);
            }
        }
        for raw in self.get_records(zone, &marker).await? {
            if let Some(snapshot) = to_snapshot(raw, |t| *t == RecordType::Txt)
                && snapshot.has_name(&marker)
            {
                records.push(snapshot);
            }
        }

        tracing::debug!("{} has {} matching record(s)", subdomain, records.len());
        Ok(records)
    }

    fn manager(&self, subdomain: &str) -> Result<RecordManager> {
        RecordManager::new(subdomain, &self.target_ip)
    }
}

/// Convert an enabled record of an accepted type into a snapshot
fn to_snapshot(raw: TechnitiumRecord, accept: impl Fn(&RecordType) -> bool) -> Option<DnsRecord> {
    if raw.disabled {
        return None;
    }
    let record_type = raw.record_type.parse::<RecordType>().ok()?;
    if !accept(&record_type) {
        return None;
    }
    let content = match record_type {
        RecordType::Txt => raw.r_data.text?,
        _ => raw.r_data.ip_address?,
    };
    Some(DnsRecord::new(String::new(), &raw.name, record_type, content))
}

/// Query parameter carrying a record's content
fn content_param(record_type: RecordType) -> &'static str {
    match record_type {
        RecordType::Txt => "text",
        _ => "ipAddress",
    }
}

/// Map a non-2xx status to a specific error
fn map_status(status: reqwest::StatusCode, operation: &str, body: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::auth(format!("Technitium rejected the API token. Status: {}", status)),
        404 => Error::not_found(format!("Technitium {}: {}", operation, body)),
        429 => Error::rate_limited(format!("Technitium rate limit exceeded. Status: {}", status)),
        500..=599 => Error::provider(
            PROVIDER,
            operation,
            format!("Technitium server error (transient): {} - {}", status, body),
        ),
        _ => Error::provider(PROVIDER, operation, format!("{} - {}", status, body)),
    }
}

/// Technitium primitives bound to one zone and one subdomain
struct ZoneOps<'a> {
    provider: &'a TechnitiumProvider,
    zone: &'a str,
    manager: &'a RecordManager,
}

impl ZoneOps<'_> {
    async fn post(&self, endpoint: &str, params: &[(&str, &str)], operation: &str) -> Result<()> {
        let mut all = vec![("zone", self.zone)];
        all.extend_from_slice(params);
        let request = self.provider.client.post(self.provider.url(endpoint));
        self.provider
            .call::<serde_json::Value>(request, &all, operation)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl RecordOperations for ZoneOps<'_> {
    async fn create_record(&self, record_type: RecordType) -> Result<()> {
        tracing::info!(
            "Creating Technitium {} record {} -> {}",
            record_type,
            self.manager.subdomain(),
            self.manager.target_ip()
        );
        let content = self.manager.content();
        let params = [
            ("domain", self.manager.subdomain()),
            ("type", record_type.as_str()),
            ("ttl", DEFAULT_TTL),
            ("ipAddress", content.as_str()),
        ];
        self.post("zones/records/add", &params, "create record").await
    }

    async fn update_record(&self, existing: &DnsRecord, record_type: RecordType) -> Result<()> {
        tracing::info!(
            "Updating Technitium {} record {} -> {} (was: {})",
            record_type,
            self.manager.subdomain(),
            self.manager.target_ip(),
            existing.content
        );
        let content = self.manager.content();
        let params = [
            ("domain", self.manager.subdomain()),
            ("type", record_type.as_str()),
            ("ipAddress", existing.content.as_str()),
            ("newIpAddress", content.as_str()),
        ];
        self.post("zones/records/update", &params, "update record").await
    }

    async fn create_marker(&self) -> Result<()> {
        tracing::info!("Creating ownership marker {}", self.manager.marker_name());
        let params = [
            ("domain", self.manager.marker_name()),
            ("type", RecordType::Txt.as_str()),
            ("ttl", DEFAULT_TTL),
            ("text", self.manager.marker_content()),
        ];
        self.post("zones/records/add", &params, "create marker").await
    }
}

#[async_trait]
impl DeleteOperations for ZoneOps<'_> {
    async fn delete_record(&self, record: &DnsRecord) -> Result<()> {
        tracing::info!(
            "Deleting Technitium {} record {} ({})",
            record.record_type,
            record.name,
            record.content
        );
        let params = [
            ("domain", record.name.as_str()),
            ("type", record.record_type.as_str()),
            (content_param(record.record_type), record.content.as_str()),
        ];
        self.post("zones/records/delete", &params, "delete record").await
    }
}

#[async_trait]
impl DnsProvider for TechnitiumProvider {
    async fn list_records(&self, subdomain: &str) -> Result<Vec<DnsRecord>> {
        let subdomain = record::normalize_name(subdomain);
        let zone = extract_base_domain(&subdomain)?;
        if !self.zone_exists(&zone).await? {
            return Err(Error::zone_not_found(zone));
        }
        self.load(&zone, &subdomain).await
    }

    async fn upsert_record(&self, subdomain: &str) -> Result<UpsertOutcome> {
        let manager = self.manager(subdomain)?;
        let zone = extract_base_domain(manager.subdomain())?;
        self.ensure_zone(&zone).await?;
        let existing = self.load(&zone, manager.subdomain()).await?;

        let ops = ZoneOps {
            provider: self,
            zone: &zone,
            manager: &manager,
        };
        manager.execute_upsert(&existing, &ops).await
    }

    async fn delete_record(&self, subdomain: &str) -> Result<DeleteOutcome> {
        let manager = self.manager(subdomain)?;
        let zone = extract_base_domain(manager.subdomain())?;
        if !self.zone_exists(&zone).await? {
            tracing::debug!("Zone {} does not exist, nothing to delete", zone);
            return Ok(DeleteOutcome::NothingToDelete);
        }
        let existing = self.load(&zone, manager.subdomain()).await?;

        let ops = ZoneOps {
            provider: self,
            zone: &zone,
            manager: &manager,
        };
        manager.execute_delete(&existing, &ops).await
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Factory for creating Technitium providers
pub struct TechnitiumFactory;

impl DnsProviderFactory for TechnitiumFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        Ok(Box::new(TechnitiumProvider::new(config)?))
    }
}

/// Register the Technitium provider with a registry
///
/// # Example
///
/// ```rust
/// use mantrae_dns_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// mantrae_dns_provider_technitium::register(&registry);
/// assert!(registry.has_provider("technitium"));
/// ```
pub fn register(registry: &ProviderRegistry) {
    registry.register_provider(PROVIDER, Box::new(TechnitiumFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(
        name: &str,
        record_type: &str,
        ip: Option<&str>,
        text: Option<&str>,
    ) -> TechnitiumRecord {
        TechnitiumRecord {
            name: name.to_string(),
            record_type: record_type.to_string(),
            disabled: false,
            r_data: RecordData {
                ip_address: ip.map(str::to_string),
                text: text.map(str::to_string),
            },
        }
    }

    #[test]
    fn test_factory_requires_url() {
        let mut config = ProviderConfig {
            api_key: "token".to_string(),
            ip: "203.0.113.5".to_string(),
            ..Default::default()
        };
        assert!(TechnitiumFactory.create(&config).is_err());

        config.api_url = "http://technitium:5380".to_string();
        assert!(TechnitiumFactory.create(&config).is_ok());
    }

    #[test]
    fn test_snapshot_conversion() {
        let a = to_snapshot(
            raw("App.example.com", "A", Some("203.0.113.5"), None),
            RecordType::is_address,
        )
        .unwrap();
        assert_eq!(a.name, "app.example.com");
        assert_eq!(a.content, "203.0.113.5");
        assert!(a.id.is_empty());

        let txt = to_snapshot(
            raw("_mantrae-app.example.com", "TXT", None, Some("managed-by=mantrae")),
            |t| *t == RecordType::Txt,
        )
        .unwrap();
        assert_eq!(txt.content, "managed-by=mantrae");

        let cname = raw("app.example.com", "CNAME", None, None);
        assert!(to_snapshot(cname, RecordType::is_address).is_none());

        let mut disabled = raw("app.example.com", "A", Some("203.0.113.5"), None);
        disabled.disabled = true;
        assert!(to_snapshot(disabled, RecordType::is_address).is_none());
    }

    #[test]
    fn test_envelope_parsing() {
        let env: Envelope<serde_json::Value> = serde_json::from_str(
            r#"{"status":"error","errorMessage":"Zone not found","innerErrorMessage":"x"}"#,
        )
        .unwrap();
        assert_eq!(env.status, "error");
        assert_eq!(env.error_message.as_deref(), Some("Zone not found"));
        assert!(env.response.is_none());
    }

    #[test]
    fn test_content_param() {
        assert_eq!(content_param(RecordType::A), "ipAddress");
        assert_eq!(content_param(RecordType::Aaaa), "ipAddress");
        assert_eq!(content_param(RecordType::Txt), "text");
    }
}
