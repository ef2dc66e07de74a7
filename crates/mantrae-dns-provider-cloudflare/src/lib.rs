// # Cloudflare DNS Provider
//
// Cloudflare adapter for the Mantrae DNS reconciliation engine.
//
// ## Behavior
//
// - Zone discovered per hostname from its registrable domain
// - Records listed with `name.contains` and filtered to exact names
// - Address records honor the provider's `proxied` flag
// - TTL is always "automatic" (1)
// - No retries and no caching; the sync driver owns scheduling
//
// ## Security Requirements
//
// - API token NEVER appears in logs or Debug output
// - Provider fails construction if the token is empty
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List Zones: GET `/zones?name=...`
// - List DNS Records: GET `/zones/:zone_id/dns_records?name.contains=...`
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Update DNS Record: PUT `/zones/:zone_id/dns_records/:record_id`
// - Delete DNS Record: DELETE `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use mantrae_dns_core::config::ProviderConfig;
use mantrae_dns_core::manager::{
    DeleteOperations, DeleteOutcome, RecordManager, RecordOperations, UpsertOutcome,
};
use mantrae_dns_core::record::{self, DnsRecord, RecordType};
use mantrae_dns_core::traits::{DnsProvider, DnsProviderFactory};
use mantrae_dns_core::{Error, ProviderRegistry, Result, extract_base_domain};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cloudflare API base URL
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Records per list page (Cloudflare maximum is 5000, default 100)
const PAGE_SIZE: u32 = 100;

/// "Automatic" TTL
const AUTO_TTL: u32 = 1;

const PROVIDER: &str = "cloudflare";

/// Response envelope shared by every v4 endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CloudflareRecord {
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    content: String,
}

/// Body for creating or updating an A/AAAA record
#[derive(Debug, Serialize)]
struct AddressRecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: String,
    ttl: u32,
    proxied: bool,
}

/// Body for creating the ownership marker
#[derive(Debug, Serialize)]
struct TxtRecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: String,
    ttl: u32,
}

/// Cloudflare DNS provider
///
/// One instance serves every hostname of one configured account. The zone
/// is looked up per call; nothing is cached between calls.
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the API token.
pub struct CloudflareProvider {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// API base URL without trailing slash
    base_url: String,

    /// Target IP every managed record should resolve to
    target_ip: String,

    /// Route traffic through Cloudflare's proxy
    proxied: bool,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("api_token", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .field("target_ip", &self.target_ip)
            .field("proxied", &self.proxied)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a new Cloudflare provider
    ///
    /// # Parameters
    ///
    /// - `config`: Provider settings; `api_key` is an API token with
    ///   Zone:DNS:Edit permissions, `api_url` overrides the API base
    ///
    /// # Returns
    ///
    /// - `Ok(CloudflareProvider)`: Ready provider, no request sent yet
    /// - `Err(Error::InvalidConfig)`: Empty token or bad target IP
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        config.validate(false)?;

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_token: config.api_key.trim().to_string(),
            base_url: config.base_url(CLOUDFLARE_API_BASE),
            target_ip: config.ip.trim().to_string(),
            proxied: config.proxied,
            client,
        })
    }

    /// Get the zone ID for a hostname
    ///
    /// # API Call
    ///
    /// ```http
    /// GET /zones?name=example.com
    /// Authorization: Bearer <token>
    /// ```
    async fn zone_id(&self, hostname: &str) -> Result<String> {
        let zone_name = extract_base_domain(hostname)?;
        tracing::debug!("Looking up Cloudflare zone for {}", zone_name);

        let request = self
            .client
            .get(format!("{}/zones", self.base_url))
            .query(&[("name", zone_name.as_str())]);

        let zones: Vec<Zone> = self.send(request, "zone lookup").await?.0;
        let zone = zones
            .into_iter()
            .next()
            .ok_or_else(|| Error::zone_not_found(&zone_name))?;

        tracing::debug!("Found zone ID {} for {}", zone.id, zone_name);
        Ok(zone.id)
    }

    /// List records whose name contains `subdomain`, then keep exact matches
    async fn list_in_zone(&self, zone_id: &str, subdomain: &str) -> Result<Vec<DnsRecord>> {
        let marker = record::marker_name(subdomain);
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let request = self
                .client
                .get(format!("{}/zones/{}/dns_records", self.base_url, zone_id))
                .query(&[("name.contains", subdomain)])
                .query(&[("per_page", PAGE_SIZE), ("page", page)]);

            let (batch, info): (Vec<CloudflareRecord>, _) =
                self.send(request, "list records").await?;

            for raw in batch {
                let Ok(record_type) = raw.record_type.parse::<RecordType>() else {
                    continue;
                };
                let snapshot = DnsRecord::new(raw.id, &raw.name, record_type, raw.content);
                let wanted = if record_type.is_address() {
                    snapshot.has_name(subdomain)
                } else {
                    snapshot.has_name(&marker)
                };
                if wanted {
                    records.push(snapshot);
                }
            }

            let total_pages = info.map(|i| i.total_pages).unwrap_or(1);
            if page >= total_pages {
                break;
            }
            page += 1;
        }

        tracing::debug!("{} has {} matching record(s)", subdomain, records.len());
        Ok(records)
    }

    /// Send a request and check the response envelope
    ///
    /// The envelope's `success` flag is checked even on 2xx responses.
    async fn envelope<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> Result<Envelope<T>> {
        let response = request
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| Error::http(format!("Cloudflare {} request failed: {}", operation, e)))?;

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

        if !envelope.success {
            return Err(Error::provider(
                PROVIDER,
                operation,
                describe_errors(&envelope.errors),
            ));
        }

        Ok(envelope)
    }

    /// Send a request whose `result` is required
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> Result<(T, Option<ResultInfo>)> {
        let envelope = self.envelope::<T>(request, operation).await?;
        let result = envelope.result.ok_or_else(|| {
            Error::provider(PROVIDER, operation, "Invalid response format: result is missing")
        })?;
        Ok((result, envelope.result_info))
    }

    /// Send a write request; only the envelope status matters
    async fn execute(&self, request: reqwest::RequestBuilder, operation: &str) -> Result<()> {
        self.envelope::<serde_json::Value>(request, operation)
            .await
            .map(|_| ())
    }

    fn manager(&self, subdomain: &str) -> Result<RecordManager> {
        RecordManager::new(subdomain, &self.target_ip)
    }
}

/// Map a non-2xx status to a specific error
fn map_status(status: reqwest::StatusCode, operation: &str, body: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::auth(format!(
            "Cloudflare rejected the API token or it lacks permissions. Status: {}",
            status
        )),
        404 => Error::not_found(format!("Cloudflare {}: {}", operation, body)),
        429 => Error::rate_limited(format!(
            "Cloudflare rate limit exceeded. Status: {}",
            status
        )),
        500..=599 => Error::provider(
            PROVIDER,
            operation,
            format!("Cloudflare server error (transient): {} - {}", status, body),
        ),
        _ => Error::provider(PROVIDER, operation, format!("{} - {}", status, body)),
    }
}

fn describe_errors(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "request was not successful".to_string();
    }
    errors
        .iter()
        .map(|e| format!("[{}] {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Cloudflare primitives bound to one zone and one subdomain
struct ZoneOps<'a> {
    provider: &'a CloudflareProvider,
    zone_id: &'a str,
    manager: &'a RecordManager,
}

impl ZoneOps<'_> {
    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.provider.base_url, self.zone_id)
    }

    fn address_body(&self, record_type: RecordType) -> AddressRecordBody<'_> {
        AddressRecordBody {
            record_type: record_type.as_str(),
            name: self.manager.subdomain(),
            content: self.manager.content(),
            ttl: AUTO_TTL,
            proxied: self.provider.proxied,
        }
    }
}

#[async_trait]
impl RecordOperations for ZoneOps<'_> {
    async fn create_record(&self, record_type: RecordType) -> Result<()> {
        tracing::info!(
            "Creating Cloudflare {} record {} -> {}",
            record_type,
            self.manager.subdomain(),
            self.manager.target_ip()
        );
        let request = self
            .provider
            .client
            .post(self.records_url())
            .json(&self.address_body(record_type));
        self.provider.execute(request, "create record").await
    }

    async fn update_record(&self, existing: &DnsRecord, record_type: RecordType) -> Result<()> {
        tracing::info!(
            "Updating Cloudflare {} record {} -> {} (was: {})",
            record_type,
            self.manager.subdomain(),
            self.manager.target_ip(),
            existing.content
        );
        let request = self
            .provider
            .client
            .put(format!("{}/{}", self.records_url(), existing.id))
            .json(&self.address_body(record_type));
        self.provider.execute(request, "update record").await
    }

    async fn create_marker(&self) -> Result<()> {
        tracing::info!("Creating ownership marker {}", self.manager.marker_name());
        let body = TxtRecordBody {
            record_type: RecordType::Txt.as_str(),
            name: self.manager.marker_name(),
            content: record::quote_txt(self.manager.marker_content()),
            ttl: AUTO_TTL,
        };
        let request = self.provider.client.post(self.records_url()).json(&body);
        self.provider.execute(request, "create marker").await
    }
}

#[async_trait]
impl DeleteOperations for ZoneOps<'_> {
    async fn delete_record(&self, record: &DnsRecord) -> Result<()> {
        tracing::info!(
            "Deleting Cloudflare {} record {} ({})",
            record.record_type,
            record.name,
            record.id
        );
        let request = self
            .provider
            .client
            .delete(format!("{}/{}", self.records_url(), record.id));
        self.provider.execute(request, "delete record").await
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn list_records(&self, subdomain: &str) -> Result<Vec<DnsRecord>> {
        let subdomain = record::normalize_name(subdomain);
        let zone_id = self.zone_id(&subdomain).await?;
        self.list_in_zone(&zone_id, &subdomain).await
    }

    async fn upsert_record(&self, subdomain: &str) -> Result<UpsertOutcome> {
        let manager = self.manager(subdomain)?;
        let zone_id = self.zone_id(manager.subdomain()).await?;
        let existing = self.list_in_zone(&zone_id, manager.subdomain()).await?;

        let ops = ZoneOps {
            provider: self,
            zone_id: &zone_id,
            manager: &manager,
        };
        manager.execute_upsert(&existing, &ops).await
    }

    async fn delete_record(&self, subdomain: &str) -> Result<DeleteOutcome> {
        let manager = self.manager(subdomain)?;
        let zone_id = self.zone_id(manager.subdomain()).await?;
        let existing = self.list_in_zone(&zone_id, manager.subdomain()).await?;

        let ops = ZoneOps {
            provider: self,
            zone_id: &zone_id,
            manager: &manager,
        };
        manager.execute_delete(&existing, &ops).await
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Factory for creating Cloudflare providers
pub struct CloudflareFactory;

impl DnsProviderFactory for CloudflareFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        Ok(Box::new(CloudflareProvider::new(config)?))
    }
}

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust
/// use mantrae_dns_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// mantrae_dns_provider_cloudflare::register(&registry);
/// assert!(registry.has_provider("cloudflare"));
/// ```
pub fn register(registry: &ProviderRegistry) {
    registry.register_provider(PROVIDER, Box::new(CloudflareFactory));
}
