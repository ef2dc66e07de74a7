// # Pi-hole Provider
//
// Pi-hole v6 local-resolver adapter for the Mantrae DNS reconciliation
// engine.
//
// ## Behavior
//
// - Every operation logs in, works under the session id and logs out again
// - Address records are `dns.hosts` entries (`"<ip> <host>"`)
// - The ownership marker is a dnsmasq `txt-record=` line in
//   `misc.dnsmasq_lines`
// - There is no update primitive: an update deletes the stale entry and
//   creates a fresh one
// - Record ids are the raw config entries; an entry shared with other
//   hostnames is written back without ours when it is released
//
// ## API Reference
//
// - Login / logout: POST / DELETE `/api/auth`
// - Local hosts: GET `/api/config/dns/hosts`, PUT / DELETE `/api/config/dns/hosts/:entry`
// - dnsmasq lines: GET `/api/config/misc/dnsmasq_lines`,
//   PUT / DELETE `/api/config/misc/dnsmasq_lines/:line`
// - Authentication: `X-FTL-SID` header

use async_trait::async_trait;
use mantrae_dns_core::config::ProviderConfig;
use mantrae_dns_core::manager::{
    DeleteOperations, DeleteOutcome, RecordManager, RecordOperations, UpsertOutcome,
};
use mantrae_dns_core::record::{self, DnsRecord, MARKER_CONTENT, RecordType};
use mantrae_dns_core::traits::{DnsProvider, DnsProviderFactory};
use mantrae_dns_core::{Error, ProviderRegistry, Result, extract_base_domain};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Session header expected by the Pi-hole API
const SID_HEADER: &str = "X-FTL-SID";

/// dnsmasq directive carrying a TXT record
const TXT_DIRECTIVE: &str = "txt-record=";

const PROVIDER: &str = "pihole";

#[derive(Serialize)]
struct LoginRequest<'a> {
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    session: SessionInfo,
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    valid: bool,
    sid: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Body of `GET /api/config/...`
#[derive(Debug, Deserialize)]
struct ConfigResponse {
    config: ConfigSection,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigSection {
    #[serde(default)]
    dns: Option<DnsSection>,
    #[serde(default)]
    misc: Option<MiscSection>,
}

#[derive(Debug, Deserialize)]
struct DnsSection {
    #[serde(default)]
    hosts: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MiscSection {
    #[serde(default)]
    dnsmasq_lines: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    key: String,
    #[serde(default)]
    message: String,
}

/// Authenticated API session
///
/// `sid` is `None` when the Pi-hole has no password set.
struct Session {
    sid: Option<String>,
}

/// Pi-hole DNS provider
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the password.
pub struct PiholeProvider {
    /// Web interface / API password
    /// ⚠️ NEVER log this value
    password: String,

    /// Server root without trailing slash
    base_url: String,

    /// Target IP every managed record should resolve to
    target_ip: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for PiholeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiholeProvider")
            .field("password", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .field("target_ip", &self.target_ip)
            .finish()
    }
}

impl PiholeProvider {
    /// Create a new Pi-hole provider
    ///
    /// `api_key` holds the Pi-hole password and `api_url` the server root
    /// (e.g. `http://pi.hole`).
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        config.validate(true)?;

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            password: config.api_key.trim().to_string(),
            base_url: config.base_url(""),
            target_ip: config.ip.trim().to_string(),
            client,
        })
    }

    /// API URL from path segments, each percent-encoded
    fn api_url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("Invalid Pi-hole API URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::config("Pi-hole API URL cannot be a base"))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    async fn login(&self) -> Result<Session> {
        let response = self
            .client
            .post(self.api_url(["auth"])?)
            .json(&LoginRequest {
                password: &self.password,
            })
            .send()
            .await
            .map_err(|e| Error::http(format!("Pi-hole login failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response".to_string());
        if !status.is_success() {
            return Err(map_status(status, "login", &body));
        }

        let login: LoginResponse = serde_json::from_str(&body).map_err(|e| {
            Error::provider(PROVIDER, "login", format!("Failed to parse response: {}", e))
        })?;
        if !login.session.valid {
            return Err(Error::auth(format!(
                "Pi-hole rejected the password: {}",
                login.session.message.unwrap_or_default()
            )));
        }

        Ok(Session {
            sid: login.session.sid,
        })
    }

    /// End the session; failures only cost a server-side session slot
    async fn logout(&self, session: Session) {
        if session.sid.is_none() {
            return;
        }
        match self.api_url(["auth"]) {
            Ok(url) => {
                let request = self.authorized(self.client.delete(url), &session);
                if let Err(e) = self.send(request, "logout").await {
                    tracing::warn!("Pi-hole logout failed: {}", e);
                }
            }
            Err(e) => tracing::warn!("Pi-hole logout failed: {}", e),
        }
    }

    fn authorized(
        &self,
        request: reqwest::RequestBuilder,
        session: &Session,
    ) -> reqwest::RequestBuilder {
        match &session.sid {
            Some(sid) => request.header(SID_HEADER, sid.as_str()),
            None => request,
        }
    }

    /// Send a request and return the body of a 2xx response
    async fn send(&self, request: reqwest::RequestBuilder, operation: &str) -> Result<String> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::http(format!("Pi-hole {} request failed: {}", operation, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response".to_string());

        if status.is_success() {
            Ok(body)
        } else {
            Err(map_status(status, operation, &body))
        }
    }

    async fn get_config(
        &self,
        session: &Session,
        section: &str,
        key: &str,
    ) -> Result<ConfigSection> {
        let request = self.authorized(
            self.client.get(self.api_url(["config", section, key])?),
            session,
        );
        let body = self.send(request, "list records").await?;
        let parsed: ConfigResponse = serde_json::from_str(&body).map_err(|e| {
            Error::provider(PROVIDER, "list records", format!("Failed to parse response: {}", e))
        })?;
        Ok(parsed.config)
    }

    /// Host entries for `subdomain` plus its marker line
    async fn load(&self, session: &Session, subdomain: &str) -> Result<Vec<DnsRecord>> {
        let marker = record::marker_name(subdomain);

        let hosts = self
            .get_config(session, "dns", "hosts")
            .await?
            .dns
            .map(|d| d.hosts)
            .unwrap_or_default();
        let lines = self
            .get_config(session, "misc", "dnsmasq_lines")
            .await?
            .misc
            .map(|m| m.dnsmasq_lines)
            .unwrap_or_default();

        let mut records: Vec<DnsRecord> = hosts
            .iter()
            .filter_map(|entry| parse_host_entry(entry, subdomain))
            .collect();
        records.extend(lines.iter().filter_map(|line| parse_marker_line(line, &marker)));

        tracing::debug!("{} has {} matching record(s)", subdomain, records.len());
        Ok(records)
    }

    async fn upsert_in(&self, session: &Session, manager: &RecordManager) -> Result<UpsertOutcome> {
        let existing = self.load(session, manager.subdomain()).await?;
        let ops = SessionOps {
            provider: self,
            session,
            manager,
        };
        manager.execute_upsert(&existing, &ops).await
    }

    async fn delete_in(&self, session: &Session, manager: &RecordManager) -> Result<DeleteOutcome> {
        let existing = self.load(session, manager.subdomain()).await?;
        let ops = SessionOps {
            provider: self,
            session,
            manager,
        };
        manager.execute_delete(&existing, &ops).await
    }

    fn manager(&self, subdomain: &str) -> Result<RecordManager> {
        let manager = RecordManager::new(subdomain, &self.target_ip)?;
        // No zones on a local resolver, but the hostname must still be one
        extract_base_domain(manager.subdomain())?;
        Ok(manager)
    }
}

/// Address record for `subdomain` from a `"<ip> <host> [<host>...]"` entry
fn parse_host_entry(entry: &str, subdomain: &str) -> Option<DnsRecord> {
    let mut parts = entry.split_whitespace();
    let ip: IpAddr = parts.next()?.parse().ok()?;
    if !parts.any(|host| record::normalize_name(host) == subdomain) {
        return None;
    }
    Some(DnsRecord::new(entry, subdomain, RecordType::for_ip(ip), ip.to_string()))
}

/// Marker record from a `txt-record=<name>,<content>` dnsmasq line
fn parse_marker_line(line: &str, marker: &str) -> Option<DnsRecord> {
    let (name, content) = line.trim().strip_prefix(TXT_DIRECTIVE)?.split_once(',')?;
    if record::normalize_name(name) != marker {
        return None;
    }
    Some(DnsRecord::new(line, name, RecordType::Txt, content))
}

/// `entry` without `subdomain`, or None when no other hostname is left
fn without_host(entry: &str, subdomain: &str) -> Option<String> {
    let mut parts = entry.split_whitespace();
    let ip = parts.next()?;
    let others: Vec<&str> = parts
        .filter(|host| record::normalize_name(host) != subdomain)
        .collect();
    if others.is_empty() {
        return None;
    }
    Some(format!("{} {}", ip, others.join(" ")))
}

fn host_entry(ip: IpAddr, subdomain: &str) -> String {
    format!("{} {}", ip, subdomain)
}

fn marker_line(marker: &str) -> String {
    format!("{}{},{}", TXT_DIRECTIVE, marker, record::quote_txt(MARKER_CONTENT))
}

/// Map a non-2xx status to a specific error
fn map_status(status: reqwest::StatusCode, operation: &str, body: &str) -> Error {
    // Pi-hole error bodies are {"error": {"key": "...", "message": "..."}}
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| format!("{}: {}", e.error.key, e.error.message))
        .unwrap_or_else(|_| body.to_string());

    match status.as_u16() {
        401 | 403 => Error::auth(format!("Pi-hole rejected the session. Status: {}", status)),
        404 => Error::not_found(format!("Pi-hole {}: {}", operation, message)),
        429 => Error::rate_limited(format!("Pi-hole rate limit exceeded. Status: {}", status)),
        500..=599 => Error::provider(
            PROVIDER,
            operation,
            format!("Pi-hole server error (transient): {} - {}", status, message),
        ),
        _ => Error::provider(PROVIDER, operation, format!("{} - {}", status, message)),
    }
}

/// Pi-hole primitives bound to one session and one subdomain
struct SessionOps<'a> {
    provider: &'a PiholeProvider,
    session: &'a Session,
    manager: &'a RecordManager,
}

impl SessionOps<'_> {
    async fn write(
        &self,
        method: reqwest::Method,
        segments: [&str; 4],
        operation: &str,
    ) -> Result<()> {
        let url = self.provider.api_url(segments)?;
        let request = self
            .provider
            .authorized(self.provider.client.request(method, url), self.session);
        self.provider.send(request, operation).await.map(|_| ())
    }

    /// Remove our hostname from a `dns.hosts` entry
    ///
    /// Other hostnames on the same entry are written back.
    async fn release_entry(&self, entry: &str, operation: &str) -> Result<()> {
        self.write(
            reqwest::Method::DELETE,
            ["config", "dns", "hosts", entry],
            operation,
        )
        .await?;

        if let Some(rest) = without_host(entry, self.manager.subdomain()) {
            tracing::debug!("Keeping '{}' after releasing '{}'", rest, entry);
            self.write(reqwest::Method::PUT, ["config", "dns", "hosts", &rest], operation)
                .await?;
        }
        Ok(())
    }

    async fn put_host(&self, operation: &str) -> Result<()> {
        let entry = host_entry(self.manager.target_ip(), self.manager.subdomain());
        self.write(reqwest::Method::PUT, ["config", "dns", "hosts", &entry], operation)
            .await
    }
}

#[async_trait]
impl RecordOperations for SessionOps<'_> {
    async fn create_record(&self, record_type: RecordType) -> Result<()> {
        tracing::info!(
            "Creating Pi-hole {} record {} -> {}",
            record_type,
            self.manager.subdomain(),
            self.manager.target_ip()
        );
        self.put_host("create record").await
    }

    async fn update_record(&self, existing: &DnsRecord, record_type: RecordType) -> Result<()> {
        tracing::info!(
            "Replacing Pi-hole {} record {} -> {} (was: {})",
            record_type,
            self.manager.subdomain(),
            self.manager.target_ip(),
            existing.content
        );
        self.release_entry(&existing.id, "update record").await?;
        self.put_host("update record").await
    }

    async fn create_marker(&self) -> Result<()> {
        tracing::info!("Creating ownership marker {}", self.manager.marker_name());
        let line = marker_line(self.manager.marker_name());
        self.write(
            reqwest::Method::PUT,
            ["config", "misc", "dnsmasq_lines", &line],
            "create marker",
        )
        .await
    }
}

#[async_trait]
impl DeleteOperations for SessionOps<'_> {
    async fn delete_record(&self, record: &DnsRecord) -> Result<()> {
        tracing::info!("Deleting Pi-hole {} entry '{}'", record.record_type, record.id);
        match record.record_type {
            RecordType::Txt => {
                self.write(
                    reqwest::Method::DELETE,
                    ["config", "misc", "dnsmasq_lines", record.id.as_str()],
                    "delete record",
                )
                .await
            }
            _ => self.release_entry(&record.id, "delete record").await,
        }
    }
}

#[async_trait]
impl DnsProvider for PiholeProvider {
    async fn list_records(&self, subdomain: &str) -> Result<Vec<DnsRecord>> {
        let subdomain = record::normalize_name(subdomain);
        extract_base_domain(&subdomain)?;

        let session = self.login().await?;
        let result = self.load(&session, &subdomain).await;
        self.logout(session).await;
        result
    }

    async fn upsert_record(&self, subdomain: &str) -> Result<UpsertOutcome> {
        let manager = self.manager(subdomain)?;

        let session = self.login().await?;
        let result = self.upsert_in(&session, &manager).await;
        self.logout(session).await;
        result
    }

    async fn delete_record(&self, subdomain: &str) -> Result<DeleteOutcome> {
        let manager = self.manager(subdomain)?;

        let session = self.login().await?;
        let result = self.delete_in(&session, &manager).await;
        self.logout(session).await;
        result
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Factory for creating Pi-hole providers
pub struct PiholeFactory;

impl DnsProviderFactory for PiholeFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        Ok(Box::new(PiholeProvider::new(config)?))
    }
}

/// Register the Pi-hole provider with a registry
///
/// # Example
///
/// ```rust
/// use mantrae_dns_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// mantrae_dns_provider_pihole::register(&registry);
/// assert!(registry.has_provider("pihole"));
/// ```
pub fn register(registry: &ProviderRegistry) {
    registry.register_provider(PROVIDER, Box::new(PiholeFactory));
}
