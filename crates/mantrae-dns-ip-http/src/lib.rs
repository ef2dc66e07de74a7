// # HTTP IP Source
//
// Public IP detection for providers with `auto_update` enabled.
//
// ## Architecture
//
// Asks one or more "what is my IP" services (e.g. api.ipify.org,
// icanhazip.com) for the caller's address as a plain-text body. Services
// are tried in order; the first usable answer wins. Nothing is cached: the
// sync driver asks once per cycle and compares against the stored IP.

use async_trait::async_trait;
use mantrae_dns_core::traits::IpSource;
use mantrae_dns_core::{Error, Result};
use std::net::IpAddr;
use std::time::Duration;

/// Default IP check services, tried in order
pub const DEFAULT_IP_SERVICES: &[&str] = &[
    "https://api.ipify.org",  // plain text IPv4
    "https://ifconfig.me/ip", // plain text, either family
    "https://icanhazip.com",  // plain text, either family
];

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Address family a source is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    /// Only accept IPv4 answers
    V4,
    /// Only accept IPv6 answers
    V6,
}

impl IpFamily {
    fn accepts(self, ip: IpAddr) -> bool {
        match self {
            IpFamily::V4 => ip.is_ipv4(),
            IpFamily::V6 => ip.is_ipv6(),
        }
    }
}

/// HTTP-based IP source
#[derive(Debug)]
pub struct HttpIpSource {
    /// Services to ask, in order
    urls: Vec<String>,

    /// Family filter (None = either)
    family: Option<IpFamily>,

    /// HTTP client
    client: reqwest::Client,
}

impl HttpIpSource {
    /// Create a new HTTP IP source
    ///
    /// # Parameters
    ///
    /// - `urls`: services to ask, in order (at least one)
    /// - `family`: restrict answers to one address family (None = either)
    pub fn new(urls: Vec<String>, family: Option<IpFamily>) -> Result<Self> {
        let urls: Vec<String> = urls
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(Error::config("HTTP IP source needs at least one URL"));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            urls,
            family,
            client,
        })
    }

    /// Source using [`DEFAULT_IP_SERVICES`]
    pub fn with_defaults(family: Option<IpFamily>) -> Result<Self> {
        Self::new(
            DEFAULT_IP_SERVICES.iter().map(|s| s.to_string()).collect(),
            family,
        )
    }

    /// Fetch the address from a single service
    async fn fetch_ip(&self, url: &str) -> Result<IpAddr> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::http(format!("Request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::http(format!(
                "{} answered with status {}",
                url,
                response.status()
            )));
        }

        let ip_text = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read response from {}: {}", url, e)))?;
        let ip_text = ip_text.trim();

        let ip: IpAddr = ip_text.parse().map_err(|_| {
            Error::Other(format!("{} returned an invalid IP address: {}", url, ip_text))
        })?;

        if let Some(family) = self.family
            && !family.accepts(ip)
        {
            return Err(Error::Other(format!(
                "{} returned {}, expected {:?}",
                url, ip, family
            )));
        }

        Ok(ip)
    }
}

#[async_trait]
impl IpSource for HttpIpSource {
    async fn current(&self) -> Result<IpAddr> {
        let mut last_error = None;

        for url in &self.urls {
            match self.fetch_ip(url).await {
                Ok(ip) => {
                    tracing::debug!("Public IP {} reported by {}", ip, url);
                    return Ok(ip);
                }
                Err(e) => {
                    tracing::warn!("IP service {} failed: {}", url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Other("no IP services configured".to_string())))
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}
