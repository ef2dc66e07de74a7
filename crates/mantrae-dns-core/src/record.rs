//! Provider-neutral record model and the ownership-marker convention
//!
//! A subdomain is owned by mantrae when a TXT record named
//! `_mantrae-<subdomain>` carries the content `managed-by=mantrae`. The
//! marker name, type and content are wire-visible and must stay
//! bit-compatible with existing deployments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Prefix of the ownership marker record name
pub const MARKER_PREFIX: &str = "_mantrae-";

/// Content of the ownership marker once TXT quoting is removed
pub const MARKER_CONTENT: &str = "managed-by=mantrae";

/// DNS record types the engine manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// IPv4 address record
    A,
    /// IPv6 address record
    #[serde(rename = "AAAA")]
    Aaaa,
    /// Text record (ownership marker)
    #[serde(rename = "TXT")]
    Txt,
}

impl RecordType {
    /// Address record type for an IP family
    pub fn for_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(_) => RecordType::Aaaa,
        }
    }

    /// Wire name of the record type
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Txt => "TXT",
        }
    }

    /// A or AAAA
    pub fn is_address(&self) -> bool {
        matches!(self, RecordType::A | RecordType::Aaaa)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::Aaaa),
            "TXT" => Ok(RecordType::Txt),
            other => Err(crate::Error::Other(format!(
                "Unsupported record type: {}",
                other
            ))),
        }
    }
}

/// Snapshot of one record as seen through a provider
///
/// `id` is provider-assigned and may be empty for backends without stable
/// record identifiers. `name` is always lowercase without a trailing dot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Provider-assigned identifier
    pub id: String,
    /// Fully-qualified record name
    pub name: String,
    /// Record type
    #[serde(rename = "type")]
    pub record_type: RecordType,
    /// IP literal or TXT payload
    pub content: String,
}

impl DnsRecord {
    /// Create a record snapshot, normalizing the name
    pub fn new(
        id: impl Into<String>,
        name: &str,
        record_type: RecordType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: normalize_name(name),
            record_type,
            content: content.into(),
        }
    }

    /// Whether this record is named exactly `name` (case-insensitive, trailing dot ignored)
    pub fn has_name(&self, name: &str) -> bool {
        self.name == normalize_name(name)
    }
}

/// Lowercase a DNS name and strip the trailing root dot
pub fn normalize_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Marker record name for a subdomain
pub fn marker_name(subdomain: &str) -> String {
    format!("{}{}", MARKER_PREFIX, normalize_name(subdomain))
}

/// Strip provider TXT quoting from a record payload
///
/// Handles the presentation format some backends return or require:
/// `"managed-by=mantrae"`, split strings (`"managed-by=" "mantrae"`) and
/// escaped quotes. Unquoted content is returned trimmed.
pub fn normalize_txt(content: &str) -> String {
    let trimmed = content.trim();
    if !(trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"')) {
        return trimmed.to_string();
    }

    let mut out = String::with_capacity(trimmed.len());
    let mut in_quotes = false;
    let mut chars = trimmed.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            c if in_quotes => out.push(c),
            // whitespace between character-strings
            _ => {}
        }
    }
    out
}

/// Whether a TXT payload is the ownership sentinel
pub fn is_marker_content(content: &str) -> bool {
    normalize_txt(content) == MARKER_CONTENT
}

/// TXT payload in quoted presentation format
pub fn quote_txt(content: &str) -> String {
    format!("\"{}\"", content.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_name_uses_prefix() {
        assert_eq!(marker_name("app.example.com"), "_mantrae-app.example.com");
        assert_eq!(marker_name("App.Example.com."), "_mantrae-app.example.com");
    }

    #[test]
    fn normalize_txt_strips_quoting() {
        assert_eq!(normalize_txt("managed-by=mantrae"), "managed-by=mantrae");
        assert_eq!(normalize_txt("\"managed-by=mantrae\""), "managed-by=mantrae");
        assert_eq!(
            normalize_txt("\"managed-by=\" \"mantrae\""),
            "managed-by=mantrae"
        );
        assert_eq!(normalize_txt("  \"a\\\"b\"  "), "a\"b");
    }

    #[test]
    fn quote_then_normalize_is_identity() {
        let quoted = quote_txt(MARKER_CONTENT);
        assert_eq!(quoted, "\"managed-by=mantrae\"");
        assert!(is_marker_content(&quoted));
    }

    #[test]
    fn record_type_follows_ip_family() {
        assert_eq!(RecordType::for_ip("203.0.113.5".parse().unwrap()), RecordType::A);
        assert_eq!(RecordType::for_ip("2001:db8::1".parse().unwrap()), RecordType::Aaaa);
        assert!(!RecordType::Txt.is_address());
        assert_eq!("aaaa".parse::<RecordType>().unwrap(), RecordType::Aaaa);
        assert!("MX".parse::<RecordType>().is_err());
    }

    #[test]
    fn record_names_are_normalized() {
        let record = DnsRecord::new("1", "App.Example.COM.", RecordType::A, "203.0.113.5");
        assert_eq!(record.name, "app.example.com");
        assert!(record.has_name("app.example.com."));
        assert!(!record.has_name("example.com"));
    }
}
