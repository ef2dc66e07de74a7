//! Zone resolution
//!
//! Computes the registrable parent (eTLD+1) of a hostname using the public
//! suffix list. Providers scope their API calls with it, either by looking
//! up a zone id or by using the zone name in the request path.

use crate::error::{Error, Result};
use std::net::IpAddr;

/// Return the zone apex (effective TLD plus one label) for a hostname
///
/// A leading URL scheme, path, port and trailing dot are ignored.
///
/// ```
/// use mantrae_dns_core::zone::extract_base_domain;
///
/// assert_eq!(extract_base_domain("a.b.example.co.uk").unwrap(), "example.co.uk");
/// assert_eq!(extract_base_domain("https://app.example.com/").unwrap(), "example.com");
/// assert!(extract_base_domain("203.0.113.5").is_err());
/// ```
pub fn extract_base_domain(hostname: &str) -> Result<String> {
    let host = host_part(hostname);

    if host.is_empty() {
        return Err(Error::invalid_hostname(format!(
            "'{}' does not contain a hostname",
            hostname
        )));
    }

    if host.parse::<IpAddr>().is_ok() {
        return Err(Error::invalid_hostname(format!(
            "'{}' is an IP literal, not a domain",
            hostname
        )));
    }

    if !host.contains('.') {
        return Err(Error::invalid_hostname(format!(
            "'{}' is a single-label name",
            hostname
        )));
    }

    psl::domain_str(&host)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::invalid_hostname(format!("'{}' has no registrable suffix", hostname))
        })
}

/// Reduce a hostname or URL to its bare, lowercase host
fn host_part(input: &str) -> String {
    let mut rest = input.trim();

    if let Some(idx) = rest.find("://") {
        rest = &rest[idx + 3..];
    }

    // userinfo, path, query and fragment
    if let Some(idx) = rest.find(['/', '?', '#']) {
        rest = &rest[..idx];
    }
    if let Some(idx) = rest.rfind('@') {
        rest = &rest[idx + 1..];
    }

    if let Some(inner) = rest.strip_prefix('[') {
        // bracketed IPv6, optionally followed by a port
        return inner.split(']').next().unwrap_or_default().to_string();
    }

    if rest.matches(':').count() == 1 {
        rest = rest.split(':').next().unwrap_or_default();
    }

    rest.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_label_public_suffix() {
        assert_eq!(extract_base_domain("a.b.example.co.uk").unwrap(), "example.co.uk");
    }

    #[test]
    fn plain_domains() {
        assert_eq!(extract_base_domain("app.example.com").unwrap(), "example.com");
        assert_eq!(extract_base_domain("example.com").unwrap(), "example.com");
        assert_eq!(extract_base_domain("Deep.Nested.Example.ORG.").unwrap(), "example.org");
    }

    #[test]
    fn scheme_port_and_path_are_ignored() {
        assert_eq!(
            extract_base_domain("https://app.example.com:8443/dashboard?x=1").unwrap(),
            "example.com"
        );
        assert_eq!(extract_base_domain("http://a.b.example.co.uk").unwrap(), "example.co.uk");
    }

    #[test]
    fn rejects_unregistrable_input() {
        for input in [
            "",
            "localhost",
            "203.0.113.5",
            "2001:db8::1",
            "[2001:db8::1]:443",
            "co.uk",
            "https://",
        ] {
            let err = extract_base_domain(input).unwrap_err();
            assert!(
                matches!(err, Error::InvalidHostname(_)),
                "expected InvalidHostname for {:?}, got {:?}",
                input,
                err
            );
        }
    }
}
