//! Hostname extraction from Traefik router rules
//!
//! Only literal host matchers publish DNS records: `Host`, `HostHeader`
//! (Traefik v2) and `HostSNI`. Regexp matchers and the `HostSNI(`*`)`
//! catch-all are ignored.

const HOST_MATCHERS: &[&str] = &["Host", "HostHeader", "HostSNI"];

/// Hostnames referenced by a rule, lowercased, in first-seen order
///
/// ```
/// use mantrae_dns_core::rule::extract_hostnames;
///
/// let hosts = extract_hostnames("Host(`app.example.com`) && PathPrefix(`/api`)");
/// assert_eq!(hosts, vec!["app.example.com"]);
/// ```
pub fn extract_hostnames(rule: &str) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();
    let bytes = rule.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if !bytes[i].is_ascii_alphabetic() {
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
            i += 1;
        }
        let ident = &rule[start..i];

        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if j >= bytes.len() || bytes[j] != b'(' {
            continue;
        }

        let (args, end) = parse_arguments(rule, j + 1);
        i = end;

        if !HOST_MATCHERS.contains(&ident) {
            continue;
        }

        for arg in args {
            let host = arg.trim().trim_end_matches('.').to_ascii_lowercase();
            if host.is_empty() || host == "*" || hosts.contains(&host) {
                continue;
            }
            hosts.push(host);
        }
    }

    hosts
}

/// Collect quoted arguments up to the closing parenthesis
///
/// Returns the arguments and the index just past the `)`.
fn parse_arguments(rule: &str, mut i: usize) -> (Vec<String>, usize) {
    let bytes = rule.as_bytes();
    let mut args = Vec::new();

    while i < bytes.len() {
        match bytes[i] {
            b')' => return (args, i + 1),
            quote @ (b'`' | b'"' | b'\'') => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end] != quote {
                    end += 1;
                }
                args.push(rule[start..end.min(bytes.len())].to_string());
                i = end + 1;
            }
            _ => i += 1,
        }
    }

    (args, i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_host() {
        assert_eq!(extract_hostnames("Host(`app.example.com`)"), vec!["app.example.com"]);
    }

    #[test]
    fn multiple_hosts_and_operators() {
        let rule = "(Host(`a.example.com`, `B.example.com`) || Host(\"c.example.com\")) && !PathPrefix(`/admin`)";
        assert_eq!(
            extract_hostnames(rule),
            vec!["a.example.com", "b.example.com", "c.example.com"]
        );
    }

    #[test]
    fn duplicates_are_collapsed() {
        let rule = "Host(`app.example.com`) || Host(`APP.example.com`)";
        assert_eq!(extract_hostnames(rule), vec!["app.example.com"]);
    }

    #[test]
    fn tcp_and_legacy_matchers() {
        assert_eq!(extract_hostnames("HostSNI(`db.example.com`)"), vec!["db.example.com"]);
        assert_eq!(extract_hostnames("HostHeader(`old.example.com`)"), vec!["old.example.com"]);
        assert!(extract_hostnames("HostSNI(`*`)").is_empty());
    }

    #[test]
    fn regexp_matchers_are_ignored() {
        let rule = "HostRegexp(`^.+\\.example\\.com$`) || PathPrefix(`/x`)";
        assert!(extract_hostnames(rule).is_empty());
        assert!(extract_hostnames("").is_empty());
    }
}
