//! URL safety validation, normalization, and registrable-domain extraction.
//!
//! Validation is purely textual: no DNS resolution happens here. Hosts that
//! only become dangerous after resolution are caught again by the worker's
//! redirect walk and, ultimately, by the network layer of the renderer.

use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use url::{Host, Url};

/// Cloud metadata hostnames blocked regardless of resolution.
const METADATA_HOSTS: &[&str] = &["metadata.google.internal"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlValidationError {
    #[error("invalid url: {0}")]
    Invalid(String),
    #[error("blocked url: {0}")]
    SsrfBlocked(String),
}

impl UrlValidationError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }

    fn blocked(reason: impl Into<String>) -> Self {
        Self::SsrfBlocked(reason.into())
    }
}

/// A submitted URL that passed format and SSRF checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeUrl {
    /// Canonical form: lowercase scheme and host, default port stripped,
    /// fragment removed, query and path preserved.
    pub normalized: String,
    /// Registrable domain (eTLD+1) used as the serialization key.
    pub domain_key: String,
}

/// Validate and normalize a raw URL, extracting its locking key.
pub fn validate(raw: &str) -> Result<SafeUrl, UrlValidationError> {
    if raw.trim().is_empty() {
        return Err(UrlValidationError::invalid("url must not be empty"));
    }

    let mut parsed = Url::parse(raw).map_err(|err| UrlValidationError::invalid(err.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(UrlValidationError::invalid(format!(
                "scheme `{other}` is not supported, use http or https"
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| UrlValidationError::invalid("url has no host"))?
        .to_owned();

    check_host(&host)?;

    let domain_key = registrable_domain(&host);

    // The url crate already lowercases scheme/host, canonicalizes
    // percent-encoding, and drops default ports on serialization.
    parsed.set_fragment(None);

    Ok(SafeUrl {
        normalized: parsed.to_string(),
        domain_key,
    })
}

fn check_host(host: &Host) -> Result<(), UrlValidationError> {
    match host {
        Host::Domain(name) => check_domain_name(name),
        Host::Ipv4(addr) => check_ipv4(*addr),
        Host::Ipv6(addr) => check_ipv6(*addr),
    }
}

fn check_domain_name(name: &str) -> Result<(), UrlValidationError> {
    if name.split('.').any(|label| label == "localhost") {
        return Err(UrlValidationError::blocked("localhost is not reachable"));
    }

    if METADATA_HOSTS.contains(&name) {
        return Err(UrlValidationError::blocked(
            "cloud metadata endpoints are not reachable",
        ));
    }

    Ok(())
}

fn check_ipv4(addr: Ipv4Addr) -> Result<(), UrlValidationError> {
    let blocked =
        addr.is_private() || addr.is_loopback() || addr.is_link_local() || addr.octets()[0] == 0;

    if blocked {
        return Err(UrlValidationError::blocked(format!(
            "address {addr} is in a private or reserved range"
        )));
    }

    Ok(())
}

fn check_ipv6(addr: Ipv6Addr) -> Result<(), UrlValidationError> {
    if let Some(mapped) = addr.to_ipv4_mapped() {
        return check_ipv4(mapped);
    }

    let segments = addr.segments();
    let unique_local = segments[0] & 0xfe00 == 0xfc00;
    let link_local = segments[0] & 0xffc0 == 0xfe80;

    if addr.is_loopback() || unique_local || link_local {
        return Err(UrlValidationError::blocked(format!(
            "address {addr} is in a private or reserved range"
        )));
    }

    Ok(())
}

/// Extract the registrable domain (eTLD+1) via the Public Suffix List.
///
/// IP literals and hosts without a listed suffix fall back to the full
/// host string, which still yields a stable per-host lock key.
fn registrable_domain(host: &Host) -> String {
    match host {
        Host::Domain(name) => psl::domain_str(name)
            .map(|domain| domain.to_ascii_lowercase())
            .unwrap_or_else(|| name.to_ascii_lowercase()),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_https_url() {
        let safe = validate("https://example.com/a").expect("valid url");
        assert_eq!(safe.normalized, "https://example.com/a");
        assert_eq!(safe.domain_key, "example.com");
    }

    #[test]
    fn normalizes_case_port_and_fragment() {
        let safe = validate("https://EXAMPLE.com:443/a#frag").expect("valid url");
        assert_eq!(safe.normalized, "https://example.com/a");
    }

    #[test]
    fn preserves_query_and_path_case() {
        let safe = validate("https://example.com/Path/To?b=2&a=1").expect("valid url");
        assert_eq!(safe.normalized, "https://example.com/Path/To?b=2&a=1");
    }

    #[test]
    fn strips_default_http_port() {
        let safe = validate("http://example.com:80/x").expect("valid url");
        assert_eq!(safe.normalized, "http://example.com/x");
    }

    #[test]
    fn keeps_explicit_non_default_port() {
        let safe = validate("https://example.com:8443/x").expect("valid url");
        assert_eq!(safe.normalized, "https://example.com:8443/x");
    }

    #[test]
    fn validation_is_idempotent() {
        let first = validate("https://EXAMPLE.com:443/a?q=1#frag").expect("valid url");
        let second = validate(&first.normalized).expect("normalized form re-validates");
        assert_eq!(first, second);
    }

    #[test]
    fn extracts_etld_plus_one_for_multi_label_suffixes() {
        let safe = validate("https://a.b.example.co.uk/page").expect("valid url");
        assert_eq!(safe.domain_key, "example.co.uk");

        let safe = validate("https://www.example.com.au/").expect("valid url");
        assert_eq!(safe.domain_key, "example.com.au");
    }

    #[test]
    fn subdomains_share_a_domain_key() {
        let a = validate("https://a.example.com/").expect("valid url");
        let b = validate("https://b.example.com/").expect("valid url");
        assert_eq!(a.domain_key, b.domain_key);
    }

    #[test]
    fn rejects_unsupported_schemes() {
        assert!(matches!(
            validate("ftp://example.com/file"),
            Err(UrlValidationError::Invalid(_))
        ));
        assert!(matches!(
            validate("file:///etc/passwd"),
            Err(UrlValidationError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            validate("not a url"),
            Err(UrlValidationError::Invalid(_))
        ));
        assert!(matches!(validate(""), Err(UrlValidationError::Invalid(_))));
        assert!(matches!(
            validate("https://"),
            Err(UrlValidationError::Invalid(_))
        ));
    }

    #[test]
    fn blocks_private_ipv4_ranges() {
        for target in [
            "http://10.0.0.1/",
            "http://172.16.0.1/",
            "http://172.31.255.254/",
            "http://192.168.1.1/",
            "http://127.0.0.1:8080/",
            "http://169.254.169.254/latest/meta-data",
            "http://0.0.0.0/",
        ] {
            assert!(
                matches!(validate(target), Err(UrlValidationError::SsrfBlocked(_))),
                "expected {target} to be blocked"
            );
        }
    }

    #[test]
    fn allows_public_ipv4_literals() {
        let safe = validate("http://93.184.216.34/").expect("public ip allowed");
        assert_eq!(safe.domain_key, "93.184.216.34");
    }

    #[test]
    fn blocks_ipv6_loopback_and_private_ranges() {
        for target in [
            "http://[::1]/",
            "http://[fd00:ec2::254]/",
            "http://[fe80::1]/",
            "http://[::ffff:127.0.0.1]/",
        ] {
            assert!(
                matches!(validate(target), Err(UrlValidationError::SsrfBlocked(_))),
                "expected {target} to be blocked"
            );
        }
    }

    #[test]
    fn blocks_localhost_labels() {
        for target in [
            "http://localhost/",
            "http://localhost:3000/admin",
            "http://LOCALHOST/",
            "http://foo.localhost/",
            "http://localhost.localdomain/",
        ] {
            assert!(
                matches!(validate(target), Err(UrlValidationError::SsrfBlocked(_))),
                "expected {target} to be blocked"
            );
        }
    }

    #[test]
    fn blocks_metadata_hostname() {
        assert!(matches!(
            validate("http://metadata.google.internal/computeMetadata/v1/"),
            Err(UrlValidationError::SsrfBlocked(_))
        ));
    }
}
