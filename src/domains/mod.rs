//! Scan target normalisation and registrable-domain extraction.
//!
//! Everything here is pure: no I/O, safe to call from any task.

use std::fmt;

use psl::Type;
use thiserror::Error;
use url::{Host, Url};

const DEFAULT_SCHEME_PREFIX: &str = "https://";

/// Reasons a URL or hostname has no usable registrable domain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("input is empty")]
    Empty,
    #[error("could not parse '{0}' as a url")]
    Unparseable(String),
    #[error("url '{0}' has no host")]
    MissingHost(String),
    #[error("ip literal '{0}' has no registrable domain")]
    IpLiteral(String),
    #[error("host '{0}' has no registrable domain")]
    NoRegistrableDomain(String),
}

/// A user-supplied scan request after normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    input: String,
    url: String,
    root_domain: String,
}

impl ScanTarget {
    /// The string exactly as the caller supplied it.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Absolute URL the browser navigates to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Registrable domain of the target page.
    pub fn root_domain(&self) -> &str {
        &self.root_domain
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.root_domain)
    }
}

/// Normalise free-form input into a [`ScanTarget`].
///
/// Inputs without an `http://` or `https://` prefix have their leading slashes
/// stripped and `https://` prepended, so `//example.com` becomes
/// `https://example.com`.
pub fn normalize(input: &str) -> Result<ScanTarget, DomainError> {
    let url = with_scheme(input.trim());
    if url.len() == DEFAULT_SCHEME_PREFIX.len() && url.eq_ignore_ascii_case(DEFAULT_SCHEME_PREFIX) {
        return Err(DomainError::Empty);
    }

    let parsed = Url::parse(&url).map_err(|_| DomainError::Unparseable(url.clone()))?;
    let root_domain = host_registrable_domain(&parsed, &url)?;

    Ok(ScanTarget {
        input: input.to_string(),
        url,
        root_domain,
    })
}

/// Registrable domain (public suffix + one label) for an absolute URL of any
/// scheme, or for a bare hostname.
pub fn registrable_domain(url_or_host: &str) -> Result<String, DomainError> {
    let candidate = url_or_host.trim();
    if candidate.is_empty() {
        return Err(DomainError::Empty);
    }

    // Bare hosts such as `example.com:8080` parse as a scheme with no host, so
    // fall back to treating the input as a host.
    if let Ok(parsed) = Url::parse(candidate)
        && parsed.has_host()
    {
        return host_registrable_domain(&parsed, candidate);
    }

    let url = with_scheme(candidate);
    let parsed = Url::parse(&url).map_err(|_| DomainError::Unparseable(candidate.to_string()))?;
    host_registrable_domain(&parsed, candidate)
}

fn with_scheme(input: &str) -> String {
    if has_http_scheme(input) {
        input.to_string()
    } else {
        format!("{DEFAULT_SCHEME_PREFIX}{}", input.trim_start_matches('/'))
    }
}

fn has_http_scheme(input: &str) -> bool {
    ["http://", "https://"].iter().any(|prefix| {
        input
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}

fn host_registrable_domain(url: &Url, original: &str) -> Result<String, DomainError> {
    match url.host() {
        Some(Host::Domain(host)) => {
            let host = host.trim_end_matches('.');
            if host.is_empty() {
                return Err(DomainError::MissingHost(original.to_string()));
            }
            icann_registrable_domain(host).ok_or_else(|| DomainError::NoRegistrableDomain(host.to_string()))
        }
        Some(Host::Ipv4(addr)) => Err(DomainError::IpLiteral(addr.to_string())),
        Some(Host::Ipv6(addr)) => Err(DomainError::IpLiteral(addr.to_string())),
        None => Err(DomainError::MissingHost(original.to_string())),
    }
}

/// Public suffix plus one label, using only the ICANN section of the list.
///
/// Private entries (`cloudfront.net`, `github.io`, ...) are shared hosting
/// namespaces, so `d1abc.cloudfront.net` reduces to `cloudfront.net`. Unknown
/// TLDs fall back to the list's implicit `*` rule.
fn icann_registrable_domain(host: &str) -> Option<String> {
    let host = host.to_ascii_lowercase();
    let mut rest = host.as_str();
    let suffix_len = loop {
        let suffix = psl::suffix(rest.as_bytes())?;
        let tail = &rest[rest.len() - suffix.as_bytes().len()..];
        if suffix.typ() != Some(Type::Private) {
            break tail.len();
        }
        match tail.split_once('.') {
            Some((_, parent)) => rest = parent,
            None => break tail.len(),
        }
    };

    let label_end = host.len().checked_sub(suffix_len + 1)?;
    if host.as_bytes()[label_end] != b'.' {
        return None;
    }
    let label_start = host[..label_end].rfind('.').map_or(0, |dot| dot + 1);
    if label_start == label_end {
        return None;
    }
    Some(host[label_start..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_slashes_before_prepending_scheme() {
        let target = normalize("//example.com").unwrap();
        assert_eq!(target.url(), "https://example.com");
        assert_eq!(target.root_domain(), "example.com");
        assert_eq!(target.input(), "//example.com");
    }

    #[test]
    fn keeps_existing_scheme() {
        let target = normalize("http://www.example.com/page").unwrap();
        assert_eq!(target.url(), "http://www.example.com/page");
        assert_eq!(target.root_domain(), "example.com");
    }

    #[test]
    fn normalisation_is_idempotent() {
        for input in ["example.com", "//news.bbc.co.uk/path", "HTTPS://Shop.Example.org"] {
            let once = normalize(input).unwrap();
            let twice = normalize(once.url()).unwrap();
            assert_eq!(once.url(), twice.url(), "input {input}");
            assert_eq!(once.root_domain(), twice.root_domain());
        }
    }

    #[test]
    fn honours_multi_label_public_suffixes() {
        assert_eq!(registrable_domain("https://news.bbc.co.uk/x").unwrap(), "bbc.co.uk");
        assert_eq!(registrable_domain("mail.google.com").unwrap(), "google.com");
        assert_eq!(registrable_domain("ads.trackerco.test").unwrap(), "trackerco.test");
    }

    #[test]
    fn shared_hosting_suffixes_reduce_to_the_provider() {
        assert_eq!(registrable_domain("d1abc.cloudfront.net").unwrap(), "cloudfront.net");
        assert_eq!(registrable_domain("https://bucket.s3.amazonaws.com/x").unwrap(), "amazonaws.com");
        assert_eq!(registrable_domain("https://someone.github.io/y").unwrap(), "github.io");
        assert_eq!(registrable_domain("github.io").unwrap(), "github.io");
        assert_eq!(registrable_domain("myblog.blogspot.co.uk").unwrap(), "blogspot.co.uk");
    }

    #[test]
    fn extracts_from_non_http_schemes_and_ports() {
        assert_eq!(registrable_domain("wss://live.example.net/socket").unwrap(), "example.net");
        assert_eq!(registrable_domain("cdn.example.com:8443").unwrap(), "example.com");
    }

    #[test]
    fn rejects_hosts_without_registrable_domain() {
        assert_eq!(registrable_domain(""), Err(DomainError::Empty));
        assert!(matches!(
            registrable_domain("http://127.0.0.1/beacon"),
            Err(DomainError::IpLiteral(_))
        ));
        assert!(matches!(
            registrable_domain("http://[::1]:8080/"),
            Err(DomainError::IpLiteral(_))
        ));
        assert!(matches!(
            registrable_domain("localhost"),
            Err(DomainError::NoRegistrableDomain(_))
        ));
        assert!(matches!(
            registrable_domain("co.uk"),
            Err(DomainError::NoRegistrableDomain(_))
        ));
    }

    #[test]
    fn empty_input_is_not_a_target() {
        assert_eq!(normalize("   "), Err(DomainError::Empty));
        assert_eq!(normalize("///"), Err(DomainError::Empty));
    }
}
