//! Third-party domain filtering.

use std::collections::BTreeSet;

use crate::domains::{DomainError, registrable_domain};

/// Result of classifying one observed destination against the page's root
/// domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    ThirdParty(String),
    FirstParty,
    Unusable(DomainError),
}

/// Classify a raw destination URL relative to `root_domain`.
pub fn classify(raw_url: &str, root_domain: &str) -> Classification {
    match registrable_domain(raw_url) {
        Ok(domain) if domain.is_empty() || domain.eq_ignore_ascii_case(root_domain) => {
            Classification::FirstParty
        }
        Ok(domain) => Classification::ThirdParty(domain),
        Err(err) => Classification::Unusable(err),
    }
}

/// Reduce raw destination URLs to the registrable domains that differ from
/// `root_domain`.
///
/// Malformed destinations are dropped. The set iterates in lexicographic
/// order, which is the order findings are resolved and emitted in.
pub fn third_party_domains<I, S>(raw_urls: I, root_domain: &str) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut domains = BTreeSet::new();
    for raw in raw_urls {
        match classify(raw.as_ref(), root_domain) {
            Classification::ThirdParty(domain) => {
                domains.insert(domain);
            }
            Classification::FirstParty => {}
            Classification::Unusable(err) => {
                log::trace!("dropping destination {}: {err}", raw.as_ref());
            }
        }
    }
    domains
}
