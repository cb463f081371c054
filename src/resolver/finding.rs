//! Tracker Radar domain records and the findings derived from them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subset of a Tracker Radar `domains/<region>/<domain>.json` file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackerRecord {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub owner: Option<OwnerRecord>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Either a share of sites (number) or a free-form label.
    #[serde(default)]
    pub cookies: Option<Value>,
    #[serde(default)]
    pub prevalence: Option<f64>,
    #[serde(default)]
    pub fingerprinting: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OwnerRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,
}

/// Tracker classification for one third-party domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub domain: String,
    pub owner: Option<String>,
    pub categories: Vec<String>,
    pub cookies: Option<String>,
    pub prevalence: Option<f64>,
    pub fingerprinting: Option<u8>,
}

impl Finding {
    /// Build a finding for `queried`, the domain whose record was fetched.
    ///
    /// The finding always carries the queried domain; a record naming some
    /// other domain is logged and overridden.
    pub fn from_record(queried: &str, record: TrackerRecord) -> Self {
        if let Some(domain) = record.domain.as_deref()
            && !domain.eq_ignore_ascii_case(queried)
        {
            log::debug!("record for {queried} names domain {domain}, keeping {queried}");
        }

        let owner = record.owner.and_then(|owner| {
            owner
                .name
                .filter(|name| !name.is_empty())
                .or(owner.display_name.filter(|name| !name.is_empty()))
        });

        Self {
            domain: queried.to_string(),
            owner,
            categories: record.categories,
            cookies: record.cookies.and_then(describe_cookies),
            prevalence: record.prevalence,
            fingerprinting: record.fingerprinting,
        }
    }
}

fn describe_cookies(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(label) => Some(label),
        other => Some(other.to_string()),
    }
}
