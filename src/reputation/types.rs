//! Reputation data structures and response normalization.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder used for every textual field the service did not supply.
pub(crate) const NOT_AVAILABLE: &str = "N/A";

/// A field that is either a number or the literal `"N/A"`.
///
/// The VirusTotal attributes carry reputation score and ASN as integers, but
/// both are optional; the on-disk cache stores the absent case as the string
/// `"N/A"`, so the union is preserved through serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberOrNa {
    /// A numeric value supplied by the service.
    Number(i64),
    /// The `"N/A"` placeholder.
    Text(String),
}

impl NumberOrNa {
    /// The `"N/A"` placeholder value.
    pub fn na() -> Self {
        NumberOrNa::Text(NOT_AVAILABLE.to_string())
    }

    fn from_attribute(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(n)) if n.is_i64() => {
                NumberOrNa::Number(n.as_i64().unwrap_or_default())
            }
            Some(Value::String(s)) => NumberOrNa::Text(s.clone()),
            _ => NumberOrNa::na(),
        }
    }
}

/// One normalized reputation verdict for an IP address.
///
/// The serde field names match the legacy on-disk JSON keys so existing cache
/// files keep loading. Fields have no serde defaults on purpose: a cache
/// entry either carries the full verdict or none of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationRecord {
    /// Community reputation score.
    #[serde(rename = "Reputation Score")]
    pub reputation_score: NumberOrNa,

    /// ISO country code of the address, or `"N/A"`.
    #[serde(rename = "Country")]
    pub country: String,

    /// Autonomous system number, or `"N/A"`.
    #[serde(rename = "ASN")]
    pub asn: NumberOrNa,

    /// Autonomous system owner, or `"N/A"`.
    #[serde(rename = "ASN Owner")]
    pub asn_owner: String,

    /// Date of the last engine analysis, formatted `DD/MM/YYYY`, or `"N/A"`.
    #[serde(rename = "Last Analysis Date")]
    pub last_analysis_date: String,

    /// Number of engines that flagged the address malicious.
    #[serde(rename = "Engines Malicious")]
    pub engines_malicious: u64,

    /// Number of engines that flagged the address suspicious.
    #[serde(rename = "Engines Suspicious")]
    pub engines_suspicious: u64,

    /// Number of engines that considered the address harmless.
    #[serde(rename = "Engines Harmless")]
    pub engines_harmless: u64,

    /// Community votes marking the address malicious.
    #[serde(rename = "Community Malicious Votes")]
    pub community_malicious_votes: u64,

    /// Community votes marking the address harmless.
    #[serde(rename = "Community Harmless Votes")]
    pub community_harmless_votes: u64,

    /// Per-engine verdicts as `"<category> (<result>)"` strings.
    #[serde(rename = "Analysis Results")]
    pub analysis_results: HashMap<String, String>,
}

impl ReputationRecord {
    /// The canonical record for an IP the service has never seen.
    ///
    /// Every count is zero, every textual field is `"N/A"`, and the analysis
    /// map is empty. A 404 from the service maps to this value, never to an
    /// error: "unknown to the service" is itself informative.
    pub fn not_found() -> Self {
        Self {
            reputation_score: NumberOrNa::na(),
            country: NOT_AVAILABLE.to_string(),
            asn: NumberOrNa::na(),
            asn_owner: NOT_AVAILABLE.to_string(),
            last_analysis_date: NOT_AVAILABLE.to_string(),
            engines_malicious: 0,
            engines_suspicious: 0,
            engines_harmless: 0,
            community_malicious_votes: 0,
            community_harmless_votes: 0,
            analysis_results: HashMap::new(),
        }
    }

    /// Builds a record from the `data.attributes` object of a service reply.
    ///
    /// Missing or unexpected fields fall back to the documented defaults;
    /// this never fails.
    pub fn from_attributes(attrs: &Value) -> Self {
        let stats = attrs.get("last_analysis_stats");
        let votes = attrs.get("total_votes");

        let last_analysis_date = attrs
            .get("last_analysis_date")
            .and_then(Value::as_i64)
            .and_then(format_epoch_date)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        let mut analysis_results = HashMap::new();
        if let Some(Value::Object(engines)) = attrs.get("last_analysis_results") {
            for (engine, verdict) in engines {
                let category = verdict
                    .get("category")
                    .and_then(Value::as_str)
                    .unwrap_or(NOT_AVAILABLE);
                let result = verdict
                    .get("result")
                    .and_then(Value::as_str)
                    .unwrap_or("Clean");
                analysis_results.insert(engine.clone(), format!("{category} ({result})"));
            }
        }

        Self {
            reputation_score: NumberOrNa::from_attribute(attrs.get("reputation")),
            country: string_attribute(attrs.get("country")),
            asn: NumberOrNa::from_attribute(attrs.get("asn")),
            asn_owner: string_attribute(attrs.get("as_owner")),
            last_analysis_date,
            engines_malicious: count_attribute(stats, "malicious"),
            engines_suspicious: count_attribute(stats, "suspicious"),
            engines_harmless: count_attribute(stats, "harmless"),
            community_malicious_votes: count_attribute(votes, "malicious"),
            community_harmless_votes: count_attribute(votes, "harmless"),
            analysis_results,
        }
    }
}

fn string_attribute(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

fn count_attribute(object: Option<&Value>, key: &str) -> u64 {
    object
        .and_then(|o| o.get(key))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn format_epoch_date(epoch_secs: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(epoch_secs, 0).map(|dt| dt.format("%d/%m/%Y").to_string())
}
