//! Result types shared between the scanner, cache, and callers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::reputation::ReputationRecord;

/// Fallback process name when ownership could not be resolved.
pub const UNKNOWN_PROCESS: &str = "Unknown";

/// One scanned connection: the remote IP, the owning process, and the
/// reputation verdict if the lookup produced one.
///
/// `reputation: None` means the lookup *failed* outright; a lookup that
/// succeeded but found nothing carries [`ReputationRecord::not_found`]. The
/// distinction survives serialization: a partial entry simply has no
/// reputation keys on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ScanResultWire", from = "ScanResultWire")]
pub struct ScanResult {
    /// Remote address, no port.
    pub ip: String,
    /// Best-effort owning process name, `"Unknown"` if unresolved.
    pub process_name: String,
    /// Reputation verdict, absent when the lookup failed.
    pub reputation: Option<ReputationRecord>,
}

impl ScanResult {
    /// A full result: connection plus reputation verdict.
    pub fn merged(ip: &str, process_name: &str, reputation: ReputationRecord) -> Self {
        Self {
            ip: ip.to_string(),
            process_name: process_name.to_string(),
            reputation: Some(reputation),
        }
    }

    /// A partial result recording only the connection, after a failed lookup.
    pub fn partial(ip: &str, process_name: &str) -> Self {
        Self {
            ip: ip.to_string(),
            process_name: process_name.to_string(),
            reputation: None,
        }
    }
}

/// On-disk shape of a [`ScanResult`]: the legacy flat JSON object with
/// `"IP"` and `"Process Name"` keys and the reputation fields inlined.
#[derive(Serialize, Deserialize)]
struct ScanResultWire {
    #[serde(rename = "IP")]
    ip: String,
    #[serde(rename = "Process Name")]
    process_name: String,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl From<ScanResult> for ScanResultWire {
    fn from(result: ScanResult) -> Self {
        let rest = match result.reputation {
            Some(record) => match serde_json::to_value(&record) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            None => Map::new(),
        };
        Self {
            ip: result.ip,
            process_name: result.process_name,
            rest,
        }
    }
}

impl From<ScanResultWire> for ScanResult {
    fn from(wire: ScanResultWire) -> Self {
        let reputation = if wire.rest.is_empty() {
            None
        } else {
            // A malformed verdict degrades to a partial entry instead of
            // failing the whole cache load.
            serde_json::from_value(Value::Object(wire.rest)).ok()
        };
        Self {
            ip: wire.ip,
            process_name: wire.process_name,
            reputation,
        }
    }
}

/// Aggregate classification of a result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSummary {
    /// Total number of results.
    pub total: usize,
    /// Results flagged malicious by at least one engine.
    pub malicious: usize,
    /// Results flagged suspicious (but not malicious) by at least one engine.
    pub suspicious: usize,
    /// Everything else, including failed lookups.
    pub clean: usize,
}

impl ScanSummary {
    /// Classifies a result list by engine verdict counts.
    pub fn from_results(results: &[ScanResult]) -> Self {
        let mut summary = ScanSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            let (malicious, suspicious) = result
                .reputation
                .as_ref()
                .map(|r| (r.engines_malicious, r.engines_suspicious))
                .unwrap_or((0, 0));
            if malicious > 0 {
                summary.malicious += 1;
            } else if suspicious > 0 {
                summary.suspicious += 1;
            } else {
                summary.clean += 1;
            }
        }
        summary
    }
}
