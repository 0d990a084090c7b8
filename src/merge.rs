//! Result merging: provenance stamping, dedup, and order-stable assembly.
//!
//! The extraction API returns one JSON array of contact objects per batch.
//! Beyond two stamped provenance fields the engine treats each object as
//! opaque — validating ownership percentages or address plausibility is a
//! downstream concern, not this crate's.
//!
//! Deduplication exists because tables span pages: the same owner frequently
//! appears on the last row of one page and the first row of the next, so two
//! adjacent batches each report it once. The dedup key is deliberately blunt
//! (case-insensitive, whitespace-collapsed name + address) — distinct
//! contacts at the same address with different names always survive.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Provenance value stamped on records extracted via a multi-image batch.
pub const METHOD_BATCH: &str = "vision_batch";
/// Provenance value stamped on records recovered via per-image degradation.
pub const METHOD_SINGLE: &str = "vision_single";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// One extracted contact/ownership record: the JSON object the API returned,
/// plus the provenance fields this engine stamps onto it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ContactRecord(pub Map<String, Value>);

impl ContactRecord {
    /// Wrap a JSON value, accepting only objects.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// String field accessor; non-string values read as absent.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// The identity half of the dedup key: `name`, falling back to `company`.
    pub fn name_or_company(&self) -> Option<&str> {
        self.get_str("name")
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.get_str("company"))
    }

    /// The location half of the dedup key: address components joined in a
    /// fixed order so field granularity differences don't defeat matching.
    pub fn address(&self) -> String {
        ["address", "street", "city", "state", "zip"]
            .iter()
            .filter_map(|k| self.get_str(k))
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Equality key for deduplication: normalised (name-or-company, address).
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}",
            normalize(self.name_or_company().unwrap_or_default()),
            normalize(&self.address())
        )
    }

    /// Stamp `source_file` and `extraction_method` onto the record.
    /// Runs before dedup so provenance is identical for records that
    /// compare equal.
    pub fn stamp_provenance(&mut self, source_file: &str, method: &str) {
        self.0
            .insert("source_file".into(), Value::String(source_file.into()));
        self.0
            .insert("extraction_method".into(), Value::String(method.into()));
    }
}

/// Case-insensitive, whitespace-collapsed comparison form.
fn normalize(s: &str) -> String {
    WHITESPACE
        .replace_all(s.trim(), " ")
        .to_lowercase()
}

/// Concatenate per-batch contact arrays in batch order (which is page order)
/// and drop later records whose dedup key was already seen.
///
/// Output order is stable and deterministic for a given input; a record with
/// a distinct normalised key is never removed. Idempotent: merging a merged
/// list changes nothing.
pub fn merge(per_batch: Vec<Vec<ContactRecord>>) -> Vec<ContactRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<ContactRecord> = Vec::new();

    for contacts in per_batch {
        for record in contacts {
            if seen.insert(record.dedup_key()) {
                out.push(record);
            }
        }
    }

    out
}
