// vigil-core/src/domain/scan/violation.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Columns probed, in order, to derive a record's identity. The first one
/// present and non-null wins; rows matching none collapse into the shared
/// `"unknown"` bucket (see `extract_record_id`).
pub const ID_COLUMN_PRIORITY: [&str; 7] = [
    "id",
    "user_id",
    "vendor_id",
    "bank_id",
    "account_number",
    "entity_id",
    "record_id",
];

/// Identity used when no recognized identifier column exists on a row.
pub const UNKNOWN_RECORD_ID: &str = "unknown";

/// One row produced by the streaming executor: its derived identity plus a
/// full structured snapshot for later inspection/export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRow {
    pub record_id: String,
    pub detail: Value,
}

/// A persisted violation. `(rule_id, table_name, record_id)` is unique;
/// the store's constraint is the final authority under concurrent scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub id: i64,
    pub rule_id: i64,
    pub table_name: String,
    pub record_id: String,
    pub detail: Value,
    pub detected_at: DateTime<Utc>,
}

/// Derive the dedup identity of a row snapshot.
///
/// Probes `ID_COLUMN_PRIORITY` in order. Values are rendered without JSON
/// string quotes so `{"id": 1}` and `{"id": "1"}` share the identity "1" —
/// the same row must not dedup differently across drivers that disagree on
/// column affinity.
pub fn extract_record_id(detail: &Value) -> String {
    let Some(object) = detail.as_object() else {
        return UNKNOWN_RECORD_ID.to_string();
    };

    for column in ID_COLUMN_PRIORITY {
        match object.get(column) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => return s.clone(),
            Some(other) => return other.to_string(),
        }
    }

    UNKNOWN_RECORD_ID.to_string()
}
