use chrono::{DateTime, Utc};
use ncsync_core::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOperation {
    Upload,
    Download,
}

/// One in-flight transfer, persisted as `{journal-root}/{sha256-hex of file_path}.resume`
/// (spec.md §4.D, §6). `last_modified`, `created_at`, `updated_at` are carried on the wire
/// as RFC 3339 strings per the §6 JSON schema even though `Timestamp` itself is a millis
/// count internally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    pub file_path: String,
    pub total_size: u64,
    pub transferred_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(with = "rfc3339")]
    pub last_modified: Timestamp,
    pub operation: TransferOperation,
    #[serde(with = "rfc3339")]
    pub created_at: Timestamp,
    #[serde(with = "rfc3339")]
    pub updated_at: Timestamp,
}

impl ResumeState {
    /// Identity for the `start()` "equal (total_size, last_modified, op)" comparison
    /// (spec.md §4.D).
    pub fn matches(&self, op: TransferOperation, total_size: u64, last_modified: Timestamp) -> bool {
        self.operation == op && self.total_size == total_size && self.last_modified == last_modified
    }
}

mod rfc3339 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        let dt = DateTime::<Utc>::from_timestamp_millis(ts.unix_millis()).unwrap_or_default();
        serializer.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let dt = DateTime::parse_from_rfc3339(&raw).map_err(serde::de::Error::custom)?;
        Ok(Timestamp::from_unix_millis(dt.timestamp_millis()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_rfc3339_json() {
        let state = ResumeState {
            file_path: "Documents/big.iso".into(),
            total_size: 10 * 1024 * 1024,
            transferred_size: 4 * 1024 * 1024,
            checksum: None,
            last_modified: Timestamp::from_unix_secs(1_700_000_000),
            operation: TransferOperation::Upload,
            created_at: Timestamp::from_unix_secs(1_700_000_000),
            updated_at: Timestamp::from_unix_secs(1_700_000_100),
        };

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("2023-11-14"));

        let decoded: ResumeState = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, state);
    }
}
