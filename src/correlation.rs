//! Correlation identifiers used as job IDs.
//!
//! IDs are UUIDv7 values: the leading 48 bits hold a millisecond Unix timestamp,
//! so the canonical hyphenated form sorts lexicographically by creation time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Largest millisecond timestamp a UUIDv7 can hold (48 bits).
const MAX_V7_MILLIS: u64 = (1 << 48) - 1;

/// A unique, time-sortable job identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Mints a fresh identifier. Successive calls within one process are
    /// strictly increasing.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().hyphenated().to_string())
    }

    /// Derives an identifier from a broker delivery identifier.
    ///
    /// The same `message_id` and `created_at` always produce the same ID, so a
    /// redelivered message maps onto the job it already created.
    ///
    /// `created_at` is clamped to the range a UUIDv7 timestamp can represent:
    /// instants before the Unix epoch map to zero and instants past the 48-bit
    /// limit (year 10889) map to the maximum. Ordering by time is preserved
    /// inside that range and non-decreasing outside it.
    pub fn derive(message_id: &str, created_at: DateTime<Utc>) -> Self {
        let digest = Sha256::digest(message_id.as_bytes());

        let mut rand_bytes = [0u8; 10];
        rand_bytes.copy_from_slice(&digest[..10]);

        let millis = u64::try_from(created_at.timestamp_millis())
            .unwrap_or(0)
            .min(MAX_V7_MILLIS);

        let id = uuid::Builder::from_unix_timestamp_millis(millis, &rand_bytes).into_uuid();

        Self(id.hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<JobId> for String {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_generated_ids_are_unique_and_sorted() {
        let ids: Vec<JobId> = (0..10_000).map(|_| JobId::generate()).collect();

        let unique: HashSet<&JobId> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());

        for pair in ids.windows(2) {
            assert!(
                pair[0].as_str() < pair[1].as_str(),
                "{} should sort before {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_derived_ids_are_deterministic() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let first = JobId::derive("msg-1", at);
        let second = JobId::derive("msg-1", at);
        let other = JobId::derive("msg-2", at);

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn test_derived_ids_sort_by_timestamp() {
        let earlier = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 1).unwrap();

        assert!(JobId::derive("zzz", earlier) < JobId::derive("aaa", later));
    }

    #[test]
    fn test_derived_timestamps_are_clamped() {
        let before_epoch = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();
        let epoch = Utc.timestamp_millis_opt(0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let far = Utc.with_ymd_and_hms(20000, 1, 1, 0, 0, 0).unwrap();
        let farther = Utc.with_ymd_and_hms(30000, 1, 1, 0, 0, 0).unwrap();

        let timestamp_bits = |at| {
            let id = JobId::derive("m", at);
            Uuid::parse_str(id.as_str()).unwrap().as_u128() >> 80
        };

        assert_eq!(timestamp_bits(before_epoch), timestamp_bits(epoch));
        assert_eq!(timestamp_bits(far), u128::from(MAX_V7_MILLIS));
        assert_eq!(timestamp_bits(far), timestamp_bits(farther));

        assert!(JobId::derive("m", before_epoch) <= JobId::derive("m", now));
        assert!(JobId::derive("m", now) < JobId::derive("m", far));
    }

    #[test]
    fn test_derived_ids_are_v7() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let id = JobId::derive("abc", at);

        let parsed = Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }
}
