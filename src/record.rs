use std::cmp::Ordering;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A record read from a partition.
///
/// Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Bytes,
    pub value: Bytes,
    pub timestamp: DateTime<Utc>,

    /// Approximate size, i.e. key plus value bytes.
    pub size: usize,
}

impl Record {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Bytes,
        value: Bytes,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let size = key.len() + value.len();
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            value,
            timestamp,
            size,
        }
    }

    /// Classifies the value bytes.
    pub fn value_format(&self) -> ValueFormat {
        ValueFormat::classify(&self.value)
    }

    /// Presentation order: newest timestamp first, lower offset first on ties.
    ///
    /// Partition breaks the remaining ties so that the order is total.
    pub fn presentation_cmp(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| self.offset.cmp(&other.offset))
            .then_with(|| self.partition.cmp(&other.partition))
    }
}

/// Coarse classification of a record payload.
///
/// This is a byte-level guess, not schema validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    Json,
    Text,
    Binary,
}

impl ValueFormat {
    pub fn classify(bytes: &[u8]) -> Self {
        if serde_json::from_slice::<serde::de::IgnoredAny>(bytes).is_ok() {
            Self::Json
        } else if std::str::from_utf8(bytes).is_ok() {
            Self::Text
        } else {
            Self::Binary
        }
    }
}
