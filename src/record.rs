// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Versioned record data structure.
//!
//! A [`VersionedRecord`] is one fact about one owner during one validity
//! interval `[valid_from, valid_to)`. All times are epoch milliseconds and
//! [`OPEN_END`] marks a version that is still live.
//!
//! # Example
//!
//! ```
//! use history_sync::{VersionedRecord, OwnerId, DataType, OPEN_END};
//! use serde_json::json;
//!
//! let record = VersionedRecord::new(
//!     OwnerId(90000001),
//!     DataType::Contacts,
//!     "3019582".into(),
//!     1_000,
//!     json!({"contact_id": 3019582, "standing": 5.0}),
//! );
//!
//! assert_eq!(record.valid_to, OPEN_END);
//! assert!(record.is_live_at(1_000));
//! assert!(!record.is_live_at(999));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

use crate::data_type::DataType;

/// Sentinel `valid_to` for a version that has not been superseded.
pub const OPEN_END: i64 = i64::MAX;

/// Identifier of the character or corporation a record belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One version of one fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub owner: OwnerId,
    pub data_type: DataType,
    /// Canonical rendering of the type's key tuple (parts joined by `:`)
    pub natural_key: String,
    /// Inclusive start of validity
    pub valid_from: i64,
    /// Exclusive end of validity, [`OPEN_END`] while live
    pub valid_to: i64,
    /// Normalized payload
    pub payload: Value,
    /// SHA-256 of the canonical payload bytes, used for equality
    pub payload_hash: String,
    /// Position within the remote snapshot that produced this version
    #[serde(default)]
    pub ordinal: i64,
}

impl VersionedRecord {
    /// Create a new open version starting at `valid_from`.
    pub fn new(
        owner: OwnerId,
        data_type: DataType,
        natural_key: String,
        valid_from: i64,
        payload: Value,
    ) -> Self {
        let payload_hash = payload_hash(&payload);
        Self {
            owner,
            data_type,
            natural_key,
            valid_from,
            valid_to: OPEN_END,
            payload,
            payload_hash,
            ordinal: 0,
        }
    }

    /// Set the snapshot position used for list ordering.
    #[must_use]
    pub fn with_ordinal(mut self, ordinal: i64) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// True while no later version has closed this one.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.valid_to == OPEN_END
    }

    /// Whether `at` falls inside `[valid_from, valid_to)`.
    #[must_use]
    pub fn is_live_at(&self, at: i64) -> bool {
        self.valid_from <= at && at < self.valid_to
    }

    /// Whether the interval intersects `[from, to)`.
    #[must_use]
    pub fn overlaps(&self, from: i64, to: i64) -> bool {
        self.valid_from < to && from < self.valid_to
    }
}

/// Hash of the canonical JSON bytes.
///
/// `serde_json` objects are key-ordered, so equal values always serialize to
/// identical bytes.
pub fn payload_hash(payload: &Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Round every non-integer number in `value` to `decimals` places.
///
/// Integers and non-numeric values pass through untouched. Values that can't
/// be represented after rounding (NaN, infinities) are left as they were.
pub fn normalize_payload(value: Value, decimals: Option<u32>) -> Value {
    let Some(decimals) = decimals else {
        return value;
    };
    match value {
        Value::Number(n) if n.is_f64() => {
            let Some(raw) = n.as_f64() else {
                return Value::Number(n);
            };
            let scale = 10f64.powi(decimals as i32);
            let rounded = (raw * scale).round() / scale;
            match Number::from_f64(rounded) {
                Some(num) => Value::Number(num),
                None => Value::Number(n),
            }
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| normalize_payload(v, Some(decimals)))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_payload(v, Some(decimals))))
                .collect(),
        ),
        other => other,
    }
}
