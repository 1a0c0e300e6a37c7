// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Attribute predicates over record payloads.
//!
//! Reads can be narrowed by payload attributes. The same AST is evaluated
//! in memory by [`InMemoryStore`](crate::storage::InMemoryStore) and
//! translated to a parameterized clause by [`SqlStore`](crate::storage::SqlStore).
//!
//! ```text
//! QueryBuilder / AttributeQuery (AST)
//!     │
//!     ├─→ AttributeQuery::matches()  → in-memory filter
//!     └─→ SqlTranslator              → json_extract / JSON_EXTRACT clause
//! ```
//!
//! # Example
//!
//! ```rust
//! use history_sync::query::{AttributeQuery, QueryBuilder};
//! use serde_json::json;
//!
//! let query = QueryBuilder::new()
//!     .equals("contact_type", "character")
//!     .range("standing", Some(5.0), None)
//!     .build_and();
//!
//! assert!(query.matches(&json!({"contact_type": "character", "standing": 10.0})));
//! assert!(!query.matches(&json!({"contact_type": "alliance", "standing": 10.0})));
//! assert!(AttributeQuery::all().matches(&json!({})));
//! ```

mod query_builder;
mod sql_translator;

use thiserror::Error;

pub use query_builder::{AttributeQuery, AttributeSelector, FieldQuery, QueryBuilder, QueryNode};
pub use sql_translator::{SqlDialect, SqlParam, SqlQuery, SqlTranslator};

/// Errors from building or translating a query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("invalid field path '{0}': only [A-Za-z0-9_] segments separated by '.' are allowed")]
    InvalidField(String),
}

/// Check that a dotted payload path is safe to embed in a JSON path literal.
pub(crate) fn validate_field(field: &str) -> Result<(), QueryError> {
    let valid = !field.is_empty()
        && field.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(QueryError::InvalidField(field.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_fields() {
        assert!(validate_field("standing").is_ok());
        assert!(validate_field("location.solar_system_id").is_ok());
        assert!(validate_field("a1.B_2").is_ok());
    }

    #[test]
    fn test_invalid_fields() {
        for bad in ["", ".", "a..b", "a.", ".a", "a b", "a'b", "$.a", "a[0]", "a-b"] {
            assert_eq!(
                validate_field(bad),
                Err(QueryError::InvalidField(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }
}
