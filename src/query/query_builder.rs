// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query AST for attribute predicates.
//!
//! # Example
//!
//! ```rust
//! use history_sync::query::AttributeQuery;
//! use serde_json::json;
//!
//! let query = AttributeQuery::equals("status", "outstanding")
//!     .or(AttributeQuery::equals("status", "in_progress"));
//!
//! assert!(query.matches(&json!({"status": "in_progress"})));
//! assert!(!query.matches(&json!({"status": "finished"})));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{validate_field, QueryError};

/// Attribute query AST
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeQuery {
    /// Root query node
    pub root: QueryNode,
}

impl Default for AttributeQuery {
    fn default() -> Self {
        Self::all()
    }
}

impl AttributeQuery {
    /// Create a new query from a root node
    pub fn new(root: QueryNode) -> Self {
        Self { root }
    }

    /// Match every record
    pub fn all() -> Self {
        Self::new(QueryNode::Any)
    }

    /// Exact match on a payload field
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, AttributeSelector::Equals(value.into()))
    }

    /// Field equals any of `values`
    pub fn one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::field(field, AttributeSelector::OneOf(values))
    }

    /// Inclusive numeric range, either bound optional
    pub fn range(field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self::field(field, AttributeSelector::Range { min, max })
    }

    /// String field starting with `prefix`
    pub fn prefix(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::field(field, AttributeSelector::Prefix(prefix.into()))
    }

    fn field(field: impl Into<String>, selector: AttributeSelector) -> Self {
        Self::new(QueryNode::Field(FieldQuery {
            field: field.into(),
            selector,
        }))
    }

    /// Combine with AND
    pub fn and(self, other: AttributeQuery) -> Self {
        Self::new(QueryNode::And(vec![self.root, other.root]))
    }

    /// Combine with OR
    pub fn or(self, other: AttributeQuery) -> Self {
        Self::new(QueryNode::Or(vec![self.root, other.root]))
    }

    /// Negate query
    pub fn negate(self) -> Self {
        Self::new(QueryNode::Not(Box::new(self.root)))
    }

    /// True when the query places no constraint at all.
    pub fn is_match_all(&self) -> bool {
        matches!(self.root, QueryNode::Any)
    }

    /// Reject field paths that can't be embedded in a JSON path.
    pub fn validate(&self) -> Result<(), QueryError> {
        self.root.validate()
    }

    /// Evaluate the query against a payload.
    pub fn matches(&self, payload: &Value) -> bool {
        self.root.matches(payload)
    }
}

/// Query AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryNode {
    /// Matches everything
    Any,
    /// Constraint on one payload field
    Field(FieldQuery),
    /// All children match (empty matches everything)
    And(Vec<QueryNode>),
    /// Some child matches (empty matches nothing)
    Or(Vec<QueryNode>),
    /// Child does not match
    Not(Box<QueryNode>),
}

impl QueryNode {
    fn validate(&self) -> Result<(), QueryError> {
        match self {
            QueryNode::Any => Ok(()),
            QueryNode::Field(fq) => validate_field(&fq.field),
            QueryNode::And(nodes) | QueryNode::Or(nodes) => {
                nodes.iter().try_for_each(QueryNode::validate)
            }
            QueryNode::Not(inner) => inner.validate(),
        }
    }

    fn matches(&self, payload: &Value) -> bool {
        match self {
            QueryNode::Any => true,
            QueryNode::Field(fq) => fq.selector.matches(lookup(payload, &fq.field)),
            QueryNode::And(nodes) => nodes.iter().all(|n| n.matches(payload)),
            QueryNode::Or(nodes) => nodes.iter().any(|n| n.matches(payload)),
            QueryNode::Not(inner) => !inner.matches(payload),
        }
    }
}

/// Field query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldQuery {
    /// Dotted payload path (e.g. "location.solar_system_id")
    pub field: String,
    pub selector: AttributeSelector,
}

/// What a field's value must satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeSelector {
    /// Anything, including a missing field
    Any,
    /// Exact value. `Null` matches a missing field too
    Equals(Value),
    /// Any of the listed values
    OneOf(Vec<Value>),
    /// Numeric, inclusive bounds
    Range { min: Option<f64>, max: Option<f64> },
    /// String prefix, case-sensitive
    Prefix(String),
}

impl AttributeSelector {
    fn matches(&self, actual: Option<&Value>) -> bool {
        match self {
            AttributeSelector::Any => true,
            AttributeSelector::Equals(expected) => value_eq(actual, expected),
            AttributeSelector::OneOf(values) => values.iter().any(|v| value_eq(actual, v)),
            AttributeSelector::Range { min, max } => {
                let Some(n) = actual.and_then(Value::as_f64) else {
                    return false;
                };
                min.map_or(true, |lo| n >= lo) && max.map_or(true, |hi| n <= hi)
            }
            AttributeSelector::Prefix(prefix) => actual
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
        }
    }
}

fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(payload, |v, segment| v.get(segment))
}

fn value_eq(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None, Value::Null) | (Some(Value::Null), Value::Null) => true,
        (None, _) => false,
        // 5 and 5.0 are the same number
        (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Some(a), b) => a == b,
    }
}

/// Builder for complex queries
#[derive(Default)]
pub struct QueryBuilder {
    nodes: Vec<QueryNode>,
}

impl QueryBuilder {
    /// Create a new query builder
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Add an exact-match constraint
    pub fn equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.nodes.push(AttributeQuery::equals(field, value).root);
        self
    }

    /// Add a membership constraint
    pub fn one_of(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.nodes.push(AttributeQuery::one_of(field, values).root);
        self
    }

    /// Add a numeric range constraint
    pub fn range(mut self, field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        self.nodes.push(AttributeQuery::range(field, min, max).root);
        self
    }

    /// Add a prefix constraint
    pub fn prefix(mut self, field: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.nodes.push(AttributeQuery::prefix(field, prefix).root);
        self
    }

    /// Add an arbitrary sub-query
    pub fn query(mut self, query: AttributeQuery) -> Self {
        self.nodes.push(query.root);
        self
    }

    /// Build query with AND semantics (all constraints must match)
    pub fn build_and(mut self) -> AttributeQuery {
        match self.nodes.len() {
            0 => AttributeQuery::all(),
            1 => AttributeQuery::new(self.nodes.remove(0)),
            _ => AttributeQuery::new(QueryNode::And(self.nodes)),
        }
    }

    /// Build query with OR semantics (any constraint can match)
    pub fn build_or(mut self) -> AttributeQuery {
        match self.nodes.len() {
            0 => AttributeQuery::all(),
            1 => AttributeQuery::new(self.nodes.remove(0)),
            _ => AttributeQuery::new(QueryNode::Or(self.nodes)),
        }
    }
}
