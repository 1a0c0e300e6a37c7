// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL Translator
//!
//! Translates the attribute query AST to a parameterized WHERE clause over a
//! JSON text column, for SQLite (JSON1) and MySQL.
//!
//! # SQL Syntax Generated
//!
//! ```sql
//! -- SQLite
//! json_extract(payload, '$.name') = ?                                   -- Equals text/number
//! json_type(payload, '$.flag') = ?                                      -- Equals bool
//! (json_type(payload, '$.n') IN ('integer', 'real') AND json_extract(payload, '$.n') BETWEEN ? AND ?)
//! (json_type(payload, '$.name') = 'text' AND instr(json_extract(payload, '$.name'), ?) = 1)
//!
//! -- MySQL
//! JSON_EXTRACT(payload, '$.name') = CAST(? AS JSON)                     -- Equals
//! JSON_UNQUOTE(JSON_EXTRACT(payload, '$.name')) LIKE BINARY ?           -- Prefix
//! ```
//!
//! Field paths are validated before they are inlined; values are always bound.

use serde_json::Value;

use super::query_builder::{AttributeQuery, AttributeSelector, FieldQuery, QueryNode};
use super::QueryError;

/// SQL flavour to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    MySql,
}

impl SqlDialect {
    /// Pick the dialect from a connection URL.
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("mysql:") {
            SqlDialect::MySql
        } else {
            SqlDialect::Sqlite
        }
    }
}

/// SQL query translator for JSON column queries
pub struct SqlTranslator;

/// SQL query result with parameterized placeholders
#[derive(Debug, Clone)]
pub struct SqlQuery {
    /// The WHERE clause (without "WHERE" keyword)
    pub clause: String,
    /// The parameter values in order
    pub params: Vec<SqlParam>,
}

/// SQL parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Numeric(f64),
}

impl SqlTranslator {
    /// Translate the AST to a parameterized WHERE clause using `?` placeholders.
    pub fn translate(
        query: &AttributeQuery,
        json_column: &str,
        dialect: SqlDialect,
    ) -> Result<SqlQuery, QueryError> {
        query.validate()?;
        let mut params = Vec::new();
        let clause = Self::translate_node(&query.root, json_column, dialect, &mut params);
        Ok(SqlQuery { clause, params })
    }

    fn translate_node(
        node: &QueryNode,
        json_col: &str,
        dialect: SqlDialect,
        params: &mut Vec<SqlParam>,
    ) -> String {
        match node {
            QueryNode::Any => "1=1".to_string(),
            QueryNode::Field(field_query) => {
                Self::translate_field(field_query, json_col, dialect, params)
            }
            QueryNode::And(nodes) => Self::join(nodes, " AND ", "1=1", json_col, dialect, params),
            QueryNode::Or(nodes) => Self::join(nodes, " OR ", "1=0", json_col, dialect, params),
            QueryNode::Not(inner) => {
                format!("NOT ({})", Self::translate_node(inner, json_col, dialect, params))
            }
        }
    }

    fn join(
        nodes: &[QueryNode],
        op: &str,
        empty: &str,
        json_col: &str,
        dialect: SqlDialect,
        params: &mut Vec<SqlParam>,
    ) -> String {
        let parts: Vec<String> = nodes
            .iter()
            .map(|n| Self::translate_node(n, json_col, dialect, params))
            .collect();
        match parts.len() {
            0 => empty.to_string(),
            1 => parts.concat(),
            _ => format!("({})", parts.join(op)),
        }
    }

    fn translate_field(
        field: &FieldQuery,
        json_col: &str,
        dialect: SqlDialect,
        params: &mut Vec<SqlParam>,
    ) -> String {
        let path = format!("$.{}", field.field);

        match &field.selector {
            AttributeSelector::Any => "1=1".to_string(),
            AttributeSelector::Equals(value) => {
                Self::equals(value, json_col, &path, dialect, params)
            }
            AttributeSelector::OneOf(values) => {
                let conditions: Vec<String> = values
                    .iter()
                    .map(|v| Self::equals(v, json_col, &path, dialect, params))
                    .collect();
                match conditions.len() {
                    0 => "1=0".to_string(),
                    1 => conditions.concat(),
                    _ => format!("({})", conditions.join(" OR ")),
                }
            }
            AttributeSelector::Range { min, max } => {
                let guard = match dialect {
                    SqlDialect::Sqlite => {
                        format!("json_type({}, '{}') IN ('integer', 'real')", json_col, path)
                    }
                    SqlDialect::MySql => format!(
                        "JSON_TYPE(JSON_EXTRACT({}, '{}')) IN ('INTEGER', 'UNSIGNED INTEGER', 'DOUBLE', 'DECIMAL')",
                        json_col, path
                    ),
                };
                let extract = Self::extract(json_col, &path, dialect);
                let bound = match (min, max) {
                    (Some(lo), Some(hi)) => {
                        params.push(SqlParam::Numeric(*lo));
                        params.push(SqlParam::Numeric(*hi));
                        Some(format!("{} BETWEEN ? AND ?", extract))
                    }
                    (Some(lo), None) => {
                        params.push(SqlParam::Numeric(*lo));
                        Some(format!("{} >= ?", extract))
                    }
                    (None, Some(hi)) => {
                        params.push(SqlParam::Numeric(*hi));
                        Some(format!("{} <= ?", extract))
                    }
                    (None, None) => None,
                };
                match bound {
                    Some(bound) => format!("({} AND {})", guard, bound),
                    None => guard,
                }
            }
            AttributeSelector::Prefix(prefix) => match dialect {
                SqlDialect::Sqlite => {
                    params.push(SqlParam::Text(prefix.clone()));
                    format!(
                        "(json_type({col}, '{path}') = 'text' AND instr(json_extract({col}, '{path}'), ?) = 1)",
                        col = json_col,
                        path = path
                    )
                }
                SqlDialect::MySql => {
                    params.push(SqlParam::Text(format!("{}%", escape_like(prefix))));
                    format!(
                        "(JSON_TYPE(JSON_EXTRACT({col}, '{path}')) = 'STRING' AND JSON_UNQUOTE(JSON_EXTRACT({col}, '{path}')) LIKE BINARY ?)",
                        col = json_col,
                        path = path
                    )
                }
            },
        }
    }

    fn extract(json_col: &str, path: &str, dialect: SqlDialect) -> String {
        match dialect {
            SqlDialect::Sqlite => format!("json_extract({}, '{}')", json_col, path),
            SqlDialect::MySql => format!("JSON_EXTRACT({}, '{}')", json_col, path),
        }
    }

    fn equals(
        value: &Value,
        json_col: &str,
        path: &str,
        dialect: SqlDialect,
        params: &mut Vec<SqlParam>,
    ) -> String {
        let extract = Self::extract(json_col, path, dialect);
        match dialect {
            SqlDialect::Sqlite => match value {
                Value::Null => format!("{} IS NULL", extract),
                Value::Bool(b) => {
                    params.push(SqlParam::Text(b.to_string()));
                    format!("json_type({}, '{}') = ?", json_col, path)
                }
                Value::String(s) => {
                    params.push(SqlParam::Text(s.clone()));
                    format!("{} = ?", extract)
                }
                Value::Number(n) => {
                    params.push(match n.as_i64() {
                        Some(i) => SqlParam::Integer(i),
                        None => SqlParam::Numeric(n.as_f64().unwrap_or(f64::NAN)),
                    });
                    format!("{} = ?", extract)
                }
                Value::Array(_) | Value::Object(_) => {
                    params.push(SqlParam::Text(value.to_string()));
                    format!("{} = json(?)", extract)
                }
            },
            SqlDialect::MySql => match value {
                Value::Null => format!(
                    "({extract} IS NULL OR JSON_TYPE({extract}) = 'NULL')",
                    extract = extract
                ),
                other => {
                    params.push(SqlParam::Text(other.to_string()));
                    format!("{} = CAST(? AS JSON)", extract)
                }
            },
        }
    }
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
