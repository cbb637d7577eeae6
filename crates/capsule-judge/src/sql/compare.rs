//! Result set equivalence
//!
//! Rows are compared as a multiset: order is ignored, duplicates count.
//! Column names must match exactly and in order.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::sql::{ResultSet, Row};

/// How a candidate result set relates to the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    pub rows_match: bool,
    pub columns_match: bool,
}

impl Comparison {
    pub fn is_equivalent(&self) -> bool {
        self.rows_match && self.columns_match
    }

    /// User-facing reason for a failed comparison
    pub fn mismatch_message(&self) -> Option<String> {
        if !self.rows_match {
            Some("Results do not match expected output".to_owned())
        } else if !self.columns_match {
            Some("Results do not match expected output: column order differs".to_owned())
        } else {
            None
        }
    }
}

pub fn compare(expected: &ResultSet, actual: &ResultSet) -> Comparison {
    Comparison {
        rows_match: multiset(&expected.rows) == multiset(&actual.rows),
        columns_match: expected.columns == actual.columns,
    }
}

type RowKey = Vec<(String, CellKey)>;

fn multiset(rows: &[Row]) -> BTreeMap<RowKey, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(row_key(row)).or_insert(0) += 1;
    }
    counts
}

/// Row as (column, value) pairs sorted by column name
fn row_key(row: &Row) -> RowKey {
    let mut key: RowKey = row
        .iter()
        .map(|(column, value)| (column.clone(), CellKey::from(value)))
        .collect();
    key.sort();
    key
}

/// Totally ordered stand-in for a JSON cell
///
/// Integral floats compare equal to integers, so `2` from one engine
/// matches `2.0` from another.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum CellKey {
    Null,
    Bool(bool),
    Int(i128),
    Float(u64),
    Text(String),
    Other(String),
}

/// Largest float whose integer conversion is exact
const EXACT_FLOAT_LIMIT: f64 = 9_007_199_254_740_992.0;

impl From<&Value> for CellKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => CellKey::Null,
            Value::Bool(b) => CellKey::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    CellKey::Int(i128::from(i))
                } else if let Some(u) = n.as_u64() {
                    CellKey::Int(i128::from(u))
                } else {
                    let f = n.as_f64().unwrap_or(f64::NAN);
                    if f.fract() == 0.0 && f.abs() <= EXACT_FLOAT_LIMIT {
                        CellKey::Int(f as i128)
                    } else {
                        // -0.0 and 0.0 are handled by the integral branch
                        CellKey::Float(f.to_bits())
                    }
                }
            }
            Value::String(s) => CellKey::Text(s.clone()),
            other => CellKey::Other(other.to_string()),
        }
    }
}
