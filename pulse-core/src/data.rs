//! Tabular metric data
//!
//! Every metric produces a [`DataSet`]: a fixed, ordered list of [`Column`]s
//! and rows of typed [`Value`]s. Publishers consume derived views of it (CSV
//! lines, plain text, time-series points) instead of metric specific types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::DataError;

/// Prefix of the metric type reported to the time-series store
pub const TIME_SERIES_PREFIX: &str = "custom.googleapis.com/pulse";

/// Longest identifier accepted by the relational store
const MAX_IDENTIFIER_LEN: usize = 63;

/// Value type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ColumnKind {
    Text,
    Integer,
    Float,
    Timestamp,
    Bool,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Text => write!(f, "text"),
            ColumnKind::Integer => write!(f, "integer"),
            ColumnKind::Float => write!(f, "float"),
            ColumnKind::Timestamp => write!(f, "timestamp"),
            ColumnKind::Bool => write!(f, "bool"),
        }
    }
}

/// One attribute of a metric row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    /// Part of the table's primary key
    pub is_key: bool,
    pub kind: ColumnKind,
}

impl Column {
    pub fn key(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            is_key: true,
            kind,
        }
    }

    pub fn value(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            is_key: false,
            kind,
        }
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Bool(bool),
    Null,
}

impl Value {
    /// Kind of the value, `None` for `Null`
    pub fn kind(&self) -> Option<ColumnKind> {
        match self {
            Value::Text(_) => Some(ColumnKind::Text),
            Value::Integer(_) => Some(ColumnKind::Integer),
            Value::Float(_) => Some(ColumnKind::Float),
            Value::Timestamp(_) => Some(ColumnKind::Timestamp),
            Value::Bool(_) => Some(ColumnKind::Bool),
            Value::Null => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => Ok(()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Result of one collection cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSet {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl DataSet {
    pub fn new(columns: &[Column]) -> Self {
        Self {
            columns: columns.to_vec(),
            rows: Vec::new(),
        }
    }

    /// Appends a row after checking arity and value kinds
    ///
    /// `Null` is accepted in every column.
    pub fn add_row(&mut self, values: Vec<Value>) -> Result<(), DataError> {
        if values.len() != self.columns.len() {
            return Err(DataError::ColumnCountMismatch {
                expected: self.columns.len(),
                actual: values.len(),
                headers: self.headers().join(", "),
                values: values
                    .iter()
                    .map(|v| format!("{:?}", v))
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        for (column, value) in self.columns.iter().zip(&values) {
            if let Some(kind) = value.kind() {
                if kind != column.kind {
                    return Err(DataError::TypeMismatch {
                        column: column.name.clone(),
                        expected: column.kind,
                        actual: format!("{:?}", value),
                    });
                }
            }
        }

        self.rows.push(values);
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// One `;` separated line per row
    pub fn to_csv_lines(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(";")
            })
            .collect()
    }

    /// Projects the rows onto time-series points
    ///
    /// Each numeric non-key column yields one point per row, labelled with the
    /// row's text columns and stamped with its first timestamp column. Rows
    /// without a timestamp are skipped.
    pub fn time_series(&self, metric_name: &str) -> Vec<TimeSeriesPoint> {
        let Some(ts_index) = self
            .columns
            .iter()
            .position(|c| c.kind == ColumnKind::Timestamp)
        else {
            return Vec::new();
        };

        let numeric: Vec<(usize, &Column)> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                !c.is_key && matches!(c.kind, ColumnKind::Integer | ColumnKind::Float)
            })
            .collect();

        let mut points = Vec::new();
        for row in &self.rows {
            let Some(timestamp) = row[ts_index].as_timestamp() else {
                continue;
            };

            let labels: BTreeMap<String, String> = self
                .columns
                .iter()
                .zip(row)
                .filter(|(c, _)| c.kind == ColumnKind::Text)
                .filter_map(|(c, v)| v.as_str().map(|s| (c.name.clone(), s.to_string())))
                .collect();

            for (index, column) in &numeric {
                if let Some(value) = row[*index].as_f64() {
                    points.push(TimeSeriesPoint {
                        metric_type: format!("{}/{}/{}", TIME_SERIES_PREFIX, metric_name, column.name),
                        labels: labels.clone(),
                        timestamp,
                        value,
                    });
                }
            }
        }
        points
    }
}

impl fmt::Display for DataSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.headers().join("\t"))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(f, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}

/// Single numeric sample destined for the time-series store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub metric_type: String,
    pub labels: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Whether `name` can be used verbatim as a table or column name
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Returns `name` if it is a valid identifier
pub fn validate_identifier(name: &str) -> Result<&str, DataError> {
    if is_valid_identifier(name) {
        Ok(name)
    } else {
        Err(DataError::InvalidIdentifier(name.to_string()))
    }
}
