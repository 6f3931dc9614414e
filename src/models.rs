/// Data Models Module
///
/// This module defines the core data structures passed between pipeline stages:
/// scalar cell values, the row batch that carries stage-to-stage state, and the
/// schema-qualified table reference.
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// A single scalar cell read from, or written to, a table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
}

/// Spellings that upstream tools use for a missing timestamp
const NULL_SPELLINGS: [&str; 5] = ["", "nat", "nan", "none", "null"];

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date(_) | Self::Time(_) | Self::Timestamp(_) | Self::TimestampTz(_))
    }

    /// True for text cells that only stand in for a missing value
    pub fn is_null_spelling(&self) -> bool {
        match self {
            Self::Text(s) => {
                let lowered = s.trim().to_ascii_lowercase();
                NULL_SPELLINGS.contains(&lowered.as_str())
            }
            _ => false,
        }
    }

    /// Equality as a SQL `=` comparison would see it.
    ///
    /// NULL matches nothing, numbers compare numerically whatever their
    /// representation, and a date equals a timestamp at midnight (UTC for
    /// `timestamptz`) of the same day.
    pub fn sql_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => false,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Decimal(d), Self::Int(i)) | (Self::Int(i), Self::Decimal(d)) => Decimal::from(*i) == *d,
            (Self::Decimal(d), Self::Float(f)) | (Self::Float(f), Self::Decimal(d)) => {
                Decimal::try_from(*f).map_or(false, |f| f == *d)
            }
            (Self::Date(d), Self::Timestamp(t)) | (Self::Timestamp(t), Self::Date(d)) => {
                d.and_hms_opt(0, 0, 0).as_ref() == Some(t)
            }
            (Self::Date(d), Self::TimestampTz(z)) | (Self::TimestampTz(z), Self::Date(d)) => {
                d.and_hms_opt(0, 0, 0) == Some(z.naive_utc())
            }
            (Self::Timestamp(t), Self::TimestampTz(z)) | (Self::TimestampTz(z), Self::Timestamp(t)) => {
                z.naive_utc() == *t
            }
            _ => self == other,
        }
    }
}

// Identity, not SQL semantics: two NULLs are the same cell, floats compare by bits.
// This is what row deduplication needs.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Uuid(a), Self::Uuid(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Time(a), Self::Time(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::TimestampTz(a), Self::TimestampTz(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Decimal(d) => d.hash(state),
            Self::Text(s) => s.hash(state),
            Self::Uuid(u) => u.hash(state),
            Self::Date(d) => d.hash(state),
            Self::Time(t) => t.hash(state),
            Self::Timestamp(t) => t.hash(state),
            Self::TimestampTz(t) => t.hash(state),
            Self::Json(j) => j.to_string().hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Decimal(d) => write!(f, "{}", d),
            Self::Text(s) => write!(f, "'{}'", s),
            Self::Uuid(u) => write!(f, "{}", u),
            Self::Date(d) => write!(f, "{}", d),
            Self::Time(t) => write!(f, "{}", t),
            Self::Timestamp(t) => write!(f, "{}", t),
            Self::TimestampTz(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Json(j) => write!(f, "{}", j),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

/// A schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self { schema: schema.into(), table: table.into() }
    }

    /// Parse a `schema.table` pair
    pub fn parse(qualified: &str) -> Option<Self> {
        let (schema, table) = qualified.split_once('.')?;
        let (schema, table) = (schema.trim(), table.trim());
        if schema.is_empty() || table.is_empty() || table.contains('.') {
            return None;
        }
        Some(Self::new(schema, table))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// A destination column as the catalog declares it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// `information_schema.columns.data_type`, e.g. `timestamp without time zone`
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self { name: name.into(), data_type: data_type.into() }
    }

    /// Date, time and timestamp columns, with or without time zone
    pub fn is_temporal(&self) -> bool {
        let data_type = self.data_type.to_ascii_lowercase();
        data_type == "date" || data_type.starts_with("time")
    }
}

/// Raised when a row does not fit the batch's column set
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("row {index} has {found} values but the batch has {expected} columns")]
pub struct RowShapeError {
    pub index: usize,
    pub expected: usize,
    pub found: usize,
}

/// Ordered rows sharing one ordered column set.
///
/// Every row holds exactly one value per column, so the shared-column-set
/// invariant cannot be broken through this API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BatchParts")]
pub struct RowBatch {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct BatchParts {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TryFrom<BatchParts> for RowBatch {
    type Error = RowShapeError;

    fn try_from(parts: BatchParts) -> Result<Self, Self::Error> {
        RowBatch::from_rows(parts.columns, parts.rows)
    }
}

impl RowBatch {
    /// Create an empty batch with the given columns
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    /// Build a batch, rejecting any row whose width differs from the column list
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, RowShapeError> {
        let mut batch = Self::new(columns);
        for row in rows {
            batch.push_row(row)?;
        }
        Ok(batch)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), RowShapeError> {
        if row.len() != self.columns.len() {
            return Err(RowShapeError { index: self.rows.len(), expected: self.columns.len(), found: row.len() });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
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

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Value of `column` in row `row`
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Set `column` to `value` on every row, appending the column if it is new
    pub fn set_constant(&mut self, column: &str, value: &Value) {
        match self.column_index(column) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = value.clone();
                }
            }
            None => {
                self.columns.push(column.to_string());
                for row in &mut self.rows {
                    row.push(value.clone());
                }
            }
        }
    }

    /// Distinct key tuples over `columns`, in first-seen order.
    ///
    /// Tuples containing a NULL are skipped since they cannot match anything.
    /// Returns `None` if one of the columns is missing.
    pub fn key_tuples(&self, columns: &[String]) -> Option<Vec<Vec<Value>>> {
        let indexes = columns.iter().map(|c| self.column_index(c)).collect::<Option<Vec<_>>>()?;
        let mut seen = HashSet::new();
        let mut tuples = Vec::new();

        for row in &self.rows {
            let tuple: Vec<Value> = indexes.iter().map(|&i| row[i].clone()).collect();
            if tuple.iter().any(Value::is_null) {
                continue;
            }
            if seen.insert(tuple.clone()) {
                tuples.push(tuple);
            }
        }

        Some(tuples)
    }

    /// Replace null spellings with `Null` in temporal columns.
    ///
    /// A column is temporal if it is listed in `declared` or if any of its
    /// cells holds a temporal value. Returns the number of cells rewritten.
    pub fn normalize_temporal_nulls(&mut self, declared: &[String]) -> usize {
        let temporal: Vec<usize> = (0..self.columns.len())
            .filter(|&i| declared.contains(&self.columns[i]) || self.rows.iter().any(|row| row[i].is_temporal()))
            .collect();

        let mut rewritten = 0;
        for row in &mut self.rows {
            for &i in &temporal {
                if row[i].is_null_spelling() {
                    row[i] = Value::Null;
                    rewritten += 1;
                }
            }
        }
        rewritten
    }

    /// Collapse identical rows to their first occurrence, preserving order.
    ///
    /// Returns the number of rows dropped.
    pub fn dedup_rows(&mut self) -> usize {
        let before = self.rows.len();
        let mut seen = HashSet::with_capacity(before);
        self.rows.retain(|row| seen.insert(row.clone()));
        before - self.rows.len()
    }
}
