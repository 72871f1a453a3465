use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::schema::TableSchema;

/// A value usable as an index key: strings and numbers.
///
/// Records whose indexed field is missing or holds anything else are
/// simply left out of that index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    Text(String),
    Number(f64),
}

impl IndexKey {
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(IndexKey::Text(s.clone())),
            Value::Number(n) => n.as_f64().map(IndexKey::Number),
            _ => None,
        }
    }

    pub(crate) fn to_sql_value(&self) -> SqlValue {
        match self {
            IndexKey::Text(s) => SqlValue::Text(s.clone()),
            IndexKey::Number(n) => SqlValue::Real(*n),
        }
    }
}

impl ToSql for IndexKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            IndexKey::Text(s) => ToSqlOutput::from(s.as_str()),
            IndexKey::Number(n) => ToSqlOutput::from(*n),
        })
    }
}

impl From<&str> for IndexKey {
    fn from(s: &str) -> Self {
        IndexKey::Text(s.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(s: String) -> Self {
        IndexKey::Text(s)
    }
}

impl From<f64> for IndexKey {
    fn from(n: f64) -> Self {
        IndexKey::Number(n)
    }
}

impl From<i64> for IndexKey {
    fn from(n: i64) -> Self {
        IndexKey::Number(n as f64)
    }
}

/// Follow a dotted key path into a JSON record.
pub fn resolve<'a>(record: &'a Value, key_path: &str) -> Option<&'a Value> {
    key_path
        .split('.')
        .try_fold(record, |current, segment| current.get(segment))
}

/// Extract the primary key of `record`; it must be a non-empty string.
pub fn primary_key(record: &Value, table: &TableSchema) -> Result<String> {
    match resolve(record, &table.primary_key) {
        Some(Value::String(key)) if !key.is_empty() => Ok(key.clone()),
        Some(Value::String(_)) => Err(StoreError::Constraint(format!(
            "'{}' record has an empty '{}'",
            table.name, table.primary_key
        ))),
        Some(_) => Err(StoreError::Constraint(format!(
            "'{}' record key '{}' must be a string",
            table.name, table.primary_key
        ))),
        None => Err(StoreError::Constraint(format!(
            "'{}' record is missing its primary key '{}'",
            table.name, table.primary_key
        ))),
    }
}

/// Index keys of `record`, one per declared index, in declaration order.
pub fn index_keys(record: &Value, table: &TableSchema) -> Vec<Option<IndexKey>> {
    table
        .indexes
        .iter()
        .map(|index| resolve(record, &index.key_path).and_then(IndexKey::from_json))
        .collect()
}
