//! Document model shared by the store backends
//!
//! A document is a JSON object identified by `(collection, id)` plus a version
//! counter that every write bumps. Versions drive `compare_and_set`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::{CheckinError, Result};

/// Collection names used by the check-in service.
pub mod collections {
    pub const IDENTITIES: &str = "identities";
    pub const IDENTITY_IMAGES: &str = "identity_images";
    pub const EVENTS: &str = "events";
    pub const ATTENDANCE: &str = "attendance";
    pub const DEPLOYMENT: &str = "deployment";
}

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Value,
    pub version: u64,
}

impl Document {
    /// Deserialize the fields into a typed record.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.fields.clone())?)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Serialize a record into document fields, which must be a JSON object.
pub fn encode_fields<T: Serialize>(record: &T) -> Result<Value> {
    let value = serde_json::to_value(record)?;
    if !value.is_object() {
        return Err(CheckinError::Internal(
            "document fields must serialize to a JSON object".to_string(),
        ));
    }
    Ok(value)
}

/// Comparison operator for `query`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Field is an array containing the value
    ArrayContains,
    /// Value is an array containing the field
    In,
}

impl QueryOp {
    /// Evaluate `field <op> value`. A missing field never matches.
    pub fn matches(&self, field: Option<&Value>, value: &Value) -> bool {
        let Some(field) = field else {
            return false;
        };

        match self {
            QueryOp::Eq => field == value,
            QueryOp::Ne => field != value,
            QueryOp::Lt => compare(field, value) == Some(Ordering::Less),
            QueryOp::Le => matches!(
                compare(field, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            QueryOp::Gt => compare(field, value) == Some(Ordering::Greater),
            QueryOp::Ge => matches!(
                compare(field, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            QueryOp::ArrayContains => field
                .as_array()
                .map(|items| items.contains(value))
                .unwrap_or(false),
            QueryOp::In => value
                .as_array()
                .map(|items| items.contains(field))
                .unwrap_or(false),
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Shallow merge of `patch` into `target`. Both must be objects.
pub fn merge_fields(target: &mut Value, patch: Value) -> Result<()> {
    let (Some(target), Value::Object(patch)) = (target.as_object_mut(), patch) else {
        return Err(CheckinError::Validation(
            "update requires object fields".to_string(),
        ));
    };
    merge_map(target, patch);
    Ok(())
}

fn merge_map(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        target.insert(key, value);
    }
}
