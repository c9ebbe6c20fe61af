//! Statically-typed field values and generic entity records.

mod coerce;

use crate::schema::{Model, ModelId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Nested `{fieldCode: value}` object of a referenced entity or media file.
pub type Reference = BTreeMap<String, FieldValue>;

/// A value already converted to its field's static type.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Time(DateTime<Utc>),
    Json(Value),
    Ref(Reference),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Zero values fail `required`.
    pub fn is_zero(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Bool(b) => !b,
            FieldValue::Int(n) => *n == 0,
            FieldValue::Float(f) => *f == 0.0,
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::Uuid(u) => u.is_nil(),
            FieldValue::Time(_) => false,
            FieldValue::Json(v) => v.is_null(),
            FieldValue::Ref(r) => r.is_empty(),
            FieldValue::List(items) => items.is_empty(),
        }
    }

    /// Full JSON form; references stay nested.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(n) => Value::Number((*n).into()),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Uuid(u) => Value::String(u.to_string()),
            FieldValue::Time(t) => Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            FieldValue::Json(v) => v.clone(),
            FieldValue::Ref(r) => Value::Object(r.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            FieldValue::List(items) => Value::Array(items.iter().map(FieldValue::to_json).collect()),
        }
    }

    /// Plain text form, used for export cells and free-text matching in memory.
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Text(s) => s.clone(),
            other => match other.to_json() {
                Value::String(s) => s,
                v => v.to_string(),
            },
        }
    }
}

/// Generic record of one registered entity: the model it belongs to plus values keyed by field code.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    pub model: ModelId,
    pub values: BTreeMap<String, FieldValue>,
}

impl Element {
    pub fn new(model: ModelId) -> Self {
        Element {
            model,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, code: &str) -> Option<&FieldValue> {
        self.values.get(code)
    }

    pub fn set(&mut self, code: impl Into<String>, value: FieldValue) {
        self.values.insert(code.into(), value);
    }

    pub fn primary_key(&self, model: &Model) -> Option<&FieldValue> {
        self.values.get(&model.primary_key().code)
    }
}
