//! Bind values for dynamically built statements.
//!
//! Every value travels as text and is converted by the `$n::type` cast the
//! builder puts on its placeholder, so one bind type serves every column.

use crate::value::FieldValue;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Uuid(uuid::Uuid),
    Time(DateTime<Utc>),
    Json(Value),
}

impl PgBindValue {
    /// Scalar form of a value. References must be reduced to their keys first; a
    /// stray one binds as JSON.
    pub fn from_field_value(v: &FieldValue) -> Self {
        match v {
            FieldValue::Null => PgBindValue::Null,
            FieldValue::Bool(b) => PgBindValue::Bool(*b),
            FieldValue::Int(n) => PgBindValue::I64(*n),
            FieldValue::Float(f) => PgBindValue::F64(*f),
            FieldValue::Text(s) => PgBindValue::String(s.clone()),
            FieldValue::Uuid(u) => PgBindValue::Uuid(*u),
            FieldValue::Time(t) => PgBindValue::Time(*t),
            FieldValue::Json(v) => PgBindValue::Json(v.clone()),
            FieldValue::Ref(_) | FieldValue::List(_) => PgBindValue::Json(v.to_json()),
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            PgBindValue::Null => None,
            PgBindValue::Bool(b) => Some(b.to_string()),
            PgBindValue::I64(n) => Some(n.to_string()),
            PgBindValue::F64(f) => Some(f.to_string()),
            PgBindValue::String(s) => Some(s.clone()),
            PgBindValue::Uuid(u) => Some(u.to_string()),
            PgBindValue::Time(t) => Some(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            PgBindValue::Json(v) => Some(v.to_string()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self.as_text() {
            None => Ok(IsNull::Yes),
            Some(text) => <&str as Encode<Postgres>>::encode_by_ref(&text.as_str(), buf),
        }
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}
