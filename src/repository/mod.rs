//! Storage contract consumed by the action layer, and the request DTOs it takes.

use crate::error::AppError;
use crate::schema::{Field, Model};
use crate::value::{Element, FieldValue};
use async_trait::async_trait;
use std::collections::BTreeMap;

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub offset: i64,
    pub limit: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Pagination {
    /// Non-positive limits fall back to the default; large ones are capped.
    pub fn new(offset: Option<i64>, limit: Option<i64>) -> Self {
        let limit = match limit {
            Some(n) if n > 0 => n.min(MAX_LIMIT),
            _ => DEFAULT_LIMIT,
        };
        Pagination {
            offset: offset.unwrap_or(0).max(0),
            limit,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    /// Field code.
    pub field: String,
    pub desc: bool,
}

/// Per-request query description. Field codes have been checked and values coerced by the caller.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    /// Field code to accepted values. Time fields carry exactly `[from, to]`, `Null` meaning open.
    pub fields: BTreeMap<String, Vec<FieldValue>>,
    /// Case-insensitive substring matched against `query_fields`.
    pub query: Option<String>,
    pub query_fields: Vec<String>,
    /// Field codes to load; empty loads every field.
    pub select: Vec<String>,
    /// `None` sorts by last update, newest first.
    pub order: Option<OrderBy>,
    /// `None` means unbounded, used for counts and exports.
    pub pagination: Option<Pagination>,
    /// Primary key excluded from the match, used by uniqueness checks.
    pub exclude: Option<FieldValue>,
}

impl Filter {
    pub fn with(mut self, code: impl Into<String>, values: Vec<FieldValue>) -> Self {
        self.fields.insert(code.into(), values);
        self
    }

    /// Whether `field` is loaded under this filter's selection.
    pub fn selects(&self, field: &Field) -> bool {
        self.select.is_empty() || self.select.iter().any(|c| *c == field.code)
    }

    /// Same predicates without selection, order or paging.
    pub fn for_count(&self) -> Filter {
        Filter {
            fields: self.fields.clone(),
            query: self.query.clone(),
            query_fields: self.query_fields.clone(),
            exclude: self.exclude.clone(),
            ..Filter::default()
        }
    }
}

/// Model-agnostic storage. One implementation serves every registered model.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn has(&self, model: &Model, pk: &FieldValue) -> Result<bool, AppError>;

    /// Full row including association keys; `None` when absent.
    async fn get(&self, model: &Model, pk: &FieldValue) -> Result<Option<Element>, AppError>;

    async fn list(&self, model: &Model, filter: &Filter) -> Result<Vec<Element>, AppError>;

    async fn count(&self, model: &Model, filter: &Filter) -> Result<i64, AppError>;

    /// Insert and return the stored primary key.
    async fn create(&self, model: &Model, element: &Element) -> Result<FieldValue, AppError>;

    /// Write every field present in `element`.
    async fn update(&self, model: &Model, element: &Element) -> Result<(), AppError>;

    /// Delete every row in `pks` (distinct keys) or none of them: when fewer rows match,
    /// nothing is deleted and the result is `NotFound`.
    async fn delete(&self, model: &Model, pks: &[FieldValue]) -> Result<(), AppError>;

    /// Distinct non-null values of one stored field, optionally narrowed by a substring.
    async fn list_field_values(
        &self,
        model: &Model,
        field: &Field,
        query: Option<&str>,
        pagination: &Pagination,
    ) -> Result<Vec<FieldValue>, AppError>;

    async fn count_field_values(&self, model: &Model, field: &Field, query: Option<&str>) -> Result<i64, AppError>;
}

/// `NotFound` unless every requested key matched a row.
pub fn check_deleted(model: &Model, requested: usize, deleted: u64) -> Result<(), AppError> {
    if deleted == requested as u64 {
        return Ok(());
    }
    Err(AppError::NotFound(format!(
        "{} of {} {} not found",
        (requested as u64).saturating_sub(deleted),
        requested,
        model.code
    )))
}

/// Escape `%`, `_` and `\` for a LIKE pattern and wrap it for substring matching.
pub fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
