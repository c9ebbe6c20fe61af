//! Test fixtures: a small entity graph and in-memory collaborators.

use crate::error::AppError;
use crate::repository::{check_deleted, Filter, Pagination, Repository};
use crate::schema::{Attribute, Entity, EntityRef, Field, FieldKind, Kind, Model, Registry};
use crate::service::{ExportJob, ExportJobStore, ExportSink, FileStorage, MediaService};
use crate::value::{Element, FieldValue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Example {
    pub id: Uuid,
    pub name: String,
    pub price: f64,
    pub active: bool,
    pub category: Option<Uuid>,
    pub tags: Vec<Uuid>,
    pub cover: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for Example {
    const TABLE: &'static str = "examples";
    const TITLE: &'static str = "Example";

    fn attributes() -> Vec<Attribute> {
        vec![
            Attribute::new("id", Kind::Uuid),
            Attribute::new("name", Kind::Text)
                .tag("unique;sort;filter;position:1")
                .validate("required,max=64"),
            Attribute::new("price", Kind::Float),
            Attribute::new("active", Kind::Bool).tag("filter"),
            Attribute::new("category", Kind::entity::<Category>()).tag("filter"),
            Attribute::new("tags", Kind::list(Kind::entity::<Tag>()))
                .tag("joinSort:position")
                .validate("max=5,dive,uuid"),
            Attribute::new("cover", Kind::Media),
        ]
    }
}

pub struct Category;

impl Entity for Category {
    const TABLE: &'static str = "categories";
    const TITLE: &'static str = "Category";

    fn attributes() -> Vec<Attribute> {
        vec![
            Attribute::new("id", Kind::Uuid),
            Attribute::new("title", Kind::Text).tag("sort"),
            Attribute::new("examples", Kind::list(Kind::entity::<Example>())).tag("hasMany"),
        ]
    }
}

pub struct Tag;

impl Entity for Tag {
    const TABLE: &'static str = "tags";
    const TITLE: &'static str = "Tag";

    fn attributes() -> Vec<Attribute> {
        vec![
            Attribute::new("id", Kind::Uuid),
            Attribute::new("label", Kind::Text).validate("required,regex=slug"),
        ]
    }
}

/// Two unique texts, one of them optional.
pub struct Account;

impl Entity for Account {
    const TABLE: &'static str = "accounts";
    const TITLE: &'static str = "Account";

    fn attributes() -> Vec<Attribute> {
        vec![
            Attribute::new("id", Kind::Uuid),
            Attribute::new("email", Kind::Text).tag("unique").validate("required,email"),
            Attribute::new("handle", Kind::Text).tag("unique;filter"),
        ]
    }
}

pub fn account_registry() -> Registry {
    Registry::register(&[EntityRef::of::<Account>()]).unwrap()
}

pub fn registry() -> Registry {
    Registry::register(&[
        EntityRef::of::<Example>(),
        EntityRef::of::<Category>(),
        EntityRef::of::<Tag>(),
    ])
    .unwrap()
}

/// Rows per model code, with the same filter semantics as the SQL repository.
pub struct MemoryRepository {
    registry: Arc<Registry>,
    rows: Mutex<HashMap<String, Vec<Element>>>,
    sequence: AtomicI64,
    list_calls: AtomicUsize,
}

impl MemoryRepository {
    pub fn new(registry: Arc<Registry>) -> Self {
        MemoryRepository {
            registry,
            rows: Mutex::new(HashMap::new()),
            sequence: AtomicI64::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Store a raw row as-is, bypassing every check.
    pub fn insert_raw(&self, code: &str, raw: Value) -> Element {
        let model = self.registry.get(code).unwrap();
        let element = model
            .new_element(&self.registry, raw.as_object().unwrap(), |_| true)
            .unwrap();
        self.rows
            .lock()
            .unwrap()
            .entry(code.to_string())
            .or_default()
            .push(element.clone());
        element
    }

    pub fn rows(&self, code: &str) -> Vec<Element> {
        self.rows.lock().unwrap().get(code).cloned().unwrap_or_default()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(AtomicOrdering::SeqCst)
    }

    fn matches(&self, model: &Model, row: &Element, filter: &Filter) -> bool {
        let pk = &model.primary_key().code;
        if let Some(excluded) = &filter.exclude {
            if row.get(pk) == Some(excluded) {
                return false;
            }
        }
        for (code, values) in &filter.fields {
            let Some(field) = model.field(code) else { return false };
            let actual = row.get(code).cloned().unwrap_or(FieldValue::Null);
            if !self.field_matches(field, &actual, values) {
                return false;
            }
        }
        if let Some(query) = &filter.query {
            let needle = query.to_lowercase();
            let hit = filter.query_fields.iter().any(|code| {
                row.get(code)
                    .map(|v| v.to_text().to_lowercase().contains(&needle))
                    .unwrap_or(false)
            });
            if !hit {
                return false;
            }
        }
        true
    }

    fn field_matches(&self, field: &Field, actual: &FieldValue, values: &[FieldValue]) -> bool {
        if field.is_time() && !field.multiple && values.len() == 2 {
            let (from, to) = (&values[0], &values[1]);
            if from.is_null() && to.is_null() {
                return true;
            }
            let FieldValue::Time(t) = actual else { return false };
            let after = match from {
                FieldValue::Time(f) => t >= f,
                _ => true,
            };
            let before = match to {
                FieldValue::Time(b) => t <= b,
                _ => true,
            };
            return after && before;
        }
        if field.is_reference() {
            let held: HashSet<String> = field
                .reference_keys(&self.registry, actual)
                .iter()
                .map(FieldValue::to_text)
                .collect();
            return values.iter().any(|v| {
                field
                    .reference_keys(&self.registry, v)
                    .iter()
                    .any(|k| held.contains(&k.to_text()))
            });
        }
        if field.multiple {
            let FieldValue::List(items) = actual else { return false };
            return values.iter().any(|v| items.contains(v));
        }
        values.iter().any(|v| v == actual)
    }
}

fn compare(a: Option<&FieldValue>, b: Option<&FieldValue>) -> Ordering {
    match (a, b) {
        (Some(FieldValue::Int(x)), Some(FieldValue::Int(y))) => x.cmp(y),
        (Some(FieldValue::Float(x)), Some(FieldValue::Float(y))) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Some(FieldValue::Bool(x)), Some(FieldValue::Bool(y))) => x.cmp(y),
        (Some(FieldValue::Time(x)), Some(FieldValue::Time(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_text().cmp(&y.to_text()),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn has(&self, model: &Model, pk: &FieldValue) -> Result<bool, AppError> {
        Ok(self.get(model, pk).await?.is_some())
    }

    async fn get(&self, model: &Model, pk: &FieldValue) -> Result<Option<Element>, AppError> {
        let code = &model.primary_key().code;
        Ok(self
            .rows(&model.code)
            .into_iter()
            .find(|row| row.get(code) == Some(pk)))
    }

    async fn list(&self, model: &Model, filter: &Filter) -> Result<Vec<Element>, AppError> {
        self.list_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let mut rows: Vec<Element> = self
            .rows(&model.code)
            .into_iter()
            .filter(|row| self.matches(model, row, filter))
            .collect();
        let pk = model.primary_key().code.clone();
        let (order, desc) = match &filter.order {
            Some(o) => (o.field.clone(), o.desc),
            None => (model.updated_at().map(|f| f.code.clone()).unwrap_or_else(|| pk.clone()), true),
        };
        rows.sort_by(|a, b| {
            let primary = compare(a.get(&order), b.get(&order));
            let primary = if desc { primary.reverse() } else { primary };
            primary.then_with(|| compare(a.get(&pk), b.get(&pk)))
        });
        if let Some(page) = filter.pagination {
            rows = rows
                .into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .collect();
        }
        Ok(rows)
    }

    async fn count(&self, model: &Model, filter: &Filter) -> Result<i64, AppError> {
        Ok(self
            .rows(&model.code)
            .iter()
            .filter(|row| self.matches(model, row, filter))
            .count() as i64)
    }

    async fn create(&self, model: &Model, element: &Element) -> Result<FieldValue, AppError> {
        let key = model.primary_key();
        let mut row = element.clone();
        let pk = match row.get(&key.code) {
            Some(v) if !v.is_zero() => v.clone(),
            _ if key.kind == FieldKind::Int => FieldValue::Int(self.sequence.fetch_add(1, AtomicOrdering::SeqCst) + 1),
            _ => return Err(AppError::Internal("missing primary key".into())),
        };
        if self.has(model, &pk).await? {
            return Err(AppError::Conflict(format!("duplicate key {}", pk.to_text())));
        }
        row.set(key.code.clone(), pk.clone());
        self.rows.lock().unwrap().entry(model.code.clone()).or_default().push(row);
        Ok(pk)
    }

    async fn update(&self, model: &Model, element: &Element) -> Result<(), AppError> {
        let code = &model.primary_key().code;
        let pk = element.get(code).cloned();
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&model.code)
            .and_then(|rows| rows.iter_mut().find(|r| r.get(code) == pk.as_ref()))
            .ok_or_else(|| AppError::NotFound(model.code.clone()))?;
        for (k, v) in &element.values {
            row.set(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn delete(&self, model: &Model, pks: &[FieldValue]) -> Result<(), AppError> {
        let code = &model.primary_key().code;
        let mut tables = self.rows.lock().unwrap();
        let rows = tables.entry(model.code.clone()).or_default();
        let doomed = |r: &Element| r.get(code).is_some_and(|v| pks.contains(v));
        let matched = rows.iter().filter(|r| doomed(r)).count();
        check_deleted(model, pks.len(), matched as u64)?;
        rows.retain(|r| !doomed(r));
        Ok(())
    }

    async fn list_field_values(
        &self,
        model: &Model,
        field: &Field,
        query: Option<&str>,
        pagination: &Pagination,
    ) -> Result<Vec<FieldValue>, AppError> {
        let mut values = self.distinct_values(model, field, query);
        values.sort_by(|a, b| compare(Some(a), Some(b)));
        Ok(values
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect())
    }

    async fn count_field_values(&self, model: &Model, field: &Field, query: Option<&str>) -> Result<i64, AppError> {
        Ok(self.distinct_values(model, field, query).len() as i64)
    }
}

impl MemoryRepository {
    fn distinct_values(&self, model: &Model, field: &Field, query: Option<&str>) -> Vec<FieldValue> {
        let needle = query.map(|q| q.to_lowercase());
        let mut out: Vec<FieldValue> = Vec::new();
        for row in self.rows(&model.code) {
            let Some(value) = row.get(&field.code) else { continue };
            if value.is_null() || out.contains(value) {
                continue;
            }
            if let Some(needle) = &needle {
                if !value.to_text().to_lowercase().contains(needle) {
                    continue;
                }
            }
            out.push(value.clone());
        }
        out
    }
}

/// Media service that knows a fixed set of ids and records every check.
#[derive(Default)]
pub struct RecordingMedia {
    known: Mutex<HashSet<Uuid>>,
    pub checks: Mutex<Vec<Vec<Uuid>>>,
}

impl RecordingMedia {
    pub fn with(ids: &[Uuid]) -> Self {
        RecordingMedia {
            known: Mutex::new(ids.iter().copied().collect()),
            checks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MediaService for RecordingMedia {
    async fn check_ids_exist(&self, ids: &[Uuid]) -> Result<(), AppError> {
        self.checks.lock().unwrap().push(ids.to_vec());
        let known = self.known.lock().unwrap();
        let missing: Vec<String> = ids.iter().filter(|id| !known.contains(id)).map(Uuid::to_string).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::BadRequest(format!("unknown media: {}", missing.join(", "))))
        }
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, ExportJob>>,
}

#[async_trait]
impl ExportJobStore for MemoryJobStore {
    async fn insert(&self, job: &ExportJob) -> Result<(), AppError> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &ExportJob) -> Result<(), AppError> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExportJob>, AppError> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        self.jobs.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn expired(&self, before: DateTime<Utc>) -> Result<Vec<ExportJob>, AppError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|job| job.time < before)
            .cloned()
            .collect())
    }
}

impl MemoryJobStore {
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

/// Files kept in memory; every chunk written is also recorded in order.
#[derive(Default)]
pub struct MemoryStorage {
    pub files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    pub chunks: Arc<Mutex<Vec<String>>>,
}

struct MemoryFile {
    path: String,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    chunks: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ExportSink for MemoryFile {
    fn path(&self) -> &str {
        &self.path
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<(), AppError> {
        self.chunks.lock().unwrap().push(String::from_utf8_lossy(chunk).into_owned());
        self.files
            .lock()
            .unwrap()
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<String, AppError> {
        Ok(self.path)
    }
}

#[async_trait]
impl FileStorage for MemoryStorage {
    async fn create(&self, name: &str) -> Result<Box<dyn ExportSink>, AppError> {
        let path = format!("mem/{}", name);
        self.files.lock().unwrap().insert(path.clone(), Vec::new());
        Ok(Box::new(MemoryFile {
            path,
            files: self.files.clone(),
            chunks: self.chunks.clone(),
        }))
    }

    async fn remove(&self, path: &str) -> Result<(), AppError> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }
}
