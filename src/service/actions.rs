//! Generic List/Get/Create/Update/Delete/Export for every registered model.

use super::export::{ExportJob, ExportJobStore, ExportRunner, Exporter, FileStorage, CsvExporter};
use super::media::MediaService;
use super::notify::{Event, EventKind, Notifier};
use super::semantic::Semantics;
use super::validation::{RuleValidator, Validator};
use crate::error::{AppError, ConfigError};
use crate::repository::{Filter, OrderBy, Pagination, Repository};
use crate::schema::{Field, FieldKind, Model, Registry};
use crate::value::{Element, FieldValue};
use crate::view::{model_schema, ModelSchema};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Raw list/export request as it arrives from the transport layer.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListParams {
    /// Field code to a value, an array of values, or `{from, to}` for time fields.
    pub filter: Map<String, Value>,
    pub query: Option<String>,
    pub query_fields: Vec<String>,
    pub select: Vec<String>,
    /// Field code; empty sorts by last update, newest first.
    pub sort: Option<String>,
    pub desc: bool,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Page {
    pub items: Vec<Map<String, Value>>,
    pub total: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct FieldValues {
    pub items: Vec<Value>,
    pub total: i64,
}

#[derive(Clone)]
pub struct Actions {
    registry: Arc<Registry>,
    repository: Arc<dyn Repository>,
    validator: Arc<dyn Validator>,
    media: Option<Arc<dyn MediaService>>,
    notifier: Option<Notifier>,
    exports: Option<ExportRunner>,
}

pub struct ActionsBuilder {
    registry: Arc<Registry>,
    repository: Arc<dyn Repository>,
    validator: Option<Arc<dyn Validator>>,
    media: Option<Arc<dyn MediaService>>,
    notifier: Option<Notifier>,
    jobs: Option<Arc<dyn ExportJobStore>>,
    exporter: Option<Arc<dyn Exporter>>,
    storage: Option<Arc<dyn FileStorage>>,
    retention: Duration,
    shutdown: CancellationToken,
}

impl ActionsBuilder {
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn media(mut self, media: Arc<dyn MediaService>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Enable exports. The exporter defaults to CSV.
    pub fn exports(mut self, jobs: Arc<dyn ExportJobStore>, storage: Arc<dyn FileStorage>, retention: Duration) -> Self {
        self.jobs = Some(jobs);
        self.storage = Some(storage);
        self.retention = retention;
        self
    }

    pub fn exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Cancels background exports on shutdown.
    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Fails when a model has media fields and no media service was given.
    pub fn build(self) -> Result<Actions, ConfigError> {
        if self.media.is_none() {
            if let Some(model) = self.registry.models().iter().find(|m| m.has_media()) {
                return Err(ConfigError::MediaServiceRequired {
                    model: model.code.clone(),
                });
            }
        }
        let exports = match (self.jobs, self.storage) {
            (Some(jobs), Some(storage)) => Some(ExportRunner {
                jobs,
                exporter: self.exporter.unwrap_or_else(|| Arc::new(CsvExporter::default())),
                storage,
                retention: self.retention,
                shutdown: self.shutdown,
            }),
            _ => None,
        };
        Ok(Actions {
            registry: self.registry,
            repository: self.repository,
            validator: self.validator.unwrap_or_else(|| Arc::new(RuleValidator::new())),
            media: self.media,
            notifier: self.notifier,
            exports,
        })
    }
}

impl Actions {
    pub fn builder(registry: Arc<Registry>, repository: Arc<dyn Repository>) -> ActionsBuilder {
        ActionsBuilder {
            registry,
            repository,
            validator: None,
            media: None,
            notifier: None,
            jobs: None,
            exporter: None,
            storage: None,
            retention: Duration::from_secs(3600),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn model(&self, code: &str) -> Result<&Model, AppError> {
        self.registry
            .get(code)
            .ok_or_else(|| AppError::NotFound(format!("model '{}'", code)))
    }

    fn semantics(&self) -> Semantics<'_> {
        Semantics {
            registry: &self.registry,
            repository: self.repository.as_ref(),
            media: self.media.as_deref(),
        }
    }

    fn parse_pk(&self, model: &Model, raw: &Value) -> Result<FieldValue, AppError> {
        let pk = model
            .primary_key()
            .to_static_value(&self.registry, raw)
            .map_err(|e| AppError::BadRequest(format!("malformed primary key: {}", e)))?;
        if pk.is_zero() {
            return Err(AppError::BadRequest("malformed primary key: empty".into()));
        }
        Ok(pk)
    }

    fn notify(&self, kind: EventKind, model: &Model, keys: Vec<Value>, record: Option<Map<String, Value>>) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(Event {
                kind,
                model: model.code.clone(),
                keys,
                record,
            });
        }
    }

    /// Selected fields: the explicit list, or every listable scalar; the primary key always.
    fn select_fields<'m>(&self, model: &'m Model, select: &[String]) -> Result<Vec<&'m Field>, AppError> {
        let mut fields: Vec<&Field> = if select.is_empty() {
            model
                .fields
                .iter()
                .filter(|f| !f.hidden.list && !f.is_reference())
                .collect()
        } else {
            let mut fields = Vec::with_capacity(select.len());
            for code in select {
                let field = model
                    .field(code)
                    .ok_or_else(|| AppError::BadRequest(format!("unknown select field '{}'", code)))?;
                if !fields.iter().any(|f: &&Field| f.code == field.code) {
                    fields.push(field);
                }
            }
            fields
        };
        let pk = model.primary_key();
        if !fields.iter().any(|f| f.code == pk.code) {
            fields.push(pk);
        }
        Ok(fields)
    }

    fn build_filter(&self, model: &Model, params: &ListParams) -> Result<Filter, AppError> {
        let mut filter = Filter::default();

        if let Some(sort) = params.sort.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let field = model
                .field(sort)
                .filter(|f| f.sortable || f.primary)
                .ok_or_else(|| AppError::BadRequest(format!("field '{}' is not sortable", sort)))?;
            filter.order = Some(OrderBy {
                field: field.code.clone(),
                desc: params.desc,
            });
        }

        for (code, raw) in &params.filter {
            let field = model
                .field(code)
                .ok_or_else(|| AppError::BadRequest(format!("unknown filter field '{}'", code)))?;
            if !field.filterable && !field.primary {
                return Err(AppError::BadRequest(format!("field '{}' is not filterable", code)));
            }
            let raws = filter_values(field, raw)?;
            let values = field
                .slice_to_static_values(&self.registry, &raws)
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            filter.fields.insert(field.code.clone(), values);
        }

        if let Some(query) = params.query.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let fields: Vec<String> = if params.query_fields.is_empty() {
                model
                    .fields
                    .iter()
                    .filter(|f| f.is_searchable() && !f.hidden.list && !f.multiple)
                    .map(|f| f.code.clone())
                    .collect()
            } else {
                let mut fields = Vec::with_capacity(params.query_fields.len());
                for code in &params.query_fields {
                    let field = model
                        .field(code)
                        .filter(|f| f.is_searchable())
                        .ok_or_else(|| AppError::BadRequest(format!("field '{}' is not searchable", code)))?;
                    fields.push(field.code.clone());
                }
                fields
            };
            filter.query = Some(query.to_string());
            filter.query_fields = fields;
        }
        Ok(filter)
    }

    pub async fn list(&self, code: &str, params: &ListParams) -> Result<Page, AppError> {
        let model = self.model(code)?;
        let mut filter = self.build_filter(model, params)?;
        let fields = self.select_fields(model, &params.select)?;
        filter.select = fields.iter().map(|f| f.code.clone()).collect();
        filter.pagination = Some(Pagination::new(params.offset, params.limit));

        let rows = self
            .repository
            .list(model, &filter)
            .await
            .map_err(|e| e.context("list", code))?;
        let total = self
            .repository
            .count(model, &filter.for_count())
            .await
            .map_err(|e| e.context("count", code))?;
        let items = rows
            .iter()
            .map(|row| model.project(&self.registry, row, |f| filter.selects(f)))
            .collect();
        Ok(Page { items, total })
    }

    pub async fn get(&self, code: &str, pk: &Value) -> Result<Map<String, Value>, AppError> {
        let model = self.model(code)?;
        let pk = self.parse_pk(model, pk)?;
        let row = self
            .repository
            .get(model, &pk)
            .await
            .map_err(|e| e.context("get", code))?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", code, pk.to_text())))?;
        Ok(model.project(&self.registry, &row, |_| true))
    }

    /// Returns the new primary key.
    pub async fn create(&self, code: &str, raw: &Map<String, Value>) -> Result<Value, AppError> {
        let model = self.model(code)?;
        let key = model.primary_key();
        let mut element = model.new_element(&self.registry, raw, |f| !f.disabled.create)?;

        let supplied = element.get(&key.code).is_some_and(|v| !v.is_zero());
        if !supplied {
            element.set(key.code.clone(), generate_key(key));
        }
        stamp(model, &mut element, true);

        self.validator.validate(&self.registry, &element)?;
        let fields: Vec<&Field> = model.fields.iter().collect();
        self.semantics().check(model, &element, &fields).await?;

        let pk = self
            .repository
            .create(model, &element)
            .await
            .map_err(|e| e.context("create", code))?;
        element.set(key.code.clone(), pk.clone());
        let id = key.from_static_value(&self.registry, &pk);
        debug!(model = %code, id = %id, "created");

        let record = model.project(&self.registry, &element, |_| true);
        self.notify(EventKind::AfterCreate, model, vec![id.clone()], Some(record));
        Ok(id)
    }

    /// Partial update: only keys present in `raw` are considered. Returns the stored record.
    pub async fn update(&self, code: &str, pk: &Value, raw: &Map<String, Value>) -> Result<Map<String, Value>, AppError> {
        let model = self.model(code)?;
        let pk = self.parse_pk(model, pk)?;
        let old = self
            .repository
            .get(model, &pk)
            .await
            .map_err(|e| e.context("update", code))?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", code, pk.to_text())))?;
        let candidate = model.patch_element(&self.registry, raw, |f| !f.disabled.update && !f.primary)?;

        let changed: Vec<&Field> = model
            .fields
            .iter()
            .filter(|f| match (candidate.get(&f.code), old.get(&f.code)) {
                (Some(new), Some(old)) => !f.same_value(&self.registry, old, new),
                (Some(_), None) => true,
                (None, _) => false,
            })
            .collect();
        if changed.is_empty() {
            return Ok(model.project(&self.registry, &old, |_| true));
        }

        let mut merged = old.clone();
        for field in &changed {
            if let Some(value) = candidate.get(&field.code) {
                merged.set(field.code.clone(), value.clone());
            }
        }
        self.semantics().check(model, &merged, &changed).await?;
        stamp(model, &mut merged, false);
        self.validator.validate(&self.registry, &merged)?;

        self.repository
            .update(model, &merged)
            .await
            .map_err(|e| e.context("update", code))?;
        debug!(model = %code, changed = changed.len(), "updated");

        let record = model.project(&self.registry, &merged, |_| true);
        let id = model.primary_key().from_static_value(&self.registry, &pk);
        self.notify(EventKind::AfterUpdate, model, vec![id], Some(record.clone()));
        Ok(record)
    }

    pub async fn delete(&self, code: &str, pk: &Value) -> Result<(), AppError> {
        let model = self.model(code)?;
        let pk = self.parse_pk(model, pk)?;
        let exists = self
            .repository
            .has(model, &pk)
            .await
            .map_err(|e| e.context("delete", code))?;
        if !exists {
            return Err(AppError::NotFound(format!("{} {}", code, pk.to_text())));
        }
        self.repository
            .delete(model, std::slice::from_ref(&pk))
            .await
            .map_err(|e| e.context("delete", code))?;
        let id = model.primary_key().from_static_value(&self.registry, &pk);
        self.notify(EventKind::AfterDelete, model, vec![id], None);
        Ok(())
    }

    /// Deletes all or nothing: every key must exist. The repository checks the count inside
    /// the delete, so a row removed concurrently still fails the whole batch.
    pub async fn delete_list(&self, code: &str, pks: &[Value]) -> Result<(), AppError> {
        let model = self.model(code)?;
        let mut keys: Vec<FieldValue> = Vec::with_capacity(pks.len());
        for raw in pks {
            let pk = self.parse_pk(model, raw)?;
            if !keys.contains(&pk) {
                keys.push(pk);
            }
        }
        if keys.is_empty() {
            return Err(AppError::BadRequest("no primary keys given".into()));
        }

        self.repository
            .delete(model, &keys)
            .await
            .map_err(|e| e.context("delete", code))?;
        let ids = keys
            .iter()
            .map(|k| model.primary_key().from_static_value(&self.registry, k))
            .collect();
        self.notify(EventKind::AfterDelete, model, ids, None);
        Ok(())
    }

    /// Distinct values of one filterable field, for lookup widgets.
    pub async fn field_values(
        &self,
        code: &str,
        field_code: &str,
        query: Option<&str>,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> Result<FieldValues, AppError> {
        let model = self.model(code)?;
        let field = model
            .field(field_code)
            .filter(|f| (f.filterable || f.primary) && f.is_stored() && !f.is_reference() && f.kind != FieldKind::Json)
            .ok_or_else(|| AppError::BadRequest(format!("field '{}' has no value lookup", field_code)))?;
        let pagination = Pagination::new(offset, limit);
        let values = self
            .repository
            .list_field_values(model, field, query, &pagination)
            .await
            .map_err(|e| e.context("field values", code))?;
        let total = self
            .repository
            .count_field_values(model, field, query)
            .await
            .map_err(|e| e.context("field values", code))?;
        Ok(FieldValues {
            items: values
                .iter()
                .map(|v| field.from_static_value(&self.registry, v))
                .collect(),
            total,
        })
    }

    pub fn schema(&self, code: &str) -> Result<ModelSchema, AppError> {
        let model = self.model(code)?;
        Ok(model_schema(&self.registry, model)?)
    }

    /// Queue an export of every row matching the request; returns the pending job.
    pub async fn export(&self, code: &str, params: &ListParams) -> Result<ExportJob, AppError> {
        let model = self.model(code)?;
        let exports = self
            .exports
            .as_ref()
            .ok_or_else(|| AppError::Internal("exports are not configured".into()))?;
        let filter = self.build_filter(model, params)?;
        exports
            .start(self.registry.clone(), self.repository.clone(), model.id, filter)
            .await
            .map_err(|e| e.context("export", code))
    }

    /// Remove export jobs and files older than the retention window, e.g. left by a crashed process.
    pub async fn sweep_exports(&self) -> Result<usize, AppError> {
        match &self.exports {
            Some(exports) => exports.sweep().await,
            None => Ok(0),
        }
    }

    pub async fn export_status(&self, id: Uuid) -> Result<ExportJob, AppError> {
        let exports = self
            .exports
            .as_ref()
            .ok_or_else(|| AppError::Internal("exports are not configured".into()))?;
        exports
            .jobs
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("export {}", id)))
    }
}

/// Text and UUID keys are generated here; integer keys are left to the database.
fn generate_key(key: &Field) -> FieldValue {
    match key.kind {
        FieldKind::Uuid => FieldValue::Uuid(Uuid::new_v4()),
        FieldKind::Text => FieldValue::Text(Uuid::new_v4().to_string()),
        _ => FieldValue::Null,
    }
}

fn stamp(model: &Model, element: &mut Element, created: bool) {
    let now = FieldValue::Time(Utc::now());
    if created {
        if let Some(f) = model.created_at() {
            element.set(f.code.clone(), now.clone());
        }
    }
    if let Some(f) = model.updated_at() {
        element.set(f.code.clone(), now);
    }
}

/// Normalize one raw filter entry into its value list.
fn filter_values(field: &Field, raw: &Value) -> Result<Vec<Value>, AppError> {
    if field.is_time() && !field.multiple {
        let bounds = match raw {
            Value::Object(map) => vec![
                map.get("from").cloned().unwrap_or(Value::Null),
                map.get("to").cloned().unwrap_or(Value::Null),
            ],
            Value::Array(items) => items.clone(),
            _ => Vec::new(),
        };
        if bounds.len() != 2 {
            return Err(AppError::BadRequest(format!(
                "time filter '{}' needs exactly two bounds",
                field.code
            )));
        }
        return Ok(bounds);
    }
    Ok(match raw {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::service::notify::Hooks;
    use crate::testing::{registry, MemoryJobStore, MemoryRepository, MemoryStorage, RecordingMedia};
    use crate::service::ExportStatus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        actions: Actions,
        repository: Arc<MemoryRepository>,
    }

    fn fixture_with(media: RecordingMedia) -> Fixture {
        let registry = Arc::new(registry());
        let repository = Arc::new(MemoryRepository::new(registry.clone()));
        let actions = Actions::builder(registry, repository.clone())
            .media(Arc::new(media))
            .build()
            .unwrap();
        Fixture { actions, repository }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingMedia::default())
    }

    fn object(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn params(v: Value) -> ListParams {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn media_fields_need_a_media_service() {
        let registry = Arc::new(registry());
        let repository = Arc::new(MemoryRepository::new(registry.clone()));
        let err = Actions::builder(registry, repository).build().err().unwrap();
        assert!(matches!(err, ConfigError::MediaServiceRequired { ref model } if model == "examples"));
    }

    #[tokio::test]
    async fn create_generates_key_and_timestamps() {
        let f = fixture();
        let id = f
            .actions
            .create("examples", &object(json!({"name": "lamp", "price": 3, "id": "ignored"})))
            .await
            .unwrap();
        assert!(Uuid::parse_str(id.as_str().unwrap()).is_ok());

        let record = f.actions.get("examples", &id).await.unwrap();
        assert_eq!(record["name"], json!("lamp"));
        assert_eq!(record["price"], json!(3.0));
        assert!(record["createdAt"].is_string());
        assert_eq!(record["createdAt"], record["updatedAt"]);
    }

    #[tokio::test]
    async fn create_checks_referenced_rows() {
        let f = fixture();
        let missing = Uuid::new_v4().to_string();
        let err = f
            .actions
            .create("examples", &object(json!({"name": "a", "category": missing})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(f.repository.rows("examples").is_empty());

        let category = Uuid::new_v4().to_string();
        f.repository.insert_raw("categories", json!({"id": category, "title": "Books"}));
        let id = f
            .actions
            .create("examples", &object(json!({"name": "a", "category": {"id": category}})))
            .await
            .unwrap();
        let record = f.actions.get("examples", &id).await.unwrap();
        assert_eq!(record["category"], json!(category));
    }

    #[tokio::test]
    async fn duplicate_unique_value_conflicts() {
        let f = fixture();
        f.actions.create("examples", &object(json!({"name": "lamp"}))).await.unwrap();
        let err = f
            .actions
            .create("examples", &object(json!({"name": "lamp"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn structural_errors_are_bad_requests() {
        let f = fixture();
        let err = f.actions.create("examples", &object(json!({"price": 1}))).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = f
            .actions
            .create("examples", &object(json!({"name": "a", "price": "cheap"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        let err = f.actions.create("nope", &Map::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn media_ids_are_checked() {
        let cover = Uuid::new_v4();
        let f = fixture_with(RecordingMedia::with(&[cover]));
        f.actions
            .create("examples", &object(json!({"name": "a", "cover": cover.to_string()})))
            .await
            .unwrap();
        let err = f
            .actions
            .create("examples", &object(json!({"name": "b", "cover": Uuid::new_v4().to_string()})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn update_checks_only_changed_fields() {
        let f = fixture();
        let first = Uuid::new_v4().to_string();
        // stored duplicates predate the unique annotation
        f.repository.insert_raw("examples", json!({"id": first, "name": "dup"}));
        f.repository.insert_raw("examples", json!({"id": Uuid::new_v4().to_string(), "name": "dup"}));

        let record = f
            .actions
            .update("examples", &json!(first), &object(json!({"price": 9, "name": "dup"})))
            .await
            .unwrap();
        assert_eq!(record["price"], json!(9.0));
        assert!(record["updatedAt"].is_string());

        let err = f
            .actions
            .update("examples", &json!(first), &object(json!({"name": ""})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        f.actions.create("examples", &object(json!({"name": "taken"}))).await.unwrap();
        let err = f
            .actions
            .update("examples", &json!(first), &object(json!({"name": "taken"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn unchanged_update_writes_nothing() {
        let f = fixture();
        let id = Uuid::new_v4().to_string();
        f.repository.insert_raw("examples", json!({"id": id, "name": "same", "price": 2}));
        let record = f
            .actions
            .update("examples", &json!(id), &object(json!({"name": "same", "price": 2})))
            .await
            .unwrap();
        assert_eq!(record["updatedAt"], Value::Null);

        let err = f
            .actions
            .update("examples", &json!(Uuid::new_v4().to_string()), &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn list_rejects_unsortable_and_unfilterable_fields() {
        let f = fixture();
        let err = f.actions.list("examples", &params(json!({"sort": "price"}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        let err = f
            .actions
            .list("examples", &params(json!({"filter": {"price": 3}})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        let err = f
            .actions
            .list("examples", &params(json!({"filter": {"createdAt": [null]}})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn list_defaults_to_newest_first() {
        let f = fixture();
        for (name, updated) in [("old", "2024-01-01T00:00:00Z"), ("new", "2024-06-01T00:00:00Z")] {
            f.repository.insert_raw(
                "examples",
                json!({"id": Uuid::new_v4().to_string(), "name": name, "updatedAt": updated, "createdAt": updated}),
            );
        }
        let page = f.actions.list("examples", &params(json!({"sort": ""}))).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0]["name"], json!("new"));
        assert!(!page.items[0].contains_key("category"));

        let page = f
            .actions
            .list("examples", &params(json!({"sort": "name", "limit": 1, "select": ["name"]})))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0]["name"], json!("new"));
        assert!(page.items[0].contains_key("id"));
        assert!(!page.items[0].contains_key("price"));

        let open = f
            .actions
            .list("examples", &params(json!({"filter": {"createdAt": [null, null]}})))
            .await
            .unwrap();
        assert_eq!(open.total, 2);
        let since = f
            .actions
            .list("examples", &params(json!({"filter": {"createdAt": {"from": "2024-03-01"}}})))
            .await
            .unwrap();
        assert_eq!(since.total, 1);

        let found = f.actions.list("examples", &params(json!({"query": "OL"}))).await.unwrap();
        assert_eq!(found.total, 1);
        assert_eq!(found.items[0]["name"], json!("old"));
    }

    #[tokio::test]
    async fn delete_list_is_all_or_nothing() {
        let f = fixture();
        let id = f.actions.create("examples", &object(json!({"name": "a"}))).await.unwrap();
        let err = f
            .actions
            .delete_list("examples", &[id.clone(), json!(Uuid::new_v4().to_string())])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(f.repository.rows("examples").len(), 1);

        f.actions.delete_list("examples", &[id.clone(), id.clone()]).await.unwrap();
        assert!(f.repository.rows("examples").is_empty());
        let err = f.actions.delete("examples", &id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn field_values_need_filterable_fields() {
        let f = fixture();
        for active in [true, true, false] {
            f.repository
                .insert_raw("examples", json!({"id": Uuid::new_v4().to_string(), "name": "x", "active": active}));
        }
        let values = f.actions.field_values("examples", "active", None, None, None).await.unwrap();
        assert_eq!(values.total, 2);
        assert_eq!(values.items, vec![json!(false), json!(true)]);
        let err = f
            .actions
            .field_values("examples", "price", None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn malformed_key_is_bad_request() {
        let f = fixture();
        let err = f.actions.get("examples", &json!("nope")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        let err = f.actions.get("examples", &json!(Uuid::new_v4().to_string())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn writes_notify_hooks() {
        let created = Arc::new(AtomicUsize::new(0));
        let seen = created.clone();
        let hooks = Hooks::new().on("examples", EventKind::AfterCreate, move |event| {
            let seen = seen.clone();
            async move {
                assert!(event.record.is_some());
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let shutdown = CancellationToken::new();
        let (notifier, _worker) = Notifier::spawn(hooks, 8, shutdown.clone());

        let registry = Arc::new(registry());
        let repository = Arc::new(MemoryRepository::new(registry.clone()));
        let actions = Actions::builder(registry, repository)
            .media(Arc::new(RecordingMedia::default()))
            .notifier(notifier)
            .build()
            .unwrap();
        actions.create("examples", &object(json!({"name": "a"}))).await.unwrap();
        for _ in 0..50 {
            if created.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn export_runs_in_background() {
        let registry = Arc::new(registry());
        let repository = Arc::new(MemoryRepository::new(registry.clone()));
        repository.insert_raw("tags", json!({"id": Uuid::new_v4().to_string(), "label": "new-in"}));
        let storage = Arc::new(MemoryStorage::default());
        let shutdown = CancellationToken::new();
        let actions = Actions::builder(registry, repository)
            .media(Arc::new(RecordingMedia::default()))
            .exports(Arc::new(MemoryJobStore::default()), storage.clone(), Duration::from_secs(60))
            .shutdown(shutdown.clone())
            .build()
            .unwrap();

        let job = actions.export("tags", &ListParams::default()).await.unwrap();
        assert_eq!(job.status, ExportStatus::Pending);
        let mut status = job.clone();
        for _ in 0..50 {
            status = actions.export_status(job.id).await.unwrap();
            if status.status != ExportStatus::Pending {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status.status, ExportStatus::Succeeded);
        let path = status.filepath.unwrap();
        let files = storage.files.lock().unwrap();
        let text = String::from_utf8(files[&path].clone()).unwrap();
        assert!(text.starts_with("id,label,createdAt,updatedAt\r\n"));
        assert!(text.contains("new-in"));
        drop(files);
        shutdown.cancel();

        let err = actions.export_status(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
