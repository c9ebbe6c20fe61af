//! PostgreSQL implementation of [`Repository`] for every registered model.

use super::builder::{QueryBuf, SqlBuilder};
use crate::error::AppError;
use crate::repository::{check_deleted, Filter, Pagination, Repository};
use crate::schema::{AssociationKind, Field, Model, Registry};
use crate::value::{Element, FieldValue};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::{Query, QueryScalar};
use sqlx::{PgConnection, PgPool, Postgres, Row};
use std::collections::HashMap;
use std::sync::Arc;

fn bind(q: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    query
}

fn bind_scalar<O>(q: &QueryBuf) -> QueryScalar<'_, Postgres, O, PgArguments>
where
    (O,): for<'r> sqlx::FromRow<'r, PgRow>,
{
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query_scalar::<Postgres, O>(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    query
}

/// Stored data that does not fit its field is a server fault, not caller input.
fn stored_value_error(model: &Model, field: &Field, err: AppError) -> AppError {
    AppError::Internal(format!("decode {}.{}: {}", model.code, field.code, err))
}

fn preloaded(field: &Field) -> bool {
    field
        .association()
        .map_or(false, |a| a.kind != AssociationKind::BelongsTo)
}

pub struct PgRepository {
    pool: PgPool,
    registry: Arc<Registry>,
    schema: String,
}

impl PgRepository {
    pub fn new(pool: PgPool, registry: Arc<Registry>, schema: impl Into<String>) -> Self {
        PgRepository {
            pool,
            registry,
            schema: schema.into(),
        }
    }

    fn sql(&self) -> SqlBuilder<'_> {
        SqlBuilder::new(&self.registry, &self.schema)
    }

    /// Fields to read for a filter: the selection, the primary key, and owner keys of preloaded associations.
    fn fetch_fields<'m>(&self, model: &'m Model, filter: &Filter) -> Vec<&'m Field> {
        let mut fields: Vec<&Field> = model.fields.iter().filter(|f| filter.selects(f)).collect();
        let mut required = vec![model.primary_key()];
        for field in fields.iter().filter(|f| preloaded(f)) {
            if let Some(owner) = field.association().and_then(|a| self.sql().owner_key(model, a)) {
                required.push(owner);
            }
        }
        for field in required {
            if !fields.iter().any(|f| f.code == field.code) {
                fields.push(field);
            }
        }
        fields
    }

    async fn fetch(&self, conn: &mut PgConnection, model: &Model, filter: &Filter) -> Result<Vec<Element>, AppError> {
        let fields = self.fetch_fields(model, filter);
        let q = self.sql().select(model, &fields, filter);
        let rows = bind(&q).fetch_all(&mut *conn).await?;

        let mut elements = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut element = Element::new(model.id);
            for field in fields.iter().filter(|f| f.is_stored()) {
                let raw: Option<Value> = row.try_get(field.code.as_str())?;
                let value = field
                    .to_static_value(&self.registry, &raw.unwrap_or(Value::Null))
                    .map_err(|e| stored_value_error(model, field, e))?;
                element.set(field.code.clone(), value);
            }
            elements.push(element);
        }

        for field in fields.iter().filter(|f| preloaded(f)) {
            self.preload(conn, model, field, &mut elements).await?;
        }
        Ok(elements)
    }

    async fn preload(
        &self,
        conn: &mut PgConnection,
        model: &Model,
        field: &Field,
        elements: &mut [Element],
    ) -> Result<(), AppError> {
        let sql = self.sql();
        let Some(owner_field) = field.association().and_then(|a| sql.owner_key(model, a)) else {
            return Err(AppError::Internal(format!(
                "{}.{}: owner key column is not a stored field",
                model.code, field.code
            )));
        };
        let mut owners: Vec<FieldValue> = Vec::new();
        for e in elements.iter() {
            if let Some(v) = e.get(&owner_field.code).filter(|v| !v.is_null()) {
                if !owners.contains(v) {
                    owners.push(v.clone());
                }
            }
        }

        let mut groups: HashMap<String, Vec<FieldValue>> = HashMap::new();
        if let Some(q) = sql.preload(model, field, &owners) {
            for row in bind(&q).fetch_all(&mut *conn).await? {
                let owner: Option<Value> = row.try_get("owner")?;
                let key: Option<Value> = row.try_get("key")?;
                let reference = field
                    .to_static_element(&self.registry, &key.unwrap_or(Value::Null))
                    .map_err(|e| stored_value_error(model, field, e))?;
                groups
                    .entry(owner.unwrap_or(Value::Null).to_string())
                    .or_default()
                    .push(reference);
            }
        }

        for e in elements.iter_mut() {
            let owner = e
                .get(&owner_field.code)
                .map(|v| owner_field.from_static_value(&self.registry, v).to_string())
                .unwrap_or_default();
            let refs = groups.get(&owner).cloned().unwrap_or_default();
            let value = if field.multiple {
                FieldValue::List(refs)
            } else {
                refs.into_iter().next().unwrap_or(FieldValue::Null)
            };
            e.set(field.code.clone(), value);
        }
        Ok(())
    }

    async fn write_relations(&self, conn: &mut PgConnection, model: &Model, element: &Element) -> Result<(), AppError> {
        let sql = self.sql();
        for field in model.fields.iter().filter(|f| preloaded(f)) {
            let Some(value) = element.get(&field.code) else { continue };
            let owner = field
                .association()
                .and_then(|a| sql.owner_key(model, a))
                .and_then(|f| element.get(&f.code))
                .ok_or_else(|| {
                    AppError::Internal(format!("{}.{}: owner key not loaded", model.code, field.code))
                })?;
            let keys = field.reference_keys(&self.registry, value);
            for q in sql.relation_writes(model, field, owner, &keys) {
                bind(&q).execute(&mut *conn).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn has(&self, model: &Model, pk: &FieldValue) -> Result<bool, AppError> {
        let q = self.sql().exists(model, pk);
        Ok(bind_scalar::<bool>(&q).fetch_one(&self.pool).await?)
    }

    async fn get(&self, model: &Model, pk: &FieldValue) -> Result<Option<Element>, AppError> {
        let filter = Filter::default().with(model.primary_key().code.clone(), vec![pk.clone()]);
        let mut conn = self.pool.acquire().await?;
        Ok(self.fetch(&mut conn, model, &filter).await?.into_iter().next())
    }

    async fn list(&self, model: &Model, filter: &Filter) -> Result<Vec<Element>, AppError> {
        let mut conn = self.pool.acquire().await?;
        self.fetch(&mut conn, model, filter).await
    }

    async fn count(&self, model: &Model, filter: &Filter) -> Result<i64, AppError> {
        let q = self.sql().count(model, filter);
        Ok(bind_scalar::<i64>(&q).fetch_one(&self.pool).await?)
    }

    async fn create(&self, model: &Model, element: &Element) -> Result<FieldValue, AppError> {
        let key = model.primary_key();
        let mut tx = self.pool.begin().await?;
        let q = self.sql().insert(model, element);
        let raw: Value = bind_scalar::<Value>(&q).fetch_one(&mut *tx).await?;
        let pk = key
            .to_static_value(&self.registry, &raw)
            .map_err(|e| stored_value_error(model, key, e))?;

        let mut stored = element.clone();
        stored.set(key.code.clone(), pk.clone());
        self.write_relations(&mut tx, model, &stored).await?;
        tx.commit().await?;
        Ok(pk)
    }

    async fn update(&self, model: &Model, element: &Element) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        if let Some(q) = self.sql().update(model, element) {
            let result = bind(&q).execute(&mut *tx).await?;
            if result.rows_affected() == 0 {
                return Err(AppError::NotFound(format!("{} row", model.code)));
            }
        }
        self.write_relations(&mut tx, model, element).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, model: &Model, pks: &[FieldValue]) -> Result<(), AppError> {
        if pks.is_empty() {
            return Ok(());
        }
        let sql = self.sql();
        let mut tx = self.pool.begin().await?;
        for field in model.fields.iter().filter(|f| preloaded(f)) {
            if let Some(q) = sql.relation_detach(model, field, pks) {
                bind(&q).execute(&mut *tx).await?;
            }
        }
        let deleted = bind(&sql.delete(model, pks)).execute(&mut *tx).await?.rows_affected();
        // dropping the transaction rolls back the detach statements too
        check_deleted(model, pks.len(), deleted)?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_field_values(
        &self,
        model: &Model,
        field: &Field,
        query: Option<&str>,
        pagination: &Pagination,
    ) -> Result<Vec<FieldValue>, AppError> {
        let q = self.sql().field_values(model, field, query, pagination);
        let rows: Vec<Value> = bind_scalar::<Value>(&q).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|raw| {
                field
                    .to_static_value(&self.registry, raw)
                    .map_err(|e| stored_value_error(model, field, e))
            })
            .collect()
    }

    async fn count_field_values(&self, model: &Model, field: &Field, query: Option<&str>) -> Result<i64, AppError> {
        let q = self.sql().count_field_values(model, field, query);
        Ok(bind_scalar::<i64>(&q).fetch_one(&self.pool).await?)
    }
}
