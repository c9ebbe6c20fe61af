//! Create tables for registered models: schema, entity tables, join tables, foreign-key columns,
//! then indexes and foreign keys.
//! Order follows PostgreSQL dependencies; everything is idempotent.

use crate::error::AppError;
use crate::schema::{AssociationKind, Field, FieldKind, Model, Registry};
use crate::sql::{quoted, SqlBuilder};
use sqlx::PgPool;
use std::collections::HashSet;

/// One statement of the plan. Optional steps may fail on existing databases without aborting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub sql: String,
    pub optional: bool,
}

impl Step {
    fn required(sql: String) -> Self {
        Step { sql, optional: false }
    }

    fn optional(sql: String) -> Self {
        Step { sql, optional: true }
    }
}

/// Apply the DDL plan for every registered model.
pub async fn apply_migrations(pool: &PgPool, registry: &Registry, schema: &str) -> Result<(), AppError> {
    let steps = plan(registry, schema);
    for step in &steps {
        tracing::debug!(sql = %step.sql, "migration step");
        match sqlx::query(&step.sql).execute(pool).await {
            Ok(_) => {}
            Err(e) if step.optional => tracing::warn!(error = %e, sql = %step.sql, "optional migration step failed"),
            Err(e) => return Err(AppError::Db(e)),
        }
    }
    tracing::info!(schema, steps = steps.len(), "migrations applied");
    Ok(())
}

fn column_def(sql: &SqlBuilder<'_>, model: &Model, field: &Field) -> String {
    let name = quoted(field.storage_column());
    if field.primary {
        return match field.kind {
            FieldKind::Int => format!("{} BIGSERIAL PRIMARY KEY", name),
            _ => format!("{} {} PRIMARY KEY", name, sql.column_type(field)),
        };
    }
    let is_timestamp = model.created_at().is_some_and(|f| f.code == field.code)
        || model.updated_at().is_some_and(|f| f.code == field.code);
    if is_timestamp {
        return format!("{} timestamptz NOT NULL DEFAULT NOW()", name);
    }
    format!("{} {}", name, sql.column_type(field))
}

/// The full statement list, in execution order.
pub fn plan(registry: &Registry, schema: &str) -> Vec<Step> {
    let sql = SqlBuilder::new(registry, schema);
    let mut steps = vec![Step::required(format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)))];

    for model in registry.models() {
        let columns: Vec<String> = model
            .declared_fields()
            .into_iter()
            .filter(|f| f.is_stored())
            .map(|f| column_def(&sql, model, f))
            .collect();
        steps.push(Step::required(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            sql.table(&model.table),
            columns.join(",\n  ")
        )));
    }

    let mut join_tables = HashSet::new();
    let mut constraints = Vec::new();
    for model in registry.models() {
        for field in &model.fields {
            let Some(a) = field.association() else { continue };
            let target = registry.target(a);
            match a.kind {
                AssociationKind::BelongsTo => {
                    constraints.push(Step::optional(format!(
                        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE SET NULL",
                        sql.table(&model.table),
                        quoted(&format!("{}_{}_fkey", model.table, a.foreign_key)),
                        quoted(&a.foreign_key),
                        sql.table(&target.table),
                        quoted(&a.reference)
                    )));
                }
                AssociationKind::HasOne | AssociationKind::HasMany => {
                    // the foreign key lives on the target; declared as a plain column when the target has no field for it
                    let declared = target.fields.iter().any(|f| f.is_stored() && f.storage_column() == a.foreign_key);
                    if !declared {
                        steps.push(Step::required(format!(
                            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
                            sql.table(&target.table),
                            quoted(&a.foreign_key),
                            sql.key_type(model, &a.reference)
                        )));
                    }
                }
                AssociationKind::ManyToMany => {
                    let (Some(table), Some(join_fk), Some(join_ref)) =
                        (&a.join_table, &a.join_foreign_key, &a.join_reference)
                    else {
                        continue;
                    };
                    if !join_tables.insert(table.clone()) {
                        continue;
                    }
                    let mut columns = vec![
                        format!("{} {} NOT NULL", quoted(join_fk), sql.key_type(model, &a.foreign_key)),
                        format!("{} {} NOT NULL", quoted(join_ref), sql.key_type(target, &a.reference)),
                    ];
                    if let Some(sort) = &a.join_sort {
                        columns.push(format!("{} bigint NOT NULL DEFAULT 0", quoted(sort)));
                    }
                    columns.push(format!("PRIMARY KEY ({}, {})", quoted(join_fk), quoted(join_ref)));
                    steps.push(Step::required(format!(
                        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
                        sql.table(table),
                        columns.join(",\n  ")
                    )));
                }
            }
        }
    }

    for model in registry.models() {
        for field in model.fields.iter().filter(|f| f.is_stored() && !f.primary) {
            if !(field.sortable || field.filterable || field.unique || field.is_association()) {
                continue;
            }
            if field.multiple {
                continue;
            }
            let column = field.storage_column();
            let (kind, suffix) = if field.unique { ("UNIQUE INDEX", "key") } else { ("INDEX", "idx") };
            steps.push(Step::optional(format!(
                "CREATE {} IF NOT EXISTS {} ON {} ({})",
                kind,
                quoted(&format!("{}_{}_{}", model.table, column, suffix)),
                sql.table(&model.table),
                quoted(column)
            )));
        }
    }

    steps.extend(constraints);
    steps
}
