//! Private tables and database bootstrap. The export job table lives in the configured schema.

use crate::error::AppError;
use crate::service::{ExportJob, ExportJobStore, ExportStatus};
use crate::sql::quoted;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{ConnectOptions, PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

pub const EXPORT_TABLE: &str = "_export_jobs";

fn export_table(schema: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(EXPORT_TABLE))
}

/// Create the schema and the export job table if missing.
pub async fn ensure_export_table(pool: &PgPool, schema: &str) -> Result<(), AppError> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)))
        .execute(pool)
        .await?;
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id UUID PRIMARY KEY,
            model_code TEXT NOT NULL,
            filepath TEXT,
            status TEXT NOT NULL,
            time TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        export_table(schema)
    );
    sqlx::query(&ddl).execute(pool).await?;
    Ok(())
}

/// Export job records in PostgreSQL.
pub struct PgExportJobStore {
    pool: PgPool,
    table: String,
}

impl PgExportJobStore {
    pub fn new(pool: PgPool, schema: &str) -> Self {
        PgExportJobStore {
            pool,
            table: export_table(schema),
        }
    }
}

#[async_trait]
impl ExportJobStore for PgExportJobStore {
    async fn insert(&self, job: &ExportJob) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO {} (id, model_code, filepath, status, time) VALUES ($1, $2, $3, $4, $5)",
            self.table
        );
        sqlx::query(&sql)
            .bind(job.id)
            .bind(&job.model_code)
            .bind(&job.filepath)
            .bind(job.status.as_str())
            .bind(job.time)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update(&self, job: &ExportJob) -> Result<(), AppError> {
        let sql = format!("UPDATE {} SET filepath = $2, status = $3, time = $4 WHERE id = $1", self.table);
        sqlx::query(&sql)
            .bind(job.id)
            .bind(&job.filepath)
            .bind(job.status.as_str())
            .bind(job.time)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExportJob>, AppError> {
        let sql = format!(
            "SELECT id, model_code, filepath, status, time FROM {} WHERE id = $1",
            self.table
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(&format!("DELETE FROM {} WHERE id = $1", self.table))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn expired(&self, before: DateTime<Utc>) -> Result<Vec<ExportJob>, AppError> {
        let sql = format!(
            "SELECT id, model_code, filepath, status, time FROM {} WHERE time < $1 ORDER BY time",
            self.table
        );
        let rows = sqlx::query(&sql).bind(before).fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }
}

fn job_from_row(row: &PgRow) -> Result<ExportJob, AppError> {
    let status: String = row.try_get("status")?;
    let time: DateTime<Utc> = row.try_get("time")?;
    Ok(ExportJob {
        id: row.try_get("id")?,
        model_code: row.try_get("model_code")?,
        filepath: row.try_get("filepath")?,
        status: ExportStatus::parse(&status)
            .ok_or_else(|| AppError::Internal(format!("unknown export status '{}'", status)))?,
        time,
    })
}

/// Connect to the server's `postgres` database and create the target database if it does not exist.
/// Call before creating the pool when the database may not exist yet.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url.rfind('/').ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))? + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let mut parts = path_and_query.splitn(2, '?');
    let db_name = parts.next().unwrap_or("").trim();
    let query = parts.next().map(|q| format!("?{}", q)).unwrap_or_default();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres{}", base, query), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_url_keeps_query() {
        let (admin, name) = parse_db_name_from_url("postgres://u:p@localhost:5432/shop?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres?sslmode=disable");
        assert_eq!(name, "shop");
        assert!(parse_db_name_from_url("nopath").is_err());
    }

    #[test]
    fn export_table_is_schema_qualified() {
        assert_eq!(export_table("app"), "\"app\".\"_export_jobs\"");
    }
}
