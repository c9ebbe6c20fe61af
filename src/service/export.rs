//! Background export: job records, the row-streaming exporter, file storage and retention cleanup.

use crate::error::AppError;
use crate::repository::{Filter, Pagination, Repository};
use crate::schema::{Model, ModelId, Registry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const EXPORT_BATCH_SIZE: i64 = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Pending,
    Succeeded,
    Error,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Pending => "pending",
            ExportStatus::Succeeded => "succeeded",
            ExportStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<ExportStatus> {
        match s {
            "pending" => Some(ExportStatus::Pending),
            "succeeded" => Some(ExportStatus::Succeeded),
            "error" => Some(ExportStatus::Error),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub id: Uuid,
    pub model_code: String,
    pub filepath: Option<String>,
    pub status: ExportStatus,
    pub time: DateTime<Utc>,
}

impl ExportJob {
    pub fn pending(model_code: impl Into<String>) -> Self {
        ExportJob {
            id: Uuid::new_v4(),
            model_code: model_code.into(),
            filepath: None,
            status: ExportStatus::Pending,
            time: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ExportJobStore: Send + Sync {
    async fn insert(&self, job: &ExportJob) -> Result<(), AppError>;
    async fn update(&self, job: &ExportJob) -> Result<(), AppError>;
    async fn get(&self, id: Uuid) -> Result<Option<ExportJob>, AppError>;
    async fn delete(&self, id: Uuid) -> Result<(), AppError>;
    /// Jobs whose last change is older than `before`.
    async fn expired(&self, before: DateTime<Utc>) -> Result<Vec<ExportJob>, AppError>;
}

/// An open export file. Chunks are appended in order; `finish` flushes and returns the stored path.
#[async_trait]
pub trait ExportSink: Send {
    fn path(&self) -> &str;
    async fn write(&mut self, chunk: &[u8]) -> Result<(), AppError>;
    async fn finish(self: Box<Self>) -> Result<String, AppError>;
}

/// Where export files go.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn create(&self, name: &str) -> Result<Box<dyn ExportSink>, AppError>;
    async fn remove(&self, path: &str) -> Result<(), AppError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportFile {
    pub path: String,
    pub rows: u64,
}

#[async_trait]
pub trait Exporter: Send + Sync {
    /// Write every row matching `filter` to a new file in `storage`, one column per field code
    /// in declaration order.
    async fn get_file(
        &self,
        registry: &Registry,
        repository: &dyn Repository,
        storage: &dyn FileStorage,
        model: &Model,
        filter: &Filter,
        cancel: &CancellationToken,
    ) -> Result<ExportFile, AppError>;
}

/// Comma-separated export read in fixed-size batches.
pub struct CsvExporter {
    batch_size: i64,
}

impl Default for CsvExporter {
    fn default() -> Self {
        CsvExporter {
            batch_size: EXPORT_BATCH_SIZE,
        }
    }
}

impl CsvExporter {
    pub fn with_batch_size(batch_size: i64) -> Self {
        CsvExporter {
            batch_size: batch_size.max(1),
        }
    }

    async fn write_rows(
        &self,
        registry: &Registry,
        repository: &dyn Repository,
        model: &Model,
        filter: &Filter,
        sink: &mut dyn ExportSink,
    ) -> Result<u64, AppError> {
        let columns = model.declared_fields();
        let mut out = String::new();
        push_row(&mut out, columns.iter().map(|f| f.code.clone()));
        sink.write(out.as_bytes()).await?;

        let mut page = Filter {
            select: Vec::new(),
            ..filter.clone()
        };
        let mut offset = 0;
        let mut written = 0;
        loop {
            page.pagination = Some(Pagination {
                offset,
                limit: self.batch_size,
            });
            let rows = repository.list(model, &page).await?;
            out.clear();
            for row in &rows {
                push_row(
                    &mut out,
                    columns.iter().map(|f| {
                        row.get(&f.code)
                            .map(|v| cell(&f.from_static_value(registry, v)))
                            .unwrap_or_default()
                    }),
                );
            }
            if !out.is_empty() {
                sink.write(out.as_bytes()).await?;
            }
            written += rows.len() as u64;
            if (rows.len() as i64) < self.batch_size {
                break;
            }
            offset += self.batch_size;
        }
        Ok(written)
    }
}

#[async_trait]
impl Exporter for CsvExporter {
    async fn get_file(
        &self,
        registry: &Registry,
        repository: &dyn Repository,
        storage: &dyn FileStorage,
        model: &Model,
        filter: &Filter,
        cancel: &CancellationToken,
    ) -> Result<ExportFile, AppError> {
        let name = format!("{}-{}.csv", model.code, Utc::now().format("%Y%m%d%H%M%S%3f"));
        let mut sink = storage.create(&name).await?;
        let path = sink.path().to_string();
        let written = self.write_rows(registry, repository, model, filter, sink.as_mut()).await;
        let result = match written {
            Ok(rows) if !cancel.is_cancelled() => sink.finish().await.map(|path| ExportFile { path, rows }),
            Ok(_) => {
                drop(sink);
                Err(AppError::Internal("export cancelled".into()))
            }
            Err(e) => {
                drop(sink);
                Err(e)
            }
        };
        if result.is_err() {
            if let Err(e) = storage.remove(&path).await {
                warn!(path = %path, error = %e, "partial export file cleanup failed");
            }
        }
        result
    }
}

fn cell(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(cell).collect::<Vec<_>>().join(";"),
        other => other.to_string(),
    }
}

fn push_row(out: &mut String, cells: impl Iterator<Item = String>) {
    let cells: Vec<String> = cells
        .map(|c| {
            if c.contains(&[',', '"', '\n', '\r'][..]) {
                format!("\"{}\"", c.replace('"', "\"\""))
            } else {
                c
            }
        })
        .collect();
    out.push_str(&cells.join(","));
    out.push_str("\r\n");
}

/// Files under one local directory.
pub struct LocalStorage {
    dir: PathBuf,
}

impl LocalStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        LocalStorage { dir: dir.into() }
    }
}

fn storage_error(e: std::io::Error) -> AppError {
    AppError::Internal(format!("export storage: {}", e))
}

struct LocalFile {
    path: String,
    writer: BufWriter<File>,
}

#[async_trait]
impl ExportSink for LocalFile {
    fn path(&self) -> &str {
        &self.path
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<(), AppError> {
        self.writer.write_all(chunk).await.map_err(storage_error)
    }

    async fn finish(self: Box<Self>) -> Result<String, AppError> {
        let LocalFile { path, mut writer } = *self;
        writer.flush().await.map_err(storage_error)?;
        writer.get_mut().sync_all().await.map_err(storage_error)?;
        Ok(path)
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn create(&self, name: &str) -> Result<Box<dyn ExportSink>, AppError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(storage_error)?;
        let path = self.dir.join(name);
        let file = File::create(&path).await.map_err(storage_error)?;
        Ok(Box::new(LocalFile {
            path: path.to_string_lossy().into_owned(),
            writer: BufWriter::new(file),
        }))
    }

    async fn remove(&self, path: &str) -> Result<(), AppError> {
        tokio::fs::remove_file(path).await.map_err(storage_error)
    }
}

/// Collaborators a background export needs; cloned into each spawned task.
#[derive(Clone)]
pub struct ExportRunner {
    pub jobs: Arc<dyn ExportJobStore>,
    pub exporter: Arc<dyn Exporter>,
    pub storage: Arc<dyn FileStorage>,
    pub retention: Duration,
    pub shutdown: CancellationToken,
}

impl ExportRunner {
    /// Record a pending job and run the export on a detached task.
    pub async fn start(
        &self,
        registry: Arc<Registry>,
        repository: Arc<dyn Repository>,
        model: ModelId,
        filter: Filter,
    ) -> Result<ExportJob, AppError> {
        let job = ExportJob::pending(registry.model(model).code.clone());
        self.jobs.insert(&job).await?;
        info!(job = %job.id, model = %job.model_code, "export queued");

        let runner = self.clone();
        let pending = job.clone();
        tokio::spawn(async move {
            runner.run(registry, repository, model, filter, pending).await;
        });
        Ok(job)
    }

    async fn run(
        self,
        registry: Arc<Registry>,
        repository: Arc<dyn Repository>,
        model: ModelId,
        filter: Filter,
        mut job: ExportJob,
    ) {
        let model = registry.model(model);
        let result = self
            .exporter
            .get_file(
                &registry,
                repository.as_ref(),
                self.storage.as_ref(),
                model,
                &filter,
                &self.shutdown,
            )
            .await;

        match result {
            Ok(file) => {
                info!(job = %job.id, model = %model.code, path = %file.path, rows = file.rows, "export succeeded");
                job.status = ExportStatus::Succeeded;
                job.filepath = Some(file.path);
            }
            Err(e) => {
                error!(job = %job.id, model = %model.code, error = %e, "export failed");
                job.status = ExportStatus::Error;
            }
        }
        job.time = Utc::now();
        if let Err(e) = self.jobs.update(&job).await {
            warn!(job = %job.id, error = %e, "export job update failed");
        }

        // shutdown ends the retention window early
        tokio::select! {
            _ = tokio::time::sleep(self.retention) => {}
            _ = self.shutdown.cancelled() => {}
        }
        self.cleanup(&job).await;
    }

    /// Remove jobs and files left behind by an earlier process. Returns how many jobs were removed.
    pub async fn sweep(&self) -> Result<usize, AppError> {
        let retention = chrono::Duration::from_std(self.retention)
            .map_err(|e| AppError::Internal(format!("export retention: {}", e)))?;
        let expired = self.jobs.expired(Utc::now() - retention).await?;
        for job in &expired {
            self.cleanup(job).await;
        }
        if !expired.is_empty() {
            info!(jobs = expired.len(), "swept expired exports");
        }
        Ok(expired.len())
    }

    /// Best-effort: failures are logged, never retried.
    async fn cleanup(&self, job: &ExportJob) {
        if let Err(e) = self.jobs.delete(job.id).await {
            warn!(job = %job.id, error = %e, "export job cleanup failed");
        }
        if let Some(path) = &job.filepath {
            if let Err(e) = self.storage.remove(path).await {
                warn!(job = %job.id, path = %path, error = %e, "export file cleanup failed");
            }
        }
        info!(job = %job.id, "export expired");
    }
}
