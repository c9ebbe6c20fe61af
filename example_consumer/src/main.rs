//! Demo catalogue service: two entity types served through the generic action layer.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Needs `DATABASE_URL`; see `crudkit::Settings` for the other variables.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use crudkit::service::LocalStorage;
use crudkit::{
    apply_migrations, created, ensure_database_exists, ensure_export_table, success_one, success_page, Actions,
    AppError, Attribute, Entity, EntityRef, EventKind, Hooks, Kind, ListParams, Notifier, PgExportJobStore,
    PgRepository, Registry, Settings,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Product;

impl Entity for Product {
    const TABLE: &'static str = "products";
    const TITLE: &'static str = "Product";

    fn attributes() -> Vec<Attribute> {
        vec![
            Attribute::new("id", Kind::Int),
            Attribute::new("name", Kind::Text)
                .tag("unique;sort;filter;position:1")
                .validate("required,max=120"),
            Attribute::new("sku", Kind::Text).tag("filter").validate("required,regex=code"),
            Attribute::new("price", Kind::Float).tag("sort;precision:2").validate("min=0"),
            Attribute::new("in_stock", Kind::Bool).tag("filter"),
            Attribute::new("category", Kind::entity::<Category>()).tag("filter"),
        ]
    }
}

struct Category;

impl Entity for Category {
    const TABLE: &'static str = "categories";
    const TITLE: &'static str = "Category";

    fn attributes() -> Vec<Attribute> {
        vec![
            Attribute::new("id", Kind::Int),
            Attribute::new("title", Kind::Text).tag("unique;sort;filter").validate("required"),
            Attribute::new("products", Kind::list(Kind::entity::<Product>())).tag("hasMany;hidden:list"),
        ]
    }
}

#[derive(Deserialize)]
struct ValuesQuery {
    query: Option<String>,
    offset: Option<i64>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct DeleteBody {
    ids: Vec<Value>,
}

async fn schema(State(actions): State<Actions>, Path(model): Path<String>) -> Result<impl IntoResponse, AppError> {
    Ok(success_one(actions.schema(&model)?))
}

async fn list(
    State(actions): State<Actions>,
    Path(model): Path<String>,
    Json(params): Json<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    Ok(success_page(actions.list(&model, &params).await?))
}

async fn create(
    State(actions): State<Actions>,
    Path(model): Path<String>,
    Json(body): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(actions.create(&model, &body).await?))
}

async fn read(State(actions): State<Actions>, Path((model, id)): Path<(String, String)>) -> Result<impl IntoResponse, AppError> {
    Ok(success_one(actions.get(&model, &Value::String(id)).await?))
}

async fn update(
    State(actions): State<Actions>,
    Path((model, id)): Path<(String, String)>,
    Json(body): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(success_one(actions.update(&model, &Value::String(id), &body).await?))
}

async fn delete(State(actions): State<Actions>, Path((model, id)): Path<(String, String)>) -> Result<impl IntoResponse, AppError> {
    actions.delete(&model, &Value::String(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_list(
    State(actions): State<Actions>,
    Path(model): Path<String>,
    Json(body): Json<DeleteBody>,
) -> Result<impl IntoResponse, AppError> {
    actions.delete_list(&model, &body.ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn field_values(
    State(actions): State<Actions>,
    Path((model, field)): Path<(String, String)>,
    Query(q): Query<ValuesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let values = actions
        .field_values(&model, &field, q.query.as_deref(), q.offset, q.limit)
        .await?;
    Ok(success_one(values))
}

async fn export(
    State(actions): State<Actions>,
    Path(model): Path<String>,
    Json(params): Json<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    Ok((StatusCode::ACCEPTED, Json(actions.export(&model, &params).await?)))
}

async fn export_status(State(actions): State<Actions>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    Ok(success_one(actions.export_status(id).await?))
}

fn routes(actions: Actions) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/exports/:id", get(export_status))
        .route("/:model", post(create))
        .route("/:model/schema", get(schema))
        .route("/:model/list", post(list))
        .route("/:model/delete", post(delete_list))
        .route("/:model/export", post(export))
        .route("/:model/values/:field", get(field_values))
        .route("/:model/:id", get(read).patch(update).delete(delete))
        .with_state(actions)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    crudkit::logging::init_tracing();
    let settings = Settings::from_env()?;

    ensure_database_exists(&settings.database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await?;

    let registry = Arc::new(Registry::register(&[
        EntityRef::of::<Product>(),
        EntityRef::of::<Category>(),
    ])?);
    apply_migrations(&pool, &registry, &settings.schema).await?;
    ensure_export_table(&pool, &settings.schema).await?;

    let shutdown = CancellationToken::new();
    let hooks = Hooks::new().on("products", EventKind::AfterCreate, |event| async move {
        tracing::info!(keys = ?event.keys, "product created");
        Ok(())
    });
    let (notifier, worker) = Notifier::spawn(hooks, settings.notify_queue_size, shutdown.clone());

    let repository = Arc::new(PgRepository::new(pool.clone(), registry.clone(), settings.schema.clone()));
    let actions = Actions::builder(registry, repository)
        .notifier(notifier)
        .exports(
            Arc::new(PgExportJobStore::new(pool.clone(), &settings.schema)),
            Arc::new(LocalStorage::new(&settings.export_dir)),
            settings.export_retention,
        )
        .shutdown(shutdown.clone())
        .build()?;
    actions.sweep_exports().await?;

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("catalogue listening on http://{}", listener.local_addr()?);
    axum::serve(listener, routes(actions))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    shutdown.cancel();
    let _ = worker.await;
    Ok(())
}
