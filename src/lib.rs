//! crudkit: metadata-driven entity registry and generic CRUD engine over PostgreSQL.

pub mod case;
pub mod error;
pub mod logging;
pub mod migration;
pub mod repository;
pub mod response;
pub mod schema;
pub mod service;
pub mod settings;
pub mod sql;
pub mod store;
pub mod value;
pub mod view;

#[cfg(test)]
mod testing;

pub use error::{AppError, ConfigError, ErrorKind};
pub use migration::apply_migrations;
pub use repository::{Filter, OrderBy, Pagination, Repository};
pub use response::{created, success_one, success_page};
pub use schema::{Attribute, Entity, EntityRef, Kind, Registry};
pub use service::{Actions, ActionsBuilder, EventKind, Hooks, ListParams, MediaService, Notifier, Page};
pub use settings::Settings;
pub use sql::PgRepository;
pub use store::{ensure_database_exists, ensure_export_table, PgExportJobStore};
pub use value::{Element, FieldValue};
