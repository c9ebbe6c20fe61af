//! Action layer: request-level operations over any registered model, plus their collaborators.

mod actions;
mod export;
mod media;
mod notify;
mod semantic;
mod validation;

pub use actions::{Actions, ActionsBuilder, FieldValues, ListParams, Page};
pub use export::{
    CsvExporter, ExportFile, ExportJob, ExportJobStore, ExportRunner, ExportSink, ExportStatus, Exporter, FileStorage,
    LocalStorage, EXPORT_BATCH_SIZE,
};
pub use media::MediaService;
pub use notify::{Event, EventKind, Hook, Hooks, Notifier};
pub use validation::{RuleValidator, Validator};
