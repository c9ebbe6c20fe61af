//! After-write notifications: hooks keyed by model code, run off the request path.

use crate::error::AppError;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    AfterCreate,
    AfterUpdate,
    AfterDelete,
}

#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub model: String,
    /// Primary keys affected, as JSON.
    pub keys: Vec<Value>,
    /// Projected record after create or update.
    pub record: Option<Map<String, Value>>,
}

pub type Hook = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<(), AppError>> + Send + Sync>;

/// Hook table, filled before startup and read-only afterwards.
#[derive(Clone, Default)]
pub struct Hooks {
    table: HashMap<(String, EventKind), Vec<Hook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F, Fut>(mut self, model: impl Into<String>, kind: EventKind, handler: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let hook: Hook = Arc::new(move |event| -> BoxFuture<'static, Result<(), AppError>> { Box::pin(handler(event)) });
        self.table.entry((model.into(), kind)).or_default().push(hook);
        self
    }

    fn get(&self, model: &str, kind: EventKind) -> &[Hook] {
        self.table
            .get(&(model.to_string(), kind))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Handle for queueing events; a single worker drains the queue.
#[derive(Clone)]
pub struct Notifier {
    hooks: Arc<Hooks>,
    tx: mpsc::Sender<Event>,
}

impl Notifier {
    /// Start the worker. It stops when `shutdown` fires or every handle is dropped.
    pub fn spawn(hooks: Hooks, capacity: usize, shutdown: CancellationToken) -> (Notifier, JoinHandle<()>) {
        let hooks = Arc::new(hooks);
        let (tx, mut rx) = mpsc::channel::<Event>(capacity.max(1));
        let worker_hooks = hooks.clone();
        let handle = tokio::spawn(async move {
            info!(capacity, "notification worker started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => dispatch(&worker_hooks, event).await,
                        None => break,
                    },
                }
            }
            info!("notification worker stopped");
        });
        (Notifier { hooks, tx }, handle)
    }

    /// Queue an event without waiting. Dropped events are logged only.
    pub fn notify(&self, event: Event) {
        if self.hooks.get(&event.model, event.kind).is_empty() {
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(model = %event.model, kind = ?event.kind, "notification queue full, event dropped");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(model = %event.model, kind = ?event.kind, "notification worker stopped, event dropped");
            }
        }
    }
}

async fn dispatch(hooks: &Hooks, event: Event) {
    for hook in hooks.get(&event.model, event.kind) {
        let fut = hook(event.clone());
        // own task, so a panicking hook cannot take the worker down
        match tokio::spawn(fut).await {
            Ok(Ok(())) => debug!(model = %event.model, kind = ?event.kind, "hook done"),
            Ok(Err(e)) => warn!(model = %event.model, kind = ?event.kind, error = %e, "hook failed"),
            Err(e) => warn!(model = %event.model, kind = ?event.kind, error = %e, "hook panicked"),
        }
    }
}
