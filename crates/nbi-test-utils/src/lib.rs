//! Testing utilities for NBI workspace
//!
//! Shared test doubles, fixtures, and setup helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use nbi_core::{
    CommandOutput, DocumentHandle, DocumentView, HostError, IngestConfig, IngestService,
    MessageSink, NotebookHost, OverlayController, OverlaySurface,
};
use nbi_store::{DatabaseSchema, MemoryStore, PersistentStore, StoreError, StoreHandle};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// When the host registers its commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Already registered
    Immediate,
    /// Registered after this many failed checks
    AfterChecks(usize),
    /// Never registered
    Never,
}

/// What the opened document offers for session readiness
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionBehavior {
    /// Readiness future resolves
    Ready,
    /// Readiness future rejects
    Rejects(String),
    /// No readiness future at all
    Missing,
}

/// How the opened document is handed back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentDelivery {
    /// Returned by the open command
    Returned,
    /// Only reachable as the current document
    ActiveOnly,
    /// Not reachable at all
    Lost,
}

/// One recorded command execution
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub command: String,
    pub args: Value,
}

#[derive(Debug)]
pub struct ScriptedDocument {
    path: String,
    session: SessionBehavior,
}

impl DocumentView for ScriptedDocument {
    fn path(&self) -> &str {
        &self.path
    }

    fn session_ready(&self) -> Option<BoxFuture<'static, Result<(), HostError>>> {
        match &self.session {
            SessionBehavior::Ready => Some(futures::future::ready(Ok(())).boxed()),
            SessionBehavior::Rejects(message) => {
                let message = message.clone();
                Some(async move { Err(HostError::SessionFailed(message)) }.boxed())
            }
            SessionBehavior::Missing => None,
        }
    }
}

/// Opener that records posted messages
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<Value>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<Value> {
        self.messages.lock().clone()
    }
}

impl MessageSink for RecordingSink {
    fn post_message(&self, message: Value) -> Result<(), HostError> {
        self.messages.lock().push(message);
        Ok(())
    }
}

/// Host whose behaviour is fixed up front
#[derive(Debug)]
pub struct ScriptedHost {
    open_command: String,
    registration: Registration,
    session: SessionBehavior,
    delivery: DocumentDelivery,
    failing_command: Option<String>,
    panicking_path: Option<String>,
    reject_local_storage: bool,
    settle_signal: bool,
    opener: Option<Arc<RecordingSink>>,
    checks: Mutex<usize>,
    invocations: Mutex<Vec<Invocation>>,
    local_storage: Mutex<HashMap<String, String>>,
    active: Mutex<Option<DocumentHandle>>,
}

impl ScriptedHost {
    /// Host with commands registered and a ready session
    #[must_use]
    pub fn new() -> Self {
        Self {
            open_command: IngestConfig::default().open_command,
            registration: Registration::Immediate,
            session: SessionBehavior::Ready,
            delivery: DocumentDelivery::Returned,
            failing_command: None,
            panicking_path: None,
            reject_local_storage: false,
            settle_signal: false,
            opener: None,
            checks: Mutex::new(0),
            invocations: Mutex::new(Vec::new()),
            local_storage: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_registration(mut self, registration: Registration) -> Self {
        self.registration = registration;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: SessionBehavior) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub fn with_delivery(mut self, delivery: DocumentDelivery) -> Self {
        self.delivery = delivery;
        self
    }

    #[must_use]
    pub fn with_failing_command(mut self, command: impl Into<String>) -> Self {
        self.failing_command = Some(command.into());
        self
    }

    /// Panic inside `execute` when asked to open `path`
    #[must_use]
    pub fn with_panicking_path(mut self, path: impl Into<String>) -> Self {
        self.panicking_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_rejecting_local_storage(mut self) -> Self {
        self.reject_local_storage = true;
        self
    }

    #[must_use]
    pub fn with_settle_signal(mut self) -> Self {
        self.settle_signal = true;
        self
    }

    #[must_use]
    pub fn with_opener(mut self) -> Self {
        self.opener = Some(Arc::new(RecordingSink::default()));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    pub fn invocations_of(&self, command: &str) -> usize {
        self.invocations
            .lock()
            .iter()
            .filter(|i| i.command == command)
            .count()
    }

    pub fn local_item(&self, key: &str) -> Option<String> {
        self.local_storage.lock().get(key).cloned()
    }

    pub fn capability_checks(&self) -> usize {
        *self.checks.lock()
    }

    pub fn opener_messages(&self) -> Vec<Value> {
        self.opener
            .as_ref()
            .map(|sink| sink.messages())
            .unwrap_or_default()
    }
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotebookHost for ScriptedHost {
    fn has_command(&self, _command: &str) -> bool {
        let mut checks = self.checks.lock();
        *checks += 1;
        match self.registration {
            Registration::Immediate => true,
            Registration::AfterChecks(n) => *checks > n,
            Registration::Never => false,
        }
    }

    async fn execute(&self, command: &str, args: Value) -> Result<CommandOutput, HostError> {
        self.invocations.lock().push(Invocation {
            command: command.to_string(),
            args: args.clone(),
        });

        if self.failing_command.as_deref() == Some(command) {
            return Err(HostError::command_failed(command, "scripted failure"));
        }
        if command != self.open_command {
            return Ok(CommandOutput::empty());
        }

        let path = args
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if self.panicking_path.as_deref() == Some(path.as_str()) {
            panic!("scripted panic opening {path}");
        }
        let document: DocumentHandle = Arc::new(ScriptedDocument {
            path,
            session: self.session.clone(),
        });

        match self.delivery {
            DocumentDelivery::Returned => {
                *self.active.lock() = Some(Arc::clone(&document));
                Ok(CommandOutput::with_document(document))
            }
            DocumentDelivery::ActiveOnly => {
                *self.active.lock() = Some(document);
                Ok(CommandOutput::empty())
            }
            DocumentDelivery::Lost => Ok(CommandOutput::empty()),
        }
    }

    fn current_document(&self) -> Option<DocumentHandle> {
        self.active.lock().clone()
    }

    fn set_local_item(&self, key: &str, value: &str) -> Result<(), HostError> {
        if self.reject_local_storage {
            return Err(HostError::LocalStorage {
                key: key.to_string(),
                message: "quota exceeded".to_string(),
            });
        }
        self.local_storage
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn opener(&self) -> Option<Arc<dyn MessageSink>> {
        self.opener
            .as_ref()
            .map(|sink| Arc::clone(sink) as Arc<dyn MessageSink>)
    }

    fn rendering_settled(&self, _document: Option<&DocumentHandle>) -> Option<BoxFuture<'static, ()>> {
        self.settle_signal
            .then(|| futures::future::ready(()).boxed())
    }
}

/// Overlay surface that records what it was asked to do
#[derive(Debug, Default)]
pub struct RecordingOverlay {
    shows: Mutex<Vec<String>>,
    hides: Mutex<usize>,
}

impl RecordingOverlay {
    pub fn show_count(&self) -> usize {
        self.shows.lock().len()
    }

    pub fn hide_count(&self) -> usize {
        *self.hides.lock()
    }

    pub fn is_visible(&self) -> bool {
        self.show_count() > self.hide_count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.shows.lock().clone()
    }
}

impl OverlaySurface for RecordingOverlay {
    fn show(&self, message: &str) {
        self.shows.lock().push(message.to_string());
    }

    fn hide(&self) {
        *self.hides.lock() += 1;
    }
}

/// Memory store whose writes to chosen databases fail
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing: HashSet<String>,
}

impl FailingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failing: HashSet::new(),
        }
    }

    #[must_use]
    pub fn failing_database(mut self, database: impl Into<String>) -> Self {
        self.failing.insert(database.into());
        self
    }
}

#[async_trait]
impl PersistentStore for FailingStore {
    async fn open(&self, database: &str, store: &str) -> Result<StoreHandle, StoreError> {
        self.inner.open(database, store).await
    }

    async fn put(&self, handle: &StoreHandle, key: &str, value: Value) -> Result<(), StoreError> {
        if self.failing.contains(&handle.database) {
            return Err(StoreError::Write(format!(
                "injected failure writing '{key}' to {handle}"
            )));
        }
        self.inner.put(handle, key, value).await
    }

    async fn get(&self, handle: &StoreHandle, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(handle, key).await
    }

    async fn keys(&self, handle: &StoreHandle) -> Result<Vec<String>, StoreError> {
        self.inner.keys(handle).await
    }

    async fn schema(&self, database: &str) -> Result<Option<DatabaseSchema>, StoreError> {
        self.inner.schema(database).await
    }
}

/// Everything a pipeline test needs to observe
pub struct TestBed {
    pub service: Arc<IngestService>,
    pub host: Arc<ScriptedHost>,
    pub store: MemoryStore,
    pub overlay: Arc<RecordingOverlay>,
}

impl TestBed {
    /// Stored notebook record under `filename`, if any
    pub async fn stored_notebook(&self, filename: &str) -> Option<Value> {
        let config = self.service.config();
        let schema = self.store.schema(&config.database_name).await.ok()??;
        let handle = StoreHandle {
            database: config.database_name.clone(),
            store: config.store_name.clone(),
            version: schema.version,
        };
        self.store.get(&handle, filename).await.ok()?
    }
}

/// Service over a fresh memory store, `host`, and a recording overlay
pub fn setup_test_bed(host: ScriptedHost) -> TestBed {
    let store = MemoryStore::new();
    setup_test_bed_with_store(host, store.clone(), Arc::new(store))
}

/// Like [`setup_test_bed`] with a custom store in front of `memory`
pub fn setup_test_bed_with_store(
    host: ScriptedHost,
    memory: MemoryStore,
    store: Arc<dyn PersistentStore>,
) -> TestBed {
    let host = Arc::new(host);
    let overlay = Arc::new(RecordingOverlay::default());
    let service = IngestService::new(store, host.clone(), IngestConfig::default())
        .with_overlay(OverlayController::new(overlay.clone()));

    TestBed {
        service: Arc::new(service),
        host,
        store: memory,
        overlay,
    }
}

pub fn demo_cell() -> Value {
    json!({"cell_type": "code", "source": "print(1)"})
}

pub fn load_message(filename: &str, cells: Value) -> Value {
    json!({
        "type": "load-notebook",
        "filename": filename,
        "notebook": cells,
    })
}

pub fn demo_message() -> Value {
    load_message("demo.ipynb", json!([demo_cell()]))
}
