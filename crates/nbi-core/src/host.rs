//! Host application boundary
//!
//! The notebook application is an external collaborator. The pipeline sees
//! it only through these traits: a string-keyed command registry, the
//! document it considers active, a synchronous local key-value storage and
//! the context that opened it.

use crate::error::HostError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Shared handle on an open document
pub type DocumentHandle = Arc<dyn DocumentView>;

/// An opened notebook document
pub trait DocumentView: Send + Sync + fmt::Debug {
    /// Path the document was opened from
    fn path(&self) -> &str;

    /// Future resolving when the document's kernel session is ready
    ///
    /// `None` when the document exposes no such signal.
    fn session_ready(&self) -> Option<BoxFuture<'static, Result<(), HostError>>>;
}

/// Result of executing a host command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Document the command produced, if any
    pub document: Option<DocumentHandle>,
}

impl CommandOutput {
    /// Output without a document
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Output carrying a document
    #[inline]
    #[must_use]
    pub fn with_document(document: DocumentHandle) -> Self {
        Self {
            document: Some(document),
        }
    }
}

/// Context that opened the host (the external caller's window)
pub trait MessageSink: Send + Sync + fmt::Debug {
    /// Deliver a message to the context
    fn post_message(&self, message: Value) -> Result<(), HostError>;
}

/// The embedded notebook application
#[async_trait]
pub trait NotebookHost: Send + Sync + fmt::Debug {
    /// Whether `command` is registered right now
    fn has_command(&self, command: &str) -> bool;

    /// Execute a registered command and wait for it to finish
    async fn execute(&self, command: &str, args: Value) -> Result<CommandOutput, HostError>;

    /// Document the host currently considers active
    fn current_document(&self) -> Option<DocumentHandle>;

    /// Synchronous write to the host's local key-value storage
    fn set_local_item(&self, key: &str, value: &str) -> Result<(), HostError>;

    /// The context that opened the host, if any
    fn opener(&self) -> Option<Arc<dyn MessageSink>> {
        None
    }

    /// Future resolving when output for `document` has finished rendering
    ///
    /// Hosts that cannot tell return `None` and a fixed delay is used.
    fn rendering_settled(
        &self,
        _document: Option<&DocumentHandle>,
    ) -> Option<BoxFuture<'static, ()>> {
        None
    }
}
