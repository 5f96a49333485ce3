//! NBI Core - notebook ingest-and-activation pipeline
//!
//! Takes a notebook handed over by an external page and:
//! - Validates the inbound message once at the boundary
//! - Pre-seeds auxiliary payloads and the bearer token
//! - Builds and persists the notebook artifact
//! - Waits for the host to register its open command
//! - Opens the document, waits for its session, runs every cell
//!
//! # Example
//!
//! ```rust,ignore
//! use nbi_core::{IngestConfig, IngestService};
//! use nbi_store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example(host: Arc<dyn nbi_core::NotebookHost>) -> Result<(), nbi_core::IngestError> {
//! let service = IngestService::new(Arc::new(MemoryStore::new()), host, IngestConfig::new());
//! service.activate()?;
//!
//! let message = serde_json::json!({
//!     "type": "load-notebook",
//!     "filename": "demo.ipynb",
//!     "notebook": [{"cell_type": "code", "source": "print(1)"}],
//! });
//! service.handle_message(&message).await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod message;
pub mod notebook;
pub mod orchestrator;
pub mod overlay;
pub mod poller;
pub mod state_machine;
pub mod types;

// Re-exports for convenience
pub use config::{ConfigError, GraceConfig, IngestConfig, PollerConfig, LOAD_NOTEBOOK_TYPE};
pub use error::{HostError, IngestError, PollError, StateMachineError, ValidationError};
pub use host::{CommandOutput, DocumentHandle, DocumentView, MessageSink, NotebookHost};
pub use logging::{init_tracing, LogFormat};
pub use message::{AuxKind, AuxPayload, InboundMessage, IngestRequest, ReadyNotification};
pub use notebook::{NotebookArtifact, NotebookDocument};
pub use orchestrator::{
    AuxOutcome, IngestOutcome, IngestService, PipelineReport, SessionReadiness, StagedNotebook,
};
pub use overlay::{NoopOverlay, OverlayController, OverlayGuard, OverlaySurface};
pub use poller::{cancellation, CancelHandle, CancelSignal, CapabilityPoller};
pub use state_machine::{PipelineState, PipelineTrace};
pub use types::{RequestId, StoreAddress};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with NBI Core
    pub use crate::{
        IngestConfig, IngestError, IngestOutcome, IngestRequest, IngestService, NotebookHost,
        OverlayController, PipelineReport,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
