//! Ingest orchestrator
//!
//! Drives one inbound message through the pipeline:
//!
//! ```text
//! Idle → Validating → (AuxPersist)* → Building → Persisting
//!      → AwaitingCapability → Opening → AwaitingSession → Executing
//!      → Succeeded | Failed
//! ```
//!
//! Auxiliary payload and token writes are best-effort. Everything from
//! `Building` onward is fatal on failure, and the loading overlay is held by
//! a guard so it is released on every exit path.

use crate::config::IngestConfig;
use crate::error::{HostError, IngestError};
use crate::host::{DocumentHandle, NotebookHost};
use crate::message::{AuxKind, InboundMessage, IngestRequest, ReadyNotification};
use crate::notebook::{self, NotebookArtifact};
use crate::overlay::OverlayController;
use crate::poller::{CancelSignal, CapabilityPoller};
use crate::state_machine::{PipelineState, PipelineTrace};
use crate::types::RequestId;
use nbi_store::{store_record, PersistentStore, StoreHandle};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::Instrument;

/// Result of handling one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Not a load request; nothing happened
    Ignored { message_type: Option<String> },
    /// Pipeline ran to completion
    Completed(PipelineReport),
}

/// Outcome of one auxiliary write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuxOutcome {
    /// Payload stored
    Stored { kind: AuxKind, handle: StoreHandle },
    /// Payload dropped; the pipeline continued
    Failed { kind: AuxKind, reason: String },
}

impl AuxOutcome {
    /// Check if the payload was stored
    #[inline]
    #[must_use]
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

/// How session readiness was established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionReadiness {
    /// The document's readiness signal resolved
    Ready,
    /// No signal existed; the fallback delay was used
    Unavailable,
}

/// Summary of a successful pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    /// Request identifier
    pub request_id: RequestId,
    /// Notebook path
    pub filename: String,
    /// Where the artifact was written
    pub artifact_handle: StoreHandle,
    /// Serialized size of the notebook content
    pub size: usize,
    /// Auxiliary write results, in write order
    pub aux: Vec<AuxOutcome>,
    /// Whether a bearer token was written
    pub token_stored: bool,
    /// Whether the open command returned the document directly
    pub document_returned: bool,
    /// How the session was found ready
    pub session: SessionReadiness,
    /// States visited
    pub trace: PipelineTrace,
}

/// Artifact persisted without involving the host
#[derive(Debug, Clone, PartialEq)]
pub struct StagedNotebook {
    /// Request identifier
    pub request_id: RequestId,
    /// The stored artifact
    pub artifact: NotebookArtifact,
    /// Where it was written
    pub handle: StoreHandle,
    /// Auxiliary write results
    pub aux: Vec<AuxOutcome>,
}

struct Activation {
    document_returned: bool,
    session: SessionReadiness,
}

/// The ingest-and-activation service
///
/// Owns the store, host, overlay and poller used by every pipeline. Each
/// message gets its own [`PipelineTrace`]; nothing else is per-request.
#[derive(Debug)]
pub struct IngestService {
    store: Arc<dyn PersistentStore>,
    host: Arc<dyn NotebookHost>,
    overlay: OverlayController,
    poller: CapabilityPoller,
    config: IngestConfig,
    announced: AtomicBool,
}

impl IngestService {
    /// Create service with a no-op overlay
    #[must_use]
    pub fn new(
        store: Arc<dyn PersistentStore>,
        host: Arc<dyn NotebookHost>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            host,
            overlay: OverlayController::default(),
            poller: CapabilityPoller::new(config.poller),
            config,
            announced: AtomicBool::new(false),
        }
    }

    /// With overlay controller
    #[inline]
    #[must_use]
    pub fn with_overlay(mut self, overlay: OverlayController) -> Self {
        self.overlay = overlay;
        self
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Get overlay controller
    #[inline]
    #[must_use]
    pub fn overlay(&self) -> &OverlayController {
        &self.overlay
    }

    /// Announce readiness to the opener, once
    ///
    /// Returns whether a notification was sent by this call.
    ///
    /// # Errors
    /// `HostError` if the opener rejected the message.
    pub fn activate(&self) -> Result<bool, HostError> {
        tracing::info!("notebook ingest activated");

        let Some(opener) = self.host.opener() else {
            return Ok(false);
        };
        let ready = ReadyNotification {
            message_type: self.config.ready_message_type.clone(),
            ..ReadyNotification::now()
        };
        let message = serde_json::to_value(&ready).map_err(|e| {
            HostError::OpenerUnreachable(format!("ready notification not encodable: {e}"))
        })?;

        if self.announced.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        if let Err(e) = opener.post_message(message) {
            self.announced.store(false, Ordering::SeqCst);
            return Err(e);
        }

        tracing::debug!(timestamp = ready.timestamp, "ready notification sent to opener");
        Ok(true)
    }

    /// Handle one raw inbound message
    ///
    /// # Errors
    /// `IngestError::Validation` before any side effect for malformed load
    /// requests; any other variant is a fatal pipeline failure.
    pub async fn handle_message(&self, message: &Value) -> Result<IngestOutcome, IngestError> {
        self.handle_message_with_cancel(message, CancelSignal::never())
            .await
    }

    /// Handle one raw inbound message, abandoning the capability wait on `cancel`
    pub async fn handle_message_with_cancel(
        &self,
        message: &Value,
        cancel: CancelSignal,
    ) -> Result<IngestOutcome, IngestError> {
        match InboundMessage::parse(message) {
            Ok(InboundMessage::Ignored { message_type }) => {
                tracing::trace!(?message_type, "ignoring message");
                Ok(IngestOutcome::Ignored { message_type })
            }
            Ok(InboundMessage::LoadNotebook(request)) => self
                .run(request, cancel)
                .await
                .map(IngestOutcome::Completed),
            Err(e) => {
                tracing::warn!("rejected ingest message: {}", e);
                Err(e.into())
            }
        }
    }

    /// Run the full pipeline for a validated request
    pub async fn run(
        &self,
        request: IngestRequest,
        cancel: CancelSignal,
    ) -> Result<PipelineReport, IngestError> {
        let span = tracing::info_span!(
            "ingest",
            request_id = %request.id,
            filename = %request.filename
        );
        self.run_pipeline(request, cancel).instrument(span).await
    }

    async fn run_pipeline(
        &self,
        request: IngestRequest,
        cancel: CancelSignal,
    ) -> Result<PipelineReport, IngestError> {
        tracing::info!(cells = request.cells.len(), "ingest pipeline started");

        let mut trace = PipelineTrace::new();
        trace.advance(PipelineState::Validating)?;

        let aux = self.persist_aux(&request, &mut trace).await?;
        let token_stored = self.store_token(&request);

        let overlay = self.overlay.acquire(&self.config.overlay_message);
        let result = self.activate_notebook(&request, &mut trace, cancel).await;

        let outcome = match result {
            Ok((handle, size, activation)) => {
                trace.advance(PipelineState::Succeeded)?;
                tracing::info!(handle = %handle, "ingest pipeline succeeded");
                Ok(PipelineReport {
                    request_id: request.id,
                    filename: request.filename,
                    artifact_handle: handle,
                    size,
                    aux,
                    token_stored,
                    document_returned: activation.document_returned,
                    session: activation.session,
                    trace,
                })
            }
            Err(e) => {
                let at = trace.current();
                if let Err(illegal) = trace.advance(PipelineState::Failed) {
                    tracing::error!("{}", illegal);
                }
                tracing::error!(state = ?at, "ingest pipeline failed: {}", e);
                Err(e)
            }
        };

        drop(overlay);
        outcome
    }

    /// Persist auxiliary payloads and the notebook without touching the host
    ///
    /// # Errors
    /// Only the primary notebook write is fatal.
    pub async fn stage(&self, request: IngestRequest) -> Result<StagedNotebook, IngestError> {
        let mut trace = PipelineTrace::new();
        trace.advance(PipelineState::Validating)?;

        let aux = self.persist_aux(&request, &mut trace).await?;
        let (artifact, handle) = self.build_and_persist(&request, &mut trace).await?;

        Ok(StagedNotebook {
            request_id: request.id,
            artifact,
            handle,
            aux,
        })
    }

    /// Spawn a dispatcher running one pipeline per received message
    ///
    /// The returned task finishes after the channel closes and every
    /// pipeline it started has settled.
    pub fn listen(self: Arc<Self>, mut messages: mpsc::Receiver<Value>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut pipelines = JoinSet::new();

            while let Some(message) = messages.recv().await {
                while let Some(finished) = pipelines.try_join_next() {
                    report_join(finished);
                }

                match InboundMessage::parse(&message) {
                    Ok(InboundMessage::LoadNotebook(request)) => {
                        let service = Arc::clone(&self);
                        pipelines.spawn(async move {
                            // Failures are logged inside the pipeline.
                            let _ = service.run(request, CancelSignal::never()).await;
                        });
                    }
                    Ok(InboundMessage::Ignored { message_type }) => {
                        tracing::trace!(?message_type, "ignoring message");
                    }
                    Err(e) => tracing::warn!("rejected ingest message: {}", e),
                }
            }

            while let Some(finished) = pipelines.join_next().await {
                report_join(finished);
            }
            tracing::debug!("message channel closed");
        })
    }

    async fn persist_aux(
        &self,
        request: &IngestRequest,
        trace: &mut PipelineTrace,
    ) -> Result<Vec<AuxOutcome>, IngestError> {
        let mut outcomes = Vec::new();

        for payload in request.aux_payloads() {
            trace.advance(PipelineState::AuxPersist)?;

            let stored = match payload.target() {
                Ok((address, key)) => store_record(
                    self.store.as_ref(),
                    &address.database,
                    &address.store,
                    key,
                    payload.body.clone(),
                )
                .await
                .map_err(IngestError::from),
                Err(e) => Err(IngestError::from(e)),
            };

            outcomes.push(match stored {
                Ok(handle) => {
                    tracing::info!(kind = %payload.kind, handle = %handle, "auxiliary payload stored");
                    AuxOutcome::Stored {
                        kind: payload.kind,
                        handle,
                    }
                }
                Err(e) => {
                    tracing::warn!(kind = %payload.kind, "auxiliary payload not stored: {}", e);
                    AuxOutcome::Failed {
                        kind: payload.kind,
                        reason: e.to_string(),
                    }
                }
            });
        }

        Ok(outcomes)
    }

    fn store_token(&self, request: &IngestRequest) -> bool {
        let Some(token) = request.bearer_token.as_deref() else {
            return false;
        };

        match self.host.set_local_item(&self.config.token_key, token) {
            Ok(()) => {
                tracing::debug!(key = %self.config.token_key, "bearer token stored");
                true
            }
            Err(e) => {
                tracing::warn!("bearer token not stored: {}", e);
                false
            }
        }
    }

    async fn build_and_persist(
        &self,
        request: &IngestRequest,
        trace: &mut PipelineTrace,
    ) -> Result<(NotebookArtifact, StoreHandle), IngestError> {
        trace.advance(PipelineState::Building)?;
        let artifact = notebook::build(&request.filename, request.cells.clone())?;
        let record = artifact.to_record()?;

        trace.advance(PipelineState::Persisting)?;
        let handle = store_record(
            self.store.as_ref(),
            &self.config.database_name,
            &self.config.store_name,
            &request.filename,
            record,
        )
        .await?;
        tracing::info!(size = artifact.size, handle = %handle, "notebook persisted");

        Ok((artifact, handle))
    }

    async fn activate_notebook(
        &self,
        request: &IngestRequest,
        trace: &mut PipelineTrace,
        cancel: CancelSignal,
    ) -> Result<(StoreHandle, usize, Activation), IngestError> {
        let (artifact, handle) = self.build_and_persist(request, trace).await?;

        trace.advance(PipelineState::AwaitingCapability)?;
        let open_command = self.config.open_command.as_str();
        self.poller
            .wait_for(open_command, || self.host.has_command(open_command), cancel)
            .await?;

        trace.advance(PipelineState::Opening)?;
        let opened = self
            .host
            .execute(
                open_command,
                json!({
                    "path": request.filename,
                    "factory": self.config.document_factory,
                }),
            )
            .await?;
        let document_returned = opened.document.is_some();

        // Let the host settle its UI before looking for the active document.
        tokio::task::yield_now().await;

        trace.advance(PipelineState::AwaitingSession)?;
        let document = opened.document.or_else(|| self.host.current_document());
        let session = self.await_session(document.as_ref()).await?;

        trace.advance(PipelineState::Executing)?;
        self.host
            .execute(&self.config.run_all_command, json!({}))
            .await?;

        match self.host.rendering_settled(document.as_ref()) {
            Some(settled) => settled.await,
            None => sleep(self.config.grace.render_settle()).await,
        }

        Ok((
            handle,
            artifact.size,
            Activation {
                document_returned,
                session,
            },
        ))
    }

    async fn await_session(
        &self,
        document: Option<&DocumentHandle>,
    ) -> Result<SessionReadiness, IngestError> {
        match document.and_then(|d| d.session_ready()) {
            Some(ready) => {
                ready.await?;
                tracing::debug!("session ready");
                Ok(SessionReadiness::Ready)
            }
            None => {
                let delay = self.config.grace.session_fallback();
                tracing::warn!(
                    delay_ms = delay.as_millis(),
                    has_document = document.is_some(),
                    "no session readiness signal, continuing after grace delay"
                );
                sleep(delay).await;
                Ok(SessionReadiness::Unavailable)
            }
        }
    }
}

/// Log a pipeline task that panicked or was aborted
fn report_join(finished: Result<(), JoinError>) {
    if let Err(e) = finished {
        if e.is_panic() {
            tracing::error!("ingest pipeline task panicked: {}", e);
        } else {
            tracing::error!("ingest pipeline task aborted: {}", e);
        }
    }
}
