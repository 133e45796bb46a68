//! Explicitly triggered diagram generation.
//!
//! ```text
//! idle ──trigger──▶ loading ──ok──▶ success
//!   ▲                  │ └──err──▶ error
//!   └────cancel────────┘
//! ```
//!
//! `success` and `error` accept a new trigger. Triggering while `loading`
//! does nothing.

use std::sync::Arc;

use diagram_forge_core::wire::GenerationRequest;
use diagram_forge_core::{svg, Catalog, Configuration, SvgGeometry};
use diagram_forge_ops::{BackendError, DiagramBackend, GeneratedDiagram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineResult;

/// A successfully generated diagram with its resolved size.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDiagram {
    pub svg: String,
    pub notes: Option<String>,
    pub geometry: SvgGeometry,
}

impl From<GeneratedDiagram> for RenderedDiagram {
    fn from(diagram: GeneratedDiagram) -> Self {
        let geometry = svg::extract(&diagram.svg);
        Self {
            svg: diagram.svg,
            notes: diagram.notes,
            geometry,
        }
    }
}

/// Where generation stands.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum GenerationState {
    #[default]
    Idle,
    Loading,
    Success(Arc<RenderedDiagram>),
    Error(BackendError),
}

impl GenerationState {
    pub fn label(&self) -> &'static str {
        match self {
            GenerationState::Idle => "idle",
            GenerationState::Loading => "loading",
            GenerationState::Success(_) => "success",
            GenerationState::Error(_) => "error",
        }
    }

    pub fn diagram(&self) -> Option<&Arc<RenderedDiagram>> {
        match self {
            GenerationState::Success(diagram) => Some(diagram),
            _ => None,
        }
    }
}

struct Finished {
    ticket: u64,
    result: Result<GeneratedDiagram, BackendError>,
}

/// The generation state machine.
pub struct DiagramGenerationStage {
    state: GenerationState,
    ticket: u64,
    cancel: Option<CancellationToken>,
    tx: mpsc::UnboundedSender<Finished>,
    rx: mpsc::UnboundedReceiver<Finished>,
}

impl Default for DiagramGenerationStage {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagramGenerationStage {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: GenerationState::Idle,
            ticket: 0,
            cancel: None,
            tx,
            rx,
        }
    }

    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    /// The last generated diagram, only while in `success`.
    pub fn diagram(&self) -> Option<&Arc<RenderedDiagram>> {
        self.state.diagram()
    }

    /// Start generating from `config`.
    ///
    /// Returns `Ok(false)` without doing anything while a request is in
    /// flight. Fails with a validation error, leaving the state untouched,
    /// if required fields are missing.
    pub fn trigger(
        &mut self,
        config: &Configuration,
        catalog: &Catalog,
        backend: Arc<dyn DiagramBackend>,
    ) -> EngineResult<bool> {
        if matches!(self.state, GenerationState::Loading) {
            debug!("Generation already in flight, ignoring trigger");
            return Ok(false);
        }
        config.ensure_valid(catalog)?;

        self.ticket += 1;
        let ticket = self.ticket;
        let token = CancellationToken::new();
        let child = token.clone();
        let tx = self.tx.clone();
        let request = GenerationRequest::from(config);

        info!(
            ticket,
            category = %config.diagram_category,
            option = %config.diagram_option,
            "Generating diagram"
        );
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = child.cancelled() => Err(BackendError::cancelled("generate")),
                result = backend.generate_diagram(&request) => result,
            };
            let _ = tx.send(Finished { ticket, result });
        });

        self.cancel = Some(token);
        self.state = GenerationState::Loading;
        Ok(true)
    }

    /// Abort an in-flight request and return to `idle`.
    ///
    /// Returns `true` if something was cancelled.
    pub fn cancel(&mut self) -> bool {
        if !matches!(self.state, GenerationState::Loading) {
            return false;
        }
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        // Bump the ticket so a response already on its way is ignored.
        self.ticket += 1;
        self.state = GenerationState::Idle;
        info!("Generation cancelled");
        true
    }

    /// Cancel anything in flight and forget the last diagram.
    pub fn reset(&mut self) {
        self.cancel();
        self.state = GenerationState::Idle;
    }

    /// Wait for the in-flight request to finish and apply its result.
    ///
    /// Responses from cancelled or superseded requests are dropped.
    pub async fn next_completion(&mut self) -> &GenerationState {
        loop {
            let Some(finished) = self.rx.recv().await else {
                std::future::pending::<()>().await;
                continue;
            };
            if finished.ticket != self.ticket || !matches!(self.state, GenerationState::Loading) {
                debug!(ticket = finished.ticket, "Discarding stale generation response");
                continue;
            }

            self.cancel = None;
            self.state = match finished.result {
                Ok(diagram) => {
                    let diagram = RenderedDiagram::from(diagram);
                    info!(
                        width = diagram.geometry.width,
                        height = diagram.geometry.height,
                        notes = diagram.notes.is_some(),
                        "Diagram generated"
                    );
                    GenerationState::Success(Arc::new(diagram))
                }
                Err(err) => {
                    warn!(error = %err, "Diagram generation failed");
                    GenerationState::Error(err)
                }
            };
            return &self.state;
        }
    }
}
