//! The orchestration actor.
//!
//! One task owns the [`Configuration`] and every pipeline stage. Callers
//! talk to it through an [`EngineHandle`] (commands in, [`EngineView`]s
//! out), so all mutations are serialized without locks.

use std::sync::Arc;
use std::time::Duration;

use diagram_forge_core::wire::TokenCount;
use diagram_forge_core::{
    CacheKey, Catalog, Configuration, FieldEdit, FieldName, SelectionAxis, Snapshot,
    ValidationIssue,
};
use diagram_forge_ops::{BackendError, Config, DiagramBackend, StateStore};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{Completion, RequestCache, RequestStatus};
use crate::debounce::DebouncedSnapshotter;
use crate::error::{EngineError, EngineResult};
use crate::export::{ExportFormat, ExportStage};
use crate::generation::{DiagramGenerationStage, GenerationState, RenderedDiagram};
use crate::instructions::DesignInstructionPipeline;
use crate::tokens::{TokenCountEstimator, TokenEvent};

/// Timing and export knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Quiet period before a snapshot is persisted and sent for instructions.
    pub snapshot_debounce: Duration,
    /// Quiet period before instruction text is sent for token counting.
    pub token_debounce: Duration,
    pub raster_scale: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            snapshot_debounce: Duration::from_millis(500),
            token_debounce: Duration::from_millis(50),
            raster_scale: 1.0,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            snapshot_debounce: config.snapshot_debounce(),
            token_debounce: config.token_debounce(),
            raster_scale: config.raster_scale,
        }
    }
}

/// Everything a presentation layer needs, published after each event.
#[derive(Debug, Clone)]
pub struct EngineView {
    /// `false` until the catalog was fetched and the form restored.
    pub ready: bool,
    pub configuration: Configuration,
    pub catalog: Arc<Catalog>,
    /// Catalog endpoints that failed during startup.
    pub catalog_errors: Vec<BackendError>,
    /// Missing fields that would block generation.
    pub validation: Vec<ValidationIssue>,
    pub instructions: RequestStatus<String>,
    pub token_count: RequestStatus<TokenCount>,
    pub gitignore: RequestStatus<Option<String>>,
    pub generation: GenerationState,
    /// Revision of the last settled snapshot.
    pub settled_revision: u64,
    /// An edit is waiting for the snapshot debounce to elapse.
    pub pending_edits: bool,
    pub storage_location: String,
    pub storage_degraded: bool,
}

impl EngineView {
    fn initial(storage_location: String) -> Self {
        Self {
            ready: false,
            configuration: Configuration::default(),
            catalog: Arc::new(Catalog::default()),
            catalog_errors: Vec::new(),
            validation: Vec::new(),
            instructions: RequestStatus::Idle,
            token_count: RequestStatus::Idle,
            gitignore: RequestStatus::Idle,
            generation: GenerationState::Idle,
            settled_revision: 0,
            pending_edits: false,
            storage_location,
            storage_degraded: false,
        }
    }

    /// The generated diagram, while generation is in `success`.
    pub fn diagram(&self) -> Option<&Arc<RenderedDiagram>> {
        self.generation.diagram()
    }

    pub fn tokens(&self) -> Option<TokenCount> {
        self.token_count.payload().copied()
    }

    /// Nothing is debouncing or loading on the instructions path, so the
    /// instructions status is final until the next edit.
    pub fn instructions_settled(&self) -> bool {
        self.ready
            && !self.pending_edits
            && !self.gitignore.is_loading()
            && !self.instructions.is_loading()
    }
}

#[derive(Debug)]
enum Command {
    Edit(FieldEdit),
    SelectCategory {
        axis: SelectionAxis,
        category: String,
    },
    SelectSourceFolder(String),
    Generate(oneshot::Sender<EngineResult<bool>>),
    CancelGeneration,
    Retry,
    Reset,
    Export {
        format: ExportFormat,
        reply: oneshot::Sender<EngineResult<Vec<u8>>>,
    },
    Shutdown,
}

enum Event {
    Command(Command),
    Settled(Snapshot),
    Instructions(Completion<String>),
    Tokens(TokenEvent),
    Gitignore(Completion<Option<String>>),
    Generated,
    Closed,
}

/// Cloneable front door to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<EngineView>,
}

impl EngineHandle {
    fn send(&self, command: Command) -> EngineResult<()> {
        self.commands.send(command).map_err(|_| EngineError::Closed)
    }

    /// Apply a user edit. Category and vendor edits cascade to their
    /// dependent field.
    pub fn edit(&self, edit: FieldEdit) -> EngineResult<()> {
        self.send(Command::Edit(edit))
    }

    /// Parse and apply a textual value.
    pub fn set(&self, field: FieldName, raw: &str) -> EngineResult<()> {
        self.edit(FieldEdit::parse(field, raw)?)
    }

    /// Parse and apply a `field=value` assignment.
    pub fn assign(&self, assignment: &str) -> EngineResult<()> {
        self.edit(FieldEdit::parse_assignment(assignment)?)
    }

    /// Change a parent selection and reset its dependent option. Choosing
    /// the current category again leaves the option alone.
    pub fn select_category(&self, axis: SelectionAxis, category: impl Into<String>) -> EngineResult<()> {
        self.send(Command::SelectCategory {
            axis,
            category: category.into(),
        })
    }

    /// Change the project folder and look up its ignore file.
    pub fn select_source_folder(&self, folder: impl Into<String>) -> EngineResult<()> {
        self.send(Command::SelectSourceFolder(folder.into()))
    }

    /// Trigger generation. `Ok(false)` means one was already running.
    pub async fn generate(&self) -> EngineResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Generate(reply))?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    pub fn cancel_generation(&self) -> EngineResult<()> {
        self.send(Command::CancelGeneration)
    }

    /// Re-run failed instruction, token and ignore-file lookups.
    pub fn retry(&self) -> EngineResult<()> {
        self.send(Command::Retry)
    }

    /// Back to defaults, forgetting persisted values and cached results.
    pub fn reset(&self) -> EngineResult<()> {
        self.send(Command::Reset)
    }

    /// Render the current diagram.
    pub async fn export(&self, format: ExportFormat) -> EngineResult<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Export { format, reply })?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    /// Latest published view.
    pub fn view(&self) -> EngineView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineView> {
        self.view.clone()
    }

    /// Wait until a published view satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&EngineView) -> bool,
    ) -> EngineResult<EngineView> {
        let mut rx = self.view.clone();
        let view = rx.wait_for(predicate).await.map_err(|_| EngineError::Closed)?;
        Ok(view.clone())
    }

    /// Stop the engine after persisting any unsettled edit.
    pub fn shutdown(&self) -> EngineResult<()> {
        self.send(Command::Shutdown)
    }
}

/// The actor state. Created and driven by [`Engine::spawn`].
pub struct Engine {
    ready: bool,
    config: Configuration,
    catalog: Arc<Catalog>,
    catalog_errors: Vec<BackendError>,
    last_snapshot: Option<Snapshot>,
    store: StateStore,
    backend: Arc<dyn DiagramBackend>,
    snapshotter: DebouncedSnapshotter,
    instructions: DesignInstructionPipeline,
    tokens: TokenCountEstimator,
    gitignore: RequestCache<Option<String>>,
    generation: DiagramGenerationStage,
    exporter: ExportStage,
    commands: mpsc::UnboundedReceiver<Command>,
    view: watch::Sender<EngineView>,
}

impl Engine {
    /// Start the engine task. It bootstraps the catalog and restores the
    /// form before processing commands.
    pub fn spawn(
        settings: EngineSettings,
        store: StateStore,
        backend: Arc<dyn DiagramBackend>,
    ) -> (EngineHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(EngineView::initial(store.location()));

        let engine = Engine {
            ready: false,
            config: Configuration::default(),
            catalog: Arc::new(Catalog::default()),
            catalog_errors: Vec::new(),
            last_snapshot: None,
            store,
            tokens: TokenCountEstimator::new(settings.token_debounce, Arc::clone(&backend)),
            backend,
            snapshotter: DebouncedSnapshotter::new(settings.snapshot_debounce),
            instructions: DesignInstructionPipeline::new(),
            gitignore: RequestCache::new("gitignore"),
            generation: DiagramGenerationStage::new(),
            exporter: ExportStage::new(settings.raster_scale),
            commands: commands_rx,
            view: view_tx,
        };

        let task = tokio::spawn(engine.run());
        let handle = EngineHandle {
            commands: commands_tx,
            view: view_rx,
        };
        (handle, task)
    }

    async fn run(mut self) {
        self.bootstrap().await;

        loop {
            let event = tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => Event::Closed,
                },
                snapshot = self.snapshotter.settled() => Event::Settled(snapshot),
                completion = self.instructions.next_completion() => Event::Instructions(completion),
                completion = self.gitignore.next_completion() => Event::Gitignore(completion),
                event = self.tokens.next_event() => Event::Tokens(event),
                _ = self.generation.next_completion() => Event::Generated,
            };

            match event {
                Event::Command(Command::Shutdown) | Event::Closed => break,
                Event::Command(command) => self.handle_command(command),
                Event::Settled(snapshot) => self.on_settled(snapshot),
                Event::Instructions(completion) => {
                    if let Ok(text) = &completion.result {
                        self.write_back(&completion.key, text);
                    }
                }
                Event::Gitignore(completion) => {
                    if let Ok(path) = completion.result {
                        self.apply_gitignore(&completion.key, path);
                    }
                }
                Event::Tokens(TokenEvent::Settled(pending)) => {
                    debug!(status = pending.status.label(), "Token text settled");
                }
                Event::Tokens(TokenEvent::Completed(completion)) => {
                    if let Ok(count) = completion.result {
                        debug!(tokens = count.token_count, words = count.est_words, "Token count updated");
                    }
                }
                Event::Generated => {}
            }
            self.publish();
        }

        if let Some(snapshot) = self.snapshotter.flush() {
            self.store.save_snapshot(&snapshot);
        }
        self.publish();
        info!("Engine stopped");
    }

    async fn bootstrap(&mut self) {
        let (diagrams, llms, folders) = tokio::join!(
            self.backend.diagram_config(),
            self.backend.llm_config(),
            self.backend.source_folders(),
        );

        let mut catalog = Catalog::default();
        match diagrams {
            Ok(map) => catalog.diagrams = map,
            Err(e) => self.catalog_failed(e),
        }
        match llms {
            Ok(map) => catalog.llms = map,
            Err(e) => self.catalog_failed(e),
        }
        match folders {
            Ok(list) => catalog.source_folders = list,
            Err(e) => self.catalog_failed(e),
        }
        self.catalog = Arc::new(catalog);

        let mut config = self.store.load();
        self.catalog.apply_defaults(&mut config);
        self.config = config;
        self.instructions.observe(&self.config);
        self.snapshotter.push(&self.config);

        self.ready = true;
        info!(
            diagram_categories = self.catalog.diagrams.category_ids().len(),
            vendors = self.catalog.llms.category_ids().len(),
            folders = self.catalog.source_folders.len(),
            "Engine ready"
        );
        self.publish();
    }

    fn catalog_failed(&mut self, error: BackendError) {
        warn!(error = %error, "Catalog endpoint failed, continuing without it");
        self.catalog_errors.push(error);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Edit(edit) => self.apply_edit(edit),
            Command::SelectCategory { axis, category } => self.select_category(axis, &category),
            Command::SelectSourceFolder(folder) => self.select_source_folder(folder),
            Command::Generate(reply) => {
                let result =
                    self.generation
                        .trigger(&self.config, &self.catalog, Arc::clone(&self.backend));
                let _ = reply.send(result);
            }
            Command::CancelGeneration => {
                self.generation.cancel();
            }
            Command::Retry => self.retry(),
            Command::Reset => self.reset(),
            Command::Export { format, reply } => {
                let result = self.exporter.export(self.generation.state(), format);
                let _ = reply.send(result);
            }
            Command::Shutdown => {}
        }
    }

    fn apply_edit(&mut self, edit: FieldEdit) {
        match edit {
            FieldEdit::DiagramCategory(category) => {
                self.select_category(SelectionAxis::Diagram, &category)
            }
            FieldEdit::LlmVendor(vendor) => self.select_category(SelectionAxis::Llm, &vendor),
            edit => {
                let field = edit.field();
                if self.config.apply(edit) {
                    self.edited(field);
                }
            }
        }
    }

    fn select_category(&mut self, axis: SelectionAxis, category: &str) {
        if self.config.selection(axis).0 == category {
            debug!(field = %axis.parent_field(), category, "Category unchanged, keeping option");
            return;
        }
        let selection = self.catalog.map(axis).on_category_change(category);
        if selection.apply_to(&mut self.config, axis) {
            self.edited(axis.parent_field());
        }
    }

    fn select_source_folder(&mut self, folder: String) {
        self.config.source_folder = folder.clone();
        self.config.gitignore_path.clear();
        self.edited(FieldName::SourceFolder);
        self.lookup_gitignore(folder);
    }

    /// Propagate a user edit of `field` to the debouncers.
    fn edited(&mut self, field: FieldName) {
        self.snapshotter.push(&self.config);
        self.instructions.observe(&self.config);
        if matches!(field, FieldName::DesignInstructions | FieldName::LlmVendor) {
            self.tokens
                .schedule(&self.config.design_instructions, &self.config.llm_vendor);
        }
    }

    fn lookup_gitignore(&mut self, folder: String) {
        let key = CacheKey::of(&folder);
        let required = !folder.is_empty();
        let backend = Arc::clone(&self.backend);

        let pending = self.gitignore.get(key, required, move || async move {
            backend.gitignore_file(&folder).await
        });
        if let RequestStatus::Success(path) = pending.status {
            self.apply_gitignore(&pending.key, path);
        }
    }

    /// Fill in the detected ignore file if it still belongs to the selected
    /// folder and the user has not set one meanwhile.
    fn apply_gitignore(&mut self, key: &CacheKey, path: Option<String>) {
        if CacheKey::of(&self.config.source_folder) != *key {
            debug!(key = %key, "Ignore file belongs to a previous folder");
            return;
        }
        let Some(path) = path else {
            debug!(folder = %self.config.source_folder, "No ignore file found");
            return;
        };
        if !self.config.gitignore_path.is_empty() {
            return;
        }
        info!(path = %path, "Detected ignore file");
        self.config.gitignore_path = path;
        self.edited(FieldName::GitignorePath);
    }

    fn on_settled(&mut self, snapshot: Snapshot) {
        self.store.save_snapshot(&snapshot);
        let pending = self
            .instructions
            .on_snapshot(&snapshot, Arc::clone(&self.backend));
        if let RequestStatus::Success(text) = &pending.status {
            self.write_back(&pending.key, text);
        }
        self.last_snapshot = Some(snapshot);
    }

    /// Controlled write of generated instructions. Not a user edit: nothing
    /// is persisted, but the token count follows the new text.
    fn write_back(&mut self, key: &CacheKey, text: &str) {
        if DesignInstructionPipeline::key_for(&self.config) != *key {
            debug!(key = %key, "Instructions belong to an outdated configuration");
            return;
        }
        if self.instructions.write_back(key, text, &mut self.config) {
            info!(chars = text.len(), "Applied design instructions");
            self.tokens
                .schedule(&self.config.design_instructions, &self.config.llm_vendor);
        }
    }

    fn retry(&mut self) {
        let cleared = self.instructions.invalidate_errors() + self.gitignore.invalidate_errors();
        debug!(cleared, "Retrying failed requests");

        if !self.snapshotter.is_armed() {
            if let Some(snapshot) = self.last_snapshot.clone() {
                self.on_settled(snapshot);
            }
        }
        if self.config.gitignore_path.is_empty() && !self.config.source_folder.is_empty() {
            self.lookup_gitignore(self.config.source_folder.clone());
        }
        self.tokens.retry();
    }

    fn reset(&mut self) {
        self.snapshotter.cancel();
        self.instructions.reset();
        self.tokens.reset();
        self.gitignore.clear();
        self.generation.reset();
        self.store.clear();
        self.last_snapshot = None;

        let mut config = Configuration::default();
        self.catalog.apply_defaults(&mut config);
        self.config = config;
        self.instructions.observe(&self.config);
        info!("Engine reset to defaults");
    }

    fn publish(&self) {
        let view = EngineView {
            ready: self.ready,
            configuration: self.config.clone(),
            catalog: Arc::clone(&self.catalog),
            catalog_errors: self.catalog_errors.clone(),
            validation: self.config.validate_with(&self.catalog),
            instructions: self.instructions.status(),
            token_count: self.tokens.status(),
            gitignore: self.gitignore.status(),
            generation: self.generation.state().clone(),
            settled_revision: self.snapshotter.revision(),
            pending_edits: self.snapshotter.is_armed(),
            storage_location: self.store.location(),
            storage_degraded: self.store.is_degraded(),
        };
        self.view.send_replace(view);
    }
}
