//! In-process backend for tests and offline demos.
//!
//! [`FakeBackend`] answers every [`DiagramBackend`] call from memory,
//! counts calls per endpoint, and can be told to delay or fail specific
//! requests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use diagram_forge_core::wire::{GenerationRequest, InstructionsRequest, TokenCount, TokenCountRequest};
use diagram_forge_core::{Catalog, CategoryMap, CategoryOption};
use diagram_forge_ops::{BackendError, DiagramBackend, GeneratedDiagram};

/// Endpoint names used by [`FakeBackend::calls`].
pub mod endpoint {
    pub const DIAGRAM_CONFIG: &str = "diagram_config";
    pub const LLM_CONFIG: &str = "llm_config";
    pub const SOURCE_FOLDERS: &str = "source_folders";
    pub const GITIGNORE: &str = "gitignore_file";
    pub const INSTRUCTIONS: &str = "instructions";
    pub const TOKEN_COUNT: &str = "token_count";
    pub const GENERATE: &str = "generate";
}

/// SVG returned by default for generated diagrams.
pub const SAMPLE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="120" height="80" viewBox="0 0 120 80"><rect x="10" y="10" width="100" height="60" fill="#336699"/></svg>"##;

#[derive(Default)]
struct Behaviour {
    /// Per diagram option delay for instruction requests.
    instruction_delays: HashMap<String, Duration>,
    instruction_failure: Option<BackendError>,
    generation_delay: Duration,
    generation_failure: Option<BackendError>,
    generated_svg: Option<String>,
    generated_notes: Option<String>,
    gitignore_delay: Duration,
    catalog_failure: Option<BackendError>,
    token_failure: Option<BackendError>,
}

/// Scriptable [`DiagramBackend`].
pub struct FakeBackend {
    catalog: Catalog,
    gitignore: HashMap<String, String>,
    behaviour: Mutex<Behaviour>,
    calls: Mutex<HashMap<&'static str, usize>>,
    instruction_log: Mutex<Vec<InstructionsRequest>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new(sample_catalog())
    }
}

impl FakeBackend {
    pub fn new(catalog: Catalog) -> Self {
        let gitignore = catalog
            .source_folders
            .iter()
            .map(|folder| (folder.clone(), format!("{folder}/.gitignore")))
            .collect();
        Self {
            catalog,
            gitignore,
            behaviour: Mutex::new(Behaviour::default()),
            calls: Mutex::new(HashMap::new()),
            instruction_log: Mutex::new(Vec::new()),
        }
    }

    /// How often `endpoint` was called.
    pub fn calls(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(endpoint).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Instruction requests received, oldest first.
    pub fn instruction_requests(&self) -> Vec<InstructionsRequest> {
        self.instruction_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Answer instruction requests for `option` only after `delay`.
    pub fn delay_instructions(&self, option: &str, delay: Duration) {
        self.with_behaviour(|b| {
            b.instruction_delays.insert(option.to_string(), delay);
        });
    }

    /// Fail instruction requests until cleared with `None`.
    pub fn fail_instructions(&self, error: Option<BackendError>) {
        self.with_behaviour(|b| b.instruction_failure = error);
    }

    pub fn delay_generation(&self, delay: Duration) {
        self.with_behaviour(|b| b.generation_delay = delay);
    }

    pub fn fail_generation(&self, error: Option<BackendError>) {
        self.with_behaviour(|b| b.generation_failure = error);
    }

    /// Replace the SVG and notes returned by generation.
    pub fn respond_with(&self, svg: &str, notes: Option<&str>) {
        self.with_behaviour(|b| {
            b.generated_svg = Some(svg.to_string());
            b.generated_notes = notes.map(str::to_string);
        });
    }

    pub fn delay_gitignore(&self, delay: Duration) {
        self.with_behaviour(|b| b.gitignore_delay = delay);
    }

    /// Fail token counts until cleared with `None`.
    pub fn fail_token_count(&self, error: Option<BackendError>) {
        self.with_behaviour(|b| b.token_failure = error);
    }

    /// Fail the three catalog endpoints.
    pub fn fail_catalog(&self, error: Option<BackendError>) {
        self.with_behaviour(|b| b.catalog_failure = error);
    }

    /// Text the fake produces for an instructions request.
    pub fn instructions_text(request: &InstructionsRequest) -> String {
        format!(
            "Draw a {} {} diagram of {} with {}",
            request.diagram_option,
            request.diagram_category,
            request.source_folder_option,
            request.llm_model_for_instructions
        )
    }

    fn record(&self, endpoint: &'static str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(endpoint).or_insert(0) += 1;
        }
    }

    fn with_behaviour<R>(&self, f: impl FnOnce(&mut Behaviour) -> R) -> Option<R> {
        self.behaviour.lock().ok().map(|mut b| f(&mut b))
    }

    fn catalog_failure(&self) -> Result<(), BackendError> {
        match self.with_behaviour(|b| b.catalog_failure.clone()).flatten() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DiagramBackend for FakeBackend {
    async fn diagram_config(&self) -> Result<CategoryMap, BackendError> {
        self.record(endpoint::DIAGRAM_CONFIG);
        self.catalog_failure()?;
        Ok(self.catalog.diagrams.clone())
    }

    async fn llm_config(&self) -> Result<CategoryMap, BackendError> {
        self.record(endpoint::LLM_CONFIG);
        self.catalog_failure()?;
        Ok(self.catalog.llms.clone())
    }

    async fn source_folders(&self) -> Result<Vec<String>, BackendError> {
        self.record(endpoint::SOURCE_FOLDERS);
        self.catalog_failure()?;
        Ok(self.catalog.source_folders.clone())
    }

    async fn gitignore_file(&self, root_folder: &str) -> Result<Option<String>, BackendError> {
        self.record(endpoint::GITIGNORE);
        let delay = self.with_behaviour(|b| b.gitignore_delay).unwrap_or_default();
        tokio::time::sleep(delay).await;
        Ok(self.gitignore.get(root_folder).cloned())
    }

    async fn design_instructions(
        &self,
        request: &InstructionsRequest,
    ) -> Result<String, BackendError> {
        self.record(endpoint::INSTRUCTIONS);
        if let Ok(mut log) = self.instruction_log.lock() {
            log.push(request.clone());
        }

        let (delay, failure) = self
            .with_behaviour(|b| {
                (
                    b.instruction_delays
                        .get(&request.diagram_option)
                        .copied()
                        .unwrap_or_default(),
                    b.instruction_failure.clone(),
                )
            })
            .unwrap_or_default();

        tokio::time::sleep(delay).await;
        match failure {
            Some(err) => Err(err),
            None => Ok(Self::instructions_text(request)),
        }
    }

    async fn token_count(&self, request: &TokenCountRequest) -> Result<TokenCount, BackendError> {
        self.record(endpoint::TOKEN_COUNT);
        if let Some(err) = self.with_behaviour(|b| b.token_failure.clone()).flatten() {
            return Err(err);
        }
        let words = request.text.split_whitespace().count() as u64;
        Ok(TokenCount {
            token_count: words * 4 / 3,
            est_words: words,
        })
    }

    async fn generate_diagram(
        &self,
        _request: &GenerationRequest,
    ) -> Result<GeneratedDiagram, BackendError> {
        self.record(endpoint::GENERATE);
        let (delay, failure, svg, notes) = self
            .with_behaviour(|b| {
                (
                    b.generation_delay,
                    b.generation_failure.clone(),
                    b.generated_svg.clone(),
                    b.generated_notes.clone(),
                )
            })
            .unwrap_or_default();

        tokio::time::sleep(delay).await;
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(GeneratedDiagram {
            svg: svg.unwrap_or_else(|| SAMPLE_SVG.to_string()),
            notes,
        })
    }
}

/// Catalog with two diagram categories, an empty one, two vendors and two
/// folders.
pub fn sample_catalog() -> Catalog {
    let mut diagram_categories = BTreeMap::new();
    diagram_categories.insert(
        "flowchart".to_string(),
        vec![
            CategoryOption::new("basic", "Basic flow"),
            CategoryOption::new("swimlane", "Swimlanes"),
        ],
    );
    diagram_categories.insert(
        "sequence".to_string(),
        vec![CategoryOption::new("calls", "Call sequence")],
    );
    diagram_categories.insert("gantt".to_string(), vec![]);

    let mut vendors = BTreeMap::new();
    vendors.insert(
        "openai".to_string(),
        vec![
            CategoryOption::new("gpt-4", "GPT-4"),
            CategoryOption::new("gpt-4o", "GPT-4o"),
        ],
    );
    vendors.insert(
        "anthropic".to_string(),
        vec![CategoryOption::new("claude-3", "Claude 3")],
    );

    Catalog {
        diagrams: CategoryMap::from_parts(
            diagram_categories,
            vec![
                CategoryOption::new("flowchart", "Flowcharts"),
                CategoryOption::new("sequence", "Sequence diagrams"),
                CategoryOption::new("gantt", "Gantt charts"),
            ],
        ),
        llms: CategoryMap::from_parts(
            vendors,
            vec![
                CategoryOption::new("openai", "OpenAI"),
                CategoryOption::new("anthropic", "Anthropic"),
            ],
        ),
        source_folders: vec!["proj".to_string(), "other".to_string()],
    }
}
