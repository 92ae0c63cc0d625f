//! Scripted in-memory doubles for the provider and the collaborators.
//!
//! [`ScriptedProvider`] decides each job's fate from a [`JobScript`] looked
//! up by prompt text. [`MockCollaborators`] produces deterministic prompts
//! named by [`prompt_text`], so tests can target one scene of one variant.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use adclone_core::collaborators::{
    AnalysisResult, Analyzer, Assembler, CollaboratorError, Evaluator, PromptBuilder,
    SceneOutline, ScenePlan, ScenePrompt, Transformer, VariantPlan, VariantPlanner,
};
use adclone_core::provider::{GenerationProvider, ProviderError, RemoteStatus, StatusReport};
use adclone_core::types::{ArtifactRef, OutputRef, SceneIndex};
use adclone_core::variant::VariantLevel;
use async_trait::async_trait;

/// Prompt text produced by [`MockCollaborators`] for one scene.
pub fn prompt_text(level: VariantLevel, index: SceneIndex) -> String {
    format!("{level}/scene-{index}")
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// How a job ends.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Report `completed` on poll number `n` (1-based).
    CompleteAfter(u32),
    /// Report `failed` on poll number `n`.
    FailAfter(u32, String),
    /// Stay `in_progress` forever.
    Never,
}

/// The scripted behaviour of one job.
#[derive(Debug, Clone)]
pub struct JobScript {
    pub outcome: Outcome,
    /// Errors returned by `submit` before it succeeds.
    pub submit_errors: Vec<ProviderError>,
    /// Errors returned by the first `status` calls.
    pub status_errors: Vec<ProviderError>,
    /// Error returned by every `fetch`, if any.
    pub fetch_error: Option<ProviderError>,
}

impl JobScript {
    pub fn complete_after(polls: u32) -> Self {
        Self::with_outcome(Outcome::CompleteAfter(polls))
    }

    pub fn fail_after(polls: u32, reason: impl Into<String>) -> Self {
        Self::with_outcome(Outcome::FailAfter(polls, reason.into()))
    }

    pub fn never_terminal() -> Self {
        Self::with_outcome(Outcome::Never)
    }

    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            submit_errors: Vec::new(),
            status_errors: Vec::new(),
            fetch_error: None,
        }
    }

    pub fn with_submit_errors(mut self, errors: Vec<ProviderError>) -> Self {
        self.submit_errors = errors;
        self
    }

    pub fn with_status_errors(mut self, errors: Vec<ProviderError>) -> Self {
        self.status_errors = errors;
        self
    }

    pub fn with_fetch_error(mut self, error: ProviderError) -> Self {
        self.fetch_error = Some(error);
        self
    }
}

#[derive(Debug)]
struct ScriptedJob {
    prompt: String,
    script: JobScript,
    polls: u32,
    terminal: bool,
}

#[derive(Default)]
struct ProviderState {
    jobs: HashMap<String, ScriptedJob>,
    /// Submit errors still pending per prompt.
    pending_submit_errors: HashMap<String, Vec<ProviderError>>,
    submissions: Vec<String>,
    submit_calls: u32,
    status_calls: u32,
    fetch_calls: u32,
    outstanding: usize,
    max_outstanding: usize,
}

/// A [`GenerationProvider`] driven by per-prompt scripts.
///
/// Prompts without a script follow the default (complete after one poll).
/// The provider also tracks how many submitted jobs have not yet been seen
/// reaching a terminal status, which lets tests observe the scheduler's
/// in-flight cap.
pub struct ScriptedProvider {
    default: JobScript,
    scripts: HashMap<String, JobScript>,
    state: Mutex<ProviderState>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new(JobScript::complete_after(1))
    }
}

impl ScriptedProvider {
    pub fn new(default: JobScript) -> Self {
        Self {
            default,
            scripts: HashMap::new(),
            state: Mutex::new(ProviderState::default()),
        }
    }

    /// Script the job submitted with exactly this prompt text.
    pub fn with_script(mut self, prompt: impl Into<String>, script: JobScript) -> Self {
        self.scripts.insert(prompt.into(), script);
        self
    }

    fn script_for(&self, prompt: &str) -> JobScript {
        self.scripts
            .get(prompt)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    /// Prompts successfully submitted, in submission order.
    pub fn submissions(&self) -> Vec<String> {
        lock(&self.state).submissions.clone()
    }

    pub fn submit_calls(&self) -> u32 {
        lock(&self.state).submit_calls
    }

    pub fn status_calls(&self) -> u32 {
        lock(&self.state).status_calls
    }

    pub fn fetch_calls(&self) -> u32 {
        lock(&self.state).fetch_calls
    }

    /// Polls received by the job submitted with `prompt`.
    pub fn polls_for(&self, prompt: &str) -> Option<u32> {
        lock(&self.state)
            .jobs
            .values()
            .find(|j| j.prompt == prompt)
            .map(|j| j.polls)
    }

    /// Highest number of simultaneously outstanding jobs observed.
    pub fn max_outstanding(&self) -> usize {
        lock(&self.state).max_outstanding
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn submit(&self, prompt: &ScenePrompt) -> Result<String, ProviderError> {
        let script = self.script_for(&prompt.prompt);
        let mut state = lock(&self.state);
        state.submit_calls += 1;

        let pending = state
            .pending_submit_errors
            .entry(prompt.prompt.clone())
            .or_insert_with(|| script.submit_errors.iter().rev().cloned().collect());
        if let Some(err) = pending.pop() {
            return Err(err);
        }

        let job_id = format!("job-{}", state.submissions.len() + 1);
        state.submissions.push(prompt.prompt.clone());
        state.jobs.insert(
            job_id.clone(),
            ScriptedJob {
                prompt: prompt.prompt.clone(),
                script: JobScript {
                    status_errors: script.status_errors.iter().rev().cloned().collect(),
                    ..script
                },
                polls: 0,
                terminal: false,
            },
        );
        state.outstanding += 1;
        state.max_outstanding = state.max_outstanding.max(state.outstanding);
        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> Result<StatusReport, ProviderError> {
        let mut state = lock(&self.state);
        state.status_calls += 1;

        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                body: format!("unknown job {job_id}"),
            })?;

        if let Some(err) = job.script.status_errors.pop() {
            return Err(err);
        }

        job.polls += 1;
        let polls = job.polls;
        let report = match &job.script.outcome {
            Outcome::CompleteAfter(n) if polls >= *n => StatusReport::new(RemoteStatus::Completed)
                .with_progress(100),
            Outcome::CompleteAfter(n) => StatusReport::new(RemoteStatus::InProgress)
                .with_progress(((polls * 100) / (*n).max(1)).min(99) as u8),
            Outcome::FailAfter(n, reason) if polls >= *n => {
                StatusReport::new(RemoteStatus::Failed {
                    reason: reason.clone(),
                })
            }
            Outcome::FailAfter(..) | Outcome::Never => StatusReport::new(RemoteStatus::InProgress),
        };

        let became_terminal = matches!(
            report.status,
            RemoteStatus::Completed | RemoteStatus::Failed { .. }
        ) && !job.terminal;
        if became_terminal {
            job.terminal = true;
            state.outstanding = state.outstanding.saturating_sub(1);
        }
        Ok(report)
    }

    async fn fetch(&self, job_id: &str) -> Result<OutputRef, ProviderError> {
        let mut state = lock(&self.state);
        state.fetch_calls += 1;
        let job = state.jobs.get(job_id).ok_or_else(|| ProviderError::Api {
            status: 404,
            body: format!("unknown job {job_id}"),
        })?;
        if let Some(err) = &job.script.fetch_error {
            return Err(err.clone());
        }
        Ok(format!("out/{job_id}.mp4"))
    }
}

// ---------------------------------------------------------------------------
// MockCollaborators
// ---------------------------------------------------------------------------

/// Deterministic stand-ins for every collaborator trait.
///
/// Each `fail_*` flag makes the matching call return
/// [`CollaboratorError::Unavailable`]. Calls are recorded for assertions.
pub struct MockCollaborators {
    pub scenes_per_variant: usize,
    pub fail_analyze: bool,
    pub fail_transform: bool,
    pub fail_plan: bool,
    /// Levels the planner silently drops from its output.
    pub drop_levels: HashSet<VariantLevel>,
    pub fail_prompts_for: HashSet<VariantLevel>,
    pub fail_assemble_for: HashSet<VariantLevel>,
    pub fail_evaluate_for: HashSet<VariantLevel>,
    calls: Mutex<Vec<String>>,
    planned_from: Mutex<Option<ScenePlan>>,
    assembled: Mutex<Vec<(VariantLevel, Vec<OutputRef>)>>,
}

impl Default for MockCollaborators {
    fn default() -> Self {
        Self {
            scenes_per_variant: 4,
            fail_analyze: false,
            fail_transform: false,
            fail_plan: false,
            drop_levels: HashSet::new(),
            fail_prompts_for: HashSet::new(),
            fail_assemble_for: HashSet::new(),
            fail_evaluate_for: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            planned_from: Mutex::new(None),
            assembled: Mutex::new(Vec::new()),
        }
    }
}

impl MockCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the collaborator calls made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// The scene plan handed to the variant planner.
    pub fn planned_from(&self) -> Option<ScenePlan> {
        lock(&self.planned_from).clone()
    }

    /// Every assembly request, in call order.
    pub fn assembled(&self) -> Vec<(VariantLevel, Vec<OutputRef>)> {
        lock(&self.assembled).clone()
    }

    fn record(&self, call: impl Into<String>) {
        lock(&self.calls).push(call.into());
    }

    fn unavailable(what: &str) -> CollaboratorError {
        CollaboratorError::Unavailable(format!("{what} service is down"))
    }
}

#[async_trait]
impl Analyzer for MockCollaborators {
    async fn analyze(&self, input_reference: &str) -> Result<AnalysisResult, CollaboratorError> {
        self.record("analyze");
        if self.fail_analyze {
            return Err(Self::unavailable("analysis"));
        }
        Ok(AnalysisResult {
            input_reference: input_reference.to_string(),
            scenes: (1..=self.scenes_per_variant as u32)
                .map(|number| SceneOutline {
                    number,
                    duration_secs: Some(12.0),
                    details: serde_json::json!({ "source": "analysis" }),
                })
                .collect(),
            metadata: serde_json::json!({ "duration_secs": 12 * self.scenes_per_variant }),
        })
    }
}

#[async_trait]
impl Transformer for MockCollaborators {
    async fn transform(&self, analysis: &AnalysisResult) -> Result<ScenePlan, CollaboratorError> {
        self.record("transform");
        if self.fail_transform {
            return Err(Self::unavailable("transform"));
        }
        Ok(ScenePlan {
            scenes: analysis.scenes.clone(),
            transformed: true,
            notes: serde_json::json!({ "style": "restructured" }),
        })
    }
}

#[async_trait]
impl VariantPlanner for MockCollaborators {
    async fn plan(
        &self,
        plan: &ScenePlan,
        levels: &[VariantLevel],
    ) -> Result<Vec<VariantPlan>, CollaboratorError> {
        self.record("plan");
        *lock(&self.planned_from) = Some(plan.clone());
        if self.fail_plan {
            return Err(Self::unavailable("variant planning"));
        }
        Ok(levels
            .iter()
            .filter(|l| !self.drop_levels.contains(l))
            .map(|level| VariantPlan {
                level: *level,
                plan: plan.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl PromptBuilder for MockCollaborators {
    async fn build(
        &self,
        plan: &ScenePlan,
        level: VariantLevel,
    ) -> Result<Vec<ScenePrompt>, CollaboratorError> {
        self.record(format!("prompts:{level}"));
        if self.fail_prompts_for.contains(&level) {
            return Err(Self::unavailable("prompt"));
        }
        Ok(plan
            .scenes
            .iter()
            .enumerate()
            .map(|(index, _)| ScenePrompt {
                scene_index: index,
                prompt: prompt_text(level, index),
                duration_secs: Some(12),
                metadata: serde_json::Value::Null,
            })
            .collect())
    }
}

#[async_trait]
impl Assembler for MockCollaborators {
    async fn assemble(
        &self,
        level: VariantLevel,
        outputs: &[OutputRef],
    ) -> Result<ArtifactRef, CollaboratorError> {
        self.record(format!("assemble:{level}"));
        lock(&self.assembled).push((level, outputs.to_vec()));
        if self.fail_assemble_for.contains(&level) {
            return Err(CollaboratorError::Rejected(format!(
                "corrupt scene output for {level}"
            )));
        }
        Ok(format!("artifacts/{level}.mp4"))
    }
}

#[async_trait]
impl Evaluator for MockCollaborators {
    async fn evaluate(
        &self,
        level: VariantLevel,
        _artifact: &ArtifactRef,
    ) -> Result<f64, CollaboratorError> {
        self.record(format!("evaluate:{level}"));
        if self.fail_evaluate_for.contains(&level) {
            return Err(Self::unavailable("evaluation"));
        }
        Ok(match level {
            VariantLevel::Soft => 0.6,
            VariantLevel::Medium => 0.7,
            VariantLevel::Aggressive => 0.8,
            VariantLevel::Ultra => 0.9,
        })
    }
}
