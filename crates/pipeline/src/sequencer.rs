//! Drives one session through its seven stages in order.
//!
//! Fatal stages (`analyze`, `plan-variants`, `build-prompts`, `generate`)
//! end the session on failure. Soft stages (`transform`, `evaluate`) record
//! a degraded-path event, substitute their fallback and continue.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use adclone_core::collaborators::{
    AnalysisResult, CollaboratorError, ScenePlan, ScenePrompt, VariantPlan,
};
use adclone_core::event_kinds::{ErrorKind, Severity, EVENT_STAGE_RETRYING};
use adclone_core::provider::GenerationProvider;
use adclone_core::stage::StageName;
use adclone_core::status::VariantStatus;
use adclone_core::variant::VariantLevel;
use adclone_events::{LedgerError, PipelineEvent, ProgressLedger};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;

use crate::collaborators::Collaborators;
use crate::config::{PipelineConfig, TransformFallback};
use crate::coordinator::VariantCoordinator;
use crate::error::PipelineError;
use crate::scheduler::SchedulerSettings;
use crate::stop::StopSignal;

pub struct StageSequencer {
    ledger: Arc<ProgressLedger>,
    collaborators: Collaborators,
    provider: Arc<dyn GenerationProvider>,
    config: Arc<PipelineConfig>,
    stop: StopSignal,
}

impl StageSequencer {
    pub fn new(
        ledger: Arc<ProgressLedger>,
        collaborators: Collaborators,
        provider: Arc<dyn GenerationProvider>,
        config: Arc<PipelineConfig>,
        stop: StopSignal,
    ) -> Self {
        Self {
            ledger,
            collaborators,
            provider,
            config,
            stop,
        }
    }

    /// Run every stage and complete the session.
    ///
    /// On `Err` the failing stage has already been recorded; closing the
    /// session is left to the caller.
    pub async fn run(&self) -> Result<(), PipelineError> {
        let snapshot = self.ledger.snapshot().await;
        let session_id = snapshot.id;
        self.ledger.start_session().await?;
        tracing::info!(
            session_id = %session_id,
            input = %snapshot.input_reference,
            variants = snapshot.levels.len(),
            "Session started",
        );

        let analysis = self.analyze(&snapshot.input_reference).await?;
        let plan = self.transform(&analysis).await?;
        let plans = self.plan_variants(&plan, &snapshot.levels).await?;
        let prompts = self.build_prompts(plans).await?;
        self.generate(prompts).await?;
        self.assemble().await?;
        self.evaluate().await?;

        self.stop.check()?;
        self.ledger.complete_session().await?;
        tracing::info!(session_id = %session_id, "Session completed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    async fn analyze(&self, input: &str) -> Result<AnalysisResult, PipelineError> {
        let stage = StageName::Analyze;
        self.begin(stage).await?;

        let analyzer = self.collaborators.analyzer.clone();
        let analysis = self
            .call_fatal(stage, "", || analyzer.analyze(input))
            .await?;

        self.ledger.complete_stage(stage, to_result(&analysis)?).await?;
        Ok(analysis)
    }

    async fn transform(&self, analysis: &AnalysisResult) -> Result<ScenePlan, PipelineError> {
        let stage = StageName::Transform;
        self.begin(stage).await?;

        match self.guarded(self.collaborators.transformer.transform(analysis)).await? {
            Ok(plan) => {
                self.ledger.complete_stage(stage, to_result(&plan)?).await?;
                Ok(plan)
            }
            Err(e) => match self.config.transform_fallback {
                TransformFallback::Identity => {
                    tracing::warn!(error = %e, "Transform failed, continuing with analysed scenes");
                    let plan = ScenePlan::identity(analysis);
                    self.ledger
                        .degrade_stage(stage, &e.to_string(), to_result(&plan)?)
                        .await?;
                    Ok(plan)
                }
                TransformFallback::Abort => Err(self.fail_fatal(stage, e.to_string()).await),
            },
        }
    }

    /// Plan one variant per requested level. Levels the planner was not
    /// asked for are dropped; a requested level it did not plan is fatal.
    async fn plan_variants(
        &self,
        plan: &ScenePlan,
        levels: &[VariantLevel],
    ) -> Result<Vec<VariantPlan>, PipelineError> {
        let stage = StageName::PlanVariants;
        self.begin(stage).await?;

        let planner = self.collaborators.planner.clone();
        let mut planned = self
            .call_fatal(stage, "", || planner.plan(plan, levels))
            .await?;

        let mut selected = Vec::with_capacity(levels.len());
        for level in levels {
            match planned.iter().position(|p| p.level == *level) {
                Some(i) => selected.push(planned.swap_remove(i)),
                None => {
                    return Err(self
                        .fail_fatal(stage, format!("planner returned no plan for variant {level}"))
                        .await)
                }
            }
        }
        if !planned.is_empty() {
            tracing::debug!(dropped = planned.len(), "Ignoring variants that were not requested");
        }

        self.ledger
            .plan_variants(levels, json!({ "variants": to_result(&selected)? }))
            .await?;
        Ok(selected)
    }

    /// Build the scene prompts of every variant. Prompts are ordered by
    /// their scene index and renumbered from zero.
    async fn build_prompts(
        &self,
        plans: Vec<VariantPlan>,
    ) -> Result<Vec<(VariantLevel, Vec<ScenePrompt>)>, PipelineError> {
        let stage = StageName::BuildPrompts;
        self.begin(stage).await?;

        let builder = self.collaborators.prompts.clone();
        let mut variants = Vec::with_capacity(plans.len());
        for VariantPlan { level, plan } in plans {
            let context = format!("variant {level}");
            let prompts = self
                .call_fatal(stage, &context, || builder.build(&plan, level))
                .await?;
            let prompts = match order_prompts(prompts) {
                Ok(prompts) => prompts,
                Err(reason) => {
                    return Err(self.fail_fatal(stage, format!("{context}: {reason}")).await)
                }
            };
            variants.push((level, prompts));
        }

        let counts: Vec<_> = variants
            .iter()
            .map(|(level, prompts)| (*level, prompts.len()))
            .collect();
        let result: BTreeMap<_, _> = counts
            .iter()
            .map(|(level, n)| (level.as_str(), *n))
            .collect();
        self.ledger
            .plan_scenes(&counts, json!({ "scenes": result }))
            .await?;
        Ok(variants)
    }

    /// Run every variant concurrently. Fails only if all of them failed.
    async fn generate(
        &self,
        variants: Vec<(VariantLevel, Vec<ScenePrompt>)>,
    ) -> Result<(), PipelineError> {
        let stage = StageName::Generate;
        self.begin(stage).await?;

        let settings = SchedulerSettings::from(self.config.as_ref());
        let runs = variants.into_iter().map(|(level, prompts)| {
            let coordinator = VariantCoordinator::new(
                level,
                self.ledger.clone(),
                self.provider.clone(),
                self.collaborators.assembler.clone(),
                settings.clone(),
                self.stop.clone(),
            );
            async move { (level, coordinator.run(prompts).await) }
        });

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        for (level, status) in join_all(runs).await {
            match status? {
                VariantStatus::Completed => completed.push(level.as_str()),
                _ => failed.push(level.as_str()),
            }
        }
        self.stop.check()?;

        if completed.is_empty() {
            return Err(self
                .fail_fatal(stage, format!("all {} variants failed", failed.len()))
                .await);
        }
        if !failed.is_empty() {
            tracing::warn!(failed = ?failed, "Some variants failed");
        }
        self.ledger
            .complete_stage(stage, json!({ "completed": completed, "failed": failed }))
            .await?;
        Ok(())
    }

    /// Collect the artifacts assembled during `generate`.
    async fn assemble(&self) -> Result<(), PipelineError> {
        let stage = StageName::Assemble;
        self.begin(stage).await?;

        let artifacts: BTreeMap<_, _> = self
            .ledger
            .snapshot()
            .await
            .artifacts()
            .into_iter()
            .map(|(level, artifact)| (level.as_str(), artifact))
            .collect();
        self.ledger
            .complete_stage(stage, json!({ "artifacts": artifacts }))
            .await?;
        Ok(())
    }

    async fn evaluate(&self) -> Result<(), PipelineError> {
        let stage = StageName::Evaluate;
        self.begin(stage).await?;

        let fallback = self.config.evaluation_fallback.score();
        let mut scores = BTreeMap::new();
        for (level, artifact) in self.ledger.snapshot().await.artifacts() {
            let score = match self
                .guarded(self.collaborators.evaluator.evaluate(level, &artifact))
                .await?
            {
                Ok(score) => {
                    self.ledger.record_score(level, score).await?;
                    Some(score)
                }
                Err(e) => {
                    tracing::warn!(variant = %level, error = %e, "Evaluation failed");
                    self.ledger
                        .record_evaluation_failure(level, &e.to_string(), fallback)
                        .await?;
                    fallback
                }
            };
            scores.insert(level.as_str(), score);
        }

        self.ledger
            .complete_stage(stage, json!({ "scores": scores }))
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn begin(&self, stage: StageName) -> Result<(), PipelineError> {
        self.stop.check()?;
        self.ledger.start_stage(stage).await?;
        tracing::debug!(stage = %stage, "Stage started");
        Ok(())
    }

    /// Await `call` unless the session is stopped first.
    async fn guarded<F: Future>(&self, call: F) -> Result<F::Output, PipelineError> {
        tokio::select! {
            biased;
            _ = self.stop.stopped() => Err(self.stop_error()),
            out = call => Ok(out),
        }
    }

    fn stop_error(&self) -> PipelineError {
        self.stop
            .reason()
            .map(|r| r.as_error())
            .unwrap_or(PipelineError::Cancelled)
    }

    /// Call a fatal stage's collaborator. An unavailable collaborator is
    /// retried up to `stage_retry_attempts` times; any other error fails
    /// the stage.
    async fn call_fatal<T, F, Fut>(
        &self,
        stage: StageName,
        context: &str,
        mut call: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let mut attempt = 0;
        loop {
            let error = match self.guarded(call()).await? {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let message = if context.is_empty() {
                error.to_string()
            } else {
                format!("{context}: {error}")
            };

            let retryable = matches!(error, CollaboratorError::Unavailable(_));
            if !retryable || attempt >= self.config.stage_retry_attempts {
                return Err(self.fail_fatal(stage, message).await);
            }

            attempt += 1;
            let delay = self.config.retry.delay_for_attempt(attempt);
            tracing::warn!(
                stage = %stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Collaborator unavailable, retrying",
            );
            let event = PipelineEvent::new(
                EVENT_STAGE_RETRYING,
                format!("Stage {stage} retrying after: {message}"),
            )
            .with_severity(Severity::Warning)
            .with_stage(stage)
            .with_error(ErrorKind::FatalStageError, &message)
            .with_field("attempt", attempt)
            .with_field("delay_ms", delay.as_millis() as u64);
            self.ledger.publish(event).await?;

            self.guarded(tokio::time::sleep(delay)).await?;
        }
    }

    /// Record a fatal stage failure and build the error that ends the run.
    async fn fail_fatal(&self, stage: StageName, message: String) -> PipelineError {
        tracing::error!(stage = %stage, error = %message, "Fatal stage failed");
        if let Err(e) = self
            .ledger
            .fail_stage(stage, ErrorKind::FatalStageError, &message)
            .await
        {
            return e.into();
        }
        PipelineError::FatalStage { stage, message }
    }
}

fn to_result<T: Serialize>(value: &T) -> Result<serde_json::Value, LedgerError> {
    Ok(serde_json::to_value(value)?)
}

/// Sort prompts by scene index and renumber them `0..n`.
fn order_prompts(mut prompts: Vec<ScenePrompt>) -> Result<Vec<ScenePrompt>, String> {
    if prompts.is_empty() {
        return Err("prompt builder returned no scenes".into());
    }
    let mut seen = HashSet::with_capacity(prompts.len());
    if let Some(dup) = prompts.iter().find(|p| !seen.insert(p.scene_index)) {
        return Err(format!("duplicate scene index {}", dup.scene_index));
    }
    prompts.sort_by_key(|p| p.scene_index);
    for (i, prompt) in prompts.iter_mut().enumerate() {
        prompt.scene_index = i;
    }
    Ok(prompts)
}
