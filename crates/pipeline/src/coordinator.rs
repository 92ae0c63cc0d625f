//! Runs one variant: every scene concurrently, then the assembly gate.

use std::sync::Arc;

use adclone_core::collaborators::{Assembler, ScenePrompt};
use adclone_core::provider::GenerationProvider;
use adclone_core::status::VariantStatus;
use adclone_core::variant::VariantLevel;
use adclone_events::ProgressLedger;
use futures::future::join_all;

use crate::error::PipelineError;
use crate::gate::{AssemblyGate, GateDecision};
use crate::scheduler::{JobScheduler, SchedulerSettings};
use crate::stop::StopSignal;

pub struct VariantCoordinator {
    level: VariantLevel,
    ledger: Arc<ProgressLedger>,
    scheduler: JobScheduler,
    gate: AssemblyGate,
}

impl VariantCoordinator {
    pub fn new(
        level: VariantLevel,
        ledger: Arc<ProgressLedger>,
        provider: Arc<dyn GenerationProvider>,
        assembler: Arc<dyn Assembler>,
        settings: SchedulerSettings,
        stop: StopSignal,
    ) -> Self {
        Self {
            level,
            scheduler: JobScheduler::new(level, provider, ledger.clone(), settings, stop),
            gate: AssemblyGate::new(level, ledger.clone(), assembler),
            ledger,
        }
    }

    /// Generate every scene of the variant and, if all of them completed,
    /// assemble them. Returns only once the variant is terminal.
    pub async fn run(&self, prompts: Vec<ScenePrompt>) -> Result<VariantStatus, PipelineError> {
        self.ledger.start_variant(self.level).await?;
        tracing::info!(variant = %self.level, scenes = prompts.len(), "Variant generation started");

        // Submission order does not gate throughput: every scene is driven
        // concurrently and the scheduler's slots bound how many are in flight.
        let results = join_all(prompts.into_iter().map(|p| self.scheduler.run_scene(p))).await;
        for result in results {
            result?;
        }

        match self.gate.await_all_terminal().await? {
            GateDecision::Proceed(outputs) => self.gate.assemble(outputs).await,
            GateDecision::Abort { failed, reason } => {
                tracing::warn!(
                    variant = %self.level,
                    failed_scenes = ?failed,
                    "Variant failed, skipping assembly",
                );
                // Each failed scene already has its own error event.
                self.ledger
                    .abandon_variant(self.level, &failed, &reason)
                    .await?;
                Ok(VariantStatus::Failed)
            }
        }
    }
}
