//! Assembly barrier for one variant.

use std::sync::Arc;

use adclone_core::collaborators::Assembler;
use adclone_core::event_kinds::ErrorKind;
use adclone_core::status::{Lifecycle, VariantStatus};
use adclone_core::types::{OutputRef, SceneIndex};
use adclone_core::variant::VariantLevel;
use adclone_events::{LedgerError, ProgressLedger};
use tokio::sync::broadcast::error::RecvError;

use crate::error::PipelineError;

/// Result of waiting on a variant's scenes.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Every scene completed; outputs ordered by scene index.
    Proceed(Vec<OutputRef>),
    /// At least one scene failed or timed out.
    Abort {
        failed: Vec<SceneIndex>,
        reason: String,
    },
}

pub struct AssemblyGate {
    level: VariantLevel,
    ledger: Arc<ProgressLedger>,
    assembler: Arc<dyn Assembler>,
}

impl AssemblyGate {
    pub fn new(level: VariantLevel, ledger: Arc<ProgressLedger>, assembler: Arc<dyn Assembler>) -> Self {
        Self {
            level,
            ledger,
            assembler,
        }
    }

    /// Wait until every scene of the variant is terminal, then decide.
    pub async fn await_all_terminal(&self) -> Result<GateDecision, PipelineError> {
        // Subscribe before reading so that no terminal event is missed.
        let mut events = self.ledger.subscribe();
        loop {
            let snapshot = self.ledger.snapshot().await;
            let variant = snapshot.variant(self.level).ok_or_else(|| {
                PipelineError::Ledger(LedgerError::Unknown {
                    entity: "variant",
                    id: self.level.to_string(),
                })
            })?;

            if variant.all_scenes_terminal() {
                return Ok(decide(&variant.scenes));
            }

            match events.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => {
                    return Err(PipelineError::Ledger(LedgerError::Invariant(format!(
                        "event bus closed while variant {} was generating",
                        self.level
                    ))))
                }
            }
        }
    }

    /// Move the variant through `assembling` and hand the ordered outputs
    /// to the assembler. An assembler error fails the variant.
    pub async fn assemble(&self, outputs: Vec<OutputRef>) -> Result<VariantStatus, PipelineError> {
        self.ledger.begin_assembly(self.level).await?;

        match self.assembler.assemble(self.level, &outputs).await {
            Ok(artifact) => {
                tracing::info!(variant = %self.level, artifact = %artifact, "Variant assembled");
                self.ledger.complete_variant(self.level, artifact).await?;
                Ok(VariantStatus::Completed)
            }
            Err(e) => {
                self.ledger
                    .fail_variant(self.level, ErrorKind::AssemblyError, &e.to_string())
                    .await?;
                Ok(VariantStatus::Failed)
            }
        }
    }
}

fn decide(scenes: &[adclone_events::SceneRecord]) -> GateDecision {
    let mut ordered: Vec<_> = scenes.iter().collect();
    ordered.sort_by_key(|s| s.index);

    let failed: Vec<_> = ordered.iter().filter(|s| s.status.is_failure()).collect();
    if failed.is_empty() {
        return GateDecision::Proceed(
            ordered
                .iter()
                .filter_map(|s| s.output.clone())
                .collect(),
        );
    }

    let reason = failed
        .iter()
        .map(|s| {
            format!(
                "scene {} {}: {}",
                s.index,
                s.status.as_str(),
                s.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect::<Vec<_>>()
        .join("; ");
    GateDecision::Abort {
        failed: failed.iter().map(|s| s.index).collect(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adclone_core::status::SceneStatus;
    use adclone_events::SceneRecord;

    fn scene(index: SceneIndex, status: SceneStatus, output: Option<&str>) -> SceneRecord {
        let mut s = SceneRecord::queued(index);
        s.status = status;
        s.output = output.map(str::to_string);
        s
    }

    #[test]
    fn outputs_follow_scene_index_not_record_order() {
        let scenes = vec![
            scene(2, SceneStatus::Completed, Some("c")),
            scene(0, SceneStatus::Completed, Some("a")),
            scene(1, SceneStatus::Completed, Some("b")),
        ];
        assert_eq!(
            decide(&scenes),
            GateDecision::Proceed(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn any_failure_aborts() {
        let mut failed = scene(1, SceneStatus::Failed, None);
        failed.error = Some("moderation".into());
        let scenes = vec![scene(0, SceneStatus::Completed, Some("a")), failed];
        match decide(&scenes) {
            GateDecision::Abort { failed, reason } => {
                assert_eq!(failed, vec![1]);
                assert!(reason.contains("moderation"));
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[test]
    fn timed_out_scenes_are_listed_with_their_status() {
        let mut late = scene(0, SceneStatus::TimedOut, None);
        late.error = Some("job exceeded its 60s deadline".into());
        let scenes = vec![late, scene(1, SceneStatus::Completed, Some("b"))];
        match decide(&scenes) {
            GateDecision::Abort { failed, reason } => {
                assert_eq!(failed, vec![0]);
                assert_eq!(reason, "scene 0 timed_out: job exceeded its 60s deadline");
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }
}
