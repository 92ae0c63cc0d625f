#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use adclone_core::backoff::RetryPolicy;
use adclone_core::stage::StageName;
use adclone_core::types::new_session_id;
use adclone_core::variant::VariantLevel;
use adclone_events::{MemorySnapshotStore, PipelineEvent, ProgressLedger, SessionSnapshot, SnapshotStore};
use adclone_pipeline::{Collaborators, PipelineConfig, SessionManager, SessionRegistry};
use adclone_provider::mock::{MockCollaborators, ScriptedProvider};
use chrono::Utc;

/// Fast timings for tests running on paused time.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        max_in_flight: 2,
        poll_interval: Duration::from_secs(1),
        job_deadline: Duration::from_secs(60),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        },
        ..PipelineConfig::default()
    }
}

pub struct Harness {
    pub manager: SessionManager,
    pub provider: Arc<ScriptedProvider>,
    pub mock: Arc<MockCollaborators>,
    pub store: Arc<MemorySnapshotStore>,
}

pub fn harness(provider: ScriptedProvider, mock: MockCollaborators, config: PipelineConfig) -> Harness {
    let provider = Arc::new(provider);
    let mock = Arc::new(mock);
    let store = Arc::new(MemorySnapshotStore::new());
    let manager = SessionManager::new(
        Arc::new(SessionRegistry::new()),
        store.clone(),
        Collaborators::from_shared(mock.clone()),
        provider.clone(),
        config,
    );
    Harness {
        manager,
        provider,
        mock,
        store,
    }
}

/// A ledger whose session has reached the `generate` stage with the given
/// scene counts planned.
pub async fn ledger_at_generate(
    scenes: &[(VariantLevel, usize)],
    store: Arc<dyn SnapshotStore>,
) -> Arc<ProgressLedger> {
    let levels: Vec<_> = scenes.iter().map(|(level, _)| *level).collect();
    let snapshot = SessionSnapshot::new(new_session_id(), "input.mp4", levels.clone(), Utc::now());
    let ledger = ProgressLedger::create(snapshot, store).await.unwrap();

    ledger.start_session().await.unwrap();
    for stage in [StageName::Analyze, StageName::Transform] {
        ledger.start_stage(stage).await.unwrap();
        ledger.complete_stage(stage, serde_json::Value::Null).await.unwrap();
    }
    ledger.start_stage(StageName::PlanVariants).await.unwrap();
    ledger.plan_variants(&levels, serde_json::Value::Null).await.unwrap();
    ledger.start_stage(StageName::BuildPrompts).await.unwrap();
    ledger.plan_scenes(scenes, serde_json::Value::Null).await.unwrap();
    ledger.start_stage(StageName::Generate).await.unwrap();
    Arc::new(ledger)
}

pub fn of_type<'a>(events: &'a [PipelineEvent], event_type: &str) -> Vec<&'a PipelineEvent> {
    events.iter().filter(|e| e.event_type == event_type).collect()
}

pub fn with_error_kind<'a>(events: &'a [PipelineEvent], kind: &str) -> Vec<&'a PipelineEvent> {
    events.iter().filter(|e| e.error_kind() == Some(kind)).collect()
}
