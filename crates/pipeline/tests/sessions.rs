//! End-to-end session runs through the manager, on paused time.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use adclone_core::error::CoreError;
use adclone_core::event_kinds::{
    ErrorKind, EVENT_EVALUATION_FAILED, EVENT_SCENE_PROGRESS, EVENT_SCENE_SUBMITTED,
    EVENT_SCENE_TIMED_OUT, EVENT_SESSION_CANCELLED,
    EVENT_SESSION_FAILED, EVENT_STAGE_DEGRADED, EVENT_STAGE_RETRYING, EVENT_STAGE_STARTED,
    EVENT_VARIANT_ASSEMBLING, EVENT_VARIANT_FAILED,
};
use adclone_core::stage::StageName;
use adclone_core::status::{SceneStatus, SessionStatus, StageStatus, VariantStatus};
use adclone_core::types::new_session_id;
use adclone_core::variant::VariantLevel;
use adclone_events::SnapshotStore;
use adclone_pipeline::{EvaluationFallback, PipelineConfig, PipelineError, TransformFallback};
use adclone_provider::mock::{prompt_text, JobScript, MockCollaborators, ScriptedProvider};
use assert_matches::assert_matches;

use common::{harness, of_type, test_config, with_error_kind};

const THREE: [VariantLevel; 3] = [VariantLevel::Soft, VariantLevel::Medium, VariantLevel::Aggressive];

// ---------------------------------------------------------------------------
// Test: happy path
// ---------------------------------------------------------------------------

/// Run soft/medium/aggressive with every job finishing on poll `polls`.
async fn run_three_variants(polls: u32) {
    let h = harness(
        ScriptedProvider::new(JobScript::complete_after(polls)),
        MockCollaborators::new(),
        test_config(),
    );

    let id = h.manager.start("ads/original.mp4", &THREE).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert!(snapshot.stages.iter().all(|s| s.status == StageStatus::Completed));
    for level in THREE {
        let variant = snapshot.variant(level).unwrap();
        assert_eq!(variant.status, VariantStatus::Completed);
        assert_eq!(variant.artifact.as_deref(), Some(format!("artifacts/{level}.mp4").as_str()));
        assert!(variant.score.is_some());
        assert_eq!(variant.scenes.len(), 4);
        for scene in &variant.scenes {
            assert_eq!(scene.status, SceneStatus::Completed);
            assert_eq!(scene.poll_attempts, polls);
            assert_eq!(h.provider.polls_for(&prompt_text(level, scene.index)), Some(polls));
        }
    }

    // Assembly received outputs in scene order.
    let assembled = h.mock.assembled();
    assert_eq!(assembled.len(), 3);
    for (level, outputs) in assembled {
        let variant = snapshot.variant(level).unwrap();
        let expected: Vec<_> = (0..4)
            .map(|i| variant.scene(i).unwrap().output.clone().unwrap())
            .collect();
        assert_eq!(outputs, expected);
    }

    let events = h.manager.events_after(id, 0).await.unwrap();
    let stages: Vec<_> = of_type(&events, EVENT_STAGE_STARTED)
        .iter()
        .filter_map(|e| e.stage)
        .collect();
    assert_eq!(stages, StageName::ALL);
    assert_eq!(of_type(&events, EVENT_SCENE_SUBMITTED).len(), 12);
    assert_eq!(of_type(&events, EVENT_SCENE_PROGRESS).len(), 12 * polls as usize);
    assert_eq!(events.last().unwrap().event_type, "session_completed");
}

#[tokio::test(start_paused = true)]
async fn three_variants_complete_on_first_poll() {
    run_three_variants(1).await;
}

#[tokio::test(start_paused = true)]
async fn three_variants_complete_after_several_polls() {
    run_three_variants(2).await;
}

#[tokio::test(start_paused = true)]
async fn every_mutation_is_persisted_with_its_event() {
    let h = harness(ScriptedProvider::default(), MockCollaborators::new(), test_config());

    let id = h.manager.start("ads/original.mp4", &[VariantLevel::Ultra]).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    let events = h.manager.events_after(id, 0).await.unwrap();
    // One save on creation, then one per event.
    assert_eq!(h.store.save_count(), events.len() as u64 + 1);

    let cursors: Vec<_> = events.iter().map(|e| e.cursor).collect();
    let expected: Vec<_> = (1..=events.len() as u64).collect();
    assert_eq!(cursors, expected);

    let stored = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(stored.snapshot, snapshot);
    assert_eq!(stored.events.len(), events.len());
}

// ---------------------------------------------------------------------------
// Test: partial variant failure
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_scene_fails_only_its_variant() {
    let aggressive = VariantLevel::Aggressive;
    let provider = ScriptedProvider::new(JobScript::complete_after(1))
        .with_script(prompt_text(aggressive, 0), JobScript::complete_after(2))
        .with_script(prompt_text(aggressive, 1), JobScript::complete_after(5))
        .with_script(prompt_text(aggressive, 2), JobScript::fail_after(1, "content policy"));
    let mut mock = MockCollaborators::new();
    mock.scenes_per_variant = 3;
    let h = harness(provider, mock, test_config());

    let id = h.manager.start("ads/original.mp4", &THREE).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Completed);
    let failed = snapshot.variant(aggressive).unwrap();
    assert_eq!(failed.status, VariantStatus::Failed);
    assert!(failed.artifact.is_none());
    // Siblings of the failed scene still ran to completion.
    assert_eq!(failed.scene(0).unwrap().status, SceneStatus::Completed);
    assert_eq!(failed.scene(1).unwrap().status, SceneStatus::Completed);
    assert_eq!(failed.scene(2).unwrap().status, SceneStatus::Failed);

    for level in [VariantLevel::Soft, VariantLevel::Medium] {
        assert_eq!(snapshot.variant(level).unwrap().status, VariantStatus::Completed);
    }
    assert!(!h.mock.calls().contains(&format!("assemble:{aggressive}")));
    assert!(!h.mock.calls().contains(&format!("evaluate:{aggressive}")));

    let events = h.manager.events_after(id, 0).await.unwrap();
    let variant_failed = of_type(&events, EVENT_VARIANT_FAILED);
    assert_eq!(variant_failed.len(), 1);
    assert_eq!(variant_failed[0].variant, Some(aggressive));
    // The scene carries the error kind; the variant only lists it.
    assert_eq!(variant_failed[0].error_kind(), None);
    assert_eq!(variant_failed[0].payload["failed_scenes"], serde_json::json!([2]));
    assert_eq!(with_error_kind(&events, ErrorKind::JobFailedError.as_str()).len(), 1);
    assert!(of_type(&events, EVENT_VARIANT_ASSEMBLING)
        .iter()
        .all(|e| e.variant != Some(aggressive)));
}

#[tokio::test(start_paused = true)]
async fn all_variants_failing_fails_generate() {
    let h = harness(
        ScriptedProvider::new(JobScript::fail_after(1, "provider outage")),
        MockCollaborators::new(),
        test_config(),
    );

    let id = h.manager.start("ads/original.mp4", &THREE).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert_eq!(snapshot.stage(StageName::Generate).unwrap().status, StageStatus::Failed);
    assert_eq!(snapshot.stage(StageName::Assemble).unwrap().status, StageStatus::Pending);
    assert!(snapshot.error.as_deref().unwrap().contains("all 3 variants failed"));
}

#[tokio::test(start_paused = true)]
async fn timed_out_job_is_reported_once() {
    let soft = VariantLevel::Soft;
    let provider = ScriptedProvider::new(JobScript::complete_after(1))
        .with_script(prompt_text(soft, 2), JobScript::never_terminal());
    let h = harness(provider, MockCollaborators::new(), test_config());

    let levels = [soft, VariantLevel::Medium];
    let id = h.manager.start("ads/original.mp4", &levels).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Completed);
    let variant = snapshot.variant(soft).unwrap();
    assert_eq!(variant.status, VariantStatus::Failed);
    assert_eq!(variant.scene(2).unwrap().status, SceneStatus::TimedOut);
    assert_eq!(
        snapshot.variant(VariantLevel::Medium).unwrap().status,
        VariantStatus::Completed
    );

    let events = h.manager.events_after(id, 0).await.unwrap();
    let timeouts = with_error_kind(&events, ErrorKind::JobTimeoutError.as_str());
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].event_type, EVENT_SCENE_TIMED_OUT);
    assert_eq!(timeouts[0].scene_index, Some(2));

    let variant_failed = of_type(&events, EVENT_VARIANT_FAILED);
    assert_eq!(variant_failed.len(), 1);
    assert_eq!(variant_failed[0].error_kind(), None);
}

#[tokio::test(start_paused = true)]
async fn assembly_failure_fails_the_variant() {
    let mut mock = MockCollaborators::new();
    mock.fail_assemble_for.insert(VariantLevel::Medium);
    let h = harness(ScriptedProvider::default(), mock, test_config());

    let id = h.manager.start("ads/original.mp4", &THREE).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Completed);
    let medium = snapshot.variant(VariantLevel::Medium).unwrap();
    assert_eq!(medium.status, VariantStatus::Failed);
    assert!(medium.scenes.iter().all(|s| s.status == SceneStatus::Completed));

    let events = h.manager.events_after(id, 0).await.unwrap();
    assert_eq!(with_error_kind(&events, ErrorKind::AssemblyError.as_str()).len(), 1);
}

// ---------------------------------------------------------------------------
// Test: soft stages
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn transform_failure_falls_back_to_identity_plan() {
    let mut mock = MockCollaborators::new();
    mock.fail_transform = true;
    let h = harness(ScriptedProvider::default(), mock, test_config());

    let id = h.manager.start("ads/original.mp4", &THREE).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Completed);
    let transform = snapshot.stage(StageName::Transform).unwrap();
    assert_eq!(transform.status, StageStatus::Completed);
    assert!(transform.degraded);

    let plan = h.mock.planned_from().unwrap();
    assert!(!plan.transformed);
    assert_eq!(plan.scenes.len(), 4);

    let events = h.manager.events_after(id, 0).await.unwrap();
    let soft = with_error_kind(&events, ErrorKind::SoftStageError.as_str());
    assert_eq!(soft.len(), 1);
    assert_eq!(soft[0].event_type, EVENT_STAGE_DEGRADED);
    assert_eq!(soft[0].stage, Some(StageName::Transform));
}

#[tokio::test(start_paused = true)]
async fn transform_failure_aborts_when_configured() {
    let mut mock = MockCollaborators::new();
    mock.fail_transform = true;
    let config = PipelineConfig {
        transform_fallback: TransformFallback::Abort,
        ..test_config()
    };
    let h = harness(ScriptedProvider::default(), mock, config);

    let id = h.manager.start("ads/original.mp4", &THREE).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert_eq!(snapshot.stage(StageName::Transform).unwrap().status, StageStatus::Failed);
    assert!(!h.mock.calls().contains(&"plan".to_string()));
}

#[tokio::test(start_paused = true)]
async fn evaluation_failure_records_fallback_score() {
    let mut mock = MockCollaborators::new();
    mock.fail_evaluate_for.insert(VariantLevel::Soft);
    let config = PipelineConfig {
        evaluation_fallback: EvaluationFallback::Score(0.5),
        ..test_config()
    };
    let h = harness(ScriptedProvider::default(), mock, config);

    let id = h.manager.start("ads/original.mp4", &THREE).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(snapshot.variant(VariantLevel::Soft).unwrap().score, Some(0.5));
    assert_eq!(snapshot.variant(VariantLevel::Medium).unwrap().score, Some(0.7));

    let events = h.manager.events_after(id, 0).await.unwrap();
    let failures = of_type(&events, EVENT_EVALUATION_FAILED);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].error_kind(), Some(ErrorKind::EvaluationError.as_str()));
}

// ---------------------------------------------------------------------------
// Test: fatal stages
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn analyze_failure_stops_the_session() {
    let mut mock = MockCollaborators::new();
    mock.fail_analyze = true;
    let h = harness(ScriptedProvider::default(), mock, test_config());

    let id = h.manager.start("ads/original.mp4", &THREE).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert_eq!(snapshot.stage(StageName::Analyze).unwrap().status, StageStatus::Failed);
    assert!(snapshot
        .stages
        .iter()
        .skip(1)
        .all(|s| s.status == StageStatus::Pending));
    // One local retry, then the stage fails.
    assert_eq!(h.mock.calls(), ["analyze", "analyze"]);
    assert_eq!(h.provider.submit_calls(), 0);

    let events = h.manager.events_after(id, 0).await.unwrap();
    assert_eq!(of_type(&events, EVENT_STAGE_RETRYING).len(), 1);
    let failed = of_type(&events, EVENT_SESSION_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_kind(), Some(ErrorKind::FatalStageError.as_str()));
}

#[tokio::test(start_paused = true)]
async fn missing_planned_level_is_fatal() {
    let mut mock = MockCollaborators::new();
    mock.drop_levels.insert(VariantLevel::Medium);
    let h = harness(ScriptedProvider::default(), mock, test_config());

    let id = h.manager.start("ads/original.mp4", &THREE).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Failed);
    let stage = snapshot.stage(StageName::PlanVariants).unwrap();
    assert_eq!(stage.status, StageStatus::Failed);
    assert!(stage.error.as_deref().unwrap().contains("medium"));
    assert!(snapshot.variants.is_empty());
}

#[tokio::test(start_paused = true)]
async fn prompt_failure_is_fatal() {
    let mut mock = MockCollaborators::new();
    mock.fail_prompts_for.insert(VariantLevel::Soft);
    let config = PipelineConfig {
        stage_retry_attempts: 0,
        ..test_config()
    };
    let h = harness(ScriptedProvider::default(), mock, config);

    let id = h.manager.start("ads/original.mp4", &THREE).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert_eq!(snapshot.stage(StageName::BuildPrompts).unwrap().status, StageStatus::Failed);
    assert!(snapshot.variants.iter().all(|v| v.status == VariantStatus::Failed));
    assert_eq!(h.provider.submit_calls(), 0);
}

// ---------------------------------------------------------------------------
// Test: cancellation and deadlines
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_stops_a_running_session() {
    let h = harness(
        ScriptedProvider::new(JobScript::never_terminal()),
        MockCollaborators::new(),
        test_config(),
    );

    let id = h.manager.start("ads/original.mp4", &THREE).await.unwrap();
    let (backlog, mut events) = h.manager.subscribe_from(id, 0).await.unwrap();
    if !backlog.iter().any(|e| e.event_type == EVENT_SCENE_SUBMITTED) {
        loop {
            let event = events.recv().await.unwrap();
            if event.event_type == EVENT_SCENE_SUBMITTED {
                break;
            }
        }
    }
    tokio::time::sleep(Duration::from_secs(3)).await;

    h.manager.cancel(id).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert_eq!(snapshot.error.as_deref(), Some("Session cancelled"));
    for variant in &snapshot.variants {
        assert_eq!(variant.status, VariantStatus::Failed);
        assert!(variant.scenes.iter().all(|s| s.status == SceneStatus::Failed));
    }

    let recorded = h.manager.events_after(id, 0).await.unwrap();
    assert_eq!(of_type(&recorded, EVENT_SESSION_CANCELLED).len(), 1);
    let failed = of_type(&recorded, EVENT_SESSION_FAILED);
    assert_eq!(failed[0].error_kind(), Some(ErrorKind::Cancelled.as_str()));

    assert_matches!(
        h.manager.cancel(id).await,
        Err(PipelineError::Core(CoreError::Conflict(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn session_deadline_times_out_open_scenes() {
    let config = PipelineConfig {
        session_deadline: Some(Duration::from_secs(30)),
        job_deadline: Duration::from_secs(600),
        ..test_config()
    };
    let h = harness(
        ScriptedProvider::new(JobScript::never_terminal()),
        MockCollaborators::new(),
        config,
    );

    let id = h.manager.start("ads/original.mp4", &[VariantLevel::Soft]).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Failed);
    let variant = snapshot.variant(VariantLevel::Soft).unwrap();
    assert!(variant.scenes.iter().all(|s| s.status == SceneStatus::TimedOut));

    let events = h.manager.events_after(id, 0).await.unwrap();
    let failed = of_type(&events, EVENT_SESSION_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_kind(), Some(ErrorKind::JobTimeoutError.as_str()));
}

// ---------------------------------------------------------------------------
// Test: manager
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn sessions_are_isolated() {
    let h = harness(
        ScriptedProvider::new(JobScript::complete_after(3)),
        MockCollaborators::new(),
        test_config(),
    );

    let first = h.manager.start("ads/first.mp4", &[VariantLevel::Soft]).await.unwrap();
    let second = h.manager.start("ads/second.mp4", &[VariantLevel::Ultra]).await.unwrap();
    h.manager.cancel(first).await.unwrap();

    let first = h.manager.wait(first).await.unwrap();
    let second_snapshot = h.manager.wait(second).await.unwrap();
    assert_eq!(first.status, SessionStatus::Failed);
    assert_eq!(second_snapshot.status, SessionStatus::Completed);

    let events = h.manager.events_after(second, 0).await.unwrap();
    assert!(events.iter().all(|e| e.session_id == second));
    assert_eq!(events[0].cursor, 1);

    let summaries = h.manager.list().await;
    assert_eq!(summaries.len(), 2);
    assert!(summaries[0].created_at >= summaries[1].created_at);
}

#[tokio::test]
async fn start_validates_its_input() {
    let h = harness(ScriptedProvider::default(), MockCollaborators::new(), test_config());

    assert_matches!(
        h.manager.start("  ", &[]).await,
        Err(PipelineError::Core(CoreError::Validation(_)))
    );
    assert_matches!(
        h.manager
            .start("ads/original.mp4", &[VariantLevel::Soft, VariantLevel::Soft])
            .await,
        Err(PipelineError::Core(CoreError::Validation(_)))
    );
    assert_matches!(
        h.manager.get_status(new_session_id()).await,
        Err(PipelineError::SessionNotFound(_))
    );
}

#[tokio::test(start_paused = true)]
async fn empty_level_request_runs_every_level() {
    let h = harness(ScriptedProvider::default(), MockCollaborators::new(), test_config());

    let id = h.manager.start("ads/original.mp4", &[]).await.unwrap();
    let snapshot = h.manager.wait(id).await.unwrap();

    let levels: HashSet<_> = snapshot.variants.iter().map(|v| v.level).collect();
    assert_eq!(levels, VariantLevel::ALL.into_iter().collect());
    assert_eq!(snapshot.status, SessionStatus::Completed);
}
