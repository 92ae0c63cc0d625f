//! External collaborator seams.
//!
//! The pipeline never interprets analysis output or prompt text; it only
//! moves these values from one stage to the next. Each service sits behind
//! a narrow async trait so that real HTTP clients and scripted test doubles
//! are interchangeable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{ArtifactRef, OutputRef, SceneIndex};
use crate::variant::VariantLevel;

// ---------------------------------------------------------------------------
// Data passed between stages
// ---------------------------------------------------------------------------

/// One scene as described by the analysis or the transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneOutline {
    /// 1-based scene number as reported by the analyzer.
    pub number: u32,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    /// Opaque collaborator-specific description.
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Output of the `analyze` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub input_reference: String,
    pub scenes: Vec<SceneOutline>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Output of the `transform` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePlan {
    pub scenes: Vec<SceneOutline>,
    /// `false` when the plan is the unmodified analysis.
    pub transformed: bool,
    #[serde(default)]
    pub notes: serde_json::Value,
}

impl ScenePlan {
    /// The plan used when transformation is skipped or fails: the analysed
    /// scenes, unchanged.
    pub fn identity(analysis: &AnalysisResult) -> Self {
        Self {
            scenes: analysis.scenes.clone(),
            transformed: false,
            notes: serde_json::Value::Null,
        }
    }
}

/// One variant produced by the `plan-variants` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantPlan {
    pub level: VariantLevel,
    pub plan: ScenePlan,
}

/// Generation request for a single scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePrompt {
    pub scene_index: SceneIndex,
    pub prompt: String,
    /// Requested clip length, if the builder chose one.
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    /// The service could not be reached or answered with a server error.
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// The service processed the request and refused it.
    #[error("Collaborator rejected request: {0}")]
    Rejected(String),

    /// The response could not be decoded.
    #[error("Invalid collaborator response: {0}")]
    InvalidResponse(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, input_reference: &str) -> Result<AnalysisResult, CollaboratorError>;
}

#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, analysis: &AnalysisResult) -> Result<ScenePlan, CollaboratorError>;
}

/// Expands a scene plan into one plan per requested level.
#[async_trait]
pub trait VariantPlanner: Send + Sync {
    async fn plan(
        &self,
        plan: &ScenePlan,
        levels: &[VariantLevel],
    ) -> Result<Vec<VariantPlan>, CollaboratorError>;
}

#[async_trait]
pub trait PromptBuilder: Send + Sync {
    async fn build(
        &self,
        plan: &ScenePlan,
        level: VariantLevel,
    ) -> Result<Vec<ScenePrompt>, CollaboratorError>;
}

/// Combines finished scene outputs, already ordered by scene index.
#[async_trait]
pub trait Assembler: Send + Sync {
    async fn assemble(
        &self,
        level: VariantLevel,
        outputs: &[OutputRef],
    ) -> Result<ArtifactRef, CollaboratorError>;
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        level: VariantLevel,
        artifact: &ArtifactRef,
    ) -> Result<f64, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis() -> AnalysisResult {
        AnalysisResult {
            input_reference: "input.mp4".into(),
            scenes: vec![
                SceneOutline {
                    number: 1,
                    duration_secs: Some(12.0),
                    details: serde_json::json!({"purpose": "hook"}),
                },
                SceneOutline {
                    number: 2,
                    duration_secs: None,
                    details: serde_json::Value::Null,
                },
            ],
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn identity_plan_keeps_scenes_untouched() {
        let a = analysis();
        let plan = ScenePlan::identity(&a);
        assert_eq!(plan.scenes, a.scenes);
        assert!(!plan.transformed);
    }

    #[test]
    fn scene_outline_defaults_optional_fields() {
        let outline: SceneOutline = serde_json::from_str(r#"{"number": 3}"#).unwrap();
        assert_eq!(outline.number, 3);
        assert!(outline.duration_secs.is_none());
        assert!(outline.details.is_null());
    }
}
