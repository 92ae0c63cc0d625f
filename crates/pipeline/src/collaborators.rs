//! The set of external services a session talks to.

use std::sync::Arc;

use adclone_core::collaborators::{
    Analyzer, Assembler, CollaboratorError, Evaluator, PromptBuilder, ScenePlan, Transformer,
    VariantPlan, VariantPlanner,
};
use adclone_core::variant::VariantLevel;
use async_trait::async_trait;

/// Shared handles to every collaborator.
#[derive(Clone)]
pub struct Collaborators {
    pub analyzer: Arc<dyn Analyzer>,
    pub transformer: Arc<dyn Transformer>,
    pub planner: Arc<dyn VariantPlanner>,
    pub prompts: Arc<dyn PromptBuilder>,
    pub assembler: Arc<dyn Assembler>,
    pub evaluator: Arc<dyn Evaluator>,
}

impl Collaborators {
    /// Use one service object for every seam.
    pub fn from_shared<T>(service: Arc<T>) -> Self
    where
        T: Analyzer + Transformer + VariantPlanner + PromptBuilder + Assembler + Evaluator + 'static,
    {
        Self {
            analyzer: service.clone(),
            transformer: service.clone(),
            planner: service.clone(),
            prompts: service.clone(),
            assembler: service.clone(),
            evaluator: service,
        }
    }

    /// Replace the variant planner.
    pub fn with_planner(mut self, planner: Arc<dyn VariantPlanner>) -> Self {
        self.planner = planner;
        self
    }
}

/// Planner that gives every requested level the same scene plan.
///
/// Used when no planning service is configured; level-specific changes are
/// then left to the prompt builder.
#[derive(Debug, Default, Clone, Copy)]
pub struct LevelPlanner;

#[async_trait]
impl VariantPlanner for LevelPlanner {
    async fn plan(
        &self,
        plan: &ScenePlan,
        levels: &[VariantLevel],
    ) -> Result<Vec<VariantPlan>, CollaboratorError> {
        Ok(levels
            .iter()
            .map(|level| VariantPlan {
                level: *level,
                plan: plan.clone(),
            })
            .collect())
    }
}
