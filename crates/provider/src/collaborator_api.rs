//! JSON-over-HTTP client for the analysis, prompt, assembly and evaluation
//! services.
//!
//! Every seam is one `POST {base}/<endpoint>`:
//!
//! | Trait            | Endpoint     | Request body                 | Response               |
//! |------------------|--------------|------------------------------|------------------------|
//! | `Analyzer`       | `/analyze`   | `{input_reference}`          | `AnalysisResult`       |
//! | `Transformer`    | `/transform` | `AnalysisResult`             | `ScenePlan`            |
//! | `VariantPlanner` | `/plan`      | `{plan, levels}`             | `[VariantPlan]`        |
//! | `PromptBuilder`  | `/prompts`   | `{plan, level}`              | `[ScenePrompt]`        |
//! | `Assembler`      | `/assemble`  | `{level, outputs}`           | `{artifact}`           |
//! | `Evaluator`      | `/evaluate`  | `{level, artifact}`          | `{score}`              |

use std::time::Duration;

use adclone_core::collaborators::{
    AnalysisResult, Analyzer, Assembler, CollaboratorError, Evaluator, PromptBuilder, ScenePlan,
    ScenePrompt, Transformer, VariantPlan, VariantPlanner,
};
use adclone_core::env;
use adclone_core::error::CoreError;
use adclone_core::types::{ArtifactRef, OutputRef};
use adclone_core::variant::VariantLevel;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct CollaboratorApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl CollaboratorApiConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                             | Default                 |
    /// |-------------------------------------|-------------------------|
    /// | `COLLABORATOR_API_URL`              | `http://localhost:8001` |
    /// | `COLLABORATOR_REQUEST_TIMEOUT_SECS` | `300`                   |
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self {
            base_url: env::var_or("COLLABORATOR_API_URL", "http://localhost:8001")
                .trim_end_matches('/')
                .to_string(),
            request_timeout_secs: env::parse_or("COLLABORATOR_REQUEST_TIMEOUT_SECS", 300)?,
        })
    }
}

/// One client implementing every collaborator trait.
pub struct HttpCollaborators {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    input_reference: &'a str,
}

#[derive(Serialize)]
struct PlanRequest<'a> {
    plan: &'a ScenePlan,
    levels: &'a [VariantLevel],
}

#[derive(Serialize)]
struct PromptRequest<'a> {
    plan: &'a ScenePlan,
    level: VariantLevel,
}

#[derive(Serialize)]
struct AssembleRequest<'a> {
    level: VariantLevel,
    outputs: &'a [OutputRef],
}

#[derive(Deserialize)]
struct AssembleResponse {
    artifact: ArtifactRef,
}

#[derive(Serialize)]
struct EvaluateRequest<'a> {
    level: VariantLevel,
    artifact: &'a str,
}

#[derive(Deserialize)]
struct EvaluateResponse {
    score: f64,
}

impl HttpCollaborators {
    pub fn new(config: &CollaboratorApiConfig) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, CollaboratorError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .json(body)
            .send()
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let detail = format!("{endpoint} returned {}: {body}", status.as_u16());
            return Err(if status.is_server_error() {
                CollaboratorError::Unavailable(detail)
            } else {
                CollaboratorError::Rejected(detail)
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(format!("{endpoint}: {e}")))
    }
}

#[async_trait]
impl Analyzer for HttpCollaborators {
    async fn analyze(&self, input_reference: &str) -> Result<AnalysisResult, CollaboratorError> {
        self.post("/analyze", &AnalyzeRequest { input_reference })
            .await
    }
}

#[async_trait]
impl Transformer for HttpCollaborators {
    async fn transform(&self, analysis: &AnalysisResult) -> Result<ScenePlan, CollaboratorError> {
        self.post("/transform", analysis).await
    }
}

#[async_trait]
impl VariantPlanner for HttpCollaborators {
    async fn plan(
        &self,
        plan: &ScenePlan,
        levels: &[VariantLevel],
    ) -> Result<Vec<VariantPlan>, CollaboratorError> {
        self.post("/plan", &PlanRequest { plan, levels }).await
    }
}

#[async_trait]
impl PromptBuilder for HttpCollaborators {
    async fn build(
        &self,
        plan: &ScenePlan,
        level: VariantLevel,
    ) -> Result<Vec<ScenePrompt>, CollaboratorError> {
        self.post("/prompts", &PromptRequest { plan, level }).await
    }
}

#[async_trait]
impl Assembler for HttpCollaborators {
    async fn assemble(
        &self,
        level: VariantLevel,
        outputs: &[OutputRef],
    ) -> Result<ArtifactRef, CollaboratorError> {
        let response: AssembleResponse = self
            .post("/assemble", &AssembleRequest { level, outputs })
            .await?;
        Ok(response.artifact)
    }
}

#[async_trait]
impl Evaluator for HttpCollaborators {
    async fn evaluate(
        &self,
        level: VariantLevel,
        artifact: &ArtifactRef,
    ) -> Result<f64, CollaboratorError> {
        let response: EvaluateResponse = self
            .post("/evaluate", &EvaluateRequest { level, artifact })
            .await?;
        Ok(response.score)
    }
}
