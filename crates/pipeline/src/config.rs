use std::path::PathBuf;
use std::time::Duration;

use adclone_core::backoff::RetryPolicy;
use adclone_core::env;
use adclone_core::error::CoreError;

/// What `transform` yields when its collaborator fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformFallback {
    /// Continue with the analysed scenes, unchanged.
    Identity,
    /// Treat the failure as fatal.
    Abort,
}

impl std::str::FromStr for TransformFallback {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(Self::Identity),
            "abort" => Ok(Self::Abort),
            other => Err(CoreError::Validation(format!(
                "Unknown transform fallback '{other}'. Must be one of: identity, abort"
            ))),
        }
    }
}

/// Score recorded when evaluating an artifact fails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvaluationFallback {
    Null,
    Score(f64),
}

impl EvaluationFallback {
    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Null => None,
            Self::Score(s) => Some(*s),
        }
    }
}

impl std::str::FromStr for EvaluationFallback {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "null" {
            return Ok(Self::Null);
        }
        s.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Self::Score)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown evaluation fallback '{s}'. Must be 'null' or a number"
                ))
            })
    }
}

/// Tunables for sessions, the scheduler and stage failure handling.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum jobs in flight per variant.
    pub max_in_flight: usize,
    pub poll_interval: Duration,
    /// Wall-clock limit per job, measured from submission.
    pub job_deadline: Duration,
    /// Optional limit for a whole session.
    pub session_deadline: Option<Duration>,
    /// Transient-error retry policy for provider calls.
    pub retry: RetryPolicy,
    /// Extra attempts for a fatal stage's collaborator call.
    pub stage_retry_attempts: u32,
    pub transform_fallback: TransformFallback,
    pub evaluation_fallback: EvaluationFallback,
    /// Directory holding one snapshot file per session.
    pub state_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            poll_interval: Duration::from_secs(15),
            job_deadline: Duration::from_secs(1800),
            session_deadline: None,
            retry: RetryPolicy::default(),
            stage_retry_attempts: 1,
            transform_fallback: TransformFallback::Identity,
            evaluation_fallback: EvaluationFallback::Null,
            state_dir: PathBuf::from("./output/sessions"),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default             |
    /// |-----------------------------------|---------------------|
    /// | `PIPELINE_MAX_IN_FLIGHT`          | `4`                 |
    /// | `PIPELINE_POLL_INTERVAL_SECS`     | `15`                |
    /// | `PIPELINE_JOB_DEADLINE_SECS`      | `1800`              |
    /// | `PIPELINE_SESSION_DEADLINE_SECS`  | unset               |
    /// | `PIPELINE_RETRY_MAX_ATTEMPTS`     | `5`                 |
    /// | `PIPELINE_RETRY_INITIAL_DELAY_MS` | `1000`              |
    /// | `PIPELINE_RETRY_MAX_DELAY_MS`     | `30000`             |
    /// | `PIPELINE_STAGE_RETRY_ATTEMPTS`   | `1`                 |
    /// | `PIPELINE_TRANSFORM_FALLBACK`     | `identity`          |
    /// | `PIPELINE_EVALUATION_FALLBACK`    | `null`              |
    /// | `PIPELINE_STATE_DIR`              | `./output/sessions` |
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();
        let config = Self {
            max_in_flight: env::parse_or("PIPELINE_MAX_IN_FLIGHT", defaults.max_in_flight)?,
            poll_interval: Duration::from_secs(env::parse_or(
                "PIPELINE_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            job_deadline: Duration::from_secs(env::parse_or(
                "PIPELINE_JOB_DEADLINE_SECS",
                defaults.job_deadline.as_secs(),
            )?),
            session_deadline: env::parse_opt::<u64>("PIPELINE_SESSION_DEADLINE_SECS")?
                .map(Duration::from_secs),
            retry: RetryPolicy {
                max_attempts: env::parse_or(
                    "PIPELINE_RETRY_MAX_ATTEMPTS",
                    defaults.retry.max_attempts,
                )?,
                initial_delay: Duration::from_millis(env::parse_or(
                    "PIPELINE_RETRY_INITIAL_DELAY_MS",
                    defaults.retry.initial_delay.as_millis() as u64,
                )?),
                max_delay: Duration::from_millis(env::parse_or(
                    "PIPELINE_RETRY_MAX_DELAY_MS",
                    defaults.retry.max_delay.as_millis() as u64,
                )?),
                ..defaults.retry
            },
            stage_retry_attempts: env::parse_or(
                "PIPELINE_STAGE_RETRY_ATTEMPTS",
                defaults.stage_retry_attempts,
            )?,
            transform_fallback: env::parse_or(
                "PIPELINE_TRANSFORM_FALLBACK",
                defaults.transform_fallback,
            )?,
            evaluation_fallback: env::parse_or(
                "PIPELINE_EVALUATION_FALLBACK",
                defaults.evaluation_fallback,
            )?,
            state_dir: PathBuf::from(env::var_or(
                "PIPELINE_STATE_DIR",
                &defaults.state_dir.to_string_lossy(),
            )),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or spin the scheduler.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_in_flight == 0 {
            return Err(CoreError::Validation(
                "PIPELINE_MAX_IN_FLIGHT must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(CoreError::Validation(
                "PIPELINE_POLL_INTERVAL_SECS must be at least 1".into(),
            ));
        }
        if self.job_deadline.is_zero() {
            return Err(CoreError::Validation(
                "PIPELINE_JOB_DEADLINE_SECS must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(CoreError::Validation(
                "PIPELINE_RETRY_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(CoreError::Validation(
                "PIPELINE_RETRY_INITIAL_DELAY_MS must not exceed PIPELINE_RETRY_MAX_DELAY_MS"
                    .into(),
            ));
        }
        if let EvaluationFallback::Score(score) = self.evaluation_fallback {
            if !(0.0..=1.0).contains(&score) {
                return Err(CoreError::Validation(format!(
                    "PIPELINE_EVALUATION_FALLBACK must be between 0.0 and 1.0, got {score}"
                )));
            }
        }
        Ok(())
    }
}
