//! One guarded request/response cycle
//!
//! ```text
//! Idle → RateChecked → InputScanned → AwaitingExternalCall → OutputScanned → Done
//!                 any step ──► Error
//! ```
//!
//! A cycle always ends with text for the user: the validated response, or
//! an error message that never repeats rejected content.

use crate::error::GuardError;
use crate::guard::SecurityGuard;
use crate::llm::LlmClient;
use crate::types::Stage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Default limit on the generation call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Completed,
    RateLimited,
    InputBlocked,
    OutputBlocked,
    ServiceError,
    TimedOut,
}

impl OutcomeStatus {
    /// Process exit code. Without `strict` every outcome exits 0.
    pub fn exit_code(&self, strict: bool) -> i32 {
        if !strict {
            return 0;
        }
        match self {
            OutcomeStatus::Completed => 0,
            OutcomeStatus::RateLimited => 2,
            OutcomeStatus::InputBlocked | OutcomeStatus::OutputBlocked => 3,
            OutcomeStatus::ServiceError | OutcomeStatus::TimedOut => 4,
        }
    }

    fn from_error(err: &GuardError) -> Self {
        match err {
            GuardError::RateLimitExceeded { .. } => OutcomeStatus::RateLimited,
            GuardError::InputPolicyViolation { .. } => OutcomeStatus::InputBlocked,
            GuardError::OutputPolicyViolation { .. } => OutcomeStatus::OutputBlocked,
            GuardError::Timeout(_) => OutcomeStatus::TimedOut,
            _ => OutcomeStatus::ServiceError,
        }
    }
}

/// Result of one cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub request_id: Uuid,
    pub status: OutcomeStatus,
    /// `Done` or `Error`
    pub stage: Stage,
    /// Furthest stage completed before the cycle ended
    pub reached: Stage,
    /// Response text, or the message describing why there is none
    pub text: String,
    /// Whether either scan passed with an elevated risk score
    pub risk_warning: bool,
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

/// Guard plus generation client for running cycles
pub struct Pipeline {
    guard: Arc<SecurityGuard>,
    client: Arc<dyn LlmClient>,
    model: String,
    timeout: Duration,
}

impl Pipeline {
    pub fn new(guard: Arc<SecurityGuard>, client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            guard,
            client,
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn guard(&self) -> &SecurityGuard {
        &self.guard
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one cycle for `prompt`
    pub async fn run(&self, prompt: &str) -> CycleOutcome {
        let request_id = Uuid::new_v4();

        let validated = match self.guard.validate_request_for(request_id, prompt).await {
            Ok(validated) => validated,
            Err(err) => {
                let reached = match err {
                    GuardError::RateLimitExceeded { .. } => Stage::Idle,
                    _ => Stage::RateChecked,
                };
                return Self::failed(request_id, reached, &err);
            }
        };

        let generated = tokio::time::timeout(
            self.timeout,
            self.client.generate(&self.model, &validated.text),
        )
        .await
        .unwrap_or(Err(GuardError::Timeout(self.timeout)));

        let response = match generated {
            Ok(response) => response,
            Err(err) => return Self::failed(request_id, Stage::InputScanned, &err),
        };

        let output = match self
            .guard
            .validate_response_for(request_id, &response, prompt)
            .await
        {
            Ok(output) => output,
            Err(err) => return Self::failed(request_id, Stage::AwaitingExternalCall, &err),
        };

        info!(request_id = %request_id, model = %self.model, "Request completed");
        CycleOutcome {
            request_id,
            status: OutcomeStatus::Completed,
            stage: Stage::Done,
            reached: Stage::OutputScanned,
            text: output.text,
            risk_warning: validated.risk_warning || output.risk_warning,
        }
    }

    fn failed(request_id: Uuid, reached: Stage, err: &GuardError) -> CycleOutcome {
        let status = OutcomeStatus::from_error(err);
        warn!(request_id = %request_id, status = ?status, error = %err, "Request did not complete");

        CycleOutcome {
            request_id,
            status,
            stage: Stage::Error,
            reached,
            text: err.user_message(),
            risk_warning: false,
        }
    }
}
