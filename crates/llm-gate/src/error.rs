//! Error types for llm-gate

use crate::types::ScanVerdict;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for gate operations
pub type Result<T> = std::result::Result<T, GuardError>;

/// Gate error types
#[derive(Debug, Error)]
pub enum GuardError {
    /// Request rejected by the rate limiter before any scan ran
    #[error("Rate limit exceeded: {limit} requests/minute")]
    RateLimitExceeded { limit: u32 },

    /// Prompt failed the input scan
    #[error("Input violates the security policy (risk score: {:.2})", .verdict.risk_score)]
    InputPolicyViolation { verdict: Box<ScanVerdict> },

    /// Model output failed the output scan
    #[error("Output violates the security policy (risk score: {:.2})", .verdict.risk_score)]
    OutputPolicyViolation { verdict: Box<ScanVerdict> },

    /// A scanner could not be constructed
    #[error("Scanner unavailable: {scanner}: {reason}")]
    ScannerUnavailable { scanner: String, reason: String },

    /// A raw scan result could not be interpreted
    #[error("Scan result normalization error: {0}")]
    Normalization(String),

    /// The generation service failed
    #[error("External service error: {0}")]
    ExternalService(String),

    /// The generation service did not answer in time
    #[error("External service timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GuardError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GuardError::RateLimitExceeded { .. } | GuardError::Timeout(_)
        )
    }

    /// Whether this error is a policy decision rather than a fault
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            GuardError::InputPolicyViolation { .. } | GuardError::OutputPolicyViolation { .. }
        )
    }

    /// The verdict that caused a policy violation, if any
    pub fn verdict(&self) -> Option<&ScanVerdict> {
        match self {
            GuardError::InputPolicyViolation { verdict }
            | GuardError::OutputPolicyViolation { verdict } => Some(verdict),
            _ => None,
        }
    }

    /// Text shown to the user. Never includes the rejected content.
    pub fn user_message(&self) -> String {
        match self {
            GuardError::RateLimitExceeded { limit } => {
                format!("Security error: rate limit reached ({limit} requests/minute)")
            }
            GuardError::InputPolicyViolation { verdict } => format!(
                "Security error: the input violates the security policy (risk score {:.2})",
                verdict.risk_score
            ),
            GuardError::OutputPolicyViolation { verdict } => format!(
                "Security error: the output violates the security policy (risk score {:.2})",
                verdict.risk_score
            ),
            other => format!("Error: {other}"),
        }
    }
}
