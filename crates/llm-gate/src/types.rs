//! Core types for llm-gate

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical result of one scan call, whatever shape the scan engine returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanVerdict {
    /// Whether the text passed every scanner
    pub is_valid: bool,
    /// Text after scanners applied their redactions
    pub sanitized_text: String,
    /// Finite score in [0, 1]
    pub risk_score: f64,
    /// Per-scanner results, scanner name to opaque result
    pub scanner_results: Map<String, Value>,
}

impl ScanVerdict {
    /// A passing verdict that leaves `text` untouched
    pub fn pass(text: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            sanitized_text: text.into(),
            risk_score: 0.0,
            scanner_results: Map::new(),
        }
    }

    /// A fail-closed verdict recording why interpretation failed
    pub fn fail_closed(text: impl Into<String>, error: impl Into<String>) -> Self {
        let mut scanner_results = Map::new();
        scanner_results.insert("error".to_string(), Value::String(error.into()));
        Self {
            is_valid: false,
            sanitized_text: text.into(),
            risk_score: 1.0,
            scanner_results,
        }
    }

    /// Whether the scan recorded an internal error
    pub fn has_error(&self) -> bool {
        self.scanner_results.contains_key("error")
    }
}

/// Direction of content flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Prompt on its way to the model
    Input,
    /// Response coming back from the model
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Progress of one request/response cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Idle,
    RateChecked,
    InputScanned,
    AwaitingExternalCall,
    OutputScanned,
    Done,
    Error,
}

/// Text that passed validation
#[derive(Debug, Clone)]
pub struct Validated {
    /// Sanitized text, safe to forward
    pub text: String,
    /// Verdict of the scan, `None` when scanning was skipped
    pub verdict: Option<ScanVerdict>,
    /// Set when the scan passed with a risk score above the warning threshold
    pub risk_warning: bool,
}

impl Validated {
    /// Text forwarded without scanning
    pub fn unscanned(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            verdict: None,
            risk_warning: false,
        }
    }

    /// Risk score of the scan, 0.0 when unscanned
    pub fn risk_score(&self) -> f64 {
        self.verdict.as_ref().map(|v| v.risk_score).unwrap_or(0.0)
    }
}
