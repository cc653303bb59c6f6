//! Credential and secret detection for prompts

use super::sensitive::{redact_spans, remove_overlaps, Span};
use super::{unavailable, Scanner, ScannerKind, ScannerOutcome};
use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

/// Placeholder written over detected secrets
pub const SECRET_PLACEHOLDER: &str = "******";

const SECRET_PATTERNS: &[(&str, &str)] = &[
    ("OpenAI Key", r"\bsk-[A-Za-z0-9_-]{20,}"),
    ("API Key", r#"(?i)\bapi[_-]?key\s*[=:]\s*['"]?[A-Za-z0-9_\-]{20,}['"]?"#),
    ("AWS Access Key", r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b"),
    ("GitHub Token", r"\bgh[pousr]_[A-Za-z0-9]{36,}\b"),
    ("Google API Key", r"\bAIza[0-9A-Za-z_\-]{35}"),
    ("Slack Token", r"\bxox[abprs]-[A-Za-z0-9-]{10,}"),
    ("JWT", r"\beyJ[A-Za-z0-9_-]+\.eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+"),
    ("Bearer Token", r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]{20,}=*"),
    (
        "Private Key",
        r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |PGP )?PRIVATE KEY( BLOCK)?-----",
    ),
];

/// Redacts credentials and blocks prompts that carry them
pub struct Secrets {
    patterns: Vec<(&'static str, Regex)>,
}

impl Secrets {
    pub fn new() -> Result<Self> {
        let patterns = SECRET_PATTERNS
            .iter()
            .map(|&(label, pattern)| Regex::new(pattern).map(|regex| (label, regex)))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| unavailable(ScannerKind::Secrets, e.to_string()))?;
        Ok(Self { patterns })
    }

    pub fn detect(&self, text: &str) -> Vec<Span> {
        let mut spans: Vec<Span> = self
            .patterns
            .iter()
            .flat_map(|(label, regex)| {
                regex.find_iter(text).map(move |m| Span {
                    label: label.to_string(),
                    start: m.start(),
                    end: m.end(),
                })
            })
            .collect();

        spans.sort_by_key(|s| s.start);
        remove_overlaps(&mut spans);
        spans
    }
}

#[async_trait]
impl Scanner for Secrets {
    fn name(&self) -> &'static str {
        "Secrets"
    }

    async fn scan(&self, text: &str, _prompt: Option<&str>) -> Result<ScannerOutcome> {
        let spans = self.detect(text);
        if spans.is_empty() {
            return Ok(ScannerOutcome::new(text, true, 0.0));
        }

        let kinds: Vec<Value> = spans.iter().map(|s| Value::from(s.label.clone())).collect();
        let redacted = redact_spans(text, &spans, |_| SECRET_PLACEHOLDER.to_string());

        Ok(ScannerOutcome::new(redacted, false, 1.0).with_detail("secrets", kinds))
    }
}
