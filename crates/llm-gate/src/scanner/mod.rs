//! Scanners and scanner sets
//!
//! A [`Scanner`] inspects one text and returns a validity verdict, a risk
//! score and a possibly sanitized text. The guard selects an ordered
//! [`ScannerSet`] for input and one for output from the security level.
//! Construction of each scanner may fail on its own; failed scanners are left
//! out of the set and reported as [`ScannerFailure`]s.

pub mod injection;
pub mod secrets;
pub mod sensitive;
pub mod substrings;
pub mod toxicity;

use crate::config::{SecurityConfig, SecurityLevel};
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub use injection::PromptInjection;
pub use secrets::Secrets;
pub use sensitive::Sensitive;
pub use substrings::{BanSubstrings, BanTopics};
pub use toxicity::{ModerationConfig, Toxicity};

/// Substrings banned in both directions at medium and high levels
pub const DEFAULT_BANNED_SUBSTRINGS: [&str; 6] =
    ["password", "secret", "key", "token", "api_key", "private_key"];

/// Topics banned in prompts at the high level
pub const DEFAULT_BANNED_TOPICS: [&str; 4] = ["violence", "hate", "self-harm", "suicide"];

/// Result of running one scanner
#[derive(Debug, Clone)]
pub struct ScannerOutcome {
    /// Text after this scanner's redactions
    pub sanitized: String,
    pub is_valid: bool,
    /// Score in [0, 1]
    pub risk_score: f64,
    /// Scanner-specific details, recorded in the per-scanner results
    pub details: Map<String, Value>,
}

impl ScannerOutcome {
    pub fn new(sanitized: impl Into<String>, is_valid: bool, risk_score: f64) -> Self {
        Self {
            sanitized: sanitized.into(),
            is_valid,
            risk_score,
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Per-scanner result entry, as recorded by scan engines
    pub fn to_result(&self) -> Value {
        let mut entry = self.details.clone();
        entry.insert("is_valid".to_string(), Value::Bool(self.is_valid));
        entry.insert("risk_score".to_string(), Value::from(self.risk_score));
        Value::Object(entry)
    }
}

/// A content scanner
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Name used as the key of per-scanner results
    fn name(&self) -> &'static str;

    /// Scan `text`. For output scanners `prompt` is the originating prompt.
    async fn scan(&self, text: &str, prompt: Option<&str>) -> Result<ScannerOutcome>;
}

/// Built-in scanner kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScannerKind {
    PromptInjection,
    BanSubstrings,
    Secrets,
    BanTopics,
    Toxicity,
    OutputBanSubstrings,
    Sensitive,
    OutputToxicity,
}

impl ScannerKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScannerKind::PromptInjection => "PromptInjection",
            ScannerKind::BanSubstrings => "BanSubstrings",
            ScannerKind::Secrets => "Secrets",
            ScannerKind::BanTopics => "BanTopics",
            ScannerKind::Toxicity => "Toxicity",
            ScannerKind::OutputBanSubstrings => "BanSubstrings",
            ScannerKind::Sensitive => "Sensitive",
            ScannerKind::OutputToxicity => "Toxicity",
        }
    }

    /// Input scanners for a security level
    pub fn input_plan(level: SecurityLevel) -> Vec<ScannerKind> {
        match level {
            SecurityLevel::Low => vec![],
            SecurityLevel::Medium => vec![
                ScannerKind::PromptInjection,
                ScannerKind::BanSubstrings,
                ScannerKind::Secrets,
            ],
            SecurityLevel::High => vec![
                ScannerKind::PromptInjection,
                ScannerKind::BanSubstrings,
                ScannerKind::Secrets,
                ScannerKind::BanTopics,
                ScannerKind::Toxicity,
            ],
        }
    }

    /// Output scanners for a security level
    pub fn output_plan(level: SecurityLevel) -> Vec<ScannerKind> {
        match level {
            SecurityLevel::Low => vec![],
            SecurityLevel::Medium => vec![ScannerKind::OutputBanSubstrings, ScannerKind::Sensitive],
            SecurityLevel::High => vec![
                ScannerKind::OutputBanSubstrings,
                ScannerKind::Sensitive,
                ScannerKind::OutputToxicity,
            ],
        }
    }
}

impl std::fmt::Display for ScannerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings shared by the built-in scanners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerOptions {
    pub banned_substrings: Vec<String>,
    pub banned_topics: Vec<String>,
    /// Confidence at which a prompt counts as an injection attempt
    pub injection_threshold: f64,
    /// Score at which a banned topic blocks the prompt
    pub topic_threshold: f64,
    /// Redact PII in outputs instead of blocking them
    pub redact_sensitive: bool,
    /// Remote moderation classifier used by the toxicity scanners
    pub moderation: ModerationConfig,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            banned_substrings: DEFAULT_BANNED_SUBSTRINGS.iter().map(|s| s.to_string()).collect(),
            banned_topics: DEFAULT_BANNED_TOPICS.iter().map(|s| s.to_string()).collect(),
            injection_threshold: 0.7,
            topic_threshold: 0.5,
            redact_sensitive: false,
            moderation: ModerationConfig::default(),
        }
    }
}

impl ScannerOptions {
    /// Take `banned_substrings` and `banned_topics` lists from a `custom_rules` section
    pub fn with_custom_rules(mut self, rules: &serde_yaml::Mapping) -> Self {
        if let Some(list) = string_list(rules, "banned_substrings") {
            self.banned_substrings = list;
        }
        if let Some(list) = string_list(rules, "banned_topics") {
            self.banned_topics = list;
        }
        self
    }
}

fn string_list(rules: &serde_yaml::Mapping, key: &str) -> Option<Vec<String>> {
    let items = rules.get(key)?.as_sequence()?;
    Some(
        items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
    )
}

/// A scanner that could not be constructed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerFailure {
    pub kind: ScannerKind,
    pub reason: String,
}

/// Construct one scanner
pub fn build_scanner(kind: ScannerKind, options: &ScannerOptions) -> Result<Arc<dyn Scanner>> {
    let scanner: Arc<dyn Scanner> = match kind {
        ScannerKind::PromptInjection => Arc::new(PromptInjection::new(options.injection_threshold)),
        ScannerKind::BanSubstrings | ScannerKind::OutputBanSubstrings => {
            Arc::new(BanSubstrings::new(&options.banned_substrings)?)
        }
        ScannerKind::Secrets => Arc::new(Secrets::new()?),
        ScannerKind::BanTopics => {
            Arc::new(BanTopics::new(&options.banned_topics, options.topic_threshold)?)
        }
        ScannerKind::Toxicity => Arc::new(Toxicity::new(options.moderation.clone(), false)?),
        ScannerKind::OutputToxicity => Arc::new(Toxicity::new(options.moderation.clone(), true)?),
        ScannerKind::Sensitive => Arc::new(Sensitive::new(options.redact_sensitive)?),
    };
    Ok(scanner)
}

/// Ordered, immutable sequence of scanners
#[derive(Clone, Default)]
pub struct ScannerSet {
    scanners: Vec<Arc<dyn Scanner>>,
}

impl ScannerSet {
    pub fn new(scanners: Vec<Arc<dyn Scanner>>) -> Self {
        Self { scanners }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build every scanner in `kinds`, keeping the ones that construct
    pub fn build(kinds: &[ScannerKind], options: &ScannerOptions) -> (Self, Vec<ScannerFailure>) {
        let mut scanners = Vec::with_capacity(kinds.len());
        let mut failures = vec![];

        for &kind in kinds {
            match build_scanner(kind, options) {
                Ok(scanner) => {
                    debug!(scanner = %kind, "Scanner ready");
                    scanners.push(scanner);
                }
                Err(e) => {
                    warn!(scanner = %kind, error = %e, "Scanner unavailable, continuing without it");
                    failures.push(ScannerFailure {
                        kind,
                        reason: e.to_string(),
                    });
                }
            }
        }

        (Self { scanners }, failures)
    }

    /// Input set for a configuration; empty when input scanning is off
    pub fn for_input(config: &SecurityConfig, options: &ScannerOptions) -> (Self, Vec<ScannerFailure>) {
        if !config.enable_input_scanning {
            return (Self::empty(), vec![]);
        }
        Self::build(&ScannerKind::input_plan(config.security_level), options)
    }

    /// Output set for a configuration; empty when output scanning is off
    pub fn for_output(config: &SecurityConfig, options: &ScannerOptions) -> (Self, Vec<ScannerFailure>) {
        if !config.enable_output_scanning {
            return (Self::empty(), vec![]);
        }
        Self::build(&ScannerKind::output_plan(config.security_level), options)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Scanner>> {
        self.scanners.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.scanners.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }
}

impl std::fmt::Debug for ScannerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

pub(crate) fn unavailable(kind: ScannerKind, reason: impl Into<String>) -> GuardError {
    GuardError::ScannerUnavailable {
        scanner: kind.name().to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(level: SecurityLevel) -> SecurityConfig {
        SecurityConfig {
            security_level: level,
            ..Default::default()
        }
    }

    #[test]
    fn test_low_level_has_no_scanners() {
        let options = ScannerOptions::default();
        let (input, _) = ScannerSet::for_input(&config(SecurityLevel::Low), &options);
        let (output, _) = ScannerSet::for_output(&config(SecurityLevel::Low), &options);

        assert!(input.is_empty());
        assert!(output.is_empty());
    }

    #[test]
    fn test_medium_level_sets() {
        let options = ScannerOptions::default();
        let (input, failures) = ScannerSet::for_input(&config(SecurityLevel::Medium), &options);
        assert!(failures.is_empty());
        assert_eq!(input.names(), vec!["PromptInjection", "BanSubstrings", "Secrets"]);

        let (output, failures) = ScannerSet::for_output(&config(SecurityLevel::Medium), &options);
        assert!(failures.is_empty());
        assert_eq!(output.names(), vec!["BanSubstrings", "Sensitive"]);
    }

    #[test]
    fn test_high_level_degrades_without_moderation_key() {
        let options = ScannerOptions::default();
        let (input, failures) = ScannerSet::for_input(&config(SecurityLevel::High), &options);

        assert_eq!(
            input.names(),
            vec!["PromptInjection", "BanSubstrings", "Secrets", "BanTopics"]
        );
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, ScannerKind::Toxicity);

        let (output, failures) = ScannerSet::for_output(&config(SecurityLevel::High), &options);
        assert_eq!(output.names(), vec!["BanSubstrings", "Sensitive"]);
        assert_eq!(failures[0].kind, ScannerKind::OutputToxicity);
    }

    #[test]
    fn test_high_level_with_moderation_key() {
        let mut options = ScannerOptions::default();
        options.moderation.api_key = Some("test-key".to_string());

        let (input, failures) = ScannerSet::for_input(&config(SecurityLevel::High), &options);
        assert!(failures.is_empty());
        assert_eq!(input.len(), 5);
    }

    #[test]
    fn test_disabled_flag_skips_plan() {
        let config = SecurityConfig {
            security_level: SecurityLevel::High,
            enable_input_scanning: false,
            ..Default::default()
        };
        let (input, failures) = ScannerSet::for_input(&config, &ScannerOptions::default());

        assert!(input.is_empty());
        assert!(failures.is_empty());
    }

    #[test]
    fn test_empty_substring_list_fails_construction() {
        let options = ScannerOptions {
            banned_substrings: vec![],
            ..Default::default()
        };
        let (set, failures) = ScannerSet::build(&[ScannerKind::BanSubstrings], &options);

        assert!(set.is_empty());
        assert_eq!(failures[0].kind, ScannerKind::BanSubstrings);
    }

    #[test]
    fn test_custom_rules_replace_lists() {
        let rules: serde_yaml::Mapping =
            serde_yaml::from_str("banned_substrings: [hunter2]\nother: 1").unwrap();
        let options = ScannerOptions::default().with_custom_rules(&rules);

        assert_eq!(options.banned_substrings, vec!["hunter2".to_string()]);
        assert_eq!(options.banned_topics.len(), DEFAULT_BANNED_TOPICS.len());
    }

    #[test]
    fn test_outcome_to_result() {
        let outcome = ScannerOutcome::new("t", false, 0.8).with_detail("matches", 2);
        let result = outcome.to_result();

        assert_eq!(result["is_valid"], Value::Bool(false));
        assert_eq!(result["matches"], Value::from(2));
    }
}
