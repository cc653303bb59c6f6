//! Prompt injection and jailbreak detection

use super::{Scanner, ScannerOutcome};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Types of injection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionType {
    /// Direct prompt override
    PromptOverride,
    /// Role-playing manipulation
    RolePlay,
    /// System prompt extraction
    SystemPromptLeak,
    /// Instruction bypass
    InstructionBypass,
    /// Encoding tricks
    EncodingTrick,
    /// Context manipulation
    ContextManipulation,
}

impl InjectionType {
    fn label(&self) -> &'static str {
        match self {
            InjectionType::PromptOverride => "prompt_override",
            InjectionType::RolePlay => "role_play",
            InjectionType::SystemPromptLeak => "system_prompt_leak",
            InjectionType::InstructionBypass => "instruction_bypass",
            InjectionType::EncodingTrick => "encoding_trick",
            InjectionType::ContextManipulation => "context_manipulation",
        }
    }
}

use InjectionType::*;

/// Phrase, weight, category. Matching is case-insensitive.
const PATTERNS: &[(&str, f64, InjectionType)] = &[
    ("ignore previous instructions", 0.9, PromptOverride),
    ("ignore all previous", 0.9, PromptOverride),
    ("ignore the above", 0.8, PromptOverride),
    ("disregard your instructions", 0.9, PromptOverride),
    ("disregard all prior", 0.9, PromptOverride),
    ("forget everything", 0.8, PromptOverride),
    ("new instructions:", 0.7, PromptOverride),
    ("override:", 0.6, PromptOverride),
    ("pretend you are", 0.5, RolePlay),
    ("act as if you", 0.5, RolePlay),
    ("you are now", 0.4, RolePlay),
    ("roleplay as", 0.5, RolePlay),
    ("jailbreak", 0.9, RolePlay),
    ("dan mode", 0.95, RolePlay),
    ("developer mode", 0.7, RolePlay),
    ("what is your system prompt", 0.8, SystemPromptLeak),
    ("show me your instructions", 0.7, SystemPromptLeak),
    ("repeat your system message", 0.85, SystemPromptLeak),
    ("print your prompt", 0.8, SystemPromptLeak),
    ("but first", 0.3, InstructionBypass),
    ("however, instead", 0.4, InstructionBypass),
    ("actually, do this instead", 0.6, InstructionBypass),
    ("base64:", 0.4, EncodingTrick),
    ("decode this:", 0.3, EncodingTrick),
    ("rot13", 0.5, EncodingTrick),
    ("system:", 0.4, ContextManipulation),
    ("assistant:", 0.3, ContextManipulation),
    ("[system]", 0.5, ContextManipulation),
    ("###", 0.2, ContextManipulation),
];

/// A matched injection phrase
#[derive(Debug, Clone)]
pub struct DetectedPattern {
    pub injection_type: InjectionType,
    pub pattern: &'static str,
    /// Byte offset in the lowercased text
    pub position: usize,
}

/// Weighted phrase detector for prompt injection attempts
pub struct PromptInjection {
    threshold: f64,
}

impl PromptInjection {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Matched patterns and the combined confidence in [0, 1]
    pub fn detect(&self, text: &str) -> (Vec<DetectedPattern>, f64) {
        let text_lower = text.to_lowercase();
        let mut detected = vec![];
        let mut total_weight = 0.0;
        let mut max_weight: f64 = 0.0;

        for &(pattern, weight, injection_type) in PATTERNS {
            if let Some(position) = text_lower.find(pattern) {
                detected.push(DetectedPattern {
                    injection_type,
                    pattern,
                    position,
                });
                total_weight += weight;
                max_weight = max_weight.max(weight);
            }
        }

        // strongest match plus a capped bonus for additional matches
        let confidence = if detected.is_empty() {
            0.0
        } else {
            let cumulative = (total_weight / (detected.len() as f64 + 1.0)).min(0.5);
            (max_weight + cumulative).min(1.0)
        };

        (detected, confidence)
    }
}

#[async_trait]
impl Scanner for PromptInjection {
    fn name(&self) -> &'static str {
        "PromptInjection"
    }

    async fn scan(&self, text: &str, _prompt: Option<&str>) -> Result<ScannerOutcome> {
        let (detected, confidence) = self.detect(text);
        let is_valid = confidence < self.threshold;
        let categories: Vec<Value> = detected
            .iter()
            .map(|d| Value::from(d.injection_type.label()))
            .collect();

        Ok(ScannerOutcome::new(text, is_valid, confidence).with_detail("categories", categories))
    }
}
