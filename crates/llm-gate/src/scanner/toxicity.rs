//! Toxicity scanning via a remote moderation classifier

use super::{unavailable, Scanner, ScannerKind, ScannerOutcome};
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Moderation classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    /// Score at which text counts as toxic
    pub threshold: f64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.zenlm.ai/v1/guard".to_string(),
            api_key: None,
            timeout_ms: 5000,
            threshold: 0.5,
        }
    }
}

#[derive(Debug, Serialize)]
struct ModerationRequest<'a> {
    messages: Vec<ModerationMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ModerationMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Classifier reply
#[derive(Debug, Clone, Deserialize)]
pub struct ModerationResponse {
    /// "safe", "controversial" or "unsafe"
    pub safety: String,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Explicit score, when the classifier reports one
    #[serde(default)]
    pub score: Option<f64>,
}

impl ModerationResponse {
    pub fn risk_score(&self) -> f64 {
        if let Some(score) = self.score.filter(|s| s.is_finite()) {
            return score.clamp(0.0, 1.0);
        }
        match self.safety.to_lowercase().as_str() {
            "unsafe" => 1.0,
            "controversial" => 0.5,
            _ => 0.0,
        }
    }
}

/// Scanner that asks the moderation classifier whether text is toxic
pub struct Toxicity {
    config: ModerationConfig,
    is_output: bool,
    client: reqwest::Client,
}

impl Toxicity {
    /// Fails when no API key is configured or the HTTP client cannot be built
    pub fn new(config: ModerationConfig, is_output: bool) -> Result<Self> {
        let kind = if is_output {
            ScannerKind::OutputToxicity
        } else {
            ScannerKind::Toxicity
        };

        if config.api_key.is_none() {
            return Err(unavailable(kind, "no moderation API key configured"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| unavailable(kind, e.to_string()))?;

        Ok(Self {
            config,
            is_output,
            client,
        })
    }

    async fn classify(&self, text: &str, prompt: Option<&str>) -> Result<ModerationResponse> {
        let messages = match (self.is_output, prompt) {
            (true, Some(prompt)) => vec![
                ModerationMessage {
                    role: "user",
                    content: prompt,
                },
                ModerationMessage {
                    role: "assistant",
                    content: text,
                },
            ],
            (true, None) => vec![ModerationMessage {
                role: "assistant",
                content: text,
            }],
            (false, _) => vec![ModerationMessage {
                role: "user",
                content: text,
            }],
        };

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .json(&ModerationRequest { messages });

        if let Some(ref api_key) = self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(GuardError::ExternalService(format!(
                "moderation API returned status: {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    /// Map a classifier reply onto a scanner outcome for `text`
    pub fn outcome(&self, text: &str, response: &ModerationResponse) -> ScannerOutcome {
        let risk = response.risk_score();
        let categories: Vec<Value> = response.categories.iter().cloned().map(Value::from).collect();

        ScannerOutcome::new(text, risk < self.config.threshold, risk)
            .with_detail("safety", response.safety.to_lowercase())
            .with_detail("categories", categories)
    }
}

#[async_trait]
impl Scanner for Toxicity {
    fn name(&self) -> &'static str {
        "Toxicity"
    }

    async fn scan(&self, text: &str, prompt: Option<&str>) -> Result<ScannerOutcome> {
        let response = self.classify(text, prompt).await?;
        Ok(self.outcome(text, &response))
    }
}
