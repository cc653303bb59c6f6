//! Generation service client
//!
//! [`LlmClient`] is the seam between the guard pipeline and the model.
//! [`GeminiClient`] talks to the Generative Language API `generateContent`
//! endpoint.

use crate::error::{GuardError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default model name
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Text generation service
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion of `prompt` with `model`
    async fn generate(&self, model: &str, prompt: &str) -> Result<String>;
}

/// Gemini client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    /// Base URL (default: https://generativelanguage.googleapis.com)
    pub base_url: String,
    /// Project billed for quota, sent as `x-goog-user-project`
    pub quota_project: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            quota_project: None,
            timeout_secs: 60,
        }
    }
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Read `GEMINI_API_KEY` (or `GOOGLE_API_KEY`) and `GOOGLE_CLOUD_PROJECT`
    pub fn from_env() -> Self {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .unwrap_or_default();

        Self {
            api_key,
            quota_project: std::env::var("GOOGLE_CLOUD_PROJECT").ok().filter(|p| !p.is_empty()),
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate, parts concatenated
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().find_map(|c| c.content)?;
        let parts: Vec<String> = content.parts.into_iter().filter_map(|p| p.text).collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.concat())
        }
    }
}

/// Gemini `generateContent` client
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(GeminiConfig::from_env())
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }

    fn map_error(&self, err: reqwest::Error) -> GuardError {
        if err.is_timeout() {
            GuardError::Timeout(Duration::from_secs(self.config.timeout_secs))
        } else {
            GuardError::ExternalService(err.to_string())
        }
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        if self.config.api_key.is_empty() {
            return Err(GuardError::Config(
                "GEMINI_API_KEY or GOOGLE_API_KEY must be set".to_string(),
            ));
        }

        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let mut request = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body);
        if let Some(ref project) = self.config.quota_project {
            request = request.header("x-goog-user-project", project);
        }

        debug!(model, "Calling generateContent");
        let resp = request.send().await.map_err(|e| self.map_error(e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.map_error(e))?;

        if !status.is_success() {
            return Err(GuardError::ExternalService(format!(
                "generateContent returned {status}: {text}"
            )));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)?;
        parsed
            .text()
            .ok_or_else(|| GuardError::ExternalService("response contained no text".to_string()))
    }
}
