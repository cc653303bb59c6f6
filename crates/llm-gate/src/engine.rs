//! Scan engines
//!
//! A [`ScanEngine`] runs a [`ScannerSet`] over a text and returns the result
//! in whatever shape it produces. The guard normalizes that result.

use crate::error::{GuardError, Result};
use crate::normalize::{RawScanResult, ScanObject};
use crate::scanner::ScannerSet;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// Producer of raw scan results
#[async_trait]
pub trait ScanEngine: Send + Sync {
    /// Scan a prompt before it is sent
    async fn scan_prompt(&self, scanners: &ScannerSet, prompt: &str) -> Result<RawScanResult>;

    /// Scan model output, with the prompt that produced it as context
    async fn scan_output(
        &self,
        scanners: &ScannerSet,
        prompt: &str,
        output: &str,
    ) -> Result<RawScanResult>;
}

/// Runs the built-in scanners in process
///
/// Scanners run in order and each sees the text as sanitized by the ones
/// before it. Every scanner runs, even after one has rejected the text.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalScanEngine;

impl LocalScanEngine {
    async fn run(scanners: &ScannerSet, text: &str, prompt: Option<&str>) -> Result<Accumulated> {
        let mut acc = Accumulated {
            text: text.to_string(),
            is_valid: true,
            results: Map::new(),
            scores: Map::new(),
        };

        for scanner in scanners.iter() {
            let outcome = scanner.scan(&acc.text, prompt).await?;
            debug!(
                scanner = scanner.name(),
                is_valid = outcome.is_valid,
                risk_score = outcome.risk_score,
                "Scanner finished"
            );

            acc.is_valid &= outcome.is_valid;
            acc.results.insert(scanner.name().to_string(), outcome.to_result());
            acc.scores.insert(scanner.name().to_string(), Value::from(outcome.risk_score));
            acc.text = outcome.sanitized;
        }

        Ok(acc)
    }
}

struct Accumulated {
    text: String,
    is_valid: bool,
    results: Map<String, Value>,
    scores: Map<String, Value>,
}

#[async_trait]
impl ScanEngine for LocalScanEngine {
    async fn scan_prompt(&self, scanners: &ScannerSet, prompt: &str) -> Result<RawScanResult> {
        let acc = Self::run(scanners, prompt, None).await?;
        Ok(RawScanResult::Object(ScanObject {
            is_valid: Value::Bool(acc.is_valid),
            sanitized_prompt: Some(Value::String(acc.text)),
            sanitized_output: None,
            risk_score: Some(Value::Object(acc.scores)),
            scanners_results: Some(Value::Object(acc.results)),
        }))
    }

    async fn scan_output(
        &self,
        scanners: &ScannerSet,
        prompt: &str,
        output: &str,
    ) -> Result<RawScanResult> {
        let acc = Self::run(scanners, output, Some(prompt)).await?;
        Ok(RawScanResult::Object(ScanObject {
            is_valid: Value::Bool(acc.is_valid),
            sanitized_prompt: None,
            sanitized_output: Some(Value::String(acc.text)),
            risk_score: Some(Value::Object(acc.scores)),
            scanners_results: Some(Value::Object(acc.results)),
        }))
    }
}

#[derive(Debug, Serialize)]
struct RemoteScanRequest<'a> {
    scanners: Vec<&'static str>,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<&'a str>,
}

/// Delegates scanning to an HTTP scanning service
///
/// The service receives the names of the selected scanners and answers with a
/// JSON document of any supported shape.
pub struct RemoteScanEngine {
    url: String,
    client: reqwest::Client,
}

impl RemoteScanEngine {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, request: &RemoteScanRequest<'_>) -> Result<RawScanResult> {
        let response = self.client.post(&self.url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(GuardError::ExternalService(format!(
                "scan service returned status: {}",
                response.status()
            )));
        }

        let value: Value = response.json().await?;
        Ok(RawScanResult::from_value(value))
    }
}

#[async_trait]
impl ScanEngine for RemoteScanEngine {
    async fn scan_prompt(&self, scanners: &ScannerSet, prompt: &str) -> Result<RawScanResult> {
        self.post(&RemoteScanRequest {
            scanners: scanners.names(),
            prompt,
            output: None,
        })
        .await
    }

    async fn scan_output(
        &self,
        scanners: &ScannerSet,
        prompt: &str,
        output: &str,
    ) -> Result<RawScanResult> {
        self.post(&RemoteScanRequest {
            scanners: scanners.names(),
            prompt,
            output: Some(output),
        })
        .await
    }
}
