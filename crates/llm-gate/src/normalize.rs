//! Normalization of raw scan results into a [`ScanVerdict`]
//!
//! Scan engines have returned three shapes over time: a typed object, a keyed
//! mapping and a legacy `(sanitized_text, scanner_results, scores)` triple.
//! Each shape has its own extractor; all of them feed the same
//! post-processing step.
//!
//! Two fallbacks apply, and they differ on purpose:
//!
//! - a shape that is merely unrecognized yields a passing verdict with the
//!   original text;
//! - a shape that is recognized but cannot be interpreted (wrong field types,
//!   non-numeric scores) fails closed with a risk score of 1.0.

use crate::error::{GuardError, Result};
use crate::types::ScanVerdict;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

/// Typed result produced by in-process scan engines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanObject {
    pub is_valid: Value,
    #[serde(default)]
    pub sanitized_prompt: Option<Value>,
    #[serde(default)]
    pub sanitized_output: Option<Value>,
    #[serde(default)]
    pub risk_score: Option<Value>,
    #[serde(default)]
    pub scanners_results: Option<Value>,
}

/// A scan result of not-yet-known shape
#[derive(Debug, Clone, PartialEq)]
pub enum RawScanResult {
    /// Typed object with a validity field
    Object(ScanObject),
    /// Keyed document (`is_valid`, `sanitized_prompt`, `risk_score`, ...)
    Mapping(Map<String, Value>),
    /// Legacy `(sanitized_text, scanner_results, scores)` sequence
    Sequence(Vec<Value>),
    /// Anything else
    Unrecognized(Value),
}

impl RawScanResult {
    /// Classify a JSON document returned by a scan service
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => RawScanResult::Mapping(map),
            Value::Array(items) => RawScanResult::Sequence(items),
            other => RawScanResult::Unrecognized(other),
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            RawScanResult::Object(_) => "object",
            RawScanResult::Mapping(_) => "mapping",
            RawScanResult::Sequence(_) => "sequence",
            RawScanResult::Unrecognized(_) => "unrecognized",
        }
    }
}

/// Fields pulled out of a raw result, before post-processing
struct Extracted {
    is_valid: Value,
    sanitized_text: String,
    risk_score: Value,
    scanner_results: Value,
}

/// Convert `raw` into a verdict. Never fails: interpretation errors fail closed.
pub fn normalize(raw: &RawScanResult, default_text: &str) -> ScanVerdict {
    debug!(shape = raw.shape(), "Normalizing scan result");

    match extract(raw, default_text).and_then(finish) {
        Ok(verdict) => verdict,
        Err(e) => {
            error!(shape = raw.shape(), error = %e, "Failed to interpret scan result, blocking");
            ScanVerdict::fail_closed(default_text, e.to_string())
        }
    }
}

fn extract(raw: &RawScanResult, default_text: &str) -> Result<Extracted> {
    match raw {
        RawScanResult::Object(object) => extract_object(object, default_text),
        RawScanResult::Mapping(map) => extract_mapping(map, default_text),
        RawScanResult::Sequence(items) if items.len() >= 3 => {
            extract_sequence(&items[0], &items[1], &items[2], default_text)
        }
        RawScanResult::Sequence(_) | RawScanResult::Unrecognized(_) => {
            Ok(permissive(default_text))
        }
    }
}

fn extract_object(object: &ScanObject, default_text: &str) -> Result<Extracted> {
    Ok(Extracted {
        is_valid: object.is_valid.clone(),
        sanitized_text: pick_text(
            object.sanitized_prompt.as_ref(),
            object.sanitized_output.as_ref(),
            default_text,
        )?,
        risk_score: object.risk_score.clone().unwrap_or(Value::from(0.0)),
        scanner_results: object
            .scanners_results
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new())),
    })
}

fn extract_mapping(map: &Map<String, Value>, default_text: &str) -> Result<Extracted> {
    Ok(Extracted {
        is_valid: map.get("is_valid").cloned().unwrap_or(Value::Bool(true)),
        sanitized_text: pick_text(
            map.get("sanitized_prompt"),
            map.get("sanitized_output"),
            default_text,
        )?,
        risk_score: map.get("risk_score").cloned().unwrap_or(Value::from(0.0)),
        scanner_results: map
            .get("scanners_results")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())),
    })
}

fn extract_sequence(
    text: &Value,
    results: &Value,
    scores: &Value,
    default_text: &str,
) -> Result<Extracted> {
    let sanitized_text = text_field(Some(text), "sanitized_text")?
        .unwrap_or_else(|| default_text.to_string());

    let is_valid = match results {
        Value::Object(map) => map.values().all(truthy),
        _ => true,
    };

    let risk_score = match scores {
        Value::Object(map) => max_score(map)?,
        empty if !truthy(empty) => 0.0,
        other => {
            return Err(GuardError::Normalization(format!(
                "score container must be a mapping, got {}",
                type_name(other)
            )))
        }
    };

    Ok(Extracted {
        is_valid: Value::Bool(is_valid),
        sanitized_text,
        risk_score: Value::from(risk_score),
        scanner_results: results.clone(),
    })
}

fn permissive(default_text: &str) -> Extracted {
    Extracted {
        is_valid: Value::Bool(true),
        sanitized_text: default_text.to_string(),
        risk_score: Value::from(0.0),
        scanner_results: Value::Object(Map::new()),
    }
}

fn finish(fields: Extracted) -> Result<ScanVerdict> {
    let risk_score = match &fields.risk_score {
        Value::Object(map) => max_score(map)?,
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    };

    let is_valid = match &fields.is_valid {
        Value::Bool(valid) => *valid && !has_invalid(&fields.scanner_results),
        Value::Number(n) => n.as_f64().map(|v| v <= -1.0).unwrap_or(true),
        _ => true,
    };

    Ok(ScanVerdict {
        is_valid,
        sanitized_text: fields.sanitized_text,
        risk_score: clamp_score(risk_score),
        scanner_results: into_results(fields.scanner_results),
    })
}

/// First non-empty of the prompt and output variants, else `default_text`
fn pick_text(prompt: Option<&Value>, output: Option<&Value>, default_text: &str) -> Result<String> {
    if let Some(text) = text_field(prompt, "sanitized_prompt")? {
        if !text.is_empty() {
            return Ok(text);
        }
    }
    if let Some(text) = text_field(output, "sanitized_output")? {
        if !text.is_empty() {
            return Ok(text);
        }
    }
    Ok(default_text.to_string())
}

fn text_field(value: Option<&Value>, field: &str) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(GuardError::Normalization(format!(
            "{field} must be a string, got {}",
            type_name(other)
        ))),
    }
}

/// Largest score of a mapping, 0.0 when empty
fn max_score(scores: &Map<String, Value>) -> Result<f64> {
    let mut max: Option<f64> = None;
    for (name, value) in scores {
        let score = value.as_f64().ok_or_else(|| {
            GuardError::Normalization(format!(
                "score for '{name}' is not numeric ({})",
                type_name(value)
            ))
        })?;
        max = Some(max.map_or(score, |m| m.max(score)));
    }
    Ok(max.unwrap_or(0.0))
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Whether any nested result reports a failure
fn has_invalid(results: &Value) -> bool {
    match results {
        Value::Object(map) => match map.get("is_valid") {
            Some(valid) => *valid == Value::Bool(false),
            None => map.values().any(has_invalid),
        },
        Value::Array(items) => items.iter().any(has_invalid),
        Value::Bool(valid) => !valid,
        _ => false,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn into_results(results: Value) -> Map<String, Value> {
    match results {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("results".to_string(), other);
            map
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    }
}
