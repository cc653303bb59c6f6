//! PII detection for model output

use super::{unavailable, Scanner, ScannerKind, ScannerOutcome};
use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of personal data the detector recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PiiKind {
    Ssn,
    CreditCard,
    Email,
    Phone,
    IpAddress,
}

impl std::fmt::Display for PiiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PiiKind::Ssn => write!(f, "SSN"),
            PiiKind::CreditCard => write!(f, "Credit Card"),
            PiiKind::Email => write!(f, "Email"),
            PiiKind::Phone => write!(f, "Phone"),
            PiiKind::IpAddress => write!(f, "IP Address"),
        }
    }
}

/// A matched region of text
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub label: String,
    pub start: usize,
    pub end: usize,
}

struct PiiPatterns {
    ssn: Regex,
    credit_card: Regex,
    email: Regex,
    phone: Regex,
    ip_v4: Regex,
    ip_v6: Regex,
}

impl PiiPatterns {
    fn new() -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            // 123-45-6789 or 123456789
            ssn: Regex::new(r"\b\d{3}[-\s]?\d{2}[-\s]?\d{4}\b")?,
            credit_card: Regex::new(r"\b(?:\d{4}[-\s]?){3}\d{4}\b|\b\d{15,16}\b")?,
            email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")?,
            phone: Regex::new(
                r"\b(?:\+?1[-.\s]?)?\(?[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b",
            )?,
            ip_v4: Regex::new(
                r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
            )?,
            ip_v6: Regex::new(r"\b(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}\b")?,
        })
    }
}

/// Output scanner flagging personal data the model may have leaked
pub struct Sensitive {
    patterns: PiiPatterns,
    redact: bool,
}

impl Sensitive {
    /// With `redact`, PII is replaced and the output passes; otherwise it is blocked
    pub fn new(redact: bool) -> Result<Self> {
        let patterns =
            PiiPatterns::new().map_err(|e| unavailable(ScannerKind::Sensitive, e.to_string()))?;
        Ok(Self { patterns, redact })
    }

    /// Detect all PII, sorted by position with overlaps removed
    pub fn detect(&self, text: &str) -> Vec<Span> {
        let mut spans = vec![];
        let mut push = |kind: PiiKind, regex: &Regex, validate: fn(&str) -> bool| {
            for m in regex.find_iter(text) {
                if validate(m.as_str()) {
                    spans.push(Span {
                        label: kind.to_string(),
                        start: m.start(),
                        end: m.end(),
                    });
                }
            }
        };

        push(PiiKind::Ssn, &self.patterns.ssn, |_| true);
        push(PiiKind::CreditCard, &self.patterns.credit_card, luhn_check);
        push(PiiKind::Email, &self.patterns.email, |_| true);
        push(PiiKind::Phone, &self.patterns.phone, |_| true);
        push(PiiKind::IpAddress, &self.patterns.ip_v4, |_| true);
        push(PiiKind::IpAddress, &self.patterns.ip_v6, |_| true);

        spans.sort_by_key(|s| s.start);
        remove_overlaps(&mut spans);
        spans
    }
}

#[async_trait]
impl Scanner for Sensitive {
    fn name(&self) -> &'static str {
        "Sensitive"
    }

    async fn scan(&self, text: &str, _prompt: Option<&str>) -> Result<ScannerOutcome> {
        let spans = self.detect(text);
        if spans.is_empty() {
            return Ok(ScannerOutcome::new(text, true, 0.0));
        }

        let entities: Vec<Value> = spans.iter().map(|s| Value::from(s.label.clone())).collect();
        let sanitized = if self.redact {
            redact_spans(text, &spans, |span| format!("[REDACTED:{}]", span.label))
        } else {
            text.to_string()
        };

        Ok(ScannerOutcome::new(sanitized, self.redact, 1.0).with_detail("entities", entities))
    }
}

/// Replace each span of `text`; spans must be sorted and non-overlapping
pub(crate) fn redact_spans(text: &str, spans: &[Span], replacement: impl Fn(&Span) -> String) -> String {
    let mut result = String::with_capacity(text.len());
    let mut last_end = 0;

    for span in spans {
        if span.start > last_end {
            result.push_str(&text[last_end..span.start]);
        }
        result.push_str(&replacement(span));
        last_end = span.end;
    }

    if last_end < text.len() {
        result.push_str(&text[last_end..]);
    }
    result
}

/// Remove overlapping spans, keeping the earlier one
pub(crate) fn remove_overlaps(spans: &mut Vec<Span>) {
    let mut i = 0;
    while i + 1 < spans.len() {
        if spans[i].end > spans[i + 1].start {
            spans.remove(i + 1);
        } else {
            i += 1;
        }
    }
}

/// Luhn checksum for card numbers
fn luhn_check(number: &str) -> bool {
    let digits: Vec<u32> = number.chars().filter_map(|c| c.to_digit(10)).collect();

    if digits.len() < 13 {
        return false;
    }

    let mut sum = 0;
    let mut double = false;

    for &digit in digits.iter().rev() {
        let mut d = digit;
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }

    sum % 10 == 0
}
