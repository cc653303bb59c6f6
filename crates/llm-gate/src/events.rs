//! Security event logging
//!
//! Each guard owns a [`SecurityEventLog`]. Events go to `tracing`, where the
//! installed subscriber decides what reaches the console, and, when a side
//! file is configured, to that file as JSON lines at DEBUG and above.
//! Content is recorded as a hash, never verbatim.

use crate::error::Result;
use crate::types::{Direction, ScanVerdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Severity of a security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line of the security log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub request_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl SecurityEvent {
    pub fn new(level: EventLevel, request_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            request_id,
            direction: None,
            message: message.into(),
            risk_score: None,
            content_hash: None,
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn risk_score(mut self, risk_score: f64) -> Self {
        self.risk_score = Some(risk_score);
        self
    }

    /// Attach the hash of `content`
    pub fn content(mut self, content: &str) -> Self {
        self.content_hash = Some(hash_content(content));
        self
    }
}

/// Security event sink owned by a guard
pub struct SecurityEventLog {
    enabled: bool,
    path: Option<PathBuf>,
    file: Option<Mutex<File>>,
}

impl SecurityEventLog {
    /// Log that only emits `tracing` events
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            path: None,
            file: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    /// Log that also writes to `path`, truncating any previous run
    pub fn with_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            enabled: true,
            path: Some(path),
            file: Some(Mutex::new(file)),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Emit an event
    pub fn record(&self, event: &SecurityEvent) {
        if !self.enabled {
            return;
        }

        let direction = event.direction.map(|d| d.to_string()).unwrap_or_default();
        macro_rules! emit {
            ($level:ident) => {
                $level!(
                    request_id = %event.request_id,
                    direction = %direction,
                    risk_score = ?event.risk_score,
                    content_hash = ?event.content_hash,
                    "{}",
                    event.message
                )
            };
        }
        match event.level {
            EventLevel::Debug => emit!(debug),
            EventLevel::Info => emit!(info),
            EventLevel::Warn => emit!(warn),
            EventLevel::Error => emit!(error),
        }

        if let Some(ref file) = self.file {
            if let Err(e) = Self::write_line(file, event) {
                warn!(error = %e, "Failed to write security log");
            }
        }
    }

    fn write_line(file: &Mutex<File>, event: &SecurityEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(file, "{json}")?;
        Ok(())
    }

    /// Record the per-scanner results of a scan
    pub fn scan_result(&self, request_id: Uuid, direction: Direction, content: &str, verdict: &ScanVerdict) {
        let results = serde_json::Value::Object(verdict.scanner_results.clone());
        self.record(
            &SecurityEvent::new(
                EventLevel::Debug,
                request_id,
                format!("{direction} scan results: {results}"),
            )
            .direction(direction)
            .risk_score(verdict.risk_score)
            .content(content),
        );
    }

    /// Record a passing scan
    pub fn passed(&self, request_id: Uuid, direction: Direction, verdict: &ScanVerdict) {
        self.record(
            &SecurityEvent::new(EventLevel::Info, request_id, format!("{direction} validation passed"))
                .direction(direction)
                .risk_score(verdict.risk_score),
        );
    }

    /// Record a passing scan whose risk score is high enough to note
    pub fn risk_warning(&self, request_id: Uuid, direction: Direction, verdict: &ScanVerdict) {
        self.record(
            &SecurityEvent::new(
                EventLevel::Warn,
                request_id,
                format!("High risk {direction} detected but allowed"),
            )
            .direction(direction)
            .risk_score(verdict.risk_score),
        );
    }

    /// Record a rejected scan
    pub fn blocked(&self, request_id: Uuid, direction: Direction, content: &str, verdict: &ScanVerdict) {
        let level = if verdict.has_error() {
            EventLevel::Error
        } else {
            EventLevel::Warn
        };
        self.record(
            &SecurityEvent::new(level, request_id, format!("{direction} validation failed"))
                .direction(direction)
                .risk_score(verdict.risk_score)
                .content(content),
        );
    }

    /// Record a request refused by the rate limiter
    pub fn rate_limited(&self, request_id: Uuid, limit: u32) {
        self.record(&SecurityEvent::new(
            EventLevel::Warn,
            request_id,
            format!("Rate limit exceeded ({limit} requests/minute)"),
        ));
    }
}

impl Default for SecurityEventLog {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for SecurityEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityEventLog")
            .field("enabled", &self.enabled)
            .field("path", &self.path)
            .finish()
    }
}

/// Hash content so the log never carries it verbatim
pub fn hash_content(content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(path: &Path) -> Vec<SecurityEvent> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_hash_content() {
        assert_eq!(hash_content("test"), hash_content("test"));
        assert_ne!(hash_content("test"), hash_content("different"));
    }

    #[test]
    fn test_file_records_debug_and_hashes_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security.log");
        let log = SecurityEventLog::with_file(&path).unwrap();
        let id = Uuid::new_v4();
        let verdict = ScanVerdict::pass("hello secret world");

        log.scan_result(id, Direction::Input, "hello secret world", &verdict);
        log.passed(id, Direction::Input, &verdict);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("hello secret world"));

        let events = lines(&path);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].level, EventLevel::Debug);
        assert_eq!(events[0].request_id, id);
        assert_eq!(events[0].direction, Some(Direction::Input));
        assert_eq!(events[0].content_hash, Some(hash_content("hello secret world")));
        assert_eq!(events[1].level, EventLevel::Info);
    }

    #[test]
    fn test_file_truncated_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security.log");
        std::fs::write(&path, "stale line\n").unwrap();

        let log = SecurityEventLog::with_file(&path).unwrap();
        log.rate_limited(Uuid::new_v4(), 5);

        let events = lines(&path);
        assert_eq!(events.len(), 1);
        assert!(events[0].message.contains("Rate limit exceeded"));
    }

    #[test]
    fn test_fail_closed_verdict_logs_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security.log");
        let log = SecurityEventLog::with_file(&path).unwrap();
        let verdict = ScanVerdict::fail_closed("text", "engine down");

        log.blocked(Uuid::new_v4(), Direction::Output, "text", &verdict);

        assert_eq!(lines(&path)[0].level, EventLevel::Error);
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let log = SecurityEventLog::disabled();
        assert!(!log.is_enabled());
        assert!(log.path().is_none());
        log.rate_limited(Uuid::new_v4(), 1);
    }
}
