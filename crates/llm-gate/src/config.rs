//! Configuration for llm-gate
//!
//! A security file holds a `default` section and per-level overrides:
//!
//! ```yaml
//! default:
//!   security_level: medium
//!   enable_input_scanning: true
//!   max_requests_per_minute: 60
//! security_levels:
//!   high:
//!     max_requests_per_minute: 30
//! custom_rules: {}
//! logging: {}
//! rate_limiting: {}
//! ```
//!
//! The effective [`SecurityConfig`] is the default section overlaid with the
//! requested level's section. A missing or unreadable file falls back to
//! [`ConfigFile::builtin`].

use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Default location of the security file
pub const DEFAULT_CONFIG_PATH: &str = "config/security.yaml";

/// Named preset selecting scanners and the rate-limit threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl SecurityLevel {
    pub const ALL: [SecurityLevel; 3] = [SecurityLevel::Low, SecurityLevel::Medium, SecurityLevel::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Low => "low",
            SecurityLevel::Medium => "medium",
            SecurityLevel::High => "high",
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(SecurityLevel::Low),
            "medium" => Ok(SecurityLevel::Medium),
            "high" => Ok(SecurityLevel::High),
            other => Err(GuardError::Config(format!(
                "unknown security level '{other}' (expected low, medium or high)"
            ))),
        }
    }
}

/// Effective configuration of one guard. Immutable once the guard is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub security_level: SecurityLevel,
    pub enable_input_scanning: bool,
    pub enable_output_scanning: bool,
    pub enable_rate_limiting: bool,
    pub max_requests_per_minute: u32,
    pub log_security_events: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            security_level: SecurityLevel::Medium,
            enable_input_scanning: true,
            enable_output_scanning: true,
            enable_rate_limiting: true,
            max_requests_per_minute: 60,
            log_security_events: true,
        }
    }
}

impl SecurityConfig {
    /// Configuration with every check and the event log turned off
    pub fn disabled() -> Self {
        Self {
            enable_input_scanning: false,
            enable_output_scanning: false,
            enable_rate_limiting: false,
            log_security_events: false,
            ..Default::default()
        }
    }

    /// Whether any part of the guard is active
    pub fn is_enabled(&self) -> bool {
        self.enable_input_scanning || self.enable_output_scanning || self.enable_rate_limiting
    }
}

/// Partial settings, used for the `default` section and each level override
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<SecurityLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_input_scanning: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_output_scanning: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_rate_limiting: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_security_events: Option<bool>,
}

impl LevelSettings {
    /// Overlay `other` on top of `self`; keys present in `other` win
    pub fn overlay(&self, other: &LevelSettings) -> LevelSettings {
        LevelSettings {
            security_level: other.security_level.or(self.security_level),
            enable_input_scanning: other.enable_input_scanning.or(self.enable_input_scanning),
            enable_output_scanning: other.enable_output_scanning.or(self.enable_output_scanning),
            enable_rate_limiting: other.enable_rate_limiting.or(self.enable_rate_limiting),
            max_requests_per_minute: other
                .max_requests_per_minute
                .or(self.max_requests_per_minute),
            log_security_events: other.log_security_events.or(self.log_security_events),
        }
    }

    fn scanning(enabled: bool, max_requests_per_minute: u32) -> Self {
        Self {
            enable_input_scanning: Some(enabled),
            enable_output_scanning: Some(enabled),
            enable_rate_limiting: Some(true),
            max_requests_per_minute: Some(max_requests_per_minute),
            ..Default::default()
        }
    }
}

/// Parsed security file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub default: Option<LevelSettings>,
    #[serde(default)]
    pub security_levels: Option<BTreeMap<String, LevelSettings>>,
    /// Passed through untouched
    #[serde(default)]
    pub custom_rules: serde_yaml::Value,
    /// Passed through untouched
    #[serde(default)]
    pub logging: serde_yaml::Value,
    /// Passed through untouched
    #[serde(default)]
    pub rate_limiting: serde_yaml::Value,
}

impl ConfigFile {
    /// Hardcoded configuration used when no file can be read
    pub fn builtin() -> Self {
        let mut levels = BTreeMap::new();
        levels.insert("low".to_string(), LevelSettings::scanning(false, 120));
        levels.insert("medium".to_string(), LevelSettings::scanning(true, 60));
        levels.insert("high".to_string(), LevelSettings::scanning(true, 30));

        Self {
            default: Some(LevelSettings {
                security_level: Some(SecurityLevel::Medium),
                enable_input_scanning: Some(true),
                enable_output_scanning: Some(true),
                enable_rate_limiting: Some(true),
                max_requests_per_minute: Some(60),
                log_security_events: Some(true),
            }),
            security_levels: Some(levels),
            ..Default::default()
        }
    }

    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: Self = serde_yaml::from_str(yaml)?;
        Ok(file)
    }

    /// Effective configuration for `level`
    pub fn resolve(&self, level: SecurityLevel) -> SecurityConfig {
        let base = self.default.clone().unwrap_or_default();
        let overrides = self
            .security_levels
            .as_ref()
            .and_then(|levels| levels.get(level.as_str()))
            .cloned()
            .unwrap_or_default();
        let merged = base.overlay(&overrides);

        SecurityConfig {
            security_level: level,
            enable_input_scanning: merged.enable_input_scanning.unwrap_or(true),
            enable_output_scanning: merged.enable_output_scanning.unwrap_or(true),
            enable_rate_limiting: merged.enable_rate_limiting.unwrap_or(true),
            max_requests_per_minute: merged.max_requests_per_minute.unwrap_or(60),
            log_security_events: merged.log_security_events.unwrap_or(true),
        }
    }
}

/// Loads the security file and resolves effective configurations
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
    data: ConfigFile,
}

impl ConfigLoader {
    /// Load from `path`, falling back to the builtin configuration
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = Self::load_or_builtin(&path);
        Self { path, data }
    }

    /// Wrap an already parsed file
    pub fn from_file(path: impl AsRef<Path>, data: ConfigFile) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            data,
        }
    }

    /// Read and parse `path` without any fallback
    pub fn try_load(path: &Path) -> Result<ConfigFile> {
        let contents = fs::read_to_string(path)?;
        ConfigFile::from_yaml(&contents)
    }

    fn load_or_builtin(path: &Path) -> ConfigFile {
        if !path.exists() {
            warn!(path = %path.display(), "Security config not found, using defaults");
            return ConfigFile::builtin();
        }

        match Self::try_load(path) {
            Ok(data) => {
                debug!(path = %path.display(), "Loaded security config");
                data
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load security config, using defaults");
                ConfigFile::builtin()
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &ConfigFile {
        &self.data
    }

    /// Effective configuration for a level; a disabled guard ignores the level
    pub fn security_config(&self, level: SecurityLevel, enable_guard: bool) -> SecurityConfig {
        if !enable_guard {
            return SecurityConfig::disabled();
        }
        self.data.resolve(level)
    }

    pub fn custom_rules(&self) -> serde_yaml::Mapping {
        as_mapping(&self.data.custom_rules)
    }

    pub fn logging_config(&self) -> serde_yaml::Mapping {
        as_mapping(&self.data.logging)
    }

    pub fn rate_limiting_config(&self) -> serde_yaml::Mapping {
        as_mapping(&self.data.rate_limiting)
    }

    /// Check that the file defines `default`, `security_levels` and every level
    pub fn validate(&self) -> Result<()> {
        if self.data.default.is_none() {
            return Err(GuardError::Config("missing required section 'default'".into()));
        }
        let levels = self
            .data
            .security_levels
            .as_ref()
            .ok_or_else(|| GuardError::Config("missing required section 'security_levels'".into()))?;

        for level in SecurityLevel::ALL {
            if !levels.contains_key(level.as_str()) {
                return Err(GuardError::Config(format!(
                    "missing settings for security level '{level}'"
                )));
            }
        }
        Ok(())
    }

    /// Re-read the file from disk, then validate it
    pub fn reload(&mut self) -> Result<()> {
        self.data = Self::load_or_builtin(&self.path);
        let validation = self.validate();
        if let Err(ref e) = validation {
            warn!(path = %self.path.display(), error = %e, "Reloaded security config is invalid");
        }
        validation
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

fn as_mapping(value: &serde_yaml::Value) -> serde_yaml::Mapping {
    value.as_mapping().cloned().unwrap_or_default()
}
