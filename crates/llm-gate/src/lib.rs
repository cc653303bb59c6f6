//! # llm-gate
//!
//! Request/response validation around a hosted LLM call.
//!
//! A [`SecurityGuard`] sits between the caller and the model:
//!
//! - **Rate limiting**: a fixed 60 second window, rolled over lazily
//! - **Input scanning**: prompt injection, banned substrings, secrets and,
//!   at the high level, banned topics and toxicity
//! - **Output scanning**: banned substrings, PII and, at the high level,
//!   toxicity
//! - **Normalization**: whatever shape a scan engine returns becomes one
//!   [`ScanVerdict`]; results that cannot be interpreted fail closed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llm_gate::{ConfigLoader, SecurityGuard, SecurityLevel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let loader = ConfigLoader::new("config/security.yaml");
//!     let guard = SecurityGuard::new(loader.security_config(SecurityLevel::Medium, true));
//!
//!     let prompt = guard.validate_request("Summarize this article").await?;
//!     let response = "...model output...";
//!     let output = guard.validate_response(response, &prompt.text).await?;
//!
//!     println!("{}", output.text);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐    ┌──────────────────────────────┐    ┌─────────┐
//! │  CLI    │ ─► │ SecurityGuard                │ ─► │ Gemini  │
//! └─────────┘    │  RateLimiter                 │    └─────────┘
//!                │  ScannerSet (input, output)  │
//!                │  ScanEngine ─► normalize     │
//!                │  SecurityEventLog            │
//!                └──────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
pub mod llm;
pub mod normalize;
pub mod pipeline;
pub mod rate_limit;
pub mod scanner;
pub mod types;

pub use config::{ConfigLoader, SecurityConfig, SecurityLevel};
pub use engine::{LocalScanEngine, RemoteScanEngine, ScanEngine};
pub use error::{GuardError, Result};
pub use events::SecurityEventLog;
pub use guard::{GuardBuilder, SecurityGuard};
pub use llm::{GeminiClient, GeminiConfig, LlmClient};
pub use normalize::{normalize, RawScanResult};
pub use pipeline::{CycleOutcome, OutcomeStatus, Pipeline};
pub use rate_limit::RateLimiter;
pub use scanner::{Scanner, ScannerOptions, ScannerSet};
pub use types::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{ConfigLoader, SecurityConfig, SecurityLevel};
    pub use crate::error::{GuardError, Result};
    pub use crate::guard::SecurityGuard;
    pub use crate::llm::LlmClient;
    pub use crate::pipeline::Pipeline;
    pub use crate::types::*;
}
