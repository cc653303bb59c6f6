//! llm-gate command-line client
//!
//! Reads text from a file or stdin, prefixes it with a prompt and sends it to
//! Gemini. The prompt and the response pass through the security guard.

use anyhow::{Context, Result};
use clap::Parser;
use llm_gate::config::DEFAULT_CONFIG_PATH;
use llm_gate::llm::DEFAULT_MODEL;
use llm_gate::pipeline::DEFAULT_TIMEOUT;
use llm_gate::scanner::{ModerationConfig, ScannerOptions};
use llm_gate::{
    ConfigLoader, GeminiClient, GeminiConfig, Pipeline, RemoteScanEngine, SecurityEventLog,
    SecurityGuard, SecurityLevel,
};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_PROMPT: &str = "Please process the following text:";

/// Characters of the outgoing prompt echoed before sending
const PREVIEW_CHARS: usize = 200;

/// Timeout for the remote scan service
const SCAN_SERVICE_TIMEOUT: Duration = Duration::from_secs(30);

/// llm-gate arguments
#[derive(Parser, Debug)]
#[command(name = "llm-gate")]
#[command(about = "Send text to Gemini through a security guard")]
struct Args {
    /// Prompt given to the model, joined with the input text
    #[arg(short, long, default_value = DEFAULT_PROMPT)]
    prompt: String,

    /// Text file to process (stdin when absent)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Gemini model name
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Security level: low, medium or high
    #[arg(long, default_value = "medium")]
    security_level: SecurityLevel,

    /// Enable the security guard (default)
    #[arg(long, overrides_with = "disable_guard")]
    enable_guard: bool,

    /// Disable the security guard
    #[arg(long, overrides_with = "enable_guard")]
    disable_guard: bool,

    /// Log security events even if the configuration turns them off
    #[arg(long)]
    log_security: bool,

    /// Security configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Security event log file, truncated on each run
    #[arg(long, default_value = "security.log")]
    security_log: PathBuf,

    /// Seconds to wait for the model
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Exit 2 on rate limit, 3 on a policy violation, 4 on a service error
    #[arg(long)]
    strict_exit: bool,
}

impl Args {
    fn guard_enabled(&self) -> bool {
        self.enable_guard || !self.disable_guard
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let input = match read_input(&args)? {
        Some(input) => input,
        None => return Ok(ExitCode::from(1)),
    };
    if input.trim().is_empty() {
        eprintln!("Error: no input text to process.");
        return Ok(ExitCode::from(1));
    }

    let guard = build_guard(&args)?;
    let client = GeminiClient::new(GeminiConfig::from_env().with_timeout(args.timeout_secs))
        .context("Failed to build the Gemini client")?;
    let pipeline = Pipeline::new(Arc::new(guard), Arc::new(client), args.model.clone())
        .with_timeout(Duration::from_secs(args.timeout_secs));

    let full_prompt = format!("{}\n\n{}", args.prompt, input);
    println!(
        "\n--- Prompt sent to {} (preview) ---\n{}...\n------------------------------------",
        args.model,
        preview(&full_prompt, PREVIEW_CHARS)
    );

    let outcome = pipeline.run(&full_prompt).await;

    println!("\n--- Response from {} ---", args.model);
    println!("{}", outcome.text);
    println!("-------------------------");

    let code = outcome.status.exit_code(args.strict_exit);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

/// Input text, or `None` after reporting a missing file
fn read_input(args: &Args) -> Result<Option<String>> {
    if let Some(ref path) = args.file {
        if !path.exists() {
            eprintln!("Error: file '{}' not found.", path.display());
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return Ok(Some(text));
    }

    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        println!("Enter text (finish with Ctrl+D / Ctrl+Z):");
    }
    let mut text = String::new();
    stdin.read_to_string(&mut text).context("Failed to read stdin")?;
    Ok(Some(text))
}

fn build_guard(args: &Args) -> Result<SecurityGuard> {
    let loader = ConfigLoader::new(&args.config);
    let mut config = loader.security_config(args.security_level, args.guard_enabled());
    if args.log_security {
        config.log_security_events = true;
    }

    let options = scanner_options().with_custom_rules(&loader.custom_rules());
    let mut builder = SecurityGuard::builder(config.clone()).with_scanner_options(options);

    if config.log_security_events {
        let events = SecurityEventLog::with_file(&args.security_log).unwrap_or_else(|e| {
            warn!(path = %args.security_log.display(), error = %e, "Security log file unavailable");
            SecurityEventLog::new(true)
        });
        builder = builder.with_event_log(events);
    }

    if let Ok(url) = std::env::var("LLM_GATE_SCAN_URL") {
        let engine = RemoteScanEngine::new(url, SCAN_SERVICE_TIMEOUT)
            .context("Failed to build the scan service client")?;
        info!(url = engine.url(), "Using remote scan engine");
        builder = builder.with_engine(Arc::new(engine));
    }

    let guard = builder.build();
    for failure in guard.scanner_failures() {
        warn!(scanner = %failure.kind, reason = %failure.reason, "Running without scanner");
    }

    info!(
        enabled = args.guard_enabled(),
        level = %args.security_level,
        "Security guard ready"
    );
    Ok(guard)
}

fn scanner_options() -> ScannerOptions {
    let mut moderation = ModerationConfig {
        api_key: std::env::var("LLM_GATE_MODERATION_API_KEY")
            .ok()
            .filter(|k| !k.is_empty()),
        ..Default::default()
    };
    if let Ok(url) = std::env::var("LLM_GATE_MODERATION_URL") {
        moderation.endpoint = url;
    }

    ScannerOptions {
        moderation,
        ..Default::default()
    }
}

/// First `max_chars` characters of `text`
fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
