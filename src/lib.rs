//! Prompt security gateway for a banking chat assistant.
//!
//! Every user message runs through a layered pipeline: fast block rules,
//! threat-memory recall, an external semantic classifier, a self-critic for
//! low-confidence verdicts, sanitize-and-retry for borderline cases, and
//! multi-turn attack chain analysis. The output is a single [`pipeline::Decision`]
//! with a layered, user-safe explanation.
//!
//! The pipeline is fail-open on infrastructure: collaborator outages and
//! storage errors degrade to safe defaults instead of blocking traffic.
//! Attacks are the only thing that blocks.
//!
//! # Usage
//!
//! ```no_run
//! use prompt_guard::{Config, GuardState};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let guard = GuardState::new(config).await?;
//!
//! let outcome = guard.process_message("session-1", "default", "What is my balance?").await;
//! println!("{}", outcome.decision.verdict.action);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod chain;
pub mod collaborator;
pub mod config;
pub mod context;
pub mod error;
pub mod explain;
pub mod memory;
pub mod pipeline;
pub mod rules;
pub mod sanitizer;
pub mod state;
pub mod verdict;

pub use config::{Config, LogFormat, LoggingConfig};
pub use error::{AppError, AppResult};
pub use pipeline::Decision;
pub use state::{GuardOutcome, GuardState};
pub use verdict::{Action, AttackType, Classification, DomainScope, Verdict};

use tracing_subscriber::EnvFilter;

/// Initialize global tracing output from logging configuration.
///
/// `RUST_LOG` overrides the configured level when set. Call once at startup;
/// a second call returns an error from the subscriber and is ignored here.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}
