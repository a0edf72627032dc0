//! Environment-driven configuration.

use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// External collaborator API settings.
    pub collaborator: CollaboratorConfig,
    /// Session-turn database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// HTTP request behavior for collaborator calls.
    pub request: RequestConfig,
    /// Pipeline thresholds and capacity limits.
    pub thresholds: ThresholdConfig,
}

/// Collaborator API configuration (classifier, critic, embedder share one
/// gateway endpoint and API key; models differ per role)
#[derive(Debug, Clone)]
pub struct CollaboratorConfig {
    /// Bearer token for the gateway.
    pub api_key: String,
    /// Gateway base URL.
    pub base_url: String,
    /// Chat model used for classification.
    pub classifier_model: String,
    /// Chat model used for critique.
    pub critic_model: String,
    /// Embedding model used by threat memory.
    pub embedding_model: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite file path.
    pub path: PathBuf,
    /// Maximum pool connections.
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "prompt_guard=debug").
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable output.
    Pretty,
    /// JSON lines for ingestion.
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay between retries (doubled per attempt).
    pub retry_delay_ms: u64,
}

/// Pipeline thresholds and capacity limits
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    /// Minimum decayed cosine similarity for a threat-memory match.
    pub similarity_threshold: f64,
    /// Risk added to the classifier verdict when memory matches.
    pub memory_risk_boost: f64,
    /// Days until a stored threat's decay weight bottoms out at 0.1.
    pub memory_decay_days: i64,
    /// Maximum threat records kept before pruning.
    pub memory_max_records: usize,
    /// Threat-memory snapshot file. `None` disables persistence.
    pub memory_path: Option<PathBuf>,
    /// Classifier confidence below which the critic is consulted.
    pub critic_confidence_threshold: f64,
    /// Whether borderline verdicts get a sanitize-and-retry pass.
    pub sanitization_enabled: bool,
    /// Turns retained per session in both ledgers.
    pub max_session_turns: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let collaborator = CollaboratorConfig {
            api_key: env::var("PROMPT_GUARD_API_KEY").map_err(|_| AppError::Config {
                message: "PROMPT_GUARD_API_KEY is required".to_string(),
            })?,
            base_url: env::var("PROMPT_GUARD_BASE_URL")
                .unwrap_or_else(|_| "https://api.groq.com/openai".to_string()),
            classifier_model: env::var("CLASSIFIER_MODEL")
                .unwrap_or_else(|_| "llama-3.1-8b-instant".to_string()),
            critic_model: env::var("CRITIC_MODEL")
                .unwrap_or_else(|_| "llama-3.1-8b-instant".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "all-minilm-l6-v2".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/sessions.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30000),
            max_retries: env::var("MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            retry_delay_ms: env::var("RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
        };

        let thresholds = ThresholdConfig {
            similarity_threshold: env::var("SIMILARITY_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.85),
            memory_risk_boost: env::var("MEMORY_RISK_BOOST")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.3),
            memory_decay_days: env::var("MEMORY_DECAY_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(90),
            memory_max_records: env::var("MEMORY_MAX_RECORDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),
            memory_path: Some(PathBuf::from(
                env::var("THREAT_MEMORY_PATH")
                    .unwrap_or_else(|_| "./data/threat_memory.json".to_string()),
            )),
            critic_confidence_threshold: env::var("CRITIC_CONFIDENCE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.8),
            sanitization_enabled: env::var("ENABLE_SANITIZATION")
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(true),
            max_session_turns: env::var("MAX_SESSION_TURNS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        };

        Ok(Config {
            collaborator,
            database,
            logging,
            request,
            thresholds,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            memory_risk_boost: 0.3,
            memory_decay_days: 90,
            memory_max_records: 10_000,
            memory_path: None,
            critic_confidence_threshold: 0.8,
            sanitization_enabled: true,
            max_session_turns: 10,
        }
    }
}
