//! Application composition root.
//!
//! [`GuardState`] wires the collaborator clients, threat memory, session
//! tracker, chain analyzer, and pipeline together from one [`Config`] and
//! exposes the message-level entry point [`GuardState::process_message`].

use std::sync::Arc;

use chrono::Duration;
use tracing::{error, info, warn};

use crate::chain::{EscalationGraphAnalyzer, SessionSummary};
use crate::collaborator::{ClassifierClient, CriticClient, EmbeddingClient, HistoryTurn};
use crate::config::Config;
use crate::context::{score_slow_burn, ContextResult, ConversationTracker, SessionTurn};
use crate::error::AppResult;
use crate::memory::{MemoryConfig, MemoryStats, ThreatMemoryStore};
use crate::pipeline::{Decision, DecisionOrchestrator, PipelineConfig};

/// Everything produced for one processed message.
#[derive(Debug, Clone)]
pub struct GuardOutcome {
    /// Full pipeline decision.
    pub decision: Decision,
    /// Session-context evaluation for the message.
    pub context: ContextResult,
}

/// Shared application state: every pipeline stage behind one handle.
pub struct GuardState {
    orchestrator: DecisionOrchestrator,
    memory: Arc<ThreatMemoryStore>,
    tracker: ConversationTracker,
    chain: Arc<EscalationGraphAnalyzer>,
}

impl GuardState {
    /// Build the full stack from configuration. A failure to open the
    /// session database falls back to an in-memory store; only HTTP client
    /// construction and in-memory migration failures propagate.
    pub async fn new(config: Config) -> AppResult<Self> {
        let classifier = Arc::new(ClassifierClient::new(
            &config.collaborator,
            config.request.clone(),
        )?);
        let critic = Arc::new(CriticClient::new(
            &config.collaborator,
            config.request.clone(),
        )?);
        let embedder = Arc::new(EmbeddingClient::new(
            &config.collaborator,
            config.request.clone(),
        )?);

        let memory = Arc::new(ThreatMemoryStore::new(
            embedder,
            MemoryConfig {
                path: config.thresholds.memory_path.clone(),
                similarity_threshold: config.thresholds.similarity_threshold,
                decay_days: config.thresholds.memory_decay_days,
                max_records: config.thresholds.memory_max_records,
            },
        ));

        let max_turns = config.thresholds.max_session_turns as u32;
        let tracker = match ConversationTracker::new(
            &config.database.path,
            config.database.max_connections,
            max_turns,
        )
        .await
        {
            Ok(tracker) => tracker,
            Err(e) => {
                warn!(error = %e, path = %config.database.path.display(),
                    "Session database unavailable, falling back to in-memory");
                ConversationTracker::new_in_memory(max_turns).await?
            }
        };

        let chain = Arc::new(EscalationGraphAnalyzer::new(
            config.thresholds.max_session_turns,
        ));

        let orchestrator = DecisionOrchestrator::new(
            Arc::clone(&memory),
            classifier,
            critic,
            Arc::clone(&chain),
            PipelineConfig {
                similarity_threshold: config.thresholds.similarity_threshold,
                memory_risk_boost: config.thresholds.memory_risk_boost,
                critic_confidence_threshold: config.thresholds.critic_confidence_threshold,
                sanitization_enabled: config.thresholds.sanitization_enabled,
            },
        );

        info!("Guard state initialized");
        Ok(Self {
            orchestrator,
            memory,
            tracker,
            chain,
        })
    }

    /// Process one message end to end: evaluate session context, run the
    /// decision pipeline, and record the turn. Storage failures while
    /// reading or recording turns are logged and degrade gracefully; the
    /// decision itself never fails.
    pub async fn process_message(
        &self,
        session_id: &str,
        tenant_id: &str,
        text: &str,
    ) -> GuardOutcome {
        let turns: Vec<SessionTurn> = match self.tracker.recent_turns(session_id).await {
            Ok(turns) => turns,
            Err(e) => {
                error!(error = %e, session_id, "Failed to load session turns");
                Vec::new()
            }
        };

        let context = crate::context::evaluate_context(&turns, text);

        let history: Vec<HistoryTurn> = turns
            .iter()
            .map(|t| HistoryTurn::user(t.user_message.clone(), t.risk_score))
            .collect();

        let decision = self.orchestrator.analyze(text, session_id, &history).await;

        if let Err(e) = self
            .tracker
            .record_turn(session_id, tenant_id, text, score_slow_burn(text))
            .await
        {
            error!(error = %e, session_id, "Failed to record session turn");
        }

        GuardOutcome { decision, context }
    }

    /// Drop all state for a session: tracked turns and chain history.
    pub async fn clear_session(&self, session_id: &str) {
        if let Err(e) = self.tracker.clear_session(session_id).await {
            error!(error = %e, session_id, "Failed to clear session turns");
        }
        self.chain.clear_session(session_id).await;
    }

    /// Drop chain state for sessions idle longer than `idle`, and session
    /// turns older than the same window. Returns swept chain sessions.
    pub async fn sweep_idle_sessions(&self, idle: Duration) -> usize {
        let swept = self.chain.sweep_idle(idle).await;
        if let Err(e) = self.tracker.sweep_before(chrono::Utc::now() - idle).await {
            error!(error = %e, "Failed to sweep old session turns");
        }
        if swept > 0 {
            info!(swept, "Swept idle sessions");
        }
        swept
    }

    /// Attack chain summary for a session.
    pub async fn session_summary(&self, session_id: &str) -> Option<SessionSummary> {
        self.chain.session_summary(session_id).await
    }

    /// Threat memory statistics.
    pub async fn memory_stats(&self) -> MemoryStats {
        self.memory.stats().await
    }
}
