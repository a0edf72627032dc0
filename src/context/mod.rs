//! Multi-turn conversation context engine.
//!
//! Stores the last N turns per session and computes a recency-weighted
//! cumulative risk score used to catch slow-burn attacks, where no single
//! message is malicious but the trajectory is.

mod store;

pub use store::{SessionTurn, SqliteTurnStore};

use std::path::Path;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageResult;

/// Base recency weight for the oldest turn in the window.
const RECENCY_BASE: f64 = 0.7;
/// Per-position recency weight increment.
const RECENCY_STEP: f64 = 0.03;
/// Per-suspicion-turn session amplifier increment.
const AMPLIFIER_STEP: f64 = 0.15;
/// Per-turn risk at or above this counts toward the session amplifier.
const AMPLIFIER_TURN_RISK: f64 = 0.3;
/// Cumulative risk at or above this marks the session suspicious.
const SUSPICIOUS_SESSION_RISK: f64 = 0.4;

static PERSONA_SHIFT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(pretend|roleplay|act as|you are now|stay in character|as a \w+ bot|unrestricted)\b",
    )
    .expect("persona shift regex")
});

static RESTRICTION_PROBE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(what are you allowed to|what can you not|list your rules|policy|alignment|safety filter)\b",
    )
    .expect("restriction probe regex")
});

static PRIV_ESCALATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(admin|administrator|root|superuser|developer mode|internal tools|privileged)\b",
    )
    .expect("privilege escalation regex")
});

// Content ladder for slow-burn scoring, checked most severe first.
static SB_REAL_DB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(real\s+one|real\s+record|from\s+your\s+db|from\s+the\s+db|database\s+record)\b",
    )
    .expect("real db regex")
});
static SB_EXAMPLE_RECORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bexample\s+record\b|\bdummy\s+example\b").expect("example record regex")
});
static SB_TXN_FORMAT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bformat\b.*\btransaction\s+data\b|\biso\s*8583\b")
        .expect("transaction format regex")
});
static SB_DATA_STORAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bstore\b.*\bcustomer\s+data\b|\bcustomer\s+data\s+storage\b")
        .expect("data storage regex")
});
static SB_SAVINGS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsavings\s+account\b").expect("savings regex"));

/// Slow-burn heuristics the context engine can flag across a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlowBurnFlag {
    /// Two or more turns building up a persona or roleplay frame.
    GradualPersonaShift,
    /// Two or more turns probing rules, policy, or safety behavior.
    RepeatedRestrictionProbing,
    /// Two or more turns requesting elevated access.
    EscalatingPrivilegeRequests,
    /// The thread mixes restriction probing with privilege keywords.
    ProbePlusEscalation,
}

impl std::fmt::Display for SlowBurnFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::GradualPersonaShift => "gradual_persona_shift",
            Self::RepeatedRestrictionProbing => "repeated_restriction_probing",
            Self::EscalatingPrivilegeRequests => "escalating_privilege_requests",
            Self::ProbePlusEscalation => "probe_plus_escalation",
        };
        f.write_str(s)
    }
}

/// Result of evaluating session context for the current message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextResult {
    /// Recency-weighted cumulative risk across the session, capped at 1.0.
    pub cumulative_risk_score: f64,
    /// Slow-burn heuristics that fired.
    pub slow_burn_flags: Vec<SlowBurnFlag>,
    /// Whether the session as a whole warrants a user-facing warning.
    pub suspicious_session: bool,
}

/// Deterministic per-turn risk estimate for slow-burn detection.
///
/// This is a context signal, not a full security classification. The ladder
/// is checked most severe first and short-circuits.
pub fn score_slow_burn(text: &str) -> f64 {
    let t = text.trim();
    if t.is_empty() {
        return 0.0;
    }

    if SB_REAL_DB_RE.is_match(t) {
        return 0.90;
    }
    if SB_EXAMPLE_RECORD_RE.is_match(t) {
        return 0.50;
    }
    if SB_TXN_FORMAT_RE.is_match(t) {
        return 0.30;
    }
    if SB_DATA_STORAGE_RE.is_match(t) {
        return 0.20;
    }
    if SB_SAVINGS_RE.is_match(t) {
        return 0.0;
    }

    if PRIV_ESCALATION_RE.is_match(t) {
        return 0.60;
    }
    if RESTRICTION_PROBE_RE.is_match(t) || PERSONA_SHIFT_RE.is_match(t) {
        return 0.40;
    }

    0.0
}

/// Compute cumulative session risk from stored turns plus the current
/// message. Pure over its inputs; the tracker supplies the turns.
pub fn evaluate_context(turns: &[SessionTurn], current_text: &str) -> ContextResult {
    let mut total = 0.0;
    for (i, turn) in turns.iter().enumerate() {
        let recency = RECENCY_BASE + RECENCY_STEP * i as f64;
        total += turn.risk_score * recency;
    }

    if !current_text.is_empty() {
        let recency = RECENCY_BASE + RECENCY_STEP * turns.len() as f64;
        total += score_slow_burn(current_text) * recency;
    }

    let suspicious_turns = turns
        .iter()
        .filter(|t| t.risk_score >= AMPLIFIER_TURN_RISK)
        .count();
    let amplifier = 1.0 + AMPLIFIER_STEP * suspicious_turns as f64;
    let mut cumulative = (total * amplifier).min(1.0);

    let texts: Vec<&str> = turns
        .iter()
        .map(|t| t.user_message.as_str())
        .chain(std::iter::once(current_text))
        .collect();
    let joined = texts.join("\n");

    let mut flags = Vec::new();

    let persona_hits = texts.iter().filter(|t| PERSONA_SHIFT_RE.is_match(t)).count();
    if persona_hits >= 2 {
        flags.push(SlowBurnFlag::GradualPersonaShift);
        cumulative = (cumulative + 0.20).min(1.0);
    }

    let probe_hits = texts
        .iter()
        .filter(|t| RESTRICTION_PROBE_RE.is_match(t))
        .count();
    if probe_hits >= 2 {
        flags.push(SlowBurnFlag::RepeatedRestrictionProbing);
        cumulative = (cumulative + 0.20).min(1.0);
    }

    let priv_hits = texts
        .iter()
        .filter(|t| PRIV_ESCALATION_RE.is_match(t))
        .count();
    if priv_hits >= 2 {
        flags.push(SlowBurnFlag::EscalatingPrivilegeRequests);
        cumulative = (cumulative + 0.25).min(1.0);
    }

    if RESTRICTION_PROBE_RE.is_match(&joined) && PRIV_ESCALATION_RE.is_match(&joined) {
        flags.push(SlowBurnFlag::ProbePlusEscalation);
        cumulative = (cumulative + 0.10).min(1.0);
    }

    ContextResult {
        cumulative_risk_score: cumulative,
        slow_burn_flags: flags,
        suspicious_session: cumulative >= SUSPICIOUS_SESSION_RISK,
    }
}

/// Session turn tracker backed by SQLite, bounded to the last N turns.
pub struct ConversationTracker {
    store: SqliteTurnStore,
    max_turns: i64,
}

impl ConversationTracker {
    /// Open the tracker database at `path`.
    pub async fn new(path: &Path, max_connections: u32, max_turns: u32) -> StorageResult<Self> {
        let store = SqliteTurnStore::new(path, max_connections).await?;
        Ok(Self {
            store,
            max_turns: i64::from(max_turns),
        })
    }

    /// In-memory tracker, used by tests and as a fallback when the
    /// on-disk database cannot be opened.
    pub async fn new_in_memory(max_turns: u32) -> StorageResult<Self> {
        let store = SqliteTurnStore::new_in_memory().await?;
        Ok(Self {
            store,
            max_turns: i64::from(max_turns),
        })
    }

    /// Record a turn. Empty session ids are ignored.
    pub async fn record_turn(
        &self,
        session_id: &str,
        tenant_id: &str,
        user_message: &str,
        risk_score: f64,
    ) -> StorageResult<()> {
        let sid = session_id.trim();
        if sid.is_empty() {
            return Ok(());
        }
        let tenant = if tenant_id.trim().is_empty() {
            "default"
        } else {
            tenant_id
        };
        self.store
            .insert_turn(sid, tenant, user_message, risk_score, self.max_turns)
            .await
    }

    /// Last turns for a session, oldest first.
    pub async fn recent_turns(&self, session_id: &str) -> StorageResult<Vec<SessionTurn>> {
        let sid = session_id.trim();
        if sid.is_empty() {
            return Ok(Vec::new());
        }
        self.store.recent_turns(sid, self.max_turns).await
    }

    /// Evaluate session context for the current message.
    pub async fn evaluate(&self, session_id: &str, current_text: &str) -> StorageResult<ContextResult> {
        let sid = session_id.trim();
        if sid.is_empty() {
            return Ok(ContextResult::default());
        }
        let turns = self.store.recent_turns(sid, self.max_turns).await?;
        let result = evaluate_context(&turns, current_text);
        debug!(
            session_id = sid,
            cumulative_risk = result.cumulative_risk_score,
            flags = result.slow_burn_flags.len(),
            "Evaluated session context"
        );
        Ok(result)
    }

    /// Drop all turns for a session.
    pub async fn clear_session(&self, session_id: &str) -> StorageResult<u64> {
        self.store.clear_session(session_id).await
    }

    /// Drop turns across all sessions older than `cutoff`.
    pub async fn sweep_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        self.store.sweep_before(cutoff).await
    }
}
