//! Multi-turn attack chain detection.
//!
//! Tracks per-session turn history in memory and runs four escalation
//! detectors over the recent window: intent evolution, privilege escalation,
//! semantic drift, and risk escalation. Fired patterns combine into a single
//! escalation score that grows superlinearly with the number of patterns.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::verdict::{AttackType, Classification, Severity};

/// Stored turn text is truncated to this many characters.
const TURN_TEXT_CHARS: usize = 200;
/// Graph node previews are truncated to this many characters.
const NODE_PREVIEW_CHARS: usize = 50;
/// Detectors inspect at most this many trailing turns.
const RECENT_WINDOW: usize = 5;
/// Semantic drift inspects a slightly wider window.
const DRIFT_WINDOW: usize = 6;

/// A single turn in a tracked session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnNode {
    /// 1-based position within the session.
    pub turn_number: u32,
    /// Truncated message text.
    pub text: String,
    /// Classifier-assigned intent label.
    pub intent: String,
    /// Final risk score for the turn.
    pub risk_score: f64,
    /// Final classification for the turn.
    pub classification: Classification,
    /// Attack taxonomy entry for the turn.
    pub attack_type: AttackType,
    /// When the turn was added.
    pub timestamp: DateTime<Utc>,
}

/// Escalation pattern families the detectors can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Innocent opening turns evolving into a malicious close.
    IntentEvolution,
    /// Repeated privilege keywords across recent turns.
    PrivilegeEscalation,
    /// Topic churn combined with rising risk.
    SemanticDrift,
    /// Consistent risk increase with a large net delta.
    RiskEscalation,
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::IntentEvolution => "intent_evolution",
            Self::PrivilegeEscalation => "privilege_escalation",
            Self::SemanticDrift => "semantic_drift",
            Self::RiskEscalation => "risk_escalation",
        };
        f.write_str(s)
    }
}

/// A detected escalation pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPattern {
    /// Which detector fired.
    pub pattern_type: PatternType,
    /// Severity assigned by the detector.
    pub severity: Severity,
    /// Human-readable description.
    pub description: String,
    /// Turn numbers that contributed.
    pub turns_involved: Vec<u32>,
}

/// Node in the attack graph: a turn, trimmed for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Turn number.
    pub id: u32,
    /// Text preview, truncated with an ellipsis.
    pub text: String,
    /// Intent label.
    pub intent: String,
    /// Risk score rounded to 2 decimals.
    pub risk: f64,
    /// Classification for the turn.
    pub classification: Classification,
    /// Attack type for the turn.
    pub attack_type: AttackType,
}

/// Directed edge between consecutive turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source turn number.
    pub from: u32,
    /// Target turn number.
    pub to: u32,
    /// Risk change between the turns, rounded to 2 decimals.
    pub risk_delta: f64,
    /// Whether the step counts as an escalation (delta above 0.2).
    pub escalation: bool,
}

/// Turn-by-turn view of a session for explanation output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttackGraph {
    /// One node per tracked turn.
    pub nodes: Vec<GraphNode>,
    /// Edges between consecutive turns.
    pub edges: Vec<GraphEdge>,
}

/// Result of analyzing a session after adding a turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainAnalysis {
    /// Whether any pattern fired.
    pub escalation_detected: bool,
    /// Combined escalation score in 0..=1.
    pub escalation_score: f64,
    /// Graph over the tracked turns.
    pub attack_graph: AttackGraph,
    /// Patterns that fired.
    pub patterns: Vec<EscalationPattern>,
    /// Turns currently tracked for the session.
    pub turn_count: usize,
}

/// Summary of one session's chain state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier.
    pub session_id: String,
    /// Turns currently tracked.
    pub turn_count: usize,
    /// First tracked turn timestamp.
    pub first_turn: Option<DateTime<Utc>>,
    /// Last tracked turn timestamp.
    pub last_turn: Option<DateTime<Utc>>,
    /// Highest risk score across the turns.
    pub max_risk: f64,
    /// Mean risk score across the turns.
    pub avg_risk: f64,
    /// Whether escalation was detected.
    pub escalation_detected: bool,
    /// Combined escalation score.
    pub escalation_score: f64,
    /// Detected patterns.
    pub patterns: Vec<EscalationPattern>,
}

const PRIVILEGE_KEYWORDS: &[&str] = &[
    "admin",
    "administrator",
    "root",
    "sudo",
    "developer",
    "test",
    "demo",
    "debug",
    "authorized",
    "special access",
];

/// In-memory per-session escalation analyzer.
pub struct EscalationGraphAnalyzer {
    sessions: Mutex<HashMap<String, Vec<TurnNode>>>,
    max_history: usize,
}

impl EscalationGraphAnalyzer {
    /// Analyzer keeping at most `max_history` turns per session.
    pub fn new(max_history: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_history,
        }
    }

    /// Add a turn for the session and analyze the resulting chain.
    pub async fn add_turn(
        &self,
        session_id: &str,
        text: &str,
        intent: &str,
        risk_score: f64,
        classification: Classification,
        attack_type: AttackType,
    ) -> ChainAnalysis {
        let mut sessions = self.sessions.lock().await;
        let turns = sessions.entry(session_id.to_string()).or_default();

        let turn = TurnNode {
            turn_number: turns.last().map(|t| t.turn_number).unwrap_or(0) + 1,
            text: text.chars().take(TURN_TEXT_CHARS).collect(),
            intent: intent.to_string(),
            risk_score,
            classification,
            attack_type,
            timestamp: Utc::now(),
        };
        turns.push(turn);

        if turns.len() > self.max_history {
            let excess = turns.len() - self.max_history;
            turns.drain(..excess);
        }

        let analysis = analyze_chain(turns);
        if analysis.escalation_detected {
            info!(
                session_id,
                escalation_score = analysis.escalation_score,
                patterns = analysis.patterns.len(),
                "Attack chain escalation detected"
            );
        } else {
            debug!(session_id, turns = turns.len(), "Chain analysis clean");
        }
        analysis
    }

    /// Summarize a session's chain state, or `None` if untracked.
    pub async fn session_summary(&self, session_id: &str) -> Option<SessionSummary> {
        let sessions = self.sessions.lock().await;
        let turns = sessions.get(session_id)?;
        let analysis = analyze_chain(turns);

        let max_risk = turns.iter().map(|t| t.risk_score).fold(0.0, f64::max);
        let avg_risk = if turns.is_empty() {
            0.0
        } else {
            turns.iter().map(|t| t.risk_score).sum::<f64>() / turns.len() as f64
        };

        Some(SessionSummary {
            session_id: session_id.to_string(),
            turn_count: turns.len(),
            first_turn: turns.first().map(|t| t.timestamp),
            last_turn: turns.last().map(|t| t.timestamp),
            max_risk,
            avg_risk,
            escalation_detected: analysis.escalation_detected,
            escalation_score: analysis.escalation_score,
            patterns: analysis.patterns,
        })
    }

    /// Drop a session's tracked turns.
    pub async fn clear_session(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }

    /// Drop sessions whose last turn is older than the idle window.
    /// Returns the number of sessions removed.
    pub async fn sweep_idle(&self, idle: Duration) -> usize {
        let cutoff = Utc::now() - idle;
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, turns| turns.last().is_some_and(|t| t.timestamp >= cutoff));
        before - sessions.len()
    }

    /// Number of currently tracked sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

impl Default for EscalationGraphAnalyzer {
    fn default() -> Self {
        Self::new(10)
    }
}

fn analyze_chain(turns: &[TurnNode]) -> ChainAnalysis {
    if turns.len() < 2 {
        return ChainAnalysis {
            attack_graph: build_graph(turns),
            turn_count: turns.len(),
            ..Default::default()
        };
    }

    let mut patterns = Vec::new();
    if let Some(p) = detect_intent_evolution(turns) {
        patterns.push(p);
    }
    if let Some(p) = detect_privilege_escalation(turns) {
        patterns.push(p);
    }
    if let Some(p) = detect_semantic_drift(turns) {
        patterns.push(p);
    }
    if let Some(p) = detect_risk_escalation(turns) {
        patterns.push(p);
    }

    let escalation_score = escalation_score(&patterns, turns.len());

    ChainAnalysis {
        escalation_detected: !patterns.is_empty(),
        escalation_score,
        attack_graph: build_graph(turns),
        patterns,
        turn_count: turns.len(),
    }
}

fn recent(turns: &[TurnNode], window: usize) -> &[TurnNode] {
    let start = turns.len().saturating_sub(window);
    &turns[start..]
}

/// Innocent start, malicious end, with a gradual risk transition in between.
fn detect_intent_evolution(turns: &[TurnNode]) -> Option<EscalationPattern> {
    if turns.len() < 3 {
        return None;
    }
    let recent = recent(turns, RECENT_WINDOW);

    let first = recent.first()?;
    let last = recent.last()?;
    let innocent_start = matches!(
        first.classification,
        Classification::Safe | Classification::RequiresAuth
    );
    if !innocent_start || last.classification != Classification::Malicious {
        return None;
    }

    // Gradual: no turn drops more than 0.2 below its successor.
    let gradual = recent
        .windows(2)
        .all(|w| w[0].risk_score <= w[1].risk_score + 0.2);
    if !gradual {
        return None;
    }

    Some(EscalationPattern {
        pattern_type: PatternType::IntentEvolution,
        severity: Severity::High,
        description: format!(
            "Intent evolved from {} to {}",
            first.classification, last.classification
        ),
        turns_involved: recent.iter().map(|t| t.turn_number).collect(),
    })
}

/// Two or more recent turns carrying privilege keywords.
fn detect_privilege_escalation(turns: &[TurnNode]) -> Option<EscalationPattern> {
    let recent = recent(turns, RECENT_WINDOW);

    let escalation_turns: Vec<u32> = recent
        .iter()
        .filter(|t| {
            let lower = t.text.to_lowercase();
            PRIVILEGE_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .map(|t| t.turn_number)
        .collect();

    if escalation_turns.len() < 2 {
        return None;
    }

    Some(EscalationPattern {
        pattern_type: PatternType::PrivilegeEscalation,
        severity: Severity::Critical,
        description: format!(
            "Privilege escalation attempts in {} turns",
            escalation_turns.len()
        ),
        turns_involved: escalation_turns,
    })
}

/// Three or more distinct intents in the window with rising risk.
fn detect_semantic_drift(turns: &[TurnNode]) -> Option<EscalationPattern> {
    if turns.len() < 4 {
        return None;
    }
    let recent = recent(turns, DRIFT_WINDOW);

    let mut seen: Vec<&str> = Vec::new();
    for turn in recent {
        if !seen.contains(&turn.intent.as_str()) {
            seen.push(&turn.intent);
        }
    }
    if seen.len() < 3 {
        return None;
    }

    let first_risk = recent.first()?.risk_score;
    let last_risk = recent.last()?.risk_score;
    if last_risk <= first_risk + 0.3 {
        return None;
    }

    Some(EscalationPattern {
        pattern_type: PatternType::SemanticDrift,
        severity: Severity::Medium,
        description: format!(
            "Topic drifted across {} intents with increasing risk",
            seen.len()
        ),
        turns_involved: recent.iter().map(|t| t.turn_number).collect(),
    })
}

/// Mostly increasing risk with a net delta above 0.4.
fn detect_risk_escalation(turns: &[TurnNode]) -> Option<EscalationPattern> {
    if turns.len() < 3 {
        return None;
    }
    let recent = recent(turns, RECENT_WINDOW);

    let increases = recent
        .windows(2)
        .filter(|w| w[1].risk_score > w[0].risk_score)
        .count();
    if increases + 2 < recent.len() {
        return None;
    }

    let delta = recent.last()?.risk_score - recent.first()?.risk_score;
    if delta <= 0.4 {
        return None;
    }

    Some(EscalationPattern {
        pattern_type: PatternType::RiskEscalation,
        severity: Severity::High,
        description: format!("Risk increased by {:.2} over {} turns", delta, recent.len()),
        turns_involved: recent.iter().map(|t| t.turn_number).collect(),
    })
}

/// Combine fired patterns into a 0..=1 score. Grows superlinearly with the
/// pattern count, scaled by mean severity weight and session length.
fn escalation_score(patterns: &[EscalationPattern], turn_count: usize) -> f64 {
    if patterns.is_empty() {
        return 0.0;
    }

    let n = patterns.len() as f64;
    let base = 1.0 - 1.0 / (1.0 + n * n);
    let severity = patterns.iter().map(|p| p.severity.weight()).sum::<f64>() / n;
    let turn_factor = (turn_count as f64 / 10.0).min(1.0);

    (base * severity * (1.0 + turn_factor)).min(1.0)
}

fn build_graph(turns: &[TurnNode]) -> AttackGraph {
    let mut graph = AttackGraph::default();

    for (i, turn) in turns.iter().enumerate() {
        let preview = if turn.text.chars().count() > NODE_PREVIEW_CHARS {
            let head: String = turn.text.chars().take(NODE_PREVIEW_CHARS).collect();
            format!("{head}...")
        } else {
            turn.text.clone()
        };
        graph.nodes.push(GraphNode {
            id: turn.turn_number,
            text: preview,
            intent: turn.intent.clone(),
            risk: round2(turn.risk_score),
            classification: turn.classification,
            attack_type: turn.attack_type,
        });

        if let Some(next) = turns.get(i + 1) {
            let delta = next.risk_score - turn.risk_score;
            graph.edges.push(GraphEdge {
                from: turn.turn_number,
                to: next.turn_number,
                risk_delta: round2(delta),
                escalation: delta > 0.2,
            });
        }
    }

    graph
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
