use serde::{Deserialize, Serialize};

use crate::verdict::{Action, AttackType, Classification, DomainScope, Verdict};

/// Message in a chat-completion conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who is speaking.
    pub role: ChatRole,
    /// Message body.
    pub content: String,
}

/// Chat message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instruction context.
    System,
    /// End-user content.
    User,
    /// Model output.
    Assistant,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Request body for a chat completion
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion length cap.
    pub max_tokens: u32,
}

/// Response body from a chat completion
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Completion choices; the first one is used.
    pub choices: Vec<ChatChoice>,
}

/// One completion choice
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    /// The generated message.
    pub message: ChatCompletionMessage,
}

/// Generated message content
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionMessage {
    /// Completion text.
    pub content: String,
}

/// Request body for an embedding call
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    /// Model identifier.
    pub model: String,
    /// Text to embed.
    pub input: String,
}

/// Response body from an embedding call
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    /// One entry per input.
    pub data: Vec<EmbeddingData>,
}

/// One embedding vector
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    /// Fixed-length vector.
    pub embedding: Vec<f32>,
}

/// One prior turn of conversation supplied as classifier context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    /// "user" or "assistant".
    pub role: String,
    /// Turn text.
    pub content: String,
    /// Risk score assigned to the turn when it was processed.
    pub risk_score: f64,
}

impl HistoryTurn {
    /// Convenience constructor for a user turn.
    pub fn user(content: impl Into<String>, risk_score: f64) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            risk_score,
        }
    }
}

/// Critic assessment of an initial verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    /// Whether the critic stands behind the initial decision.
    #[serde(default = "default_true")]
    pub agrees_with_decision: bool,
    /// One-sentence assessment.
    #[serde(default)]
    pub critic_reasoning: String,
    /// Replacement action, when the critic disagrees.
    #[serde(default)]
    pub suggested_action: Option<Action>,
    /// Replacement risk score, when the critic disagrees.
    #[serde(default)]
    pub suggested_risk_score: Option<f64>,
    /// A legitimate query was wrongly flagged.
    #[serde(default)]
    pub false_positive_detected: bool,
    /// An attack was wrongly allowed.
    #[serde(default)]
    pub false_negative_detected: bool,
    /// Bounded confidence delta (-0.2 to +0.2 by convention).
    #[serde(default)]
    pub confidence_adjustment: f64,
}

fn default_true() -> bool {
    true
}

impl Critique {
    /// Neutral critique used when the critic's output cannot be parsed:
    /// agree with the original decision and change nothing.
    pub fn agree(reasoning: impl Into<String>) -> Self {
        Self {
            agrees_with_decision: true,
            critic_reasoning: reasoning.into(),
            suggested_action: None,
            suggested_risk_score: None,
            false_positive_detected: false,
            false_negative_detected: false,
            confidence_adjustment: 0.0,
        }
    }
}

/// Classifier verdict as emitted by the model, with defaults for any field
/// the completion omits.
#[derive(Debug, Clone, Deserialize)]
struct VerdictPayload {
    #[serde(default)]
    classification: Classification,
    #[serde(default)]
    action: Action,
    #[serde(default)]
    attack_type: AttackType,
    #[serde(default)]
    domain_scope: DomainScope,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    explanation: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    risk_score: f64,
}

fn default_confidence() -> f64 {
    0.5
}

/// Pull the first JSON object out of a completion, tolerating code fences
/// and prose around it.
fn extract_json(completion: &str) -> Option<&str> {
    let stripped = completion.trim();
    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&stripped[start..=end])
}

/// Parse a classifier completion into a [`Verdict`]. Malformed output is
/// treated the same as collaborator unavailability: safe default.
pub fn parse_verdict(completion: &str) -> Verdict {
    if let Some(json) = extract_json(completion) {
        if let Ok(payload) = serde_json::from_str::<VerdictPayload>(json) {
            return Verdict {
                classification: payload.classification,
                action: payload.action,
                attack_type: payload.attack_type,
                domain_scope: payload.domain_scope,
                reasoning: payload.reasoning,
                explanation: payload.explanation,
                confidence: payload.confidence.clamp(0.0, 1.0),
                risk_score: payload.risk_score.clamp(0.0, 1.0),
            };
        }
    }
    Verdict::safe_default("Parse error, defaulting to safe")
}

/// Parse a critic completion. Malformed output keeps the initial decision.
pub fn parse_critique(completion: &str) -> Critique {
    if let Some(json) = extract_json(completion) {
        if let Ok(critique) = serde_json::from_str::<Critique>(json) {
            return critique;
        }
    }
    Critique::agree("Parse error - keeping original decision")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict_plain_json() {
        let v = parse_verdict(
            r#"{"classification":"MALICIOUS","action":"BLOCK","attack_type":"JAILBREAK","domain_scope":"MALICIOUS","reasoning":"override attempt","explanation":"blocked","confidence":0.95,"risk_score":0.9}"#,
        );
        assert_eq!(v.classification, Classification::Malicious);
        assert_eq!(v.action, Action::Block);
        assert_eq!(v.attack_type, AttackType::Jailbreak);
        assert!((v.risk_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_parse_verdict_code_fenced() {
        let v = parse_verdict(
            "```json\n{\"classification\":\"SAFE\",\"action\":\"ALLOW\",\"confidence\":0.9}\n```",
        );
        assert_eq!(v.classification, Classification::Safe);
        assert_eq!(v.action, Action::Allow);
        // Omitted fields default
        assert_eq!(v.attack_type, AttackType::None);
        assert_eq!(v.risk_score, 0.0);
    }

    #[test]
    fn test_parse_verdict_garbage_defaults_safe() {
        let v = parse_verdict("I'm sorry, I can't classify that.");
        assert_eq!(v.classification, Classification::Safe);
        assert_eq!(v.action, Action::Allow);
        assert!((v.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_verdict_clamps_scores() {
        let v = parse_verdict(r#"{"confidence": 1.7, "risk_score": -0.3}"#);
        assert_eq!(v.confidence, 1.0);
        assert_eq!(v.risk_score, 0.0);
    }

    #[test]
    fn test_parse_critique_disagreement() {
        let c = parse_critique(
            r#"{"agrees_with_decision":false,"critic_reasoning":"legitimate query","suggested_action":"ALLOW","suggested_risk_score":0.1,"false_positive_detected":true,"confidence_adjustment":0.15}"#,
        );
        assert!(!c.agrees_with_decision);
        assert_eq!(c.suggested_action, Some(Action::Allow));
        assert!(c.false_positive_detected);
    }

    #[test]
    fn test_parse_critique_garbage_agrees() {
        let c = parse_critique("no json here");
        assert!(c.agrees_with_decision);
        assert!(c.suggested_action.is_none());
        assert_eq!(c.confidence_adjustment, 0.0);
    }
}
