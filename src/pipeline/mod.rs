//! The layered decision pipeline.
//!
//! Order of stages for one message:
//!
//! 1. threat memory search
//! 2. fast block rules (with a bounded sanitize-and-retry on a hit)
//! 3. semantic classification with session history
//! 4. threat memory risk boost and recording
//! 5. self-critic review for low-confidence verdicts
//! 6. sanitize-and-retry for borderline verdicts
//! 7. attack chain analysis and escalation re-scoring
//! 8. explainable decision assembly
//!
//! The pipeline never fails: collaborator outages degrade to the safe
//! default verdict and storage problems are logged and swallowed. A retry
//! after sanitization re-enters the pipeline exactly once; the nested pass
//! has sanitization and chain tracking disabled, so each message contributes
//! at most one turn to the session ledgers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chain::{ChainAnalysis, EscalationGraphAnalyzer};
use crate::collaborator::{Classifier, Critic, Critique, HistoryTurn};
use crate::explain::{explain, ExplainableDecision, ExplanationInput};
use crate::memory::{ThreatMatch, ThreatMemoryStore};
use crate::rules::FastRuleMatcher;
use crate::sanitizer::{sanitize, should_sanitize, Sanitization};
use crate::verdict::{Action, AttackType, Classification, Verdict};

/// Escalation score contribution to the final risk score.
const ESCALATION_RISK_WEIGHT: f64 = 0.5;
/// Boosted risk above this forces a session block.
const ESCALATION_BLOCK_RISK: f64 = 0.8;
/// History turns considered when computing mean session risk.
const SESSION_RISK_WINDOW: usize = 10;

/// Pipeline thresholds, a slice of the application config.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum decayed similarity for a threat-memory match.
    pub similarity_threshold: f64,
    /// Risk added to the verdict when threat memory matches.
    pub memory_risk_boost: f64,
    /// Confidence below which the critic is consulted.
    pub critic_confidence_threshold: f64,
    /// Whether sanitize-and-retry is attempted at all.
    pub sanitization_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            memory_risk_boost: 0.3,
            critic_confidence_threshold: 0.8,
            sanitization_enabled: true,
        }
    }
}

/// How the critic stage went.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CriticOutcome {
    /// Whether the critic was consulted.
    pub invoked: bool,
    /// The critic's assessment, when one was obtained.
    pub feedback: Option<Critique>,
    /// What the critic changed.
    pub delta: DecisionDelta,
}

/// Difference between the initial and the critic-adjusted verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionDelta {
    /// Whether the enforcement action changed.
    pub action_changed: bool,
    /// Risk score change, rounded to 3 decimals.
    pub risk_score_delta: f64,
    /// Confidence change, rounded to 3 decimals.
    pub confidence_delta: f64,
}

/// Record of a sanitize-and-retry attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizationOutcome {
    /// What was removed.
    pub sanitization: Sanitization,
    /// Whether the retried analysis came back allowable.
    pub successful: bool,
    /// For fast-rule rescues, what originally blocked the message.
    pub original_blocked_by: Option<AttackType>,
}

/// Full pipeline output for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique id for audit correlation across logs.
    pub decision_id: Uuid,
    /// Final verdict after all stages.
    pub verdict: Verdict,
    /// Threat record id: the matched one, or the newly recorded one.
    pub matched_attack_id: Option<String>,
    /// Threat memory similarity for this message.
    pub similarity_score: f64,
    /// Frequency of the matched threat record.
    pub historical_frequency: u32,
    /// Critic stage outcome.
    pub critic: CriticOutcome,
    /// Sanitization attempt, when one was made.
    pub sanitization: Option<SanitizationOutcome>,
    /// Whether the final verdict is for the sanitized text.
    pub was_sanitized: bool,
    /// Chain analysis, absent on fast-rule blocks and nested retries.
    pub attack_chain: Option<ChainAnalysis>,
    /// Layered explanation of the final decision.
    pub explainable: ExplainableDecision,
    /// Wall-clock pipeline latency in milliseconds.
    pub inference_ms: f64,
}

/// Runs every message through the layered pipeline.
pub struct DecisionOrchestrator {
    rules: FastRuleMatcher,
    memory: Arc<ThreatMemoryStore>,
    classifier: Arc<dyn Classifier>,
    critic: Arc<dyn Critic>,
    chain: Arc<EscalationGraphAnalyzer>,
    config: PipelineConfig,
}

impl DecisionOrchestrator {
    /// Assemble the orchestrator from its stage implementations.
    pub fn new(
        memory: Arc<ThreatMemoryStore>,
        classifier: Arc<dyn Classifier>,
        critic: Arc<dyn Critic>,
        chain: Arc<EscalationGraphAnalyzer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            rules: FastRuleMatcher::new(),
            memory,
            classifier,
            critic,
            chain,
            config,
        }
    }

    /// Analyze one message. Never fails.
    pub async fn analyze(&self, text: &str, session_id: &str, history: &[HistoryTurn]) -> Decision {
        self.run(text, session_id, history, 0).await
    }

    /// Boxed recursion point for the sanitize-and-retry re-entry. Depth 0 is
    /// the outer pass; depth 1 is the single nested pass with sanitization
    /// and chain tracking disabled.
    fn run<'a>(
        &'a self,
        text: &'a str,
        session_id: &'a str,
        history: &'a [HistoryTurn],
        depth: u8,
    ) -> Pin<Box<dyn Future<Output = Decision> + Send + 'a>> {
        Box::pin(async move {
            let start = Instant::now();
            let outer = depth == 0;

            let memory_match = self.memory.search(text).await;

            // Stage: fast rules.
            if let Some(hit) = self.rules.check(text) {
                if outer && self.config.sanitization_enabled {
                    if let Some(decision) = self
                        .retry_sanitized(text, session_id, history, AttackType::FastRule)
                        .await
                    {
                        return decision;
                    }
                }

                let attack_id = self.memory.record(text, AttackType::FastRule, session_id).await;
                info!(session_id, pattern = hit.pattern, "Fast rule block");

                let explainable = explain(&ExplanationInput {
                    classification: hit.verdict.classification,
                    action: hit.verdict.action,
                    attack_type: hit.verdict.attack_type,
                    domain_scope: hit.verdict.domain_scope,
                    reasoning: &hit.verdict.reasoning,
                    confidence: hit.verdict.confidence,
                    risk_score: hit.verdict.risk_score,
                    text,
                    memory_similarity: 0.0,
                    session_risk: 0.0,
                });

                return Decision {
                    decision_id: Uuid::new_v4(),
                    verdict: hit.verdict,
                    matched_attack_id: Some(attack_id),
                    similarity_score: memory_match.similarity_score,
                    historical_frequency: memory_match.historical_frequency,
                    critic: CriticOutcome::default(),
                    sanitization: None,
                    was_sanitized: false,
                    attack_chain: None,
                    explainable,
                    inference_ms: elapsed_ms(start),
                };
            }

            // Stage: semantic classification.
            let mut verdict = match self.classifier.classify(text, history).await {
                Ok(v) => v,
                Err(e) => {
                    error!(error = %e, "Classifier unavailable, defaulting safe");
                    Verdict::safe_default(format!("Classifier error, defaulting safe: {e}"))
                }
            };

            // Stage: threat memory boost.
            if memory_match.similarity_score >= self.config.similarity_threshold {
                verdict.risk_score =
                    (verdict.risk_score + self.config.memory_risk_boost).min(1.0);
                verdict.reasoning = format!(
                    "Threat memory matched (score={:.2}). {}",
                    memory_match.similarity_score, verdict.reasoning
                );
            }

            let matched_attack_id = if verdict.classification == Classification::Malicious
                || verdict.action == Action::Block
            {
                Some(
                    self.memory
                        .record(text, verdict.attack_type, session_id)
                        .await,
                )
            } else {
                memory_match.matched_attack_id.clone()
            };

            // Stage: self-critic review.
            let critic = self.run_critic(text, &mut verdict).await;

            // Stage: sanitize-and-retry for borderline verdicts.
            let mut sanitization: Option<SanitizationOutcome> = None;
            if outer
                && self.config.sanitization_enabled
                && should_sanitize(verdict.classification, verdict.action, verdict.risk_score)
            {
                match self.retry_sanitized(text, session_id, history, verdict.attack_type).await {
                    Some(mut decision) => {
                        // Chain tracking was skipped in the nested pass; run
                        // it here against the final verdict.
                        self.apply_chain_stage(text, session_id, &memory_match, history, &mut decision)
                            .await;
                        return decision;
                    }
                    None => {
                        let attempt = sanitize(text);
                        if attempt.was_sanitized {
                            sanitization = Some(SanitizationOutcome {
                                sanitization: attempt,
                                successful: false,
                                original_blocked_by: None,
                            });
                        }
                    }
                }
            }

            // Stage: attack chain analysis (outer pass only).
            let attack_chain = if outer {
                Some(self.chain_analysis(text, session_id, &mut verdict).await)
            } else {
                None
            };

            let explainable = explain(&ExplanationInput {
                classification: verdict.classification,
                action: verdict.action,
                attack_type: verdict.attack_type,
                domain_scope: verdict.domain_scope,
                reasoning: &verdict.reasoning,
                confidence: verdict.confidence,
                risk_score: verdict.risk_score,
                text,
                memory_similarity: memory_match.similarity_score,
                session_risk: mean_session_risk(history),
            });

            Decision {
                decision_id: Uuid::new_v4(),
                verdict,
                matched_attack_id,
                similarity_score: memory_match.similarity_score,
                historical_frequency: memory_match.historical_frequency,
                critic,
                sanitization,
                was_sanitized: false,
                attack_chain,
                explainable,
                inference_ms: elapsed_ms(start),
            }
        })
    }

    /// Sanitize the message and, when anything was removed and content
    /// remains, re-analyze it with depth 1. Returns the retried decision
    /// with the sanitization record attached when it came back allowable.
    async fn retry_sanitized(
        &self,
        text: &str,
        session_id: &str,
        history: &[HistoryTurn],
        blocked_by: AttackType,
    ) -> Option<Decision> {
        let attempt = sanitize(text);
        if !attempt.was_sanitized || attempt.sanitized_prompt.trim().is_empty() {
            return None;
        }

        info!(
            session_id,
            original = text,
            sanitized = %attempt.sanitized_prompt,
            "Attempting sanitize-and-retry"
        );
        let mut decision = self
            .run(&attempt.sanitized_prompt, session_id, history, 1)
            .await;

        if matches!(decision.verdict.action, Action::Allow | Action::Warn) {
            decision.sanitization = Some(SanitizationOutcome {
                sanitization: attempt,
                successful: true,
                original_blocked_by: Some(blocked_by),
            });
            decision.was_sanitized = true;
            Some(decision)
        } else {
            None
        }
    }

    /// Consult the critic when confidence is below the threshold, applying
    /// its adjustments to the verdict.
    async fn run_critic(&self, text: &str, verdict: &mut Verdict) -> CriticOutcome {
        if verdict.confidence >= self.config.critic_confidence_threshold {
            return CriticOutcome::default();
        }

        let critique = match self.critic.critique(text, verdict).await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "Critic unavailable, keeping original decision");
                return CriticOutcome {
                    invoked: true,
                    feedback: None,
                    delta: DecisionDelta::default(),
                };
            }
        };

        let initial_risk = verdict.risk_score;
        let initial_confidence = verdict.confidence;
        let mut action_changed = false;

        if !critique.agrees_with_decision {
            if let Some(suggested) = critique.suggested_action {
                if suggested != verdict.action {
                    warn!(
                        from = %verdict.action,
                        to = %suggested,
                        reason = %critique.critic_reasoning,
                        "Critic changed action"
                    );
                    verdict.action = suggested;
                    action_changed = true;
                }
            }
            if let Some(risk) = critique.suggested_risk_score {
                verdict.risk_score = risk.clamp(0.0, 1.0);
            }
        }

        verdict.confidence =
            (initial_confidence + critique.confidence_adjustment).clamp(0.0, 1.0);

        CriticOutcome {
            invoked: true,
            delta: DecisionDelta {
                action_changed,
                risk_score_delta: round3(verdict.risk_score - initial_risk),
                confidence_delta: round3(verdict.confidence - initial_confidence),
            },
            feedback: Some(critique),
        }
    }

    /// Record the turn in the chain analyzer and apply escalation re-scoring
    /// to the verdict.
    async fn chain_analysis(
        &self,
        text: &str,
        session_id: &str,
        verdict: &mut Verdict,
    ) -> ChainAnalysis {
        let analysis = self
            .chain
            .add_turn(
                session_id,
                text,
                &verdict.domain_scope.to_string(),
                verdict.risk_score,
                verdict.classification,
                verdict.attack_type,
            )
            .await;

        if analysis.escalation_detected {
            let boosted = (verdict.risk_score
                + analysis.escalation_score * ESCALATION_RISK_WEIGHT)
                .min(1.0);
            verdict.risk_score = boosted;

            if boosted > ESCALATION_BLOCK_RISK && verdict.action != Action::Block {
                verdict.action = Action::Block;
                verdict.classification = Classification::Malicious;
                verdict.explanation =
                    "Multi-turn attack escalation detected. Session blocked.".to_string();
            }

            warn!(
                session_id,
                escalation_score = analysis.escalation_score,
                patterns = analysis.patterns.len(),
                "Escalation re-scoring applied"
            );
        }

        analysis
    }

    /// Finish a sanitized-retry decision: run the chain stage with the
    /// original text against its final verdict, then rebuild the
    /// explanation if the verdict changed.
    async fn apply_chain_stage(
        &self,
        text: &str,
        session_id: &str,
        memory_match: &ThreatMatch,
        history: &[HistoryTurn],
        decision: &mut Decision,
    ) {
        let analysis = self
            .chain_analysis(text, session_id, &mut decision.verdict)
            .await;
        let escalated = analysis.escalation_detected;
        decision.attack_chain = Some(analysis);

        if escalated {
            let sanitized_text = decision
                .sanitization
                .as_ref()
                .map(|s| s.sanitization.sanitized_prompt.clone())
                .unwrap_or_else(|| text.to_string());
            decision.explainable = explain(&ExplanationInput {
                classification: decision.verdict.classification,
                action: decision.verdict.action,
                attack_type: decision.verdict.attack_type,
                domain_scope: decision.verdict.domain_scope,
                reasoning: &decision.verdict.reasoning,
                confidence: decision.verdict.confidence,
                risk_score: decision.verdict.risk_score,
                text: &sanitized_text,
                memory_similarity: memory_match.similarity_score,
                session_risk: mean_session_risk(history),
            });
        }
    }
}

/// Mean risk over the most recent history turns; 0.0 for an empty history.
fn mean_session_risk(history: &[HistoryTurn]) -> f64 {
    let start = history.len().saturating_sub(SESSION_RISK_WINDOW);
    let window = &history[start..];
    if window.is_empty() {
        return 0.0;
    }
    window.iter().map(|t| t.risk_score).sum::<f64>() / window.len() as f64
}

fn elapsed_ms(start: Instant) -> f64 {
    let ms = start.elapsed().as_secs_f64() * 1000.0;
    (ms * 100.0).round() / 100.0
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}
