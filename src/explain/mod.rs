//! Explainable security decisions.
//!
//! Produces a layered explanation for each verdict: a technical trace for
//! security teams, a user-safe message that never reveals detection
//! internals, and policy-compliance fields. The rule catalog is sanitized
//! for external exposure; it names rule families, never exact patterns.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::verdict::{Action, AttackType, Classification, DomainScope};

/// Sanitized detection rule catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecurityRule {
    /// Instruction override detection.
    Rule01,
    /// System prompt extraction attempt.
    Rule02,
    /// Privilege escalation pattern.
    Rule03,
    /// Database query injection.
    Rule04,
    /// Bulk data extraction request.
    Rule05,
    /// Identity manipulation attempt.
    Rule06,
    /// Security bypass command.
    Rule07,
    /// Jailbreak mode activation.
    Rule08,
    /// Developer mode exploitation.
    Rule09,
    /// Encoded payload detection.
    Rule10,
    /// Social engineering tactics.
    Rule11,
    /// Multi-step attack chain.
    Rule12,
    /// Session escalation pattern.
    Rule13,
    /// Threat memory match.
    Rule14,
    /// Context-based risk accumulation.
    Rule15,
}

impl SecurityRule {
    /// Stable identifier for logs and API output.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Rule01 => "RULE_01",
            Self::Rule02 => "RULE_02",
            Self::Rule03 => "RULE_03",
            Self::Rule04 => "RULE_04",
            Self::Rule05 => "RULE_05",
            Self::Rule06 => "RULE_06",
            Self::Rule07 => "RULE_07",
            Self::Rule08 => "RULE_08",
            Self::Rule09 => "RULE_09",
            Self::Rule10 => "RULE_10",
            Self::Rule11 => "RULE_11",
            Self::Rule12 => "RULE_12",
            Self::Rule13 => "RULE_13",
            Self::Rule14 => "RULE_14",
            Self::Rule15 => "RULE_15",
        }
    }

    /// Catalog description, safe to expose externally.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Rule01 => "Instruction override detection",
            Self::Rule02 => "System prompt extraction attempt",
            Self::Rule03 => "Privilege escalation pattern",
            Self::Rule04 => "Database query injection",
            Self::Rule05 => "Bulk data extraction request",
            Self::Rule06 => "Identity manipulation attempt",
            Self::Rule07 => "Security bypass command",
            Self::Rule08 => "Jailbreak mode activation",
            Self::Rule09 => "Developer mode exploitation",
            Self::Rule10 => "Encoded payload detection",
            Self::Rule11 => "Social engineering tactics",
            Self::Rule12 => "Multi-step attack chain",
            Self::Rule13 => "Session escalation pattern",
            Self::Rule14 => "Threat memory match",
            Self::Rule15 => "Context-based risk accumulation",
        }
    }

    /// Human-readable risk factor this rule contributes.
    fn risk_factor(&self) -> &'static str {
        match self {
            Self::Rule01 | Self::Rule02 => "Contains instruction override phrases",
            Self::Rule03 => "Attempts privilege escalation",
            Self::Rule04 | Self::Rule05 => "Requests bulk data access",
            Self::Rule06 => "Attempts identity manipulation",
            Self::Rule07 => "Attempts to bypass security controls",
            Self::Rule08 | Self::Rule09 => "Contains jailbreak activation keywords",
            Self::Rule10 => "Contains encoded or obfuscated content",
            Self::Rule11 | Self::Rule12 => "Uses social engineering tactics",
            Self::Rule13 => "Gradual escalation across conversation",
            Self::Rule14 => "Matches known attack patterns",
            Self::Rule15 => "Cumulative risk from conversation history",
        }
    }
}

/// External description of an attack type.
pub fn attack_description(attack_type: AttackType) -> &'static str {
    match attack_type {
        AttackType::Jailbreak => "Attempt to bypass AI safety guidelines",
        AttackType::SystemOverride => "Attempt to override system instructions",
        AttackType::DataExtraction => "Attempt to extract unauthorized data",
        AttackType::SocialEngineering => "Deceptive tactics to gain unauthorized access",
        AttackType::InstructionChaining => "Multi-step manipulation sequence",
        AttackType::FastRule => "Known attack pattern detected",
        AttackType::None => "No security threat detected",
        AttackType::Unknown => "Unknown",
    }
}

struct RulePattern {
    rule: SecurityRule,
    all_of: Vec<Regex>,
}

static PATTERN_RULES: Lazy<Vec<RulePattern>> = Lazy::new(|| {
    let re = |p: &str| Regex::new(p).expect("rule pattern");
    vec![
        RulePattern {
            rule: SecurityRule::Rule01,
            all_of: vec![re(r"ignore|forget|disregard"), re(r"instruction|prompt|rule")],
        },
        RulePattern {
            rule: SecurityRule::Rule02,
            all_of: vec![
                re(r"reveal|show|print|display"),
                re(r"prompt|instruction|system"),
            ],
        },
        RulePattern {
            rule: SecurityRule::Rule03,
            all_of: vec![re(r"admin|developer|root|sudo|override")],
        },
        RulePattern {
            rule: SecurityRule::Rule04,
            all_of: vec![re(r"select\s+\*|dump|database|sql")],
        },
        RulePattern {
            rule: SecurityRule::Rule05,
            all_of: vec![re(r"all\s+(users?|customers?|accounts?|records?|data)")],
        },
        RulePattern {
            rule: SecurityRule::Rule06,
            all_of: vec![re(r"(pretend|act|assume|imagine).+(you|i).+(am|are)")],
        },
        RulePattern {
            rule: SecurityRule::Rule07,
            all_of: vec![re(r"disable|bypass|remove.+(security|filter|restriction)")],
        },
        RulePattern {
            rule: SecurityRule::Rule08,
            all_of: vec![re(r"jailbreak|dan|unrestricted")],
        },
        RulePattern {
            rule: SecurityRule::Rule09,
            all_of: vec![re(r"developer\s+mode|debug\s+mode|test\s+mode")],
        },
        RulePattern {
            rule: SecurityRule::Rule10,
            all_of: vec![re(r"base64|encode|decode|\\x[0-9a-f]{2}")],
        },
    ]
});

/// Identify triggered rules without exposing the exact patterns. Output is
/// sorted by rule id.
pub fn detect_triggered_rules(
    text: &str,
    attack_type: AttackType,
    memory_match: bool,
    session_risk: f64,
) -> Vec<SecurityRule> {
    let t = text.to_lowercase();
    let mut rules: Vec<SecurityRule> = PATTERN_RULES
        .iter()
        .filter(|p| p.all_of.iter().all(|re| re.is_match(&t)))
        .map(|p| p.rule)
        .collect();

    if attack_type == AttackType::SocialEngineering {
        rules.push(SecurityRule::Rule11);
    }
    if attack_type == AttackType::InstructionChaining {
        rules.push(SecurityRule::Rule12);
    }
    if session_risk > 0.4 {
        rules.push(SecurityRule::Rule13);
    }
    if memory_match {
        rules.push(SecurityRule::Rule14);
    }
    if session_risk > 0.6 {
        rules.push(SecurityRule::Rule15);
    }

    rules.sort();
    rules.dedup();
    rules
}

/// Map triggered rules to distinct human-readable risk factors, keeping the
/// first occurrence of each factor.
pub fn extract_risk_factors(rules: &[SecurityRule]) -> Vec<String> {
    let mut factors: Vec<String> = Vec::new();
    for rule in rules {
        let factor = rule.risk_factor();
        if !factors.iter().any(|f| f == factor) {
            factors.push(factor.to_string());
        }
    }
    factors
}

/// Pipe-joined technical trace for developers and security teams.
pub fn technical_explanation(
    decision: Action,
    attack_type: AttackType,
    rules: &[SecurityRule],
    confidence: f64,
    risk_score: f64,
    memory_similarity: f64,
) -> String {
    let mut parts = vec![format!("Decision: {decision}")];

    if attack_type != AttackType::None {
        parts.push(format!(
            "Threat Type: {} - {}",
            attack_type,
            attack_description(attack_type)
        ));
    }

    if !rules.is_empty() {
        let names: Vec<String> = rules
            .iter()
            .map(|r| format!("{} ({})", r.id(), r.description()))
            .collect();
        parts.push(format!("Triggered Rules: {}", names.join(", ")));
    }

    parts.push(format!("Confidence: {confidence:.2}"));
    parts.push(format!("Risk Score: {risk_score:.2}"));

    if memory_similarity > 0.0 {
        parts.push(format!("Threat Memory Match: {memory_similarity:.2}"));
    }

    parts.join(" | ")
}

/// User-facing message. Never reveals detection internals; empty for plainly
/// safe requests.
pub fn user_explanation(decision: Action, attack_type: AttackType, domain_scope: DomainScope) -> String {
    match decision {
        Action::Block => match attack_type {
            AttackType::Jailbreak | AttackType::SystemOverride => {
                "Your request cannot be processed as it appears to contain instructions that conflict with our security policies.".to_string()
            }
            AttackType::DataExtraction => {
                "Your request cannot be processed as it requests access to data that requires proper authentication.".to_string()
            }
            AttackType::SocialEngineering => {
                "Your request cannot be processed. Please contact customer support if you need assistance.".to_string()
            }
            _ => {
                "Your request cannot be processed due to security policies. Please rephrase your question.".to_string()
            }
        },
        Action::Warn => {
            "Your request has been flagged for review. Please ensure you're following proper authentication procedures.".to_string()
        }
        Action::Allow => match domain_scope {
            DomainScope::RequiresAuth => {
                "This request requires authentication. Please log in to access your account information.".to_string()
            }
            DomainScope::OutOfScope => {
                "This question is outside our banking services scope. How can I help you with banking today?".to_string()
            }
            _ => String::new(),
        },
    }
}

/// Security analysis layer of an explainable decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAnalysis {
    /// Attack taxonomy entry.
    pub threat_type: AttackType,
    /// External description of the threat type.
    pub threat_description: String,
    /// Rule ids that fired.
    pub triggered_rules: Vec<String>,
    /// Catalog descriptions for the fired rules.
    pub rule_descriptions: Vec<String>,
    /// Distinct risk factors.
    pub confidence_factors: Vec<String>,
    /// Confidence, rounded to 3 decimals.
    pub confidence_score: f64,
    /// Risk score, rounded to 3 decimals.
    pub risk_score: f64,
    /// Threat memory similarity when one matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat_memory_similarity: Option<f64>,
    /// Cumulative session risk when nonzero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_risk_level: Option<f64>,
}

/// Layered explanation strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanations {
    /// Pipe-joined technical trace.
    pub technical: String,
    /// User-safe message.
    pub user_safe: String,
    /// Raw classifier reasoning. Stripped before external logging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_reasoning: Option<String>,
}

/// Policy-compliance view of the decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCompliance {
    /// Scope determination.
    pub domain_scope: DomainScope,
    /// Final classification.
    pub classification: Classification,
    /// Whether the request needs authentication first.
    pub requires_authentication: bool,
    /// Whether the request falls within the service domain.
    pub in_scope: bool,
}

/// Complete multi-layered explainable decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainableDecision {
    /// Enforcement action taken.
    pub decision: Action,
    /// Security analysis layer.
    pub security_analysis: SecurityAnalysis,
    /// Explanation layer.
    pub explanations: Explanations,
    /// Policy layer.
    pub policy_compliance: PolicyCompliance,
}

impl ExplainableDecision {
    /// Copy safe for external log sinks: internal reasoning removed.
    pub fn sanitize_for_logging(&self) -> Self {
        let mut copy = self.clone();
        copy.explanations.internal_reasoning = None;
        copy
    }
}

/// Inputs for building an [`ExplainableDecision`].
pub struct ExplanationInput<'a> {
    /// Final classification.
    pub classification: Classification,
    /// Enforcement action.
    pub action: Action,
    /// Attack taxonomy entry.
    pub attack_type: AttackType,
    /// Scope determination.
    pub domain_scope: DomainScope,
    /// Raw classifier reasoning.
    pub reasoning: &'a str,
    /// Final confidence.
    pub confidence: f64,
    /// Final risk score.
    pub risk_score: f64,
    /// The (possibly sanitized) message text that was scored.
    pub text: &'a str,
    /// Threat memory similarity, 0.0 when no match.
    pub memory_similarity: f64,
    /// Cumulative session risk.
    pub session_risk: f64,
}

/// Threshold at which a memory similarity counts as a match for rule
/// attribution.
const MEMORY_MATCH_SIMILARITY: f64 = 0.85;

/// Build the full layered explanation for a decision.
pub fn explain(input: &ExplanationInput<'_>) -> ExplainableDecision {
    let memory_match = input.memory_similarity >= MEMORY_MATCH_SIMILARITY;
    let rules = detect_triggered_rules(
        input.text,
        input.attack_type,
        memory_match,
        input.session_risk,
    );
    let risk_factors = extract_risk_factors(&rules);

    let technical = technical_explanation(
        input.action,
        input.attack_type,
        &rules,
        input.confidence,
        input.risk_score,
        input.memory_similarity,
    );
    let user_safe = user_explanation(input.action, input.attack_type, input.domain_scope);

    ExplainableDecision {
        decision: input.action,
        security_analysis: SecurityAnalysis {
            threat_type: input.attack_type,
            threat_description: attack_description(input.attack_type).to_string(),
            triggered_rules: rules.iter().map(|r| r.id().to_string()).collect(),
            rule_descriptions: rules.iter().map(|r| r.description().to_string()).collect(),
            confidence_factors: risk_factors,
            confidence_score: round3(input.confidence),
            risk_score: round3(input.risk_score),
            threat_memory_similarity: (input.memory_similarity > 0.0)
                .then(|| round3(input.memory_similarity)),
            session_risk_level: (input.session_risk > 0.0).then(|| round3(input.session_risk)),
        },
        explanations: Explanations {
            technical,
            user_safe,
            internal_reasoning: Some(input.reasoning.to_string()),
        },
        policy_compliance: PolicyCompliance {
            domain_scope: input.domain_scope,
            classification: input.classification,
            requires_authentication: input.domain_scope == DomainScope::RequiresAuth,
            in_scope: matches!(
                input.domain_scope,
                DomainScope::InScope | DomainScope::RequiresAuth
            ),
        },
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}
