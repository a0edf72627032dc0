//! Canonical verdict types shared by every pipeline stage.
//!
//! The enums mirror the classifier's wire labels exactly, so a model
//! completion deserializes straight into them and unknown labels surface as
//! parse failures instead of silent misclassification.

use serde::{Deserialize, Serialize};

/// Message classification assigned by the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// Legitimate in-domain request.
    #[default]
    Safe,
    /// Borderline request that warrants closer scrutiny.
    Suspicious,
    /// Legitimate request that needs account authentication.
    RequiresAuth,
    /// Off-topic but harmless request.
    OutOfScope,
    /// Attack or abuse attempt.
    Malicious,
}

/// Enforcement action attached to a verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Let the message through.
    #[default]
    Allow,
    /// Let it through with a caution flag.
    Warn,
    /// Refuse the message.
    Block,
}

/// Attack taxonomy for blocked or suspicious messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttackType {
    /// No threat detected.
    #[default]
    None,
    /// Attempt to bypass safety guidelines.
    Jailbreak,
    /// Attempt to override system instructions.
    SystemOverride,
    /// Attempt to extract unauthorized data.
    DataExtraction,
    /// Deceptive tactics to gain access.
    SocialEngineering,
    /// Multi-step manipulation sequence.
    InstructionChaining,
    /// Matched a deterministic fast-block rule.
    FastRule,
    /// Recorded threat whose type could not be determined.
    Unknown,
}

/// Domain scope of the request relative to the protected application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainScope {
    /// Within the assistant's domain.
    #[default]
    InScope,
    /// In-domain but needs authentication.
    RequiresAuth,
    /// Outside the assistant's domain.
    OutOfScope,
    /// The request itself is hostile.
    Malicious,
}

/// Severity of a detected escalation pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational signal.
    Low,
    /// Worth tracking.
    Medium,
    /// Strong attack indicator.
    High,
    /// Near-certain attack in progress.
    Critical,
}

impl Severity {
    /// Weight used by the composite escalation score.
    pub fn weight(self) -> f64 {
        match self {
            Severity::Low => 1.0,
            Severity::Medium => 1.5,
            Severity::High => 2.0,
            Severity::Critical => 3.0,
        }
    }
}

/// One complete decision about a message at a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Classification label.
    pub classification: Classification,
    /// Enforcement action.
    pub action: Action,
    /// Attack taxonomy entry, `None` when benign.
    pub attack_type: AttackType,
    /// Domain scope of the request.
    pub domain_scope: DomainScope,
    /// Internal reasoning. Never exposed to end users.
    pub reasoning: String,
    /// User-safe explanation, empty when allowed without comment.
    pub explanation: String,
    /// Confidence in the decision, 0.0-1.0.
    pub confidence: f64,
    /// Risk score, 0.0-1.0.
    pub risk_score: f64,
}

impl Verdict {
    /// Safe-default verdict used when a collaborator is unavailable or its
    /// output is malformed. Never blocks on infrastructure failure.
    pub fn safe_default(reasoning: impl Into<String>) -> Self {
        Self {
            classification: Classification::Safe,
            action: Action::Allow,
            attack_type: AttackType::None,
            domain_scope: DomainScope::InScope,
            reasoning: reasoning.into(),
            explanation: String::new(),
            confidence: 0.5,
            risk_score: 0.0,
        }
    }

    /// Terminal block verdict produced by the fast-rule matcher.
    pub fn fast_rule_block(pattern: &str) -> Self {
        Self {
            classification: Classification::Malicious,
            action: Action::Block,
            attack_type: AttackType::FastRule,
            domain_scope: DomainScope::Malicious,
            reasoning: format!("Matched attack pattern: {pattern}"),
            explanation: "Request blocked: contains known attack pattern.".to_string(),
            confidence: 1.0,
            risk_score: 1.0,
        }
    }
}

macro_rules! string_conversions {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $($ty::$variant => write!(f, $text),)+
                }
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    _ => Err(format!(concat!("Unknown ", stringify!($ty), ": {}"), s)),
                }
            }
        }
    };
}

string_conversions!(Classification {
    Safe => "SAFE",
    Suspicious => "SUSPICIOUS",
    RequiresAuth => "REQUIRES_AUTH",
    OutOfScope => "OUT_OF_SCOPE",
    Malicious => "MALICIOUS",
});

string_conversions!(Action {
    Allow => "ALLOW",
    Warn => "WARN",
    Block => "BLOCK",
});

string_conversions!(AttackType {
    None => "NONE",
    Jailbreak => "JAILBREAK",
    SystemOverride => "SYSTEM_OVERRIDE",
    DataExtraction => "DATA_EXTRACTION",
    SocialEngineering => "SOCIAL_ENGINEERING",
    InstructionChaining => "INSTRUCTION_CHAINING",
    FastRule => "FAST_RULE",
    Unknown => "UNKNOWN",
});

string_conversions!(DomainScope {
    InScope => "IN_SCOPE",
    RequiresAuth => "REQUIRES_AUTH",
    OutOfScope => "OUT_OF_SCOPE",
    Malicious => "MALICIOUS",
});

string_conversions!(Severity {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Critical => "CRITICAL",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip() {
        for c in [
            Classification::Safe,
            Classification::Suspicious,
            Classification::RequiresAuth,
            Classification::OutOfScope,
            Classification::Malicious,
        ] {
            assert_eq!(c.to_string().parse::<Classification>(), Ok(c));
        }
        assert_eq!("BLOCK".parse::<Action>(), Ok(Action::Block));
        assert_eq!("FAST_RULE".parse::<AttackType>(), Ok(AttackType::FastRule));
        assert!("NOT_A_SCOPE".parse::<DomainScope>().is_err());
    }

    #[test]
    fn test_serde_screaming_snake() {
        let json = serde_json::to_string(&Classification::RequiresAuth).unwrap();
        assert_eq!(json, "\"REQUIRES_AUTH\"");
        let back: AttackType = serde_json::from_str("\"SYSTEM_OVERRIDE\"").unwrap();
        assert_eq!(back, AttackType::SystemOverride);
    }

    #[test]
    fn test_safe_default_never_blocks() {
        let v = Verdict::safe_default("collaborator down");
        assert_eq!(v.action, Action::Allow);
        assert_eq!(v.classification, Classification::Safe);
        assert!((v.confidence - 0.5).abs() < f64::EPSILON);
        assert_eq!(v.risk_score, 0.0);
    }

    #[test]
    fn test_severity_weights() {
        assert!(Severity::Critical.weight() > Severity::High.weight());
        assert!(Severity::High.weight() > Severity::Medium.weight());
        assert!(Severity::Medium.weight() > Severity::Low.weight());
    }
}
