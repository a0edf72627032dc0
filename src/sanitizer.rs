//! Prompt sanitization: strip recognized malicious substrings while keeping
//! whatever legitimate intent remains, so borderline messages can be retried
//! through the pipeline instead of being blocked outright.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::verdict::{Action, Classification};

/// Category of removed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizationKind {
    /// "ignore/disregard/forget previous instructions".
    InstructionOverride,
    /// System-prompt extraction phrasing.
    PromptExtraction,
    /// Jailbreak persona or mode activation.
    Jailbreak,
    /// "assume I am admin" style identity claims.
    RoleManipulation,
    /// "disable security/filters" commands.
    SecurityBypass,
    /// Bulk data requests.
    DataExtraction,
    /// Inline SQL.
    SqlInjection,
    /// Encoded payloads.
    Encoding,
    /// Nothing legitimate survived sanitization.
    CompleteRemoval,
}

impl std::fmt::Display for SanitizationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SanitizationKind::InstructionOverride => "instruction_override",
            SanitizationKind::PromptExtraction => "prompt_extraction",
            SanitizationKind::Jailbreak => "jailbreak",
            SanitizationKind::RoleManipulation => "role_manipulation",
            SanitizationKind::SecurityBypass => "security_bypass",
            SanitizationKind::DataExtraction => "data_extraction",
            SanitizationKind::SqlInjection => "sql_injection",
            SanitizationKind::Encoding => "encoding",
            SanitizationKind::CompleteRemoval => "complete_removal",
        };
        write!(f, "{s}")
    }
}

/// One removed segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizationAction {
    /// What family of pattern fired.
    pub kind: SanitizationKind,
    /// The text that was removed.
    pub removed: String,
    /// Byte offset of the removal in the text as it stood at removal time.
    pub position: usize,
}

/// Result of sanitizing one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sanitization {
    /// The message as received.
    pub original_prompt: String,
    /// The message with malicious segments removed and cleaned up.
    pub sanitized_prompt: String,
    /// Every removal performed, in application order.
    pub actions: Vec<SanitizationAction>,
    /// Whether anything was removed.
    pub was_sanitized: bool,
}

static MALICIOUS_PATTERNS: Lazy<Vec<(Regex, SanitizationKind)>> = Lazy::new(|| {
    use SanitizationKind::*;
    let table: &[(&str, SanitizationKind)] = &[
        // Instruction override
        (
            r"(?i)ignore\s+(all\s+)?(previous\s+)?(instructions?|prompts?|rules?)",
            InstructionOverride,
        ),
        (
            r"(?i)disregard\s+(all\s+)?(previous\s+)?(instructions?|prompts?|rules?)",
            InstructionOverride,
        ),
        (
            r"(?i)forget\s+(all\s+)?(previous\s+)?(instructions?|prompts?|rules?)",
            InstructionOverride,
        ),
        // System prompt extraction
        (
            r"(?i)(reveal|show|display|print|tell\s+me)\s+(your\s+)?(system\s+)?(prompt|instructions?)",
            PromptExtraction,
        ),
        (
            r"(?i)what\s+(are|is)\s+your\s+(system\s+)?(prompt|instructions?)",
            PromptExtraction,
        ),
        // Jailbreak attempts
        (
            r"(?i)you\s+are\s+now\s+(dan|jailbreak|unrestricted|evil|dude)",
            Jailbreak,
        ),
        (
            r"(?i)pretend\s+you\s+(are|have)\s+(no\s+)?(restrictions?|limits?|rules?)",
            Jailbreak,
        ),
        (
            r"(?i)act\s+as\s+(if\s+)?(you\s+have\s+)?no\s+(restrictions?|limits?)",
            Jailbreak,
        ),
        (
            r"(?i)(developer|debug|admin|test)\s+mode\s+(enabled|on|activated?)",
            Jailbreak,
        ),
        // Role manipulation
        (
            r"(?i)assume\s+(i\s+am|you\s+are)\s+(an?\s+)?(admin|developer|tester|root|sudo)",
            RoleManipulation,
        ),
        (
            r"(?i)i\s+am\s+(an?\s+)?(admin|developer|tester|authorized\s+user)",
            RoleManipulation,
        ),
        // Security bypass
        (
            r"(?i)(override|bypass|disable|remove)\s+(all\s+)?(security|filters?|restrictions?)",
            SecurityBypass,
        ),
        // Bulk data extraction
        (
            r"(?i)(show|display|give|list)\s+all\s+(users?|customers?|accounts?|records?|data)",
            DataExtraction,
        ),
        (
            r"(?i)dump\s+(the\s+)?(database|all\s+data|everything)",
            DataExtraction,
        ),
        // SQL injection
        (r"(?i)select\s+\*\s+from\s+\w+", SqlInjection),
        (r"(?i);\s*drop\s+table", SqlInjection),
        // Encoding attempts
        (r"(?i)base64\s*:\s*[A-Za-z0-9+/]{20,}", Encoding),
    ];
    table
        .iter()
        .filter_map(|(p, k)| Regex::new(p).ok().map(|re| (re, *k)))
        .collect()
});

/// Connective words trimmed from the edges after removal.
const CONNECTORS: &[&str] = &["and", "then", "also", "plus", "additionally", "furthermore"];

/// Remove malicious segments from a message while preserving legitimate
/// intent. Pure, never fails.
pub fn sanitize(text: &str) -> Sanitization {
    let original = text.to_string();
    let mut sanitized = text.to_string();
    let mut actions = Vec::new();

    for (re, kind) in MALICIOUS_PATTERNS.iter() {
        // Collect spans first, then remove back to front so earlier offsets
        // stay valid.
        let spans: Vec<(usize, usize)> = re
            .find_iter(&sanitized)
            .map(|m| (m.start(), m.end()))
            .collect();

        for &(start, end) in spans.iter().rev() {
            let removed = sanitized[start..end].to_string();
            sanitized.replace_range(start..end, "");
            debug!(kind = %kind, removed = %removed, "sanitized segment");
            actions.push(SanitizationAction {
                kind: *kind,
                removed,
                position: start,
            });
        }
    }

    sanitized = cleanup_text(&sanitized);

    if sanitized.trim().is_empty() && !actions.is_empty() {
        sanitized.clear();
        actions.push(SanitizationAction {
            kind: SanitizationKind::CompleteRemoval,
            removed: "entire prompt".to_string(),
            position: 0,
        });
    }

    let was_sanitized = !actions.is_empty();
    Sanitization {
        original_prompt: original,
        sanitized_prompt: sanitized,
        actions,
        was_sanitized,
    }
}

/// Clean up whitespace, dangling connectors, and punctuation artifacts left
/// behind by segment removal, then capitalize the first letter.
fn cleanup_text(text: &str) -> String {
    static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
    static LEAD_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[,;:\s]+").expect("static regex"));
    static TRAIL_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,;:\s]+$").expect("static regex"));

    let mut out = text.to_string();

    for connector in CONNECTORS {
        let lead = Regex::new(&format!(r"(?i)^\s*{connector}\s+"));
        if let Ok(re) = lead {
            out = re.replace(&out, "").into_owned();
        }
        let trail = Regex::new(&format!(r"(?i)\s+{connector}\s*$"));
        if let Ok(re) = trail {
            out = re.replace(&out, "").into_owned();
        }
    }

    out = MULTI_SPACE.replace_all(&out, " ").into_owned();
    out = LEAD_PUNCT.replace(&out, "").into_owned();
    out = TRAIL_PUNCT.replace(&out, "").into_owned();

    let out = out.trim();
    let mut chars = out.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Whether a verdict is borderline enough to sanitize-and-retry instead of
/// standing on the block.
pub fn should_sanitize(classification: Classification, action: Action, risk_score: f64) -> bool {
    if action == Action::Warn {
        return true;
    }

    if action == Action::Block && (0.4..=0.7).contains(&risk_score) {
        return true;
    }

    if matches!(
        classification,
        Classification::Suspicious | Classification::RequiresAuth
    ) && risk_score < 0.8
    {
        return true;
    }

    false
}
