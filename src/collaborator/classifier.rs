use async_trait::async_trait;
use tracing::debug;

use super::client::HttpGateway;
use super::prompts::CLASSIFIER_PROMPT;
use super::types::{parse_verdict, ChatMessage, ChatRequest, HistoryTurn};
use super::Classifier;
use crate::config::{CollaboratorConfig, RequestConfig};
use crate::error::CollaboratorResult;
use crate::verdict::Verdict;

/// How many recent history turns are shown to the classifier.
const HISTORY_WINDOW: usize = 6;
/// Per-turn character cap for the history excerpt.
const HISTORY_TURN_CHARS: usize = 150;
/// Turns above this risk count toward the session warning.
const SUSPICIOUS_TURN_RISK: f64 = 0.6;

/// HTTP-backed classifier collaborator.
#[derive(Clone)]
pub struct ClassifierClient {
    gateway: HttpGateway,
    model: String,
}

impl ClassifierClient {
    /// Create a classifier client.
    pub fn new(
        config: &CollaboratorConfig,
        request_config: RequestConfig,
    ) -> CollaboratorResult<Self> {
        Ok(Self {
            gateway: HttpGateway::new(config, request_config)?,
            model: config.classifier_model.clone(),
        })
    }

    /// Render the recent history plus the current message into the user
    /// content the classifier sees.
    fn build_user_content(text: &str, history: &[HistoryTurn]) -> String {
        let recent: Vec<&HistoryTurn> = history
            .iter()
            .rev()
            .take(HISTORY_WINDOW)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let history_text = if recent.is_empty() {
            "None".to_string()
        } else {
            recent
                .iter()
                .map(|t| {
                    let excerpt: String = t.content.chars().take(HISTORY_TURN_CHARS).collect();
                    format!("{}: {}", t.role.to_uppercase(), excerpt)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let suspicious_turns = history
            .iter()
            .filter(|t| t.risk_score > SUSPICIOUS_TURN_RISK)
            .count();
        let session_context = if suspicious_turns >= 2 {
            format!(
                "\nWARNING: This session has {suspicious_turns} suspicious previous turns. \
                 Apply higher scrutiny."
            )
        } else {
            String::new()
        };

        format!(
            "Conversation history:\n{history_text}\n{session_context}\n\nCurrent message to classify: \"{text}\"\n"
        )
    }
}

#[async_trait]
impl Classifier for ClassifierClient {
    async fn classify(&self, text: &str, history: &[HistoryTurn]) -> CollaboratorResult<Verdict> {
        let messages = vec![
            ChatMessage::system(CLASSIFIER_PROMPT),
            ChatMessage::user(Self::build_user_content(text, history)),
        ];

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: 0.0,
            max_tokens: 200,
        };

        let completion = self.gateway.chat(&request).await?;
        debug!(completion_len = completion.len(), "classifier completion received");
        Ok(parse_verdict(&completion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_content_without_history() {
        let content = ClassifierClient::build_user_content("hello", &[]);
        assert!(content.contains("Conversation history:\nNone"));
        assert!(content.contains("Current message to classify: \"hello\""));
        assert!(!content.contains("WARNING"));
    }

    #[test]
    fn test_user_content_truncates_and_windows_history() {
        let history: Vec<HistoryTurn> = (0..10)
            .map(|i| HistoryTurn::user(format!("turn-{i} {}", "x".repeat(300)), 0.0))
            .collect();
        let content = ClassifierClient::build_user_content("q", &history);
        // Only the last 6 turns appear
        assert!(!content.contains("turn-3"));
        assert!(content.contains("turn-4"));
        assert!(content.contains("turn-9"));
        // Each excerpt is capped
        for line in content.lines().filter(|l| l.starts_with("USER:")) {
            assert!(line.chars().count() <= HISTORY_TURN_CHARS + "USER: ".len());
        }
    }

    #[test]
    fn test_session_warning_after_two_risky_turns() {
        let history = vec![
            HistoryTurn::user("a", 0.7),
            HistoryTurn::user("b", 0.1),
            HistoryTurn::user("c", 0.9),
        ];
        let content = ClassifierClient::build_user_content("q", &history);
        assert!(content.contains("WARNING: This session has 2 suspicious previous turns"));
    }
}
