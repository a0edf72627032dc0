use async_trait::async_trait;

use super::client::HttpGateway;
use super::prompts::CRITIC_PROMPT;
use super::types::{parse_critique, ChatMessage, ChatRequest, Critique};
use super::Critic;
use crate::config::{CollaboratorConfig, RequestConfig};
use crate::error::CollaboratorResult;
use crate::verdict::Verdict;

/// HTTP-backed critic collaborator.
#[derive(Clone)]
pub struct CriticClient {
    gateway: HttpGateway,
    model: String,
}

impl CriticClient {
    /// Create a critic client.
    pub fn new(
        config: &CollaboratorConfig,
        request_config: RequestConfig,
    ) -> CollaboratorResult<Self> {
        Ok(Self {
            gateway: HttpGateway::new(config, request_config)?,
            model: config.critic_model.clone(),
        })
    }

    fn build_user_content(text: &str, initial: &Verdict) -> String {
        format!(
            "Original message: \"{text}\"\n\n\
             Initial decision:\n\
             - Classification: {}\n\
             - Action: {}\n\
             - Attack Type: {}\n\
             - Reasoning: {}\n\
             - Confidence: {:.2}\n\
             - Risk Score: {:.2}\n\n\
             Re-evaluate this decision. Is it correct or should it be changed?\n",
            initial.classification,
            initial.action,
            initial.attack_type,
            initial.reasoning,
            initial.confidence,
            initial.risk_score,
        )
    }
}

#[async_trait]
impl Critic for CriticClient {
    async fn critique(&self, text: &str, initial: &Verdict) -> CollaboratorResult<Critique> {
        let messages = vec![
            ChatMessage::system(CRITIC_PROMPT),
            ChatMessage::user(Self::build_user_content(text, initial)),
        ];

        // Slightly higher temperature for diverse second opinions.
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: 0.2,
            max_tokens: 150,
        };

        let completion = self.gateway.chat(&request).await?;
        Ok(parse_critique(&completion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::{Action, AttackType, Classification, DomainScope};

    #[test]
    fn test_user_content_includes_initial_decision() {
        let verdict = Verdict {
            classification: Classification::Suspicious,
            action: Action::Warn,
            attack_type: AttackType::SocialEngineering,
            domain_scope: DomainScope::InScope,
            reasoning: "ambiguous access claim".to_string(),
            explanation: String::new(),
            confidence: 0.6,
            risk_score: 0.5,
        };
        let content = CriticClient::build_user_content("let me in", &verdict);
        assert!(content.contains("Original message: \"let me in\""));
        assert!(content.contains("Classification: SUSPICIOUS"));
        assert!(content.contains("Action: WARN"));
        assert!(content.contains("Confidence: 0.60"));
    }
}
