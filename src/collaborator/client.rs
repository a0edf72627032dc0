use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse};
use crate::config::{CollaboratorConfig, RequestConfig};
use crate::error::{CollaboratorError, CollaboratorResult};

/// Shared HTTP plumbing for all collaborator calls: bearer auth, bounded
/// timeout, bounded retries with exponential backoff.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl HttpGateway {
    /// Create a gateway from collaborator and request configuration.
    pub fn new(
        config: &CollaboratorConfig,
        request_config: RequestConfig,
    ) -> CollaboratorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(CollaboratorError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a chat completion, retrying transient failures, and return the
    /// first choice's content.
    pub async fn chat(&self, request: &ChatRequest) -> CollaboratorResult<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let model = request.model.clone();

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    model = %model,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying collaborator request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_chat(&url, request).await {
                Ok(content) => {
                    let latency = start.elapsed();
                    info!(
                        model = %model,
                        latency_ms = latency.as_millis(),
                        "Collaborator call succeeded"
                    );
                    return Ok(content);
                }
                Err(e) => {
                    let latency = start.elapsed();
                    error!(
                        model = %model,
                        error = %e,
                        latency_ms = latency.as_millis(),
                        retry = retries,
                        "Collaborator call failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(CollaboratorError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    /// Execute a single chat request (internal)
    async fn execute_chat(&self, url: &str, request: &ChatRequest) -> CollaboratorResult<String> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Calling chat completion"
        );

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let chat_response: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| CollaboratorError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CollaboratorError::InvalidResponse {
                message: "Response contained no choices".to_string(),
            })
    }

    /// Compute an embedding for one text. Single attempt: threat memory
    /// degrades gracefully, so retry cycles are not worth the latency.
    pub async fn embed(&self, request: &EmbeddingRequest) -> CollaboratorResult<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);

        debug!(model = %request.model, "Calling embedding endpoint");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let embedding_response: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| CollaboratorError::InvalidResponse {
                    message: format!("Failed to parse embedding response: {}", e),
                })?;

        embedding_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| CollaboratorError::InvalidResponse {
                message: "Embedding response contained no data".to_string(),
            })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> CollaboratorError {
        if e.is_timeout() {
            CollaboratorError::Timeout {
                timeout_ms: self.request_config.timeout_ms,
            }
        } else {
            CollaboratorError::Http(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CollaboratorConfig {
        CollaboratorConfig {
            api_key: "test_key".to_string(),
            base_url: "https://api.example.com/".to_string(),
            classifier_model: "classifier-v1".to_string(),
            critic_model: "critic-v1".to_string(),
            embedding_model: "embed-v1".to_string(),
        }
    }

    #[test]
    fn test_gateway_creation() {
        let gateway = HttpGateway::new(&test_config(), RequestConfig::default());
        assert!(gateway.is_ok());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let gateway = HttpGateway::new(&test_config(), RequestConfig::default()).unwrap();
        assert_eq!(gateway.base_url(), "https://api.example.com");
    }
}
