use async_trait::async_trait;

use super::client::HttpGateway;
use super::types::EmbeddingRequest;
use super::Embedder;
use crate::config::{CollaboratorConfig, RequestConfig};
use crate::error::CollaboratorResult;

/// HTTP-backed embedding collaborator used by threat memory.
#[derive(Clone)]
pub struct EmbeddingClient {
    gateway: HttpGateway,
    model: String,
}

impl EmbeddingClient {
    /// Create an embedding client.
    pub fn new(
        config: &CollaboratorConfig,
        request_config: RequestConfig,
    ) -> CollaboratorResult<Self> {
        Ok(Self {
            gateway: HttpGateway::new(config, request_config)?,
            model: config.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> CollaboratorResult<Vec<f32>> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: text.to_string(),
        };
        self.gateway.embed(&request).await
    }
}
