//! External collaborator interfaces: classifier, critic, and embedder.
//!
//! All three are opaque remote services. The traits here are the seams the
//! pipeline depends on; the HTTP clients are the production implementations.
//! Collaborator failure never propagates out of the pipeline: the caller
//! substitutes safe defaults on any error.

mod classifier;
mod client;
mod critic;
mod embedder;
/// System prompts sent to the classifier and critic.
pub mod prompts;
mod types;

pub use classifier::ClassifierClient;
pub use client::HttpGateway;
pub use critic::CriticClient;
pub use embedder::EmbeddingClient;
pub use types::{
    parse_critique, parse_verdict, ChatMessage, ChatRequest, ChatResponse, ChatRole, Critique,
    EmbeddingRequest, EmbeddingResponse, HistoryTurn,
};

use async_trait::async_trait;

use crate::error::CollaboratorResult;
use crate::verdict::Verdict;

/// Semantic classifier: turns a message plus recent history into a verdict.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one message in the context of recent history.
    async fn classify(&self, text: &str, history: &[HistoryTurn]) -> CollaboratorResult<Verdict>;
}

/// Second-opinion critic consulted for low-confidence verdicts.
#[async_trait]
pub trait Critic: Send + Sync {
    /// Re-evaluate an initial verdict.
    async fn critique(&self, text: &str, initial: &Verdict) -> CollaboratorResult<Critique>;
}

/// Text embedder backing threat-memory similarity search.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text into a fixed-length vector.
    async fn embed(&self, text: &str) -> CollaboratorResult<Vec<f32>>;
}
