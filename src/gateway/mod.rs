//! Provider gateway for chat completions and batch jobs.

pub mod batch_api;
pub mod error;
pub mod openai;
pub mod provider;
pub mod types;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub use batch_api::{BatchApiClient, BatchJob, FileObject};
pub use error::{ErrorContext, ProviderError};
pub use openai::OpenAiCompatAdapter;
pub use provider::{ModelSelection, Provider, ProviderSettings};
pub use types::*;

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Text returned by [`MockGateway`] for every request.
pub const MOCK_RESPONSE: &str = "Mock response";

/// Offline gateway for debug runs: answers every request with
/// [`MOCK_RESPONSE`] and never touches the network.
#[derive(Debug, Default)]
pub struct MockGateway {
    calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests answered so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChatGateway for MockGateway {
    async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse {
            content: MOCK_RESPONSE.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            latency: Duration::from_millis(0),
            finish_reason: FinishReason::Stop,
        })
    }
}

#[async_trait::async_trait]
impl<G: ChatGateway + ?Sized> ChatGateway for Box<G> {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        (**self).chat(req).await
    }
}
