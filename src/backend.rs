//! Execution backends: answer a conversation now, or enqueue it for a batch.

use async_trait::async_trait;
use tracing::debug;

use crate::batch::BatchCallDescriptor;
use crate::conversation::Conversation;
use crate::error::HarnessError;
use crate::gateway::{
    ChatGateway, ChatRequest, MockGateway, ModelSelection, OpenAiCompatAdapter, ProviderError,
    ProviderSettings, SamplingParams,
};

/// What became of a dispatched conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The model answered synchronously.
    Completed(String),
    /// The call was queued for a batch job; no answer in this run.
    Enqueued,
}

/// The capability the drivers call through.
#[async_trait]
pub trait ExecutionBackend: Send {
    /// Send `conversation` to the model, identified by `custom_id` if the
    /// call is deferred.
    async fn dispatch(
        &mut self,
        conversation: &Conversation,
        custom_id: &str,
    ) -> Result<Dispatch, HarnessError>;
}

fn request_for(model: &str, sampling: SamplingParams, conversation: &Conversation) -> ChatRequest {
    ChatRequest::new(model, conversation.messages().to_vec()).sampling(sampling)
}

// =============================================================================
// Synchronous
// =============================================================================

/// One blocking request per call.
pub struct SyncBackend<G> {
    gateway: G,
    model: String,
    sampling: SamplingParams,
}

impl<G: ChatGateway> SyncBackend<G> {
    pub fn new(gateway: G, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: model.into(),
            sampling: SamplingParams::FIXED,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Completion text for `conversation`.
    pub async fn execute(&self, conversation: &Conversation) -> Result<String, HarnessError> {
        let req = request_for(&self.model, self.sampling, conversation);
        let resp = self.gateway.chat(&req).await?;
        debug!(
            model = %self.model,
            turns = conversation.len(),
            input_tokens = resp.input_tokens,
            output_tokens = resp.output_tokens,
            latency_ms = resp.latency.as_millis() as u64,
            "completion received"
        );
        Ok(resp.content)
    }
}

#[async_trait]
impl<G: ChatGateway> ExecutionBackend for SyncBackend<G> {
    async fn dispatch(
        &mut self,
        conversation: &Conversation,
        _custom_id: &str,
    ) -> Result<Dispatch, HarnessError> {
        self.execute(conversation).await.map(Dispatch::Completed)
    }
}

/// Gateway for a run: the offline mock in debug mode, otherwise the
/// provider's live endpoint with credentials from the environment.
pub fn connect_gateway(
    selection: &ModelSelection,
    debug: bool,
) -> Result<Box<dyn ChatGateway>, ProviderError> {
    if debug {
        return Ok(Box::new(MockGateway::new()));
    }
    let settings = ProviderSettings::from_env(selection.provider)?;
    Ok(Box::new(OpenAiCompatAdapter::new(&settings)?))
}

// =============================================================================
// Batch
// =============================================================================

/// Accumulates call descriptors in memory for one batch file.
#[derive(Debug, Clone)]
pub struct BatchBackend {
    model: String,
    sampling: SamplingParams,
    descriptors: Vec<BatchCallDescriptor>,
}

impl BatchBackend {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            sampling: SamplingParams::FIXED,
            descriptors: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, conversation: &Conversation, custom_id: &str) -> &BatchCallDescriptor {
        let body = request_for(&self.model, self.sampling, conversation);
        self.descriptors
            .push(BatchCallDescriptor::new(custom_id, body));
        &self.descriptors[self.descriptors.len() - 1]
    }

    pub fn descriptors(&self) -> &[BatchCallDescriptor] {
        &self.descriptors
    }

    pub fn into_descriptors(self) -> Vec<BatchCallDescriptor> {
        self.descriptors
    }
}

#[async_trait]
impl ExecutionBackend for BatchBackend {
    async fn dispatch(
        &mut self,
        conversation: &Conversation,
        custom_id: &str,
    ) -> Result<Dispatch, HarnessError> {
        self.enqueue(conversation, custom_id);
        Ok(Dispatch::Enqueued)
    }
}
