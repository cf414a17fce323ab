//! Adapter for OpenAI-compatible chat completion endpoints.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;

use super::error::{ErrorContext, ProviderError};
use super::provider::ProviderSettings;
use super::types::*;
use super::ChatGateway;

// =============================================================================
// HTTP PLUMBING
// =============================================================================

/// Maximum allowed response content length (1MB).
pub(crate) const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum size of a downloaded file (the provider's batch file limit).
pub(crate) const MAX_FILE_LEN: usize = 200 * 1_024 * 1_024;

/// Maximum allowed input characters (~125k tokens).
const MAX_INPUT_CHARS: usize = 500_000;

/// Retry-after reported for 429s; informational only since nothing retries.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

/// Build an authenticated client for a provider.
pub(crate) fn http_client(api_key: &str, timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    let mut headers = HeaderMap::new();
    let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|_| ProviderError::config("Invalid API key format"))?;
    headers.insert(AUTHORIZATION, auth_value);

    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .gzip(true)
        .build()
        .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))
}

/// Extract request ID from response headers.
fn extract_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

/// Read a response body of at most `limit` bytes and turn non-2xx statuses
/// into errors.
pub(crate) async fn read_body(
    provider: &'static str,
    mut response: reqwest::Response,
    limit: usize,
) -> Result<String, ProviderError> {
    let status = response.status();
    let request_id = extract_request_id(response.headers());

    // Stream response to enforce size limit
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let new_len = bytes.len() + chunk.len();
        if new_len > limit {
            return Err(ProviderError::provider(
                provider,
                format!("Response too large: {new_len} bytes"),
            ));
        }
        bytes.extend_from_slice(&chunk);
    }
    let body = String::from_utf8_lossy(&bytes).to_string();

    if status.is_success() {
        return Ok(body);
    }

    let ctx = ErrorContext::new().with_status(status.as_u16());
    let mut ctx = match request_id {
        Some(id) => ctx.with_request_id(id),
        None => ctx,
    };

    let mut message = format!("HTTP {}", status.as_u16());
    if let Ok(ErrorEnvelope { error: Some(error) }) = serde_json::from_str::<ErrorEnvelope>(&body) {
        if let Some(code) = error.code {
            ctx = ctx.with_code(code);
        }
        if let Some(m) = error.message {
            message = m;
        }
    }

    Err(match status.as_u16() {
        429 => ProviderError::rate_limited(RATE_LIMIT_BACKOFF, ctx),
        _ => ProviderError::provider_with_context(provider, message, ctx),
    })
}

// =============================================================================
// ADAPTER
// =============================================================================

/// Chat completions against an OpenAI-compatible API (OpenAI, Together).
#[derive(Debug, Clone)]
pub struct OpenAiCompatAdapter {
    client: reqwest::Client,
    base_url: String,
    provider: &'static str,
}

impl OpenAiCompatAdapter {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Self::with_config(
            settings.provider.name(),
            &settings.api_key,
            settings.base_url.clone(),
            settings.timeout,
        )
    }

    /// Create with custom configuration.
    pub fn with_config(
        provider: &'static str,
        api_key: &str,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(api_key, timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            provider,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[async_trait]
impl ChatGateway for OpenAiCompatAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let total_chars: usize = req.messages.iter().map(|m| m.content.len()).sum();
        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let start = Instant::now();
        let response = self.client.post(self.chat_url()).json(req).send().await?;
        let body = read_body(self.provider, response, MAX_RESPONSE_LEN).await?;

        let parsed: ChatApiResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider(self.provider, format!("Invalid JSON: {e}")))?;

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ProviderError::provider(self.provider, "No choices in response"))?;

        let content = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0)))
            .unwrap_or((0, 0));

        Ok(ChatResponse {
            content,
            input_tokens,
            output_tokens,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(choice.finish_reason),
        })
    }
}
