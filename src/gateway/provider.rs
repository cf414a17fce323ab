//! Provider selection from the model tag, and provider credentials.

use std::time::Duration;

use super::error::ProviderError;
use crate::error::HarnessError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Hosted chat-completion providers with an OpenAI-compatible API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Together,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Together => "together",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Together => "https://api.together.xyz/v1",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI",
            Provider::Together => "TOGETHER",
        }
    }

    /// Whether the provider accepts asynchronous batch jobs.
    pub fn supports_batch(&self) -> bool {
        matches!(self, Provider::OpenAi)
    }
}

/// Credentials and endpoint for one provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub provider: Provider,
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn new(provider: Provider, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read `<PREFIX>_API_KEY`, `<PREFIX>_BASE_URL` and
    /// `<PREFIX>_TIMEOUT_SECONDS` for the provider.
    pub fn from_env(provider: Provider) -> Result<Self, ProviderError> {
        let prefix = provider.env_prefix();

        let key_var = format!("{prefix}_API_KEY");
        let api_key = std::env::var(&key_var)
            .map_err(|_| ProviderError::config(format!("{key_var} not set")))?;

        let base_url = std::env::var(format!("{prefix}_BASE_URL"))
            .unwrap_or_else(|_| provider.default_base_url().into());

        let timeout = std::env::var(format!("{prefix}_TIMEOUT_SECONDS"))
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        Ok(Self::new(provider, api_key, base_url).timeout(timeout))
    }
}

/// The provider and API model id a model tag resolves to.
///
/// Resolved once per run and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub provider: Provider,
    /// Model id sent to the API, recorded in result rows and used for paths.
    pub model_id: String,
}

impl ModelSelection {
    pub fn resolve(tag: &str) -> Result<Self, HarnessError> {
        let lower = tag.to_ascii_lowercase();
        if lower.contains("gpt") {
            Ok(Self {
                provider: Provider::OpenAi,
                model_id: tag.to_string(),
            })
        } else if lower.contains("llama") {
            let model_id = if tag.starts_with("meta-llama/") {
                tag.to_string()
            } else {
                format!("meta-llama/{tag}")
            };
            Ok(Self {
                provider: Provider::Together,
                model_id,
            })
        } else {
            Err(HarnessError::config(format!(
                "model {tag:?} is not served by a supported provider"
            )))
        }
    }

    pub fn supports_batch(&self) -> bool {
        self.provider.supports_batch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpt_models_go_to_openai() {
        let sel = ModelSelection::resolve("gpt-3.5-turbo").unwrap();
        assert_eq!(sel.provider, Provider::OpenAi);
        assert_eq!(sel.model_id, "gpt-3.5-turbo");
        assert!(sel.supports_batch());
    }

    #[test]
    fn llama_models_go_to_together_without_batch() {
        let sel = ModelSelection::resolve("Meta-Llama-3-70B-Instruct-Turbo").unwrap();
        assert_eq!(sel.provider, Provider::Together);
        assert_eq!(sel.model_id, "meta-llama/Meta-Llama-3-70B-Instruct-Turbo");
        assert!(!sel.supports_batch());
    }

    #[test]
    fn unknown_models_are_config_errors() {
        let err = ModelSelection::resolve("claude-3").unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }
}
