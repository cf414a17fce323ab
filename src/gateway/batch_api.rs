//! Client for the OpenAI files and batches endpoints.
//!
//! Only what the pipeline needs: upload a JSONL input file, create a batch
//! over it, look a batch up again later, and download its output file.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use super::openai::{http_client, read_body, MAX_FILE_LEN, MAX_RESPONSE_LEN};
use super::provider::ProviderSettings;

/// Endpoint every batch line targets.
pub const CHAT_COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";
/// How long the provider may take to finish a batch.
pub const COMPLETION_WINDOW: &str = "24h";

#[derive(Debug, Clone, Deserialize)]
pub struct FileObject {
    pub id: String,
}

/// A batch job as reported by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub input_file_id: Option<String>,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

impl BatchJob {
    /// The `description` tag attached at submission.
    pub fn description(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("description"))
            .map(String::as_str)
    }
}

#[derive(Serialize)]
struct CreateBatch<'a> {
    input_file_id: &'a str,
    endpoint: &'static str,
    completion_window: &'static str,
    metadata: HashMap<&'static str, &'a str>,
}

#[derive(Debug, Clone)]
pub struct BatchApiClient {
    client: reqwest::Client,
    base_url: String,
    provider: &'static str,
}

impl BatchApiClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        if !settings.provider.supports_batch() {
            return Err(ProviderError::config(format!(
                "{} does not accept batch jobs",
                settings.provider.name()
            )));
        }
        Self::with_config(
            settings.provider.name(),
            &settings.api_key,
            settings.base_url.clone(),
            settings.timeout,
        )
    }

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

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn parse<T: for<'de> Deserialize<'de>>(&self, body: &str) -> Result<T, ProviderError> {
        serde_json::from_str(body)
            .map_err(|e| ProviderError::provider(self.provider, format!("Invalid JSON: {e}")))
    }

    /// Upload a JSONL batch input file.
    pub async fn upload_batch_file(
        &self,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<FileObject, ProviderError> {
        let form = Form::new()
            .text("purpose", "batch")
            .part("file", Part::bytes(contents).file_name(file_name.to_string()));
        let response = self
            .client
            .post(self.url("/files"))
            .multipart(form)
            .send()
            .await?;
        let body = read_body(self.provider, response, MAX_RESPONSE_LEN).await?;
        self.parse(&body)
    }

    /// Create a chat-completions batch over an uploaded file.
    pub async fn create_batch(
        &self,
        input_file_id: &str,
        description: &str,
    ) -> Result<BatchJob, ProviderError> {
        let req = CreateBatch {
            input_file_id,
            endpoint: CHAT_COMPLETIONS_ENDPOINT,
            completion_window: COMPLETION_WINDOW,
            metadata: HashMap::from([("description", description)]),
        };
        let response = self
            .client
            .post(self.url("/batches"))
            .json(&req)
            .send()
            .await?;
        let body = read_body(self.provider, response, MAX_RESPONSE_LEN).await?;
        self.parse(&body)
    }

    pub async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("/batches/{batch_id}")))
            .send()
            .await?;
        let body = read_body(self.provider, response, MAX_RESPONSE_LEN).await?;
        self.parse(&body)
    }

    /// Raw contents of a file (batch output files are JSONL).
    pub async fn file_content(&self, file_id: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("/files/{file_id}/content")))
            .send()
            .await?;
        read_body(self.provider, response, MAX_FILE_LEN).await
    }
}
