//! Batch call descriptors, batch files, and batch output parsing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::HarnessError;
use crate::gateway::batch_api::CHAT_COMPLETIONS_ENDPOINT;
use crate::gateway::{BatchApiClient, BatchJob, ChatRequest, ModelSelection, ProviderSettings};

/// One line of a batch input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCallDescriptor {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: ChatRequest,
}

impl BatchCallDescriptor {
    pub fn new(custom_id: impl Into<String>, body: ChatRequest) -> Self {
        Self {
            custom_id: custom_id.into(),
            method: "POST".to_string(),
            url: CHAT_COMPLETIONS_ENDPOINT.to_string(),
            body,
        }
    }
}

/// Newline-delimited JSON, one descriptor per line.
pub fn to_jsonl(descriptors: &[BatchCallDescriptor]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for descriptor in descriptors {
        out.push_str(&serde_json::to_string(descriptor)?);
        out.push('\n');
    }
    Ok(out)
}

// =============================================================================
// Batch plan
// =============================================================================

/// Everything a run enqueued, plus where it goes and how it is labelled.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    /// Folder relative to the data directory (`batches/<model>`).
    pub folder: String,
    pub file_name: String,
    /// Tag stored with the remote job; parsed again at retrieval time.
    pub description: String,
    pub descriptors: Vec<BatchCallDescriptor>,
}

impl BatchPlan {
    pub fn relative_path(&self) -> String {
        format!("{}/{}", self.folder, self.file_name)
    }

    /// Write the JSONL file under `root`, replacing any previous file.
    pub fn write(&self, root: &Path) -> Result<PathBuf, HarnessError> {
        let path = root.join(self.relative_path());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, to_jsonl(&self.descriptors)?)?;
        info!(
            path = %path.display(),
            calls = self.descriptors.len(),
            "batch file written"
        );
        Ok(path)
    }

    /// Upload the written file and create the remote batch job.
    pub async fn submit(
        &self,
        client: &BatchApiClient,
        path: &Path,
    ) -> Result<BatchJob, HarnessError> {
        let contents = std::fs::read(path)?;
        let file = client.upload_batch_file(&self.file_name, contents).await?;
        let job = client.create_batch(&file.id, &self.description).await?;
        info!(
            batch_id = %job.id,
            input_file_id = %file.id,
            description = %self.description,
            "batch submitted"
        );
        Ok(job)
    }
}

/// Where a flushed batch ended up.
#[derive(Debug, Clone)]
pub struct BatchFlush {
    pub path: PathBuf,
    /// The remote job, unless submission was skipped.
    pub job: Option<BatchJob>,
}

/// Write the plan's file and, outside debug mode, submit it to the
/// provider with credentials from the environment.
pub async fn flush(
    plan: &BatchPlan,
    root: &Path,
    selection: &ModelSelection,
    debug: bool,
) -> Result<BatchFlush, HarnessError> {
    let path = plan.write(root)?;
    if debug {
        info!(path = %path.display(), "debug run; batch not submitted");
        return Ok(BatchFlush { path, job: None });
    }
    if plan.descriptors.is_empty() {
        warn!(path = %path.display(), "nothing was enqueued; batch not submitted");
        return Ok(BatchFlush { path, job: None });
    }
    let settings = ProviderSettings::from_env(selection.provider)?;
    let client = BatchApiClient::new(&settings)?;
    let job = plan.submit(&client, &path).await?;
    Ok(BatchFlush {
        path,
        job: Some(job),
    })
}

// =============================================================================
// Batch output
// =============================================================================

#[derive(Deserialize)]
struct OutputLine {
    custom_id: String,
    response: Option<OutputResponse>,
}

#[derive(Deserialize)]
struct OutputResponse {
    body: Option<OutputBody>,
}

#[derive(Deserialize)]
struct OutputBody {
    choices: Option<Vec<OutputChoice>>,
}

#[derive(Deserialize)]
struct OutputChoice {
    message: Option<OutputMessage>,
}

#[derive(Deserialize)]
struct OutputMessage {
    content: Option<String>,
}

/// The answer to one batched call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchAnswer {
    pub custom_id: String,
    pub content: String,
}

/// Parse a batch output file. Lines come back in whatever order the
/// provider finished them; a line without content is an error.
pub fn parse_output(jsonl: &str) -> Result<Vec<BatchAnswer>, HarnessError> {
    jsonl
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(idx, line)| {
            let parsed: OutputLine = serde_json::from_str(line).map_err(|e| {
                HarnessError::malformed(format!("batch output line {}: {e}", idx + 1))
            })?;
            let content = parsed
                .response
                .and_then(|r| r.body)
                .and_then(|b| b.choices)
                .and_then(|c| c.into_iter().next())
                .and_then(|c| c.message)
                .and_then(|m| m.content)
                .ok_or_else(|| {
                    HarnessError::malformed(format!(
                        "batch output for {} carries no message content",
                        parsed.custom_id
                    ))
                })?;
            Ok(BatchAnswer {
                custom_id: parsed.custom_id,
                content,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Message;

    #[test]
    fn jsonl_has_one_descriptor_per_line() {
        let descriptors = vec![
            BatchCallDescriptor::new("1/a", ChatRequest::new("gpt-4", vec![Message::user("x")])),
            BatchCallDescriptor::new("2/a", ChatRequest::new("gpt-4", vec![Message::user("y")])),
        ];
        let jsonl = to_jsonl(&descriptors).unwrap();
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 2);
        let back: BatchCallDescriptor = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(back, descriptors[1]);
    }

    #[test]
    fn output_lines_without_content_are_malformed() {
        let jsonl = r#"{"custom_id":"1/x","response":{"status_code":500,"body":{"error":{"message":"boom"}}}}"#;
        assert!(matches!(
            parse_output(jsonl).unwrap_err(),
            HarnessError::Malformed(_)
        ));
    }
}
