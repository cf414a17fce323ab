use std::time::Duration;

use fermi_harness::batch::{BatchCallDescriptor, BatchPlan};
use fermi_harness::gateway::{BatchApiClient, ChatRequest, Message};
use fermi_harness::retrieval::{read_context_batch, read_target_batch};
use fermi_harness::tables::{ContextQuestionRow, TargetResponseRow};
use fermi_harness::{ExperimentType, HarnessError, MemoryTableStore, TableStore};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> BatchApiClient {
    BatchApiClient::with_config("openai", "sk-test", server.uri(), Duration::from_secs(5)).unwrap()
}

fn output_line(custom_id: &str, content: &str) -> String {
    json!({
        "id": "batch_req_1",
        "custom_id": custom_id,
        "response": {
            "status_code": 200,
            "body": { "choices": [{ "message": { "role": "assistant", "content": content } }] }
        }
    })
    .to_string()
}

async fn mount_job(server: &MockServer, description: &str, output: Option<&str>, lines: &[String]) {
    let status = if output.is_some() { "completed" } else { "in_progress" };
    Mock::given(method("GET"))
        .and(path("/batches/batch_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "batch_abc",
            "status": status,
            "input_file_id": "file-in",
            "output_file_id": output,
            "metadata": { "description": description }
        })))
        .mount(server)
        .await;

    if let Some(file_id) = output {
        Mock::given(method("GET"))
            .and(path(format!("/files/{file_id}/content")))
            .respond_with(ResponseTemplate::new(200).set_body_string(lines.join("\n")))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn submit_uploads_file_then_creates_batch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "file-in", "object": "file", "purpose": "batch"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/batches"))
        .and(body_partial_json(json!({
            "input_file_id": "file-in",
            "endpoint": "/v1/chat/completions",
            "completion_window": "24h",
            "metadata": { "description": "gpt-3.5-turbo/onlyanswer/neutral/single_turn" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "batch_abc",
            "status": "validating",
            "input_file_id": "file-in",
            "metadata": { "description": "gpt-3.5-turbo/onlyanswer/neutral/single_turn" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let plan = BatchPlan {
        folder: "batches/gpt-3.5-turbo".to_string(),
        file_name: "onlyanswer_neutral_single_turn_context_neutral_batch.jsonl".to_string(),
        description: "gpt-3.5-turbo/onlyanswer/neutral/single_turn".to_string(),
        descriptors: vec![BatchCallDescriptor::new(
            "1/0/single_turn/simple/none/onlyanswer/neutral",
            ChatRequest::new("gpt-3.5-turbo", vec![Message::user("Q")]),
        )],
    };
    let file = plan.write(dir.path()).unwrap();
    let job = plan.submit(&client(&server), &file).await.unwrap();

    assert_eq!(job.id, "batch_abc");
    assert_eq!(job.description(), Some("gpt-3.5-turbo/onlyanswer/neutral/single_turn"));
}

#[tokio::test]
async fn read_batch_merges_target_rows_by_description() {
    let server = MockServer::start().await;
    let lines = vec![
        output_line("2/0/gpt-4-turbo/simple/general/onlyanswer/increase", "300"),
        output_line("1/0/gpt-4-turbo/simple/general/onlyanswer/decrease", "100"),
    ];
    mount_job(&server, "gpt-3.5-turbo/onlyanswer/general/gpt-4-turbo", Some("file-out"), &lines).await;

    let store = MemoryTableStore::new();
    let rows = read_target_batch(&client(&server), &store, "batch_abc", false)
        .await
        .unwrap();
    assert_eq!(rows, 2);

    let table: Vec<TargetResponseRow> = store
        .require("results/gpt-3.5-turbo/onlyanswer/general_target_responses.csv")
        .unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table[0].target_id, 1);
    assert_eq!(table[0].model, "gpt-3.5-turbo");
    assert_eq!(table[1].response, "300");
}

#[tokio::test]
async fn read_batch_routes_context_answers_by_prompt_style() {
    let server = MockServer::start().await;
    let lines = vec![output_line(
        "1/0/gpt-4-turbo/simple/general/onlyanswer/increase",
        "Probably a lot",
    )];
    mount_job(&server, "gpt-3.5-turbo/onlyanswer/general/gpt-4-turbo", Some("file-out"), &lines).await;

    let store = MemoryTableStore::new();
    read_target_batch(&client(&server), &store, "batch_abc", true)
        .await
        .unwrap();

    assert!(store
        .csv_text("results/gpt-3.5-turbo/simple_responses.csv")
        .unwrap()
        .contains("Probably a lot"));
    assert!(store
        .csv_text("results/gpt-3.5-turbo/onlyanswer/general_target_responses.csv")
        .is_none());
}

#[tokio::test]
async fn read_context_batch_fills_first_turn_table() {
    let server = MockServer::start().await;
    let lines = vec![output_line("42/gpt-4-turbo/general/increase", "Is Chicago huge?")];
    mount_job(&server, "gpt-4-turbo/context_questions/general/increase", Some("file-out"), &lines).await;

    let store = MemoryTableStore::new();
    read_context_batch(&client(&server), &store, "batch_abc", true)
        .await
        .unwrap();

    let rows: Vec<ContextQuestionRow> = store
        .require("results/context_questions/general_first_turn.csv")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].target_id, 42);
    assert_eq!(rows[0].experiment_type, ExperimentType::Increase);
    assert_eq!(rows[0].question, "Is Chicago huge?");
}

#[tokio::test]
async fn unfinished_batch_is_a_configuration_error() {
    let server = MockServer::start().await;
    mount_job(&server, "gpt-3.5-turbo/onlyanswer/general/gpt-4-turbo", None, &[]).await;

    let store = MemoryTableStore::new();
    let err = read_target_batch(&client(&server), &store, "batch_abc", false)
        .await
        .unwrap_err();

    match err {
        HarnessError::Config(message) => assert!(message.contains("in_progress")),
        other => panic!("expected config error, got {other:?}"),
    }
    assert!(store.table_names().is_empty());
}
