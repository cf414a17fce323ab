use std::sync::Mutex;
use std::time::Duration;

use fermi_harness::context_generation::{generate_context_questions, ContextGenConfig};
use fermi_harness::gateway::{ChatGateway, ChatRequest, ChatResponse, FinishReason, ProviderError};
use fermi_harness::recorder::{append_rows, context_question_order};
use fermi_harness::tables::ContextQuestionRow;
use fermi_harness::{
    BatchBackend, ContextQuestionKey, ExperimentType, HarnessError, MemoryTableStore,
    ModelSelection, SyncBackend, TableStore,
};

const QUESTIONS: &str = "id,question,unit\n\
1,How many piano tuners are in Chicago?,tuners\n\
2,How many golf balls fit in a bus?,balls\n";
const PROMPTS: &str = "bias,prefix,postfix\n\
general,Write a question that would [experiment_type] the estimate for:,\n\
general,Rewrite it as a single short question.,\n\
expert,,Ask something an expert would ask to [experiment_type] the estimate.\n";

fn store() -> MemoryTableStore {
    MemoryTableStore::new()
        .with_table("experiment_data/target_questions.csv", QUESTIONS)
        .with_table("experiment_data/context_question_prompts.csv", PROMPTS)
}

fn gpt4() -> ModelSelection {
    ModelSelection::resolve("gpt-4-turbo").unwrap()
}

#[derive(Default)]
struct EchoLastTurn {
    requests: Mutex<Vec<ChatRequest>>,
}

#[async_trait::async_trait]
impl ChatGateway for EchoLastTurn {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(req.clone());
        let last = req.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(ChatResponse {
            content: format!("draft: {last}"),
            input_tokens: 0,
            output_tokens: 0,
            latency: Duration::ZERO,
            finish_reason: FinishReason::Stop,
        })
    }
}

#[tokio::test]
async fn first_turn_substitutes_experiment_type() {
    let store = store();
    let config = ContextGenConfig::new(gpt4());
    let mut backend = SyncBackend::new(EchoLastTurn::default(), "gpt-4-turbo");

    let outcome = generate_context_questions(&config, &store, &mut backend)
        .await
        .unwrap();
    assert!(outcome.multi_turn);
    assert_eq!(outcome.questions.len(), 4);

    let first = &outcome.questions[0];
    assert_eq!(first.target_id, 1);
    assert_eq!(first.source, "gpt-4-turbo");
    assert_eq!(first.experiment_type, ExperimentType::Decrease);
    assert_eq!(
        first.question,
        "draft: Write a question that would decrease the estimate for:\nHow many piano tuners are in Chicago?"
    );
    assert_eq!(
        config.output_table(outcome.multi_turn),
        "results/context_questions/general_first_turn.csv"
    );
}

#[tokio::test]
async fn second_turn_replays_the_first_turn_draft() {
    let store = store();
    let first = ContextGenConfig::new(gpt4()).experiment_type(Some(ExperimentType::Increase));
    let mut backend = SyncBackend::new(EchoLastTurn::default(), "gpt-4-turbo");
    let drafts = generate_context_questions(&first, &store, &mut backend)
        .await
        .unwrap();
    append_rows(
        &store,
        &first.output_table(drafts.multi_turn),
        drafts.questions,
        context_question_order,
    )
    .unwrap();

    let second = first.clone().turn(1);
    let mut backend = SyncBackend::new(EchoLastTurn::default(), "gpt-4-turbo");
    let outcome = generate_context_questions(&second, &store, &mut backend)
        .await
        .unwrap();
    assert_eq!(outcome.questions.len(), 2);

    let requests = backend.gateway().requests.lock().unwrap();
    let messages = &requests[0].messages;
    assert_eq!(messages.len(), 3);
    assert!(messages[1].content.starts_with("draft: Write a question that would increase"));
    assert_eq!(messages[2].content, "Rewrite it as a single short question.");

    append_rows(
        &store,
        &second.output_table(outcome.multi_turn),
        outcome.questions,
        context_question_order,
    )
    .unwrap();
    let generated: Vec<ContextQuestionRow> = store
        .require("experiment_data/generated_context_questions.csv")
        .unwrap();
    assert_eq!(generated.len(), 2);
}

#[tokio::test]
async fn second_turn_without_drafts_is_a_lookup_error() {
    let store = store().with_table(
        "results/context_questions/general_first_turn.csv",
        "target_id,source,bias,experiment_type,question\n",
    );
    let config = ContextGenConfig::new(gpt4()).turn(1);
    let mut backend = SyncBackend::new(EchoLastTurn::default(), "gpt-4-turbo");

    let err = generate_context_questions(&config, &store, &mut backend)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Lookup { .. }));
}

#[tokio::test]
async fn unknown_bias_and_missing_turn_are_configuration_errors() {
    let store = store();
    let mut backend = SyncBackend::new(EchoLastTurn::default(), "gpt-4-turbo");

    let unknown = ContextGenConfig::new(gpt4()).bias("contrarian");
    let err = generate_context_questions(&unknown, &store, &mut backend)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Config(_)));

    let single_turn = ContextGenConfig::new(gpt4()).bias("expert").turn(1);
    let err = generate_context_questions(&single_turn, &store, &mut backend)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Config(_)));
    assert!(backend.gateway().requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn batch_mode_uses_four_field_ids() {
    let store = store();
    let config = ContextGenConfig::new(gpt4()).bias("expert").batch(true);
    let mut backend = BatchBackend::new("gpt-4-turbo");

    let outcome = generate_context_questions(&config, &store, &mut backend)
        .await
        .unwrap();
    assert_eq!(outcome.enqueued, 4);
    assert!(!outcome.multi_turn);

    let key = ContextQuestionKey::parse(&backend.descriptors()[0].custom_id).unwrap();
    assert_eq!(key.source, "gpt-4-turbo");
    assert_eq!(key.bias, "expert");
    assert_eq!(
        backend.descriptors()[0].body.messages[0].content,
        "How many piano tuners are in Chicago?\nAsk something an expert would ask to decrease the estimate."
    );
}

#[tokio::test]
async fn debug_second_turn_reads_debug_drafts() {
    let store = store().with_table(
        "results/context_questions/general_first_turn.csv",
        "target_id,source,bias,experiment_type,question\n\
1,gpt-4-turbo,general,increase,live draft\n\
2,gpt-4-turbo,general,increase,live draft\n",
    );
    let first = ContextGenConfig::new(gpt4())
        .experiment_type(Some(ExperimentType::Increase))
        .debug(true);
    let mut backend = SyncBackend::new(EchoLastTurn::default(), "gpt-4-turbo");
    let drafts = generate_context_questions(&first, &store, &mut backend)
        .await
        .unwrap();
    let debug_table = first.output_table(drafts.multi_turn);
    assert_eq!(debug_table, "results/context_questions/DEBUGgeneral_first_turn.csv");
    append_rows(&store, &debug_table, drafts.questions, context_question_order).unwrap();

    let live: Vec<ContextQuestionRow> = store
        .require("results/context_questions/general_first_turn.csv")
        .unwrap();
    assert!(live.iter().all(|r| r.question == "live draft"));

    let second = first.turn(1);
    let mut backend = SyncBackend::new(EchoLastTurn::default(), "gpt-4-turbo");
    generate_context_questions(&second, &store, &mut backend)
        .await
        .unwrap();
    let requests = backend.gateway().requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|r| r.messages[1].content.starts_with("draft: Write a question")));
}
