//! Context-question generation.
//!
//! Asks a model to write, for every target question, a question meant to
//! push its estimate in a given direction. Biases with several prompt rows
//! are asked over two turns: turn 0 writes a draft into the bias's
//! first-turn table, turn 1 replays that draft and asks for the final
//! question.

use tracing::info;

use crate::backend::{connect_gateway, BatchBackend, Dispatch, ExecutionBackend, SyncBackend};
use crate::batch::{self, BatchPlan};
use crate::condition::{source_name, ContextQuestionKey, ExperimentType};
use crate::error::HarnessError;
use crate::experiment::RunSummary;
use crate::gateway::ModelSelection;
use crate::layout;
use crate::prompts::{build_turn, ContextPromptSet, EXPERIMENT_TYPE_PLACEHOLDER};
use crate::recorder::{append_rows, context_question_order, context_question_record};
use crate::tables::{
    first_match, ContextPromptRow, ContextQuestionRow, CsvTableStore, TableStore, TargetQuestion,
};

const FIRST_TURN: &str = "first turn questions";

#[derive(Debug, Clone)]
pub struct ContextGenConfig {
    pub model: ModelSelection,
    pub bias: String,
    pub experiment_type: Option<ExperimentType>,
    /// Prompt row of the bias to ask (0 or 1).
    pub turn: usize,
    pub as_batch: bool,
    pub debug: bool,
}

impl ContextGenConfig {
    pub fn new(model: ModelSelection) -> Self {
        Self {
            model,
            bias: "general".to_string(),
            experiment_type: None,
            turn: 0,
            as_batch: false,
            debug: false,
        }
    }

    pub fn bias(mut self, bias: impl Into<String>) -> Self {
        self.bias = bias.into();
        self
    }

    pub fn experiment_type(mut self, experiment_type: Option<ExperimentType>) -> Self {
        self.experiment_type = experiment_type;
        self
    }

    pub fn turn(mut self, turn: usize) -> Self {
        self.turn = turn;
        self
    }

    pub fn batch(mut self, requested: bool) -> Self {
        self.as_batch = requested && self.model.supports_batch();
        if requested && !self.as_batch {
            tracing::warn!(
                provider = self.model.provider.name(),
                "provider has no batch endpoint; running synchronously"
            );
        }
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Value of the `source` column for questions this model writes.
    pub fn source(&self) -> &str {
        source_name(&self.model.model_id)
    }

    pub fn experiment_types(&self) -> Vec<ExperimentType> {
        ExperimentType::plan(self.experiment_type, true)
    }

    /// Table the generated questions are merged into.
    pub fn output_table(&self, multi_turn: bool) -> String {
        if self.turn == 0 && multi_turn {
            layout::first_turn_table(&self.bias, self.debug)
        } else {
            layout::context_questions_table(self.debug)
        }
    }

    pub fn batch_plan(&self, descriptors: Vec<batch::BatchCallDescriptor>) -> BatchPlan {
        let exp = ExperimentType::label_for(&self.experiment_types());
        BatchPlan {
            folder: layout::batch_folder(&self.model.model_id),
            file_name: format!(
                "{}_{}_{exp}_{}_batch.jsonl",
                self.source(),
                self.bias,
                self.turn
            ),
            description: format!(
                "{}/context_questions/{}/{exp}",
                self.model.model_id, self.bias
            ),
            descriptors,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextGenOutcome {
    pub questions: Vec<ContextQuestionRow>,
    pub enqueued: usize,
    /// Whether the bias is asked over two turns.
    pub multi_turn: bool,
}

/// Generate one context question per target question and experiment type.
pub async fn generate_context_questions<S, B>(
    config: &ContextGenConfig,
    store: &S,
    backend: &mut B,
) -> Result<ContextGenOutcome, HarnessError>
where
    S: TableStore,
    B: ExecutionBackend,
{
    let targets: Vec<TargetQuestion> = store.require(layout::TARGET_QUESTIONS)?;
    let prompt_rows: Vec<ContextPromptRow> = store.require(layout::CONTEXT_QUESTION_PROMPTS)?;
    let prompts = ContextPromptSet::for_bias(&prompt_rows, &config.bias)?;
    let prompt = prompts.turn(config.turn)?;
    let opening = prompts.turn(0)?;
    // Debug runs replay their own debug drafts, never the live ones.
    let first_turns: Vec<ContextQuestionRow> = if config.turn > 0 {
        store.require(&layout::first_turn_table(&config.bias, config.debug))?
    } else {
        Vec::new()
    };

    let mut outcome = ContextGenOutcome {
        multi_turn: prompts.is_multi_turn(),
        ..ContextGenOutcome::default()
    };

    for target in &targets {
        for &experiment_type in &config.experiment_types() {
            info!(
                target_id = target.id,
                experiment_type = %experiment_type,
                turn = config.turn,
                "generating context question"
            );
            let label = experiment_type.as_str();
            let key = ContextQuestionKey {
                target_id: target.id,
                source: config.source().to_string(),
                bias: config.bias.clone(),
                experiment_type,
            };
            let prompt = prompt.substitute(EXPERIMENT_TYPE_PLACEHOLDER, label);

            let conversation = if config.turn == 0 {
                build_turn(Some(&target.question), &prompt, None)
            } else {
                let draft = first_match(&first_turns, FIRST_TURN, &key.to_custom_id(), |r| {
                    r.target_id == target.id
                        && r.source == key.source
                        && r.experiment_type == experiment_type
                })?;
                let opening = opening.substitute(EXPERIMENT_TYPE_PLACEHOLDER, label);
                let history = build_turn(Some(&target.question), &opening, None)
                    .with_reply(draft.question.clone());
                build_turn(None, &prompt, Some(history))
            };

            match backend.dispatch(&conversation, &key.to_custom_id()).await? {
                Dispatch::Completed(question) => outcome
                    .questions
                    .push(context_question_record(&key, question)),
                Dispatch::Enqueued => outcome.enqueued += 1,
            }
        }
    }

    Ok(outcome)
}

/// Run `config` against the CSV tables under `store`.
pub async fn execute(
    config: &ContextGenConfig,
    store: &CsvTableStore,
) -> Result<RunSummary, HarnessError> {
    if config.as_batch {
        let mut backend = BatchBackend::new(&config.model.model_id);
        let outcome = generate_context_questions(config, store, &mut backend).await?;
        let plan = config.batch_plan(backend.into_descriptors());
        let flush = batch::flush(&plan, store.root(), &config.model, config.debug).await?;
        return Ok(RunSummary {
            recorded: 0,
            enqueued: outcome.enqueued,
            batch: Some(flush),
        });
    }

    let gateway = connect_gateway(&config.model, config.debug)?;
    let mut backend = SyncBackend::new(gateway, &config.model.model_id);
    let outcome = generate_context_questions(config, store, &mut backend).await?;
    let recorded = outcome.questions.len();
    append_rows(
        store,
        &config.output_table(outcome.multi_turn),
        outcome.questions,
        context_question_order,
    )?;
    Ok(RunSummary {
        recorded,
        enqueued: 0,
        batch: None,
    })
}
