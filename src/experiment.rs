//! Target-question driver.
//!
//! For every target question and experiment type the driver optionally opens
//! the conversation with a context turn (answered now, enqueued, or spliced
//! in from recorded answers), appends the target turn and draws the
//! configured number of samples through an [`ExecutionBackend`].

use tracing::{debug, info, warn};

use crate::backend::{connect_gateway, BatchBackend, Dispatch, ExecutionBackend, SyncBackend};
use crate::batch::{self, BatchCallDescriptor, BatchFlush, BatchPlan};
use crate::condition::{source_name, CallKey, ContextQuestionKey, ExperimentType, NO_BIAS, SINGLE_TURN};
use crate::conversation::Conversation;
use crate::error::HarnessError;
use crate::gateway::ModelSelection;
use crate::layout;
use crate::prompts::{build_turn, PromptBook, PromptTemplate, Turn, UNIT_PLACEHOLDER};
use crate::recorder::{
    append_rows, context_answer_order, context_answer_record, target_order, target_record,
};
use crate::tables::{
    first_match, ContextAnswerRow, ContextQuestionRow, CsvTableStore, TableStore, TargetQuestion,
    TargetResponseRow,
};

/// Table label for failed context answer lookups.
const CONTEXT_ANSWERS: &str = "context answers";

/// Where the context turn's answer comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextMode {
    /// Splice in answers recorded by an earlier run.
    #[default]
    Reuse,
    /// Ask the model the context question in this run.
    Generate,
}

/// Immutable settings of one target-question run.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub model: ModelSelection,
    pub context_prompt: String,
    pub target_prompt: String,
    /// Explicit experiment type; `None` samples both biased directions.
    pub experiment_type: Option<ExperimentType>,
    /// Source model of the context questions; `None` runs single-turn.
    /// Read through [`ExperimentConfig::context_source`].
    pub context: Option<String>,
    pub bias: String,
    pub samples: u32,
    pub as_batch: bool,
    pub context_mode: ContextMode,
    pub debug: bool,
}

impl ExperimentConfig {
    pub fn new(model: ModelSelection) -> Self {
        Self {
            model,
            context_prompt: "simple".to_string(),
            target_prompt: "onlyanswer".to_string(),
            experiment_type: None,
            context: None,
            bias: "general".to_string(),
            samples: 10,
            as_batch: false,
            context_mode: ContextMode::Reuse,
            debug: false,
        }
    }

    /// Context source, stored as its last `/` segment so it can sit in a
    /// `/`-delimited batch id.
    pub fn context(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        self.context = Some(source_name(&source).to_string());
        self
    }

    pub fn context_prompt(mut self, style: impl Into<String>) -> Self {
        self.context_prompt = style.into();
        self
    }

    pub fn target_prompt(mut self, style: impl Into<String>) -> Self {
        self.target_prompt = style.into();
        self
    }

    pub fn bias(mut self, bias: impl Into<String>) -> Self {
        self.bias = bias.into();
        self
    }

    pub fn samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn experiment_type(mut self, experiment_type: Option<ExperimentType>) -> Self {
        self.experiment_type = experiment_type;
        self
    }

    pub fn context_mode(mut self, mode: ContextMode) -> Self {
        self.context_mode = mode;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Request batch execution. Providers without a batch endpoint keep the
    /// run synchronous.
    pub fn batch(mut self, requested: bool) -> Self {
        self.as_batch = requested && self.model.supports_batch();
        if requested && !self.as_batch {
            warn!(
                provider = self.model.provider.name(),
                model = %self.model.model_id,
                "provider has no batch endpoint; running synchronously"
            );
        }
        self
    }

    /// The context source as recorded in rows and ids.
    pub fn context_source(&self) -> Option<&str> {
        self.context.as_deref().map(source_name)
    }

    pub fn experiment_types(&self) -> Vec<ExperimentType> {
        ExperimentType::plan(self.experiment_type, self.context.is_some())
    }

    /// Key of one sampled call. Single-turn runs record the fixed
    /// `single_turn`/`none` labels.
    pub fn call_key(&self, target_id: u32, sample: u32, experiment_type: ExperimentType) -> CallKey {
        let (context, context_bias) = match self.context_source() {
            Some(source) => (source.to_string(), self.bias.clone()),
            None => (SINGLE_TURN.to_string(), NO_BIAS.to_string()),
        };
        CallKey {
            target_id,
            sample,
            context,
            context_prompt: self.context_prompt.clone(),
            context_bias,
            target_prompt: self.target_prompt.clone(),
            experiment_type,
        }
    }

    fn context_label(&self) -> &str {
        self.context_source().unwrap_or(SINGLE_TURN)
    }

    /// Bias used in result file names and batch descriptions.
    pub fn table_bias(&self) -> &str {
        match self.context {
            Some(_) => &self.bias,
            None => ExperimentType::Neutral.as_str(),
        }
    }

    fn generates_context(&self) -> bool {
        self.context.is_some() && self.context_mode == ContextMode::Generate
    }

    pub fn target_table(&self) -> String {
        layout::target_responses_table(
            &self.model.model_id,
            &self.target_prompt,
            self.table_bias(),
            self.debug,
        )
    }

    pub fn context_answers_table(&self) -> String {
        layout::context_answers_table(&self.model.model_id, &self.context_prompt, self.debug)
    }

    /// `model/target_prompt/bias/context`, parsed again by `read-batch`.
    pub fn batch_description(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.model.model_id,
            self.target_prompt,
            self.table_bias(),
            self.context_label()
        )
    }

    pub fn batch_file_name(&self) -> String {
        let exp = ExperimentType::label_for(&self.experiment_types());
        let context = self.context_label();
        if self.generates_context() {
            format!("{}_{context}_context_gen_{exp}_batch.jsonl", self.bias)
        } else {
            format!(
                "{}_{}_{context}_context_{exp}_batch.jsonl",
                self.target_prompt,
                self.table_bias()
            )
        }
    }

    pub fn batch_plan(&self, descriptors: Vec<BatchCallDescriptor>) -> BatchPlan {
        BatchPlan {
            folder: layout::batch_folder(&self.model.model_id),
            file_name: self.batch_file_name(),
            description: self.batch_description(),
            descriptors,
        }
    }
}

/// Rows produced by a run, not yet written anywhere.
#[derive(Debug, Clone, Default)]
pub struct ExperimentOutcome {
    pub target_responses: Vec<TargetResponseRow>,
    pub context_answers: Vec<ContextAnswerRow>,
    /// Calls deferred to a batch job.
    pub enqueued: usize,
}

// =============================================================================
// Context stage
// =============================================================================

struct ContextStage<'a> {
    source: &'a str,
    template: PromptTemplate,
    questions: Vec<ContextQuestionRow>,
    answers: Vec<ContextAnswerRow>,
}

impl<'a> ContextStage<'a> {
    fn load<S: TableStore>(
        config: &ExperimentConfig,
        store: &S,
        book: &PromptBook,
        source: &'a str,
    ) -> Result<Self, HarnessError> {
        let template = book.select(Turn::Context, &config.context_prompt)?;
        let questions: Vec<ContextQuestionRow> = store.require(layout::CONTEXT_QUESTIONS)?;
        let answers: Vec<ContextAnswerRow> = match config.context_mode {
            // Recorded answers always come from the live table, even in debug runs.
            ContextMode::Reuse => store.require(&layout::context_answers_table(
                &config.model.model_id,
                &config.context_prompt,
                false,
            ))?,
            ContextMode::Generate => Vec::new(),
        };
        Ok(Self {
            source,
            template,
            questions,
            answers,
        })
    }

    /// Conversation up to and including the context answer, or `None` when
    /// the context call was deferred to a batch.
    async fn open<B: ExecutionBackend>(
        &self,
        config: &ExperimentConfig,
        question: &TargetQuestion,
        experiment_type: ExperimentType,
        backend: &mut B,
        outcome: &mut ExperimentOutcome,
    ) -> Result<Option<Conversation>, HarnessError> {
        let key = ContextQuestionKey {
            target_id: question.id,
            source: self.source.to_string(),
            bias: config.bias.clone(),
            experiment_type,
        };
        let row = first_match(
            &self.questions,
            layout::CONTEXT_QUESTIONS,
            &key.to_custom_id(),
            |r| {
                r.target_id == key.target_id
                    && r.source == key.source
                    && r.bias == key.bias
                    && r.experiment_type == experiment_type
            },
        )?;
        let conversation = build_turn(Some(&row.question), &self.template, None);

        match config.context_mode {
            ContextMode::Reuse => {
                let answer = first_match(&self.answers, CONTEXT_ANSWERS, &key.to_custom_id(), |a| {
                    a.target_id == question.id
                        && a.context == self.source
                        && a.context_bias == config.bias
                        && a.experiment_type == experiment_type
                })?;
                Ok(Some(conversation.with_reply(answer.response.clone())))
            }
            ContextMode::Generate => {
                let call = config.call_key(question.id, 0, experiment_type);
                match backend.dispatch(&conversation, &call.to_custom_id()).await? {
                    Dispatch::Completed(reply) => {
                        outcome.context_answers.push(context_answer_record(
                            &call,
                            &config.model.model_id,
                            reply.clone(),
                        ));
                        Ok(Some(conversation.with_reply(reply)))
                    }
                    Dispatch::Enqueued => {
                        outcome.enqueued += 1;
                        Ok(None)
                    }
                }
            }
        }
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Walk every target question and experiment type, dispatching each call
/// through `backend`. Nothing is written to `store`.
pub async fn run_experiment<S, B>(
    config: &ExperimentConfig,
    store: &S,
    backend: &mut B,
) -> Result<ExperimentOutcome, HarnessError>
where
    S: TableStore,
    B: ExecutionBackend,
{
    let questions: Vec<TargetQuestion> = store.require(layout::TARGET_QUESTIONS)?;
    let book = PromptBook::new(store.require(layout::PROMPTS)?);
    let target_template = book.select(Turn::Target, &config.target_prompt)?;
    let context_stage = match config.context_source() {
        Some(source) => Some(ContextStage::load(config, store, &book, source)?),
        None => None,
    };
    let types = config.experiment_types();
    let mut outcome = ExperimentOutcome::default();

    for question in &questions {
        for &experiment_type in &types {
            info!(
                target_id = question.id,
                experiment_type = %experiment_type,
                "sampling question"
            );
            let history = match &context_stage {
                Some(stage) => {
                    let opened = stage
                        .open(config, question, experiment_type, backend, &mut outcome)
                        .await?;
                    match opened {
                        Some(conversation) => Some(conversation),
                        // Target stage waits for the batched context answer.
                        None => continue,
                    }
                }
                None => None,
            };

            let template = target_template.substitute(UNIT_PLACEHOLDER, &question.unit);
            let conversation = build_turn(Some(&question.question), &template, history);

            for sample in 0..config.samples {
                let key = config.call_key(question.id, sample, experiment_type);
                match backend.dispatch(&conversation, &key.to_custom_id()).await? {
                    Dispatch::Completed(response) => {
                        debug!(target_id = question.id, sample, "sample recorded");
                        outcome.target_responses.push(target_record(
                            &key,
                            &config.model.model_id,
                            response,
                        ));
                    }
                    Dispatch::Enqueued => outcome.enqueued += 1,
                }
            }
        }
    }

    Ok(outcome)
}

/// Merge a synchronous run's rows into its result tables.
pub fn record_outcome<S: TableStore>(
    config: &ExperimentConfig,
    store: &S,
    outcome: ExperimentOutcome,
) -> Result<(), HarnessError> {
    append_rows(
        store,
        &config.context_answers_table(),
        outcome.context_answers,
        context_answer_order,
    )?;
    append_rows(
        store,
        &config.target_table(),
        outcome.target_responses,
        target_order,
    )?;
    Ok(())
}

/// What a run left behind.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub recorded: usize,
    pub enqueued: usize,
    pub batch: Option<BatchFlush>,
}

/// Run `config` against the CSV tables under `store`, recording results or
/// writing (and submitting) a batch file.
pub async fn execute(
    config: &ExperimentConfig,
    store: &CsvTableStore,
) -> Result<RunSummary, HarnessError> {
    if config.as_batch {
        let mut backend = BatchBackend::new(&config.model.model_id);
        let outcome = run_experiment(config, store, &mut backend).await?;
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
    let outcome = run_experiment(config, store, &mut backend).await?;
    let recorded = outcome.target_responses.len() + outcome.context_answers.len();
    record_outcome(config, store, outcome)?;
    Ok(RunSummary {
        recorded,
        enqueued: 0,
        batch: None,
    })
}
