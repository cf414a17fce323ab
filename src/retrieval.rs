//! Reading completed batch jobs back into result tables.
//!
//! The job's description tag says where its rows belong; each output line's
//! `custom_id` carries the condition. Pure row-building is kept apart from
//! the HTTP calls so it can be tested offline.

use std::collections::BTreeMap;

use tracing::info;

use crate::batch::{parse_output, BatchAnswer};
use crate::condition::{CallKey, ContextQuestionKey};
use crate::error::HarnessError;
use crate::gateway::{BatchApiClient, BatchJob};
use crate::layout;
use crate::recorder::{
    append_rows, batch_target_order, context_answer_order, context_answer_record,
    context_question_order, context_question_record, target_record,
};
use crate::tables::{ContextAnswerRow, ContextQuestionRow, TableStore, TargetResponseRow};

/// Leading fields of a target run's description (`model/target_prompt/bias/context`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBatchTag {
    pub model: String,
    pub target_prompt: String,
    pub bias: String,
}

impl TargetBatchTag {
    pub fn parse(description: &str) -> Result<Self, HarnessError> {
        // The context source may itself contain `/`, so only the front is split.
        let mut fields = description.splitn(4, '/');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(model), Some(target_prompt), Some(bias)) => Ok(Self {
                model: model.to_string(),
                target_prompt: target_prompt.to_string(),
                bias: bias.to_string(),
            }),
            _ => Err(HarnessError::malformed(format!(
                "batch description {description:?} is not model/target_prompt/bias/context"
            ))),
        }
    }
}

/// Fields of a context-question run's description
/// (`model/context_questions/bias/experiment_type`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBatchTag {
    pub model: String,
    pub bias: String,
}

impl ContextBatchTag {
    pub fn parse(description: &str) -> Result<Self, HarnessError> {
        let fields: Vec<&str> = description.split('/').collect();
        match fields.as_slice() {
            [model, "context_questions", bias, _] => Ok(Self {
                model: model.to_string(),
                bias: bias.to_string(),
            }),
            _ => Err(HarnessError::malformed(format!(
                "batch description {description:?} is not model/context_questions/bias/experiment_type"
            ))),
        }
    }
}

pub fn target_rows(
    answers: &[BatchAnswer],
    model: &str,
) -> Result<Vec<TargetResponseRow>, HarnessError> {
    answers
        .iter()
        .map(|a| Ok(target_record(&CallKey::parse(&a.custom_id)?, model, a.content.clone())))
        .collect()
}

pub fn context_answer_rows(
    answers: &[BatchAnswer],
    model: &str,
) -> Result<Vec<ContextAnswerRow>, HarnessError> {
    answers
        .iter()
        .map(|a| {
            let key = CallKey::parse(&a.custom_id)?;
            Ok(context_answer_record(&key, model, a.content.clone()))
        })
        .collect()
}

pub fn context_question_rows(
    answers: &[BatchAnswer],
) -> Result<Vec<ContextQuestionRow>, HarnessError> {
    answers
        .iter()
        .map(|a| {
            let key = ContextQuestionKey::parse(&a.custom_id)?;
            Ok(context_question_record(&key, a.content.clone()))
        })
        .collect()
}

/// Fetch a finished job and its parsed output lines.
pub async fn download_output(
    client: &BatchApiClient,
    batch_id: &str,
) -> Result<(BatchJob, Vec<BatchAnswer>), HarnessError> {
    let job = client.retrieve_batch(batch_id).await?;
    let Some(output_file_id) = job.output_file_id.as_deref() else {
        return Err(HarnessError::config(format!(
            "batch {batch_id} has no output file yet (status {})",
            job.status
        )));
    };
    let body = client.file_content(output_file_id).await?;
    let answers = parse_output(&body)?;
    info!(batch_id, lines = answers.len(), status = %job.status, "batch output downloaded");
    Ok((job, answers))
}

fn description_of(job: &BatchJob) -> Result<&str, HarnessError> {
    job.description().ok_or_else(|| {
        HarnessError::malformed(format!("batch {} carries no description", job.id))
    })
}

/// Merge a target run's batch output. With `context_answers` the batch is a
/// context-answer generation run and rows go to the context answer tables,
/// one per context prompt style. Returns the number of rows read.
pub async fn read_target_batch<S: TableStore>(
    client: &BatchApiClient,
    store: &S,
    batch_id: &str,
    context_answers: bool,
) -> Result<usize, HarnessError> {
    let (job, answers) = download_output(client, batch_id).await?;
    let tag = TargetBatchTag::parse(description_of(&job)?)?;

    if !context_answers {
        let rows = target_rows(&answers, &tag.model)?;
        let count = rows.len();
        let table = layout::target_responses_table(&tag.model, &tag.target_prompt, &tag.bias, false);
        append_rows(store, &table, rows, batch_target_order)?;
        return Ok(count);
    }

    let mut by_prompt: BTreeMap<String, Vec<ContextAnswerRow>> = BTreeMap::new();
    for row in context_answer_rows(&answers, &tag.model)? {
        by_prompt
            .entry(row.context_prompt.clone())
            .or_default()
            .push(row);
    }
    let mut count = 0;
    for (context_prompt, rows) in by_prompt {
        count += rows.len();
        let table = layout::context_answers_table(&tag.model, &context_prompt, false);
        append_rows(store, &table, rows, context_answer_order)?;
    }
    Ok(count)
}

/// Merge a context-question batch into the generated questions table, or
/// the bias's first-turn table when `first_turn` is set.
pub async fn read_context_batch<S: TableStore>(
    client: &BatchApiClient,
    store: &S,
    batch_id: &str,
    first_turn: bool,
) -> Result<usize, HarnessError> {
    let (job, answers) = download_output(client, batch_id).await?;
    let tag = ContextBatchTag::parse(description_of(&job)?)?;
    let rows = context_question_rows(&answers)?;
    let count = rows.len();
    let table = if first_turn {
        layout::first_turn_table(&tag.bias, false)
    } else {
        layout::context_questions_table(false)
    };
    append_rows(store, &table, rows, context_question_order)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ExperimentType;

    fn answer(id: &str, content: &str) -> BatchAnswer {
        BatchAnswer {
            custom_id: id.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn target_description_keeps_slashes_in_context() {
        let tag = TargetBatchTag::parse("gpt-4/onlyanswer/general/meta-llama/Llama-3-8b").unwrap();
        assert_eq!(tag.model, "gpt-4");
        assert_eq!(tag.bias, "general");
        assert!(TargetBatchTag::parse("gpt-4").is_err());
    }

    #[test]
    fn context_description_needs_four_fields() {
        let tag = ContextBatchTag::parse("gpt-4-turbo/context_questions/general/all").unwrap();
        assert_eq!(tag.bias, "general");
        assert!(matches!(
            ContextBatchTag::parse("gpt-4-turbo/onlyanswer/general/x").unwrap_err(),
            HarnessError::Malformed(_)
        ));
    }

    #[test]
    fn rows_carry_the_condition_from_custom_ids() {
        let rows = target_rows(
            &[answer("3/1/gpt-4/simple/general/onlyanswer/increase", "120")],
            "gpt-3.5-turbo",
        )
        .unwrap();
        assert_eq!(rows[0].target_id, 3);
        assert_eq!(rows[0].sample, 1);
        assert_eq!(rows[0].experiment_type, ExperimentType::Increase);
        assert_eq!(rows[0].response, "120");

        let questions = context_question_rows(&[answer("42/source/bias/increase", "Q?")]).unwrap();
        assert_eq!(questions[0].source, "source");

        assert!(matches!(
            context_question_rows(&[answer("42/source/increase", "Q?")]).unwrap_err(),
            HarnessError::Malformed(_)
        ));
    }
}
