//! Shaping exchanges into rows and merging them into result tables.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::condition::{CallKey, ContextQuestionKey, ExperimentType};
use crate::error::HarnessError;
use crate::tables::{ContextAnswerRow, ContextQuestionRow, TableStore, TargetResponseRow};

// =============================================================================
// Records
// =============================================================================

pub fn target_record(key: &CallKey, model: &str, response: impl Into<String>) -> TargetResponseRow {
    TargetResponseRow {
        target_id: key.target_id,
        sample: key.sample,
        model: model.to_string(),
        context: key.context.clone(),
        context_prompt: key.context_prompt.clone(),
        context_bias: key.context_bias.clone(),
        target_prompt: key.target_prompt.clone(),
        experiment_type: key.experiment_type,
        response: response.into(),
    }
}

/// Context answers carry no target prompt: one answer serves every target
/// prompt style sampled after it.
pub fn context_answer_record(
    key: &CallKey,
    model: &str,
    response: impl Into<String>,
) -> ContextAnswerRow {
    ContextAnswerRow {
        target_id: key.target_id,
        sample: key.sample,
        model: model.to_string(),
        context: key.context.clone(),
        context_prompt: key.context_prompt.clone(),
        context_bias: key.context_bias.clone(),
        experiment_type: key.experiment_type,
        response: response.into(),
    }
}

pub fn context_question_record(
    key: &ContextQuestionKey,
    question: impl Into<String>,
) -> ContextQuestionRow {
    ContextQuestionRow {
        target_id: key.target_id,
        source: key.source.clone(),
        bias: key.bias.clone(),
        experiment_type: key.experiment_type,
        question: question.into(),
    }
}

// =============================================================================
// Sort orders
// =============================================================================

pub fn target_order(r: &TargetResponseRow) -> (u32, String, ExperimentType) {
    (r.target_id, r.context.clone(), r.experiment_type)
}

/// Order used when batch results are read back.
pub fn batch_target_order(r: &TargetResponseRow) -> (String, String, u32, ExperimentType) {
    (
        r.context.clone(),
        r.context_bias.clone(),
        r.target_id,
        r.experiment_type,
    )
}

pub fn context_answer_order(r: &ContextAnswerRow) -> (u32, String, ExperimentType) {
    (r.target_id, r.context.clone(), r.experiment_type)
}

pub fn context_question_order(r: &ContextQuestionRow) -> (u32, String, String, ExperimentType) {
    (r.target_id, r.source.clone(), r.bias.clone(), r.experiment_type)
}

// =============================================================================
// Merge
// =============================================================================

/// Append `new` to `existing` and stable-sort on `key`.
///
/// This is a plain union: nothing is deduplicated. Running the same
/// configuration twice stores every sample twice, and that is kept as is so
/// repeated runs read as deliberate re-sampling.
pub fn merge<T, K, F>(existing: Option<Vec<T>>, new: Vec<T>, key: F) -> Vec<T>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut rows = existing.unwrap_or_default();
    rows.extend(new);
    rows.sort_by_key(|row| key(row));
    rows
}

/// Merge `new` into the table `name` of `store`. Returns the table's row
/// count afterwards; an empty `new` leaves the table untouched.
pub fn append_rows<S, T, K, F>(
    store: &S,
    name: &str,
    new: Vec<T>,
    key: F,
) -> Result<usize, HarnessError>
where
    S: TableStore,
    T: Serialize + DeserializeOwned,
    K: Ord,
    F: Fn(&T) -> K,
{
    if new.is_empty() {
        return Ok(0);
    }
    let added = new.len();
    let existing = store.load(name)?;
    let rows = merge(existing, new, key);
    store.save(name, &rows)?;
    info!(table = name, added, total = rows.len(), "table updated");
    Ok(rows.len())
}
