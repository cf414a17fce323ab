//! Experimental conditions and the structured keys that identify them.
//!
//! Keys are typed records inside the crate; the `/`-delimited text form only
//! exists at the boundary (batch `custom_id`s and batch descriptions).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Context label recorded when no context stage ran.
pub const SINGLE_TURN: &str = "single_turn";
/// Context bias label recorded when no context stage ran.
pub const NO_BIAS: &str = "none";

const ID_SEPARATOR: char = '/';

// =============================================================================
// Experiment type
// =============================================================================

/// Direction of the bias a context question is meant to induce.
///
/// Variant order matches the lexical order of the labels, so sorting records
/// by experiment type gives the same result as sorting the CSV text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentType {
    Decrease,
    Increase,
    Neutral,
}

impl ExperimentType {
    /// Types sampled when a context stage runs without an explicit override.
    pub const DEFAULT_BIASED: [ExperimentType; 2] =
        [ExperimentType::Decrease, ExperimentType::Increase];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentType::Decrease => "decrease",
            ExperimentType::Increase => "increase",
            ExperimentType::Neutral => "neutral",
        }
    }

    /// Experiment types for a run, in processing order.
    ///
    /// Without a context stage the only condition is `neutral`, whatever was
    /// requested. With a context stage an explicit type wins, otherwise both
    /// biased directions are sampled.
    pub fn plan(explicit: Option<ExperimentType>, has_context: bool) -> Vec<ExperimentType> {
        match (has_context, explicit) {
            (false, _) => vec![ExperimentType::Neutral],
            (true, Some(t)) => vec![t],
            (true, None) => Self::DEFAULT_BIASED.to_vec(),
        }
    }

    /// Label used in batch file names and descriptions for a set of types.
    pub fn label_for(types: &[ExperimentType]) -> &'static str {
        match types {
            [single] => single.as_str(),
            _ => "all",
        }
    }
}

impl fmt::Display for ExperimentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentType {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decrease" => Ok(ExperimentType::Decrease),
            "increase" => Ok(ExperimentType::Increase),
            "neutral" => Ok(ExperimentType::Neutral),
            other => Err(HarnessError::config(format!(
                "experiment type {other:?} not supported (expected decrease, increase or neutral)"
            ))),
        }
    }
}

// =============================================================================
// Target-stage key
// =============================================================================

/// Identity of one sampled call in a target-question run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    pub target_id: u32,
    pub sample: u32,
    pub context: String,
    pub context_prompt: String,
    pub context_bias: String,
    pub target_prompt: String,
    pub experiment_type: ExperimentType,
}

impl CallKey {
    const FIELDS: usize = 7;

    /// `target_id/sample/context/context_prompt/context_bias/target_prompt/experiment_type`
    pub fn to_custom_id(&self) -> String {
        [
            self.target_id.to_string(),
            self.sample.to_string(),
            self.context.clone(),
            self.context_prompt.clone(),
            self.context_bias.clone(),
            self.target_prompt.clone(),
            self.experiment_type.as_str().to_string(),
        ]
        .join("/")
    }

    pub fn parse(custom_id: &str) -> Result<Self, HarnessError> {
        let fields = split_fields(custom_id, Self::FIELDS)?;
        Ok(Self {
            target_id: parse_number(custom_id, fields[0])?,
            sample: parse_number(custom_id, fields[1])?,
            context: fields[2].to_string(),
            context_prompt: fields[3].to_string(),
            context_bias: fields[4].to_string(),
            target_prompt: fields[5].to_string(),
            experiment_type: fields[6].parse()?,
        })
    }
}

// =============================================================================
// Context-question key
// =============================================================================

/// Identity of one generated context question.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextQuestionKey {
    pub target_id: u32,
    pub source: String,
    pub bias: String,
    pub experiment_type: ExperimentType,
}

impl ContextQuestionKey {
    const FIELDS: usize = 4;

    /// `target_id/source/bias/experiment_type`
    pub fn to_custom_id(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.target_id, self.source, self.bias, self.experiment_type
        )
    }

    pub fn parse(custom_id: &str) -> Result<Self, HarnessError> {
        let fields = split_fields(custom_id, Self::FIELDS)?;
        Ok(Self {
            target_id: parse_number(custom_id, fields[0])?,
            source: fields[1].to_string(),
            bias: fields[2].to_string(),
            experiment_type: fields[3].parse()?,
        })
    }
}

impl fmt::Display for ContextQuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_custom_id())
    }
}

fn split_fields(custom_id: &str, expected: usize) -> Result<Vec<&str>, HarnessError> {
    let fields: Vec<&str> = custom_id.split(ID_SEPARATOR).collect();
    if fields.len() != expected {
        return Err(HarnessError::malformed(format!(
            "custom_id {custom_id:?} has {} fields, expected {expected}",
            fields.len()
        )));
    }
    Ok(fields)
}

fn parse_number(custom_id: &str, field: &str) -> Result<u32, HarnessError> {
    field.parse().map_err(|_| {
        HarnessError::malformed(format!("custom_id {custom_id:?}: {field:?} is not a number"))
    })
}

/// Last `/` segment of a model id (`meta-llama/Llama-3-8b` -> `Llama-3-8b`).
pub fn source_name(model: &str) -> &str {
    model.rsplit(ID_SEPARATOR).next().unwrap_or(model)
}
