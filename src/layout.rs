//! Names of every table and batch file, relative to the data directory.

use crate::condition::source_name;

pub const TARGET_QUESTIONS: &str = "experiment_data/target_questions.csv";
pub const PROMPTS: &str = "experiment_data/prompts.csv";
pub const CONTEXT_QUESTION_PROMPTS: &str = "experiment_data/context_question_prompts.csv";
pub const CONTEXT_QUESTIONS: &str = "experiment_data/generated_context_questions.csv";

const DEBUG_PREFIX: &str = "DEBUG";

fn debug_prefix(debug: bool) -> &'static str {
    if debug {
        DEBUG_PREFIX
    } else {
        ""
    }
}

/// First-turn answers of a two-turn context-question bias.
pub fn first_turn_table(bias: &str, debug: bool) -> String {
    format!(
        "results/context_questions/{}{bias}_first_turn.csv",
        debug_prefix(debug)
    )
}

/// Recorded context answers for a model and context prompt style.
pub fn context_answers_table(model: &str, context_prompt: &str, debug: bool) -> String {
    format!(
        "results/{model}/{}{context_prompt}_responses.csv",
        debug_prefix(debug)
    )
}

/// Target responses for a model, target prompt style and bias.
pub fn target_responses_table(model: &str, target_prompt: &str, bias: &str, debug: bool) -> String {
    format!(
        "results/{model}/{target_prompt}/{}{bias}_target_responses.csv",
        debug_prefix(debug)
    )
}

/// Generated context questions; debug runs write to a separate table.
pub fn context_questions_table(debug: bool) -> String {
    if debug {
        format!("experiment_data/{DEBUG_PREFIX}generated_context_questions.csv")
    } else {
        CONTEXT_QUESTIONS.to_string()
    }
}

pub fn batch_folder(model: &str) -> String {
    format!("batches/{}", source_name(model))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_runs_write_to_prefixed_tables() {
        assert_eq!(
            target_responses_table("gpt-3.5-turbo", "onlyanswer", "general", true),
            "results/gpt-3.5-turbo/onlyanswer/DEBUGgeneral_target_responses.csv"
        );
        assert_eq!(
            context_answers_table("gpt-3.5-turbo", "simple", false),
            "results/gpt-3.5-turbo/simple_responses.csv"
        );
        assert_eq!(
            first_turn_table("general", true),
            "results/context_questions/DEBUGgeneral_first_turn.csv"
        );
    }
}
