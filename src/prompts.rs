//! Prompt templates and turn assembly.
//!
//! Template rows are resolved once at load time into a [`PromptTemplate`]:
//! either the raw question is sent as-is, or it is wrapped in a prefix
//! and/or postfix. Placeholders such as `[unit]` are substituted per
//! condition before a turn is built.

use crate::conversation::Conversation;
use crate::error::HarnessError;
use crate::tables::{ContextPromptRow, PromptRow};

/// Replaced with the target question's answer unit.
pub const UNIT_PLACEHOLDER: &str = "[unit]";
/// Replaced with the experiment type label.
pub const EXPERIMENT_TYPE_PLACEHOLDER: &str = "[experiment_type]";

// =============================================================================
// Templates
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptTemplate {
    /// No wrapping text: the turn is the question itself.
    RawQuestion,
    /// Question framed by optional prefix and postfix text.
    Wrapped {
        prefix: Option<String>,
        postfix: Option<String>,
    },
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

impl PromptTemplate {
    /// Resolve a template row. Blank parts are dropped; a row with no text at
    /// all becomes [`PromptTemplate::RawQuestion`].
    pub fn from_parts(prefix: Option<String>, postfix: Option<String>) -> Self {
        match (non_empty(prefix), non_empty(postfix)) {
            (None, None) => PromptTemplate::RawQuestion,
            (prefix, postfix) => PromptTemplate::Wrapped { prefix, postfix },
        }
    }

    pub fn wrapped(prefix: &str, postfix: &str) -> Self {
        Self::from_parts(Some(prefix.to_string()), Some(postfix.to_string()))
    }

    /// Copy of the template with every occurrence of `placeholder` replaced.
    pub fn substitute(&self, placeholder: &str, value: &str) -> Self {
        match self {
            PromptTemplate::RawQuestion => PromptTemplate::RawQuestion,
            PromptTemplate::Wrapped { prefix, postfix } => PromptTemplate::Wrapped {
                prefix: prefix.as_ref().map(|p| p.replace(placeholder, value)),
                postfix: postfix.as_ref().map(|p| p.replace(placeholder, value)),
            },
        }
    }

    /// Text of a user turn for `question`.
    pub fn render(&self, question: Option<&str>) -> String {
        match self {
            PromptTemplate::RawQuestion => question.unwrap_or_default().to_string(),
            PromptTemplate::Wrapped { prefix, postfix } => {
                [prefix.as_deref(), question, postfix.as_deref()]
                    .into_iter()
                    .flatten()
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    }
}

/// Append a user turn built from `question` and `template` to `history`, or
/// start a new conversation when there is none.
pub fn build_turn(
    question: Option<&str>,
    template: &PromptTemplate,
    history: Option<Conversation>,
) -> Conversation {
    let mut conversation = history.unwrap_or_default();
    conversation.push_user(template.render(question));
    conversation
}

// =============================================================================
// Template tables
// =============================================================================

/// Stage of the two-turn experiment a template belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Context,
    Target,
}

impl Turn {
    pub fn as_str(&self) -> &'static str {
        match self {
            Turn::Context => "context",
            Turn::Target => "target",
        }
    }
}

/// Named templates for the context and target turns (`prompts.csv`).
#[derive(Debug, Clone)]
pub struct PromptBook {
    rows: Vec<PromptRow>,
}

impl PromptBook {
    pub fn new(rows: Vec<PromptRow>) -> Self {
        Self { rows }
    }

    /// The first template named `style` for `turn`.
    pub fn select(&self, turn: Turn, style: &str) -> Result<PromptTemplate, HarnessError> {
        self.rows
            .iter()
            .find(|row| row.turn == turn.as_str() && row.prompt == style)
            .map(|row| PromptTemplate::from_parts(row.prefix.clone(), row.postfix.clone()))
            .ok_or_else(|| {
                HarnessError::config(format!(
                    "no {} prompt style named {style:?}",
                    turn.as_str()
                ))
            })
    }
}

/// The ordered turns of one context-question bias
/// (`context_question_prompts.csv`).
#[derive(Debug, Clone)]
pub struct ContextPromptSet {
    bias: String,
    turns: Vec<PromptTemplate>,
}

impl ContextPromptSet {
    pub fn for_bias(rows: &[ContextPromptRow], bias: &str) -> Result<Self, HarnessError> {
        let turns: Vec<PromptTemplate> = rows
            .iter()
            .filter(|row| row.bias == bias)
            .map(|row| PromptTemplate::from_parts(row.prefix.clone(), row.postfix.clone()))
            .collect();

        if turns.is_empty() {
            return Err(HarnessError::config(format!(
                "context question bias {bias:?} has no prompts"
            )));
        }

        Ok(Self {
            bias: bias.to_string(),
            turns,
        })
    }

    /// Template for turn `index`.
    pub fn turn(&self, index: usize) -> Result<&PromptTemplate, HarnessError> {
        self.turns.get(index).ok_or_else(|| {
            HarnessError::config(format!(
                "context question bias {:?} has {} turn(s), turn {index} requested",
                self.bias,
                self.turns.len()
            ))
        })
    }

    /// Whether the bias asks for its context question over two turns.
    ///
    /// Any bias with a second prompt row counts, so a two-row bias is
    /// multi-turn; a stricter "more than two rows" rule would leave turn 1
    /// unreachable.
    pub fn is_multi_turn(&self) -> bool {
        self.turns.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(turn: &str, prompt: &str, prefix: Option<&str>, postfix: Option<&str>) -> PromptRow {
        PromptRow {
            turn: turn.to_string(),
            prompt: prompt.to_string(),
            prefix: prefix.map(str::to_string),
            postfix: postfix.map(str::to_string),
        }
    }

    #[test]
    fn blank_rows_resolve_to_raw_question() {
        assert_eq!(
            PromptTemplate::from_parts(Some(String::new()), None),
            PromptTemplate::RawQuestion
        );
        assert_eq!(PromptTemplate::RawQuestion.render(Some("Q")), "Q");
    }

    #[test]
    fn placeholder_substitution_touches_prefix_and_postfix() {
        let t = PromptTemplate::wrapped("Answer in [unit].", "Only [unit], please.")
            .substitute(UNIT_PLACEHOLDER, "tuners");
        assert_eq!(
            t.render(Some("Q")),
            "Answer in tuners.\nQ\nOnly tuners, please."
        );
    }

    #[test]
    fn prompt_book_selects_by_turn_and_style() {
        let book = PromptBook::new(vec![
            row("context", "simple", None, None),
            row("target", "simple", Some("Estimate:"), None),
        ]);
        assert_eq!(
            book.select(Turn::Context, "simple").unwrap(),
            PromptTemplate::RawQuestion
        );
        assert_eq!(
            book.select(Turn::Target, "simple").unwrap().render(Some("Q")),
            "Estimate:\nQ"
        );
        assert!(matches!(
            book.select(Turn::Target, "missing").unwrap_err(),
            HarnessError::Config(_)
        ));
    }

    #[test]
    fn context_prompt_set_requires_rows_for_bias() {
        let rows = vec![
            ContextPromptRow {
                bias: "general".to_string(),
                prefix: Some("Ask something that makes the answer [experiment_type].".to_string()),
                postfix: None,
            },
            ContextPromptRow {
                bias: "general".to_string(),
                prefix: Some("Now phrase it as a question.".to_string()),
                postfix: None,
            },
        ];
        let set = ContextPromptSet::for_bias(&rows, "general").unwrap();
        assert!(set.is_multi_turn());
        assert!(set.turn(1).is_ok());
        assert!(matches!(set.turn(2).unwrap_err(), HarnessError::Config(_)));
        assert!(matches!(
            ContextPromptSet::for_bias(&rows, "expert").unwrap_err(),
            HarnessError::Config(_)
        ));
    }
}
