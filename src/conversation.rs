//! Append-only conversation log.

use crate::gateway::Message;

/// Ordered turns of one condition's exchange.
///
/// Turns are only ever appended. A conversation belongs to a single
/// condition; the driver starts a fresh one for every condition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Message::assistant(content));
    }

    /// Consume and return the conversation extended by the model's reply.
    pub fn with_reply(mut self, content: impl Into<String>) -> Self {
        self.push_assistant(content);
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.turns.last()
    }
}

impl From<Conversation> for Vec<Message> {
    fn from(c: Conversation) -> Self {
        c.turns
    }
}
