use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Who produced a conversation turn.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One `(role, content)` entry of the conversation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

/// Append-only conversation log owned by a command processor.
///
/// Only a recent suffix is ever read. With a retention cap set, the oldest
/// turns are dropped once the cap is exceeded; without one the log grows for
/// the lifetime of the processor.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    retention: Option<usize>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `retention` turns.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            retention: Some(retention.max(1)),
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push_back(Turn::new(role, content));
        if let Some(limit) = self.retention {
            while self.turns.len() > limit {
                self.turns.pop_front();
            }
        }
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &Turn> {
        self.turns.iter().skip(self.turns.len().saturating_sub(n))
    }

    /// The last `n` turns rendered as `"role: content"` lines.
    pub fn render_recent(&self, n: usize) -> String {
        self.recent(n)
            .map(Turn::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
