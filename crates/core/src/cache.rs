//! Command Cache
//!
//! Maps a fingerprint of `(command text, recent context)` to the structured
//! command previously parsed for it, so repeated input skips the model.
//!
//! Eviction is first-in-first-out: when full, the entry inserted earliest is
//! dropped, however recently it was read. `get` never reorders entries.

use crate::agent::AgentCommand;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Default number of parsed commands kept.
pub const DEFAULT_CAPACITY: usize = 1000;

const SEPARATOR: &str = "\u{1f}|context|\u{1f}";

/// Computes the cache key for a command and its recent context.
///
/// The command text is trimmed and lowercased; the context is used as-is.
pub fn fingerprint(command_text: &str, recent_context: &str) -> String {
    let normalized = command_text.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(SEPARATOR.as_bytes());
    hasher.update(recent_context.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Bounded FIFO cache of parsed commands.
#[derive(Debug)]
pub struct CommandCache {
    capacity: usize,
    entries: HashMap<String, AgentCommand>,
    order: VecDeque<String>,
}

impl CommandCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, command_text: &str, recent_context: &str) -> Option<&AgentCommand> {
        self.entries.get(&fingerprint(command_text, recent_context))
    }

    /// Inserts a parsed command, evicting the oldest insertion when full.
    ///
    /// Overwriting an existing key keeps its original position.
    pub fn set(&mut self, command_text: &str, recent_context: &str, value: AgentCommand) {
        if self.capacity == 0 {
            return;
        }
        let key = fingerprint(command_text, recent_context);
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                debug!(evicted = %oldest, "Command cache full, evicted oldest entry");
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CommandCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
