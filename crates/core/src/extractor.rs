//! Context Extractor
//!
//! Looks through recent conversation history for the value of a parameter
//! the parsed command left empty. Results are memoised per
//! `(parameter, command signature)` pair, so a pair is only ever sent to the
//! model once while it stays in the memo. The memo is bounded; once full,
//! older pairs are evicted and may be asked again.

use crate::history::ConversationHistory;
use crate::llm_client::{ModelTier, TieredClient};
use crate::prompt;
use moka::sync::Cache;
use tracing::{debug, info, warn};

/// Default bound on memoised `(parameter, signature)` pairs.
pub const DEFAULT_MEMO_CAPACITY: u64 = 512;

/// Replies the model uses to say nothing relevant was found.
const NOT_FOUND_TOKENS: &[&str] = &["none", "null", "none found", "n/a", "unknown"];

type MemoKey = (String, String);

pub struct ContextExtractor {
    memo: Cache<MemoKey, Option<String>>,
    window: usize,
    temperature: f32,
}

impl ContextExtractor {
    /// Creates an extractor reading the last `window` turns of history.
    pub fn new(window: usize, temperature: f32, memo_capacity: u64) -> Self {
        Self {
            memo: Cache::builder().max_capacity(memo_capacity).build(),
            window,
            temperature,
        }
    }

    /// Returns the most recent value for `missing_param`, or `None` when the
    /// history holds nothing usable or the backend failed.
    pub async fn extract(
        &self,
        llm: &TieredClient,
        history: &ConversationHistory,
        missing_param: &str,
        command_signature: &str,
    ) -> Option<String> {
        let key = (missing_param.to_string(), command_signature.to_string());
        if let Some(memoised) = self.memo.get(&key) {
            debug!(param = missing_param, signature = command_signature, "Context memo hit");
            return memoised;
        }

        let history_text = history.render_recent(self.window);
        let messages = prompt::extract_messages(&history_text, missing_param, command_signature);
        let value = match llm
            .complete(ModelTier::Primary, messages, self.temperature)
            .await
        {
            Ok(reply) => interpret_reply(&reply),
            Err(e) => {
                warn!(param = missing_param, error = %e, "Context extraction failed");
                None
            }
        };

        info!(param = missing_param, signature = command_signature, value = ?value, "Context extracted");
        self.memo.insert(key, value.clone());
        value
    }

    pub fn memo_len(&self) -> u64 {
        self.memo.run_pending_tasks();
        self.memo.entry_count()
    }
}

/// Normalises the model's reply to a value or `None`.
fn interpret_reply(reply: &str) -> Option<String> {
    let value = reply
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim();
    if value.is_empty() || NOT_FOUND_TOKENS.contains(&value.to_lowercase().as_str()) {
        return None;
    }
    Some(value.to_string())
}
