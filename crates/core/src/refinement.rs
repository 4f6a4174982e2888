//! Parameter Refinement
//!
//! Makes a parsed command's parameters concrete before dispatch: missing
//! values are backfilled from conversation history, then the model is asked
//! to resolve vague values against recent context. The whole stage is
//! best-effort. If the refinement request fails on both model tiers the
//! command keeps its backfilled parameters and the pipeline carries on.

use crate::agent::{AgentCommand, CommandSpec, ParamSpec};
use crate::extractor::ContextExtractor;
use crate::history::ConversationHistory;
use crate::llm_client::TieredClient;
use crate::prompt;
use anyhow::{Result, anyhow};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub struct ParameterRefiner {
    window: usize,
    temperature: f32,
}

impl ParameterRefiner {
    /// Creates a refiner that shows the model the last `window` turns.
    pub fn new(window: usize, temperature: f32) -> Self {
        Self {
            window,
            temperature,
        }
    }

    /// Backfills and refines `command` against its catalog entry.
    ///
    /// Commands without a catalog entry, or whose entry declares no
    /// parameters, are returned untouched.
    pub async fn refine(
        &self,
        llm: &TieredClient,
        extractor: &ContextExtractor,
        history: &ConversationHistory,
        mut command: AgentCommand,
        spec: Option<&CommandSpec>,
    ) -> AgentCommand {
        let Some(spec) = spec.filter(|s| !s.parameters.is_empty()) else {
            debug!(signature = %command.signature(), "No declared parameters, skipping refinement");
            return command;
        };
        let signature = command.signature();

        for name in spec.parameters.names() {
            if command.parameters.get(name).is_some_and(is_truthy) {
                continue;
            }
            if let Some(value) = extractor.extract(llm, history, name, &signature).await {
                info!(param = name, value = %value, "Filled missing parameter from context");
                command
                    .parameters
                    .insert(name.to_string(), Value::String(value));
            }
        }

        match self.request_refinement(llm, history, &signature, spec, &command.parameters).await {
            Ok(refined) => {
                let merged = merge_refined(spec, &command.parameters, refined);
                let changed = changed_keys(&command.parameters, &merged);
                if !changed.is_empty() {
                    info!(signature = %signature, changed = ?changed, "Refined parameters");
                }
                command.parameters = merged;
            }
            Err(e) => {
                info!(signature = %signature, error = %e, "Refinement failed, keeping current parameters");
            }
        }
        command
    }

    async fn request_refinement(
        &self,
        llm: &TieredClient,
        history: &ConversationHistory,
        signature: &str,
        spec: &CommandSpec,
        current: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let view = spec_view_with_values(spec, current);
        let messages = prompt::refine_messages(
            &history.render_recent(self.window),
            signature,
            &view,
            current,
        );
        llm.complete_with_fallback("refine", messages, self.temperature, parse_refined)
            .await
    }
}

/// The spec view sent to the model, each entry carrying the current value.
fn spec_view_with_values(
    spec: &CommandSpec,
    current: &Map<String, Value>,
) -> BTreeMap<String, ParamSpec> {
    let mut view = spec.parameters.spec_view();
    for (name, param) in view.iter_mut() {
        param.current_value = current.get(name).cloned();
    }
    view
}

fn parse_refined(reply: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(prompt::extract_json_block(reply))? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("Expected a JSON object of parameters, got {}", other)),
    }
}

/// Overlays refined values on the current ones. Only declared parameters
/// are kept, and a null refined value never erases a current value.
fn merge_refined(
    spec: &CommandSpec,
    current: &Map<String, Value>,
    mut refined: Map<String, Value>,
) -> Map<String, Value> {
    spec.parameters
        .names()
        .into_iter()
        .filter_map(|name| {
            let value = match refined.remove(name) {
                Some(value) if !value.is_null() => Some(value),
                _ => current.get(name).cloned(),
            };
            value.map(|v| (name.to_string(), v))
        })
        .collect()
}

fn changed_keys(before: &Map<String, Value>, after: &Map<String, Value>) -> Vec<String> {
    let mut keys: Vec<String> = before
        .keys()
        .chain(after.keys())
        .filter(|k| before.get(*k) != after.get(*k))
        .cloned()
        .collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

/// Whether a parsed value counts as present.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
