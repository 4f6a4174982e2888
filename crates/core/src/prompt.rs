//! Prompt Construction
//!
//! Builds the messages sent to the completion backend for each pipeline
//! stage and extracts the JSON payload from model replies.

use crate::agent::{AgentDescriptor, CommandParameters, ParamSpec};
use crate::history::{Role, Turn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Write;

const PARSE_TEMPLATE: &str = include_str!("../prompts/parse_command.md");
const REFINE_TEMPLATE: &str = include_str!("../prompts/refine_parameters.md");
const EXTRACT_TEMPLATE: &str = include_str!("../prompts/extract_parameter.md");
const RESPOND_TEMPLATE: &str = include_str!("../prompts/respond.md");

/// System message for the command parsing stage.
pub const PARSER_SYSTEM_PROMPT: &str =
    "You are a command parser that converts natural language commands into structured agent commands.";

/// System message for the parameter refinement stage.
pub const REFINER_SYSTEM_PROMPT: &str =
    "You are a parameter validator that makes structured command parameters concrete using conversation context.";

/// System message for the context extraction stage.
pub const EXTRACTOR_SYSTEM_PROMPT: &str =
    "You are a context analyzer that extracts relevant parameter values from conversation history.";

/// Substitutes `{key}` placeholders in a single pass, so substituted values
/// are never themselves expanded.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close))
        });
        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn describe_parameter(out: &mut String, name: &str, spec: &ParamSpec) {
    let requirement = if spec.required { "required" } else { "optional" };
    let _ = writeln!(
        out,
        "      {} ({}, {}): {}",
        name, spec.kind, requirement, spec.description
    );
}

/// Renders a compact listing of every agent, its commands, and their parameters.
pub fn describe_agents(agents: &[AgentDescriptor]) -> String {
    let mut out = String::new();
    for agent in agents {
        let _ = writeln!(out, "Agent: {}", agent.name);
        if !agent.description.is_empty() {
            let _ = writeln!(out, "  Description: {}", agent.description);
        }
        for command in &agent.commands {
            if command.description.is_empty() {
                let _ = writeln!(out, "  Command: {}", command.name);
            } else {
                let _ = writeln!(out, "  Command: {} - {}", command.name, command.description);
            }
            if command.parameters.is_empty() {
                continue;
            }
            out.push_str("    Parameters:\n");
            match &command.parameters {
                CommandParameters::Schema(schema) => {
                    for (name, spec) in schema {
                        describe_parameter(&mut out, name, spec);
                    }
                }
                CommandParameters::Names(names) => {
                    for name in names {
                        describe_parameter(&mut out, name, &ParamSpec::for_name(name));
                    }
                }
            }
        }
    }
    out.trim_end().to_string()
}

/// Messages asking the model to turn an utterance into a structured command.
pub fn parse_messages(agents: &[AgentDescriptor], history: &str, command: &str) -> Vec<Turn> {
    let agents = describe_agents(agents);
    let prompt = render(
        PARSE_TEMPLATE,
        &[
            ("agents", agents.as_str()),
            ("history", history),
            ("command", command),
        ],
    );
    vec![
        Turn::new(Role::System, PARSER_SYSTEM_PROMPT),
        Turn::new(Role::User, prompt),
    ]
}

/// Messages asking the model for refined parameter values.
pub fn refine_messages(
    context: &str,
    signature: &str,
    spec: &BTreeMap<String, ParamSpec>,
    current: &Map<String, Value>,
) -> Vec<Turn> {
    let spec = serde_json::to_string_pretty(spec).unwrap_or_default();
    let current = serde_json::to_string_pretty(current).unwrap_or_default();
    let prompt = render(
        REFINE_TEMPLATE,
        &[
            ("context", context),
            ("signature", signature),
            ("spec", spec.as_str()),
            ("current", current.as_str()),
        ],
    );
    vec![
        Turn::new(Role::System, REFINER_SYSTEM_PROMPT),
        Turn::new(Role::User, prompt),
    ]
}

/// Messages asking the model for the most recent value of one parameter.
pub fn extract_messages(history: &str, parameter: &str, signature: &str) -> Vec<Turn> {
    let prompt = render(
        EXTRACT_TEMPLATE,
        &[
            ("history", history),
            ("parameter", parameter),
            ("signature", signature),
        ],
    );
    vec![
        Turn::new(Role::System, EXTRACTOR_SYSTEM_PROMPT),
        Turn::new(Role::User, prompt),
    ]
}

/// System prompt for the spoken/displayed reply.
pub fn respond_system_prompt(name: &str, personality: &str, mood: &str) -> String {
    render(
        RESPOND_TEMPLATE,
        &[("name", name), ("personality", personality), ("mood", mood)],
    )
    .trim_end()
    .to_string()
}

// --- Replies ---

/// Pulls the JSON payload out of a model reply.
///
/// Handles ```` ```json ```` fences, bare fences, and JSON surrounded by prose.
pub fn extract_json_block(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return &trimmed[start..=end];
        }
    }

    trimmed
}
