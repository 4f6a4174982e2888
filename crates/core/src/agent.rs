//! Agent Catalog and Structured Commands
//!
//! This module defines the read-only catalog the assistant routes against
//! (agents, their commands, and parameter schemas) together with the
//! structured command the parser produces for each routable utterance.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The agent name the parser uses for small talk. Never dispatched.
pub const CONVERSATION_AGENT: &str = "conversation";

// --- Catalog ---

/// A named provider of capabilities, as supplied at startup.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
}

impl AgentDescriptor {
    /// Finds the command with the given name.
    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }
}

/// A single command an agent exposes.
///
/// Catalog files may list a command either as a full object or as a bare
/// name, in which case it declares no parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "RawCommandSpec")]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub parameters: CommandParameters,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCommandSpec {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        parameters: CommandParameters,
    },
}

impl From<RawCommandSpec> for CommandSpec {
    fn from(raw: RawCommandSpec) -> Self {
        match raw {
            RawCommandSpec::Name(name) => Self {
                name,
                description: String::new(),
                parameters: CommandParameters::default(),
            },
            RawCommandSpec::Full {
                name,
                description,
                parameters,
            } => Self {
                name,
                description,
                parameters,
            },
        }
    }
}

/// The parameter declaration of a command: a full schema or a bare set of names.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum CommandParameters {
    Schema(BTreeMap<String, ParamSpec>),
    Names(Vec<String>),
}

impl Default for CommandParameters {
    fn default() -> Self {
        Self::Schema(BTreeMap::new())
    }
}

impl CommandParameters {
    /// Declared parameter names, in declaration order for the bare form and
    /// sorted order for the schema form.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Schema(schema) => schema.keys().map(String::as_str).collect(),
            Self::Names(names) => names.iter().map(String::as_str).collect(),
        }
    }

    /// Returns the full spec view, synthesising a default spec for bare names.
    pub fn spec_view(&self) -> BTreeMap<String, ParamSpec> {
        match self {
            Self::Schema(schema) => schema.clone(),
            Self::Names(names) => names
                .iter()
                .map(|name| (name.clone(), ParamSpec::for_name(name)))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Schema(schema) => schema.is_empty(),
            Self::Names(names) => names.is_empty(),
        }
    }
}

/// Schema entry for a single parameter.
///
/// In catalog files a bare string is shorthand for a spec carrying only that
/// description.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "RawParamSpec")]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawParamSpec {
    Description(String),
    Full {
        #[serde(rename = "type", default = "default_kind")]
        kind: String,
        #[serde(default)]
        description: String,
        #[serde(default = "default_required")]
        required: bool,
        #[serde(default)]
        current_value: Option<Value>,
    },
}

fn default_kind() -> String {
    "string".to_string()
}

fn default_required() -> bool {
    true
}

impl From<RawParamSpec> for ParamSpec {
    fn from(raw: RawParamSpec) -> Self {
        match raw {
            RawParamSpec::Description(description) => Self {
                kind: default_kind(),
                description,
                required: true,
                current_value: None,
            },
            RawParamSpec::Full {
                kind,
                description,
                required,
                current_value,
            } => Self {
                kind,
                description,
                required,
                current_value,
            },
        }
    }
}

impl ParamSpec {
    /// The default spec synthesised for a parameter declared only by name.
    pub fn for_name(name: &str) -> Self {
        Self {
            kind: default_kind(),
            description: format!("Parameter: {}", name),
            required: true,
            current_value: None,
        }
    }
}

// --- Structured Command ---

/// The structured command derived from one utterance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentCommand {
    pub agent_name: String,
    pub function_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl AgentCommand {
    /// Interprets a decoded model reply as a command.
    ///
    /// Returns `None` when the model declined (`null`, a non-object, or an
    /// object without both names), which callers treat like a parse failure.
    pub fn from_value(value: Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        // `"parameters": null` is accepted as "no parameters".
        let mut value = value;
        if let Some(obj) = value.as_object_mut() {
            if obj.get("parameters").is_some_and(Value::is_null) {
                obj.remove("parameters");
            }
        }
        let command: AgentCommand = serde_json::from_value(value).ok()?;
        if command.agent_name.trim().is_empty() || command.function_name.trim().is_empty() {
            return None;
        }
        Some(command)
    }

    /// `"<agent>.<function>"`, the key the context extractor memoises on.
    pub fn signature(&self) -> String {
        format!("{}.{}", self.agent_name, self.function_name)
    }

    pub fn is_conversation(&self) -> bool {
        self.agent_name == CONVERSATION_AGENT
    }
}

/// Looks up the descriptor and command spec a command refers to.
pub fn find_command<'a>(
    agents: &'a [AgentDescriptor],
    command: &AgentCommand,
) -> Option<(&'a AgentDescriptor, &'a CommandSpec)> {
    let agent = agents.iter().find(|a| a.name == command.agent_name)?;
    let spec = agent.command(&command.function_name)?;
    Some((agent, spec))
}
