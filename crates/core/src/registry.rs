//! Agent Registry and Dispatch
//!
//! Maps agent names to capability instances and invokes one of their
//! functions with the final parameters of a structured command. Every
//! invocation is a suspending call, whether or not the capability actually
//! awaits anything.

use crate::agent::{AgentCommand, AgentDescriptor};
use crate::capabilities::{HomeAssistantConfig, LightsAgent, VacuumAgent, WeatherAgent};
use crate::history::{Role, Turn};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The interface every agent implementation exposes to the dispatcher.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Names of the functions this capability can run.
    fn functions(&self) -> &[&'static str];

    /// Runs `function` with named parameters and returns a displayable result.
    async fn invoke(&self, function: &str, params: &Map<String, Value>) -> Result<String>;
}

/// A function resolved on a capability, ready to be called.
pub struct BoundFunction<'a> {
    capability: &'a dyn Capability,
    name: &'a str,
}

impl BoundFunction<'_> {
    pub async fn call(&self, params: &Map<String, Value>) -> Result<String> {
        self.capability.invoke(self.name, params).await
    }
}

/// Resolves `function` on a capability, if it exposes one by that name.
pub fn resolve_function<'a>(
    capability: &'a dyn Capability,
    function: &'a str,
) -> Option<BoundFunction<'a>> {
    capability
        .functions()
        .iter()
        .any(|name| *name == function)
        .then_some(BoundFunction {
            capability,
            name: function,
        })
}

/// The result of dispatching one structured command.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed(String),
    AgentNotFound(String),
    FunctionNotFound(String),
    Failed(String),
}

impl DispatchOutcome {
    /// Converts the outcome into the report handed to the response module.
    pub fn into_report(self) -> Turn {
        match self {
            Self::Completed(result) => Turn::new(Role::Assistant, format!("Result: {}", result)),
            Self::AgentNotFound(agent) => {
                Turn::new(Role::System, format!("Agent '{}' not found.", agent))
            }
            Self::FunctionNotFound(function) => {
                Turn::new(Role::System, format!("Function '{}' not found.", function))
            }
            Self::Failed(error) => Turn::new(Role::System, format!("Error: {}", error)),
        }
    }
}

/// Constructs the capability kinds this crate ships with.
#[derive(Clone)]
pub struct BuiltinCapabilities {
    http: reqwest::Client,
    weather_base_url: String,
    home_assistant: Option<HomeAssistantConfig>,
}

impl BuiltinCapabilities {
    pub fn new(
        http: reqwest::Client,
        weather_base_url: impl Into<String>,
        home_assistant: Option<HomeAssistantConfig>,
    ) -> Self {
        Self {
            http,
            weather_base_url: weather_base_url.into(),
            home_assistant,
        }
    }

    /// Instantiates the capability backing an agent kind, if it is a known
    /// kind with everything it needs configured.
    pub fn instantiate(&self, kind: &str) -> Option<Arc<dyn Capability>> {
        match kind {
            "weather" => Some(Arc::new(WeatherAgent::new(
                self.http.clone(),
                self.weather_base_url.clone(),
            ))),
            "vacuum" | "roomba" | "lights" | "hue" => match &self.home_assistant {
                Some(config) if kind == "lights" || kind == "hue" => {
                    Some(Arc::new(LightsAgent::new(self.http.clone(), config.clone())))
                }
                Some(config) => Some(Arc::new(VacuumAgent::new(self.http.clone(), config.clone()))),
                None => {
                    warn!(kind, "Home Assistant is not configured, agent has no backing instance");
                    None
                }
            },
            _ => None,
        }
    }
}

impl Default for BuiltinCapabilities {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), crate::capabilities::WTTR_BASE_URL, None)
    }
}

/// Agent name to capability instance.
#[derive(Default)]
pub struct AgentRegistry {
    instances: HashMap<String, Arc<dyn Capability>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiates a capability for every descriptor whose name is a known
    /// built-in kind. Other descriptors stay routable but have no instance.
    pub fn from_descriptors(descriptors: &[AgentDescriptor], builtins: &BuiltinCapabilities) -> Self {
        let mut registry = Self::new();
        for descriptor in descriptors {
            if let Some(capability) = builtins.instantiate(&descriptor.name) {
                info!(agent = %descriptor.name, "Initialized agent");
                registry.register(descriptor.name.clone(), capability);
            }
        }
        registry
    }

    /// Attaches a capability under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, capability: Arc<dyn Capability>) {
        self.instances.insert(name.into(), capability);
    }

    pub fn resolve(&self, agent_name: &str) -> Option<&Arc<dyn Capability>> {
        self.instances.get(agent_name)
    }

    pub fn agent_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.instances.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolves and invokes the command. Never fails: unresolvable agents or
    /// functions, errors, and timeouts all become outcomes.
    pub async fn dispatch(&self, command: &AgentCommand, timeout: Duration) -> DispatchOutcome {
        let Some(capability) = self.resolve(&command.agent_name) else {
            warn!(agent = %command.agent_name, available = ?self.agent_names(), "Agent not found");
            return DispatchOutcome::AgentNotFound(command.agent_name.clone());
        };
        let Some(function) = resolve_function(capability.as_ref(), &command.function_name) else {
            warn!(
                agent = %command.agent_name,
                function = %command.function_name,
                available = ?capability.functions(),
                "Function not found"
            );
            return DispatchOutcome::FunctionNotFound(command.function_name.clone());
        };

        info!(
            agent = %command.agent_name,
            function = %command.function_name,
            parameters = ?command.parameters,
            "Executing capability"
        );
        match tokio::time::timeout(timeout, function.call(&command.parameters)).await {
            Ok(Ok(result)) => {
                info!(result = %result, "Execution result");
                DispatchOutcome::Completed(result)
            }
            Ok(Err(e)) => {
                warn!(error = ?e, "Capability failed");
                DispatchOutcome::Failed(format!("{:#}", e))
            }
            Err(_) => {
                warn!(?timeout, "Capability timed out");
                DispatchOutcome::Failed(format!(
                    "{} timed out after {:?}",
                    command.signature(),
                    timeout
                ))
            }
        }
    }
}
