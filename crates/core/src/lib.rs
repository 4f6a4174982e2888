//! Core command routing for the Ginger assistant.
//!
//! A [`CommandProcessor`] turns free-form utterances into structured agent
//! commands with a tiered pair of completion models, fills in and refines
//! their parameters from conversation context, dispatches them to registered
//! capabilities, and renders the outcome through a [`ResponseModule`].

pub mod agent;
pub mod cache;
pub mod capabilities;
pub mod extractor;
pub mod history;
pub mod llm_client;
pub mod processor;
pub mod prompt;
pub mod refinement;
pub mod registry;
pub mod response;

pub use agent::{AgentCommand, AgentDescriptor, CommandParameters, CommandSpec, ParamSpec};
pub use history::{ConversationHistory, Role, Turn};
pub use llm_client::{LLMClient, OpenAICompatibleClient, TieredClient};
pub use processor::{CommandProcessor, ProcessorConfig};
pub use registry::{BuiltinCapabilities, Capability};
pub use response::{
    LlmResponder, PlainResponder, RenderedResponse, ResponseMode, ResponseModeError,
    ResponseModule, SpeechSink,
};
