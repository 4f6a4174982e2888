//! Command Processor
//!
//! Runs one utterance through the routing pipeline: cache lookup, model
//! parse with a fallback tier, parameter refinement, capability dispatch,
//! and reply rendering. Every request ends in a returned string and an entry
//! in the conversation history; no failure escapes `process_command`.
//!
//! A processor owns its history, cache and extraction memo without locking.
//! `process_command` takes `&mut self`, so only one request can be in flight
//! per instance. Wrap it in a `tokio::sync::Mutex` to share it.

use crate::agent::{AgentCommand, AgentDescriptor, find_command};
use crate::cache::{self, CommandCache};
use crate::extractor::{self, ContextExtractor};
use crate::history::{ConversationHistory, Role};
use crate::llm_client::{LLMClient, TieredClient};
use crate::prompt;
use crate::refinement::ParameterRefiner;
use crate::registry::{AgentRegistry, BuiltinCapabilities, Capability};
use crate::response::{ResponseMode, ResponseModule};
use anyhow::{Result, anyhow};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Reply for utterances neither model tier could turn into a command.
pub const UNROUTABLE_REPLY: &str = "Sorry, I couldn't understand that command.";

/// Reply for small talk, which is never dispatched.
pub const CONVERSATION_REPLY: &str = "I'm doing well! How can I help you today?";

// --- Configuration ---

/// Tunables for a [`CommandProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub primary_model: String,
    pub fallback_model: String,
    pub parse_temperature: f32,
    pub refine_temperature: f32,
    pub extract_temperature: f32,
    /// History turns used for the cache key and the parse prompt.
    pub context_window: usize,
    /// History turns shown to the refinement stage.
    pub refine_window: usize,
    /// History turns the context extractor searches.
    pub extract_window: usize,
    pub cache_capacity: usize,
    pub extract_memo_capacity: u64,
    /// Applied to every completion call and capability invocation.
    pub call_timeout: Duration,
    pub history_retention: Option<usize>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            primary_model: "gpt-4o-mini".to_string(),
            fallback_model: "gpt-4o".to_string(),
            parse_temperature: 0.3,
            refine_temperature: 0.2,
            extract_temperature: 0.1,
            context_window: 6,
            refine_window: 2,
            extract_window: 6,
            cache_capacity: cache::DEFAULT_CAPACITY,
            extract_memo_capacity: extractor::DEFAULT_MEMO_CAPACITY,
            call_timeout: Duration::from_secs(30),
            history_retention: None,
        }
    }
}

impl ProcessorConfig {
    /// Wraps a backend with this configuration's model pair and timeout.
    pub fn tiered_client(&self, client: Arc<dyn LLMClient>) -> TieredClient {
        TieredClient::new(
            client,
            self.primary_model.clone(),
            self.fallback_model.clone(),
            self.call_timeout,
        )
    }
}

// --- Processor ---

pub struct CommandProcessor {
    llm: TieredClient,
    agents: Vec<AgentDescriptor>,
    registry: AgentRegistry,
    cache: CommandCache,
    extractor: ContextExtractor,
    refiner: ParameterRefiner,
    responder: Box<dyn ResponseModule>,
    history: ConversationHistory,
    config: ProcessorConfig,
}

impl CommandProcessor {
    /// Builds a processor and instantiates every built-in capability named in
    /// `agents`.
    pub fn new(
        llm: Arc<dyn LLMClient>,
        agents: Vec<AgentDescriptor>,
        builtins: &BuiltinCapabilities,
        responder: Box<dyn ResponseModule>,
        config: ProcessorConfig,
    ) -> Self {
        let registry = AgentRegistry::from_descriptors(&agents, builtins);
        info!(
            agents = agents.len(),
            instantiated = ?registry.agent_names(),
            "Command processor initialized"
        );
        Self {
            llm: config.tiered_client(llm),
            registry,
            cache: CommandCache::new(config.cache_capacity),
            extractor: ContextExtractor::new(
                config.extract_window,
                config.extract_temperature,
                config.extract_memo_capacity,
            ),
            refiner: ParameterRefiner::new(config.refine_window, config.refine_temperature),
            responder,
            history: match config.history_retention {
                Some(limit) => ConversationHistory::with_retention(limit),
                None => ConversationHistory::new(),
            },
            agents,
            config,
        }
    }

    /// Attaches a capability under an agent name, replacing any built-in one.
    pub fn register_capability(&mut self, agent_name: impl Into<String>, capability: Arc<dyn Capability>) {
        self.registry.register(agent_name, capability);
    }

    pub fn set_response_mode(&mut self, mode: ResponseMode) {
        self.responder.set_response_mode(mode);
    }

    pub fn response_mode(&self) -> ResponseMode {
        self.responder.response_mode()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn cache(&self) -> &CommandCache {
        &self.cache
    }

    /// Processes one utterance and returns the text to show the user.
    ///
    /// Never fails: unexpected errors come back as `"Error: <description>"`
    /// and are recorded in history as a system turn.
    #[instrument(skip(self))]
    pub async fn process_command(&mut self, utterance: &str) -> String {
        info!("Processing command");
        self.history.push(Role::User, utterance);

        match self.run_pipeline(utterance).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = ?e, "Command processing failed");
                let message = format!("Error: {:#}", e);
                self.history.push(Role::System, message.clone());
                message
            }
        }
    }

    async fn run_pipeline(&mut self, utterance: &str) -> Result<String> {
        let context = self.history.render_recent(self.config.context_window);

        let command = match self.cache.get(utterance, &context) {
            Some(cached) => {
                info!(signature = %cached.signature(), "Command cache hit");
                cached.clone()
            }
            None => match self.parse(utterance, &context).await {
                Ok(parsed) => {
                    self.cache.set(utterance, &context, parsed.clone());
                    parsed
                }
                Err(e) => {
                    warn!(error = %e, "No usable command from either model");
                    return Ok(self.reply_directly(UNROUTABLE_REPLY));
                }
            },
        };

        if command.is_conversation() {
            info!("Handling general conversation");
            return Ok(self.reply_directly(CONVERSATION_REPLY));
        }

        // Only agents with an instance are refined. Anything else is
        // dispatched as parsed and reports not-found.
        let command = if self.registry.resolve(&command.agent_name).is_some() {
            let spec = find_command(&self.agents, &command).map(|(_, spec)| spec);
            self.refiner
                .refine(&self.llm, &self.extractor, &self.history, command, spec)
                .await
        } else {
            command
        };

        let report = self
            .registry
            .dispatch(&command, self.config.call_timeout)
            .await
            .into_report();

        let rendered = self
            .responder
            .process_response(&self.history, &report)
            .await?;
        self.history.push(Role::Assistant, rendered.text.clone());

        if let Some(speech) = rendered.speech {
            match speech.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Speech rendering failed"),
                Err(e) => warn!(error = %e, "Speech task panicked or was cancelled"),
            }
        }
        Ok(rendered.text)
    }

    async fn parse(&self, utterance: &str, context: &str) -> Result<AgentCommand> {
        let messages = prompt::parse_messages(&self.agents, context, utterance);
        self.llm
            .complete_with_fallback(
                "parse",
                messages,
                self.config.parse_temperature,
                parse_command_reply,
            )
            .await
    }

    fn reply_directly(&mut self, reply: &str) -> String {
        self.history.push(Role::Assistant, reply);
        reply.to_string()
    }
}

/// Decodes a parse reply. A `null` or incomplete command counts as a failure
/// so the fallback tier gets a turn.
fn parse_command_reply(reply: &str) -> Result<AgentCommand> {
    let value: Value = serde_json::from_str(prompt::extract_json_block(reply))?;
    AgentCommand::from_value(value).ok_or_else(|| anyhow!("Model declined to produce a command"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{CompletionRequest, MockLLMClient};
    use crate::response::PlainResponder;
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn catalog() -> Vec<AgentDescriptor> {
        serde_json::from_value(json!([{
            "name": "weather",
            "description": "Get weather information",
            "commands": [{
                "name": "get_weather",
                "parameters": {"location": {"type": "string", "required": true}}
            }]
        }]))
        .unwrap()
    }

    fn is_parse(req: &CompletionRequest) -> bool {
        req.system_prompt() == Some(prompt::PARSER_SYSTEM_PROMPT)
    }

    fn is_refine(req: &CompletionRequest) -> bool {
        req.system_prompt() == Some(prompt::REFINER_SYSTEM_PROMPT)
    }

    fn is_extract(req: &CompletionRequest) -> bool {
        req.system_prompt() == Some(prompt::EXTRACTOR_SYSTEM_PROMPT)
    }

    fn test_config() -> ProcessorConfig {
        ProcessorConfig {
            primary_model: "cheap".into(),
            fallback_model: "strong".into(),
            call_timeout: Duration::from_secs(5),
            ..ProcessorConfig::default()
        }
    }

    fn processor(mock: MockLLMClient, config: ProcessorConfig) -> CommandProcessor {
        CommandProcessor::new(
            Arc::new(mock),
            catalog(),
            &BuiltinCapabilities::default(),
            Box::new(PlainResponder::new()),
            config,
        )
    }

    /// Records the parameters it was called with.
    #[derive(Default)]
    struct RecordingWeather {
        calls: Mutex<Vec<Map<String, Value>>>,
    }

    #[async_trait]
    impl Capability for RecordingWeather {
        fn functions(&self) -> &[&'static str] {
            &["get_weather"]
        }

        async fn invoke(&self, _function: &str, params: &Map<String, Value>) -> Result<String> {
            self.calls.lock().unwrap().push(params.clone());
            let location = params.get("location").and_then(Value::as_str).unwrap_or("?");
            Ok(format!("Sunny in {}", location))
        }
    }

    const BOSTON_COMMAND: &str = r#"{"agent_name": "weather", "function_name": "get_weather", "parameters": {"location": "Boston"}}"#;

    #[tokio::test]
    async fn test_end_to_end_weather_and_cache_hit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Boston"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "current_condition": [{"temp_F": "72", "weatherDesc": [{"value": "Sunny"}]}]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(is_parse)
            .times(1)
            .returning(|_| Ok(BOSTON_COMMAND.to_string()));
        mock.expect_complete()
            .withf(is_refine)
            .times(2)
            .returning(|_| Ok(r#"{"location": "Boston"}"#.to_string()));

        // The cache key includes recent context; with no context window the
        // same utterance maps to the same key across turns.
        let config = ProcessorConfig {
            context_window: 0,
            ..test_config()
        };
        let builtins = BuiltinCapabilities::new(reqwest::Client::new(), server.uri(), None);
        let mut processor = CommandProcessor::new(
            Arc::new(mock),
            catalog(),
            &builtins,
            Box::new(PlainResponder::new()),
            config,
        );

        let first = processor.process_command("what's the weather in Boston").await;
        assert_eq!(first, "Result: Weather in Boston: 72°F, Sunny");
        assert_eq!(processor.cache().len(), 1);

        let second = processor.process_command("  What's the weather in Boston ").await;
        assert_eq!(second, first);
        assert_eq!(processor.cache().len(), 1);
        assert_eq!(processor.history().len(), 4);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_both_model_tiers() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(is_parse)
            .times(1)
            .returning(|_| Ok(BOSTON_COMMAND.to_string()));
        mock.expect_complete()
            .withf(is_refine)
            .returning(|_| Ok(r#"{"location": "Boston"}"#.to_string()));

        let mut processor = processor(
            mock,
            ProcessorConfig {
                context_window: 0,
                ..test_config()
            },
        );
        let weather = Arc::new(RecordingWeather::default());
        processor.register_capability("weather", weather.clone());

        for _ in 0..3 {
            processor.process_command("what's the weather in Boston").await;
        }
        assert_eq!(weather.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fallback_model_used_after_malformed_primary_reply() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|req| is_parse(req) && req.model == "cheap")
            .times(1)
            .returning(|_| Ok("weather please".to_string()));
        mock.expect_complete()
            .withf(|req| is_parse(req) && req.model == "strong")
            .times(1)
            .returning(|_| Ok(BOSTON_COMMAND.to_string()));
        mock.expect_complete()
            .withf(is_refine)
            .returning(|_| Ok(r#"{"location": "Boston"}"#.to_string()));

        let mut processor = processor(mock, test_config());
        processor.register_capability("weather", Arc::new(RecordingWeather::default()));

        let reply = processor.process_command("weather in boston").await;
        assert_eq!(reply, "Result: Sunny in Boston");
    }

    #[tokio::test]
    async fn test_unroutable_utterance_gets_canned_reply() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(is_parse)
            .times(2)
            .returning(|_| Ok("null".to_string()));

        let mut processor = processor(mock, test_config());
        let reply = processor.process_command("sing me the song of my people").await;

        assert_eq!(reply, UNROUTABLE_REPLY);
        assert!(processor.cache().is_empty());
        let last = processor.history().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, UNROUTABLE_REPLY);
    }

    #[tokio::test]
    async fn test_conversation_is_never_dispatched() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(is_parse)
            .times(1)
            .returning(|_| {
                Ok(r#"{"agent_name": "conversation", "function_name": "chat", "parameters": {"message": "hi"}}"#.to_string())
            });

        let mut processor = processor(mock, test_config());
        let conversation = Arc::new(RecordingWeather::default());
        processor.register_capability("conversation", conversation.clone());

        let reply = processor.process_command("how are you?").await;
        assert_eq!(reply, CONVERSATION_REPLY);
        assert!(conversation.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_agent_reports_not_found() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(is_parse)
            .times(1)
            .returning(|_| {
                Ok(r#"{"agent_name": "bogus", "function_name": "dance", "parameters": {}}"#.to_string())
            });

        let mut processor = processor(mock, test_config());
        let reply = processor.process_command("make the bogus thing dance").await;

        assert!(reply.contains("not found"));
        let roles: Vec<Role> = processor.history().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_agent_without_instance_skips_refinement() {
        // Only the parse call is expected; extraction or refinement would
        // fail the mock.
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(is_parse)
            .times(1)
            .returning(|_| {
                Ok(r#"{"agent_name": "lights", "function_name": "control_light", "parameters": {"state": "on"}}"#.to_string())
            });

        let mut agents = catalog();
        agents.extend(
            serde_json::from_value::<Vec<AgentDescriptor>>(json!([{
                "name": "lights",
                "commands": [{
                    "name": "control_light",
                    "parameters": {"room": "The room name", "state": "on or off"}
                }]
            }]))
            .unwrap(),
        );
        let mut processor = CommandProcessor::new(
            Arc::new(mock),
            agents,
            &BuiltinCapabilities::default(),
            Box::new(PlainResponder::new()),
            test_config(),
        );

        let reply = processor.process_command("turn the lights on").await;
        assert_eq!(reply, "Agent 'lights' not found.");
    }

    #[tokio::test]
    async fn test_cache_holds_unrefined_command() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(is_parse)
            .times(1)
            .returning(|_| {
                Ok(r#"{"agent_name": "weather", "function_name": "get_weather", "parameters": {"location": "something like vegas"}}"#.to_string())
            });
        mock.expect_complete()
            .withf(is_refine)
            .times(1)
            .returning(|_| Ok(r#"{"location": "Las Vegas"}"#.to_string()));

        let config = ProcessorConfig {
            context_window: 0,
            ..test_config()
        };
        let mut processor = processor(mock, config);
        let weather = Arc::new(RecordingWeather::default());
        processor.register_capability("weather", weather.clone());

        let utterance = "weather in something like vegas";
        let reply = processor.process_command(utterance).await;
        assert_eq!(reply, "Result: Sunny in Las Vegas");
        assert_eq!(weather.calls.lock().unwrap()[0]["location"], json!("Las Vegas"));

        let cached = processor.cache().get(utterance, "").unwrap();
        assert_eq!(cached.parameters["location"], json!("something like vegas"));
    }

    #[tokio::test]
    async fn test_unknown_function_reports_not_found() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(is_parse)
            .times(1)
            .returning(|_| {
                Ok(r#"{"agent_name": "weather", "function_name": "make_it_rain", "parameters": {}}"#.to_string())
            });

        let mut processor = processor(mock, test_config());
        processor.register_capability("weather", Arc::new(RecordingWeather::default()));

        let reply = processor.process_command("make it rain").await;
        assert_eq!(reply, "Function 'make_it_rain' not found.");
    }

    #[tokio::test]
    async fn test_missing_parameter_is_backfilled_from_history() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|req| is_parse(req) && req.messages[1].content.contains("\"what's the weather\""))
            .times(1)
            .returning(|_| {
                Ok(r#"{"agent_name": "weather", "function_name": "get_weather", "parameters": {}}"#.to_string())
            });
        mock.expect_complete()
            .withf(is_parse)
            .returning(|_| {
                Ok(r#"{"agent_name": "conversation", "function_name": "chat", "parameters": {}}"#.to_string())
            });
        mock.expect_complete()
            .withf(is_extract)
            .times(1)
            .returning(|_| Ok("Boston".to_string()));
        mock.expect_complete()
            .withf(is_refine)
            .times(1)
            .returning(|_| Ok(r#"{"location": "Boston"}"#.to_string()));

        let mut processor = processor(mock, test_config());
        let weather = Arc::new(RecordingWeather::default());
        processor.register_capability("weather", weather.clone());

        processor.process_command("let's watch something in Boston").await;
        let reply = processor.process_command("what's the weather").await;

        assert_eq!(reply, "Result: Sunny in Boston");
        let calls = weather.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["location"], json!("Boston"));
    }

    #[tokio::test]
    async fn test_capability_error_becomes_report() {
        struct Broken;

        #[async_trait]
        impl Capability for Broken {
            fn functions(&self) -> &[&'static str] {
                &["get_weather"]
            }

            async fn invoke(&self, _function: &str, _params: &Map<String, Value>) -> Result<String> {
                Err(anyhow!("sensor offline"))
            }
        }

        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(is_parse)
            .returning(|_| Ok(BOSTON_COMMAND.to_string()));
        mock.expect_complete()
            .withf(is_refine)
            .returning(|_| Ok(r#"{"location": "Boston"}"#.to_string()));

        let mut processor = processor(mock, test_config());
        processor.register_capability("weather", Arc::new(Broken));

        let reply = processor.process_command("weather in Boston").await;
        assert_eq!(reply, "Error: sensor offline");
    }

    #[tokio::test]
    async fn test_backend_outage_never_raises() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .returning(|_| Err(anyhow!("connection refused")));

        let mut processor = processor(mock, test_config());
        for utterance in ["", "turn on the lights", "{\"agent_name\": 1}"] {
            let reply = processor.process_command(utterance).await;
            assert_eq!(reply, UNROUTABLE_REPLY);
        }
        assert_eq!(processor.history().len(), 6);
    }

    struct FailingResponder;

    #[async_trait]
    impl ResponseModule for FailingResponder {
        fn set_response_mode(&mut self, _mode: ResponseMode) {}

        fn response_mode(&self) -> ResponseMode {
            ResponseMode::Text
        }

        async fn process_response(
            &self,
            _history: &ConversationHistory,
            _report: &crate::history::Turn,
        ) -> Result<crate::response::RenderedResponse> {
            Err(anyhow!("renderer crashed"))
        }
    }

    #[tokio::test]
    async fn test_unexpected_error_is_returned_and_recorded() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(is_parse)
            .returning(|_| {
                Ok(r#"{"agent_name": "bogus", "function_name": "dance"}"#.to_string())
            });

        let mut processor = CommandProcessor::new(
            Arc::new(mock),
            catalog(),
            &BuiltinCapabilities::default(),
            Box::new(FailingResponder),
            test_config(),
        );
        let reply = processor.process_command("dance").await;

        assert_eq!(reply, "Error: renderer crashed");
        let last = processor.history().last().unwrap();
        assert_eq!(last.role, Role::System);
        assert_eq!(last.content, reply);
    }

    #[test]
    fn test_parse_command_reply() {
        let command = parse_command_reply(&format!("```json\n{}\n```", BOSTON_COMMAND)).unwrap();
        assert_eq!(command.signature(), "weather.get_weather");
        assert!(parse_command_reply("null").is_err());
        assert!(parse_command_reply("{\"agent_name\": \"weather\"}").is_err());
        assert!(parse_command_reply("no idea").is_err());
    }

    #[test]
    fn test_set_response_mode_forwards() {
        let mut processor = processor(MockLLMClient::new(), test_config());
        processor.set_response_mode(ResponseMode::Voice);
        assert_eq!(processor.response_mode(), ResponseMode::Voice);
    }
}
