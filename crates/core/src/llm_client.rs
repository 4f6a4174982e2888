use crate::history::{Role, Turn};
use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A single completion request: role-tagged messages for one model.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Turn>,
    pub temperature: f32,
}

impl CompletionRequest {
    /// The content of the leading system message, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }
}

/// A generic client for a chat-completion backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Sends the messages to the model and returns the reply text.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::with_config(config),
        }
    }
}

fn to_request_message(turn: &Turn) -> Result<ChatCompletionRequestMessage> {
    let message = match turn.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(turn.content.clone())
            .build()?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(turn.content.clone())
            .build()?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(turn.content.clone())
            .build()?
            .into(),
    };
    Ok(message)
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let messages = request
            .messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&request.model)
            .messages(messages)
            .temperature(request.temperature)
            .build()?;

        let response: CreateChatCompletionResponse =
            self.client.chat().create(chat_request).await?;

        let content = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .clone()
            .context("No content in LLM response")?;

        Ok(content)
    }
}

// --- Model Tiers ---

/// Which model a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Fast, cheap model used on the common path.
    Primary,
    /// Stronger model used only after the primary tier failed.
    Fallback,
}

/// Wraps a backend with the primary/fallback model pair and a per-call timeout.
#[derive(Clone)]
pub struct TieredClient {
    client: Arc<dyn LLMClient>,
    primary_model: String,
    fallback_model: String,
    timeout: Duration,
}

impl TieredClient {
    pub fn new(
        client: Arc<dyn LLMClient>,
        primary_model: impl Into<String>,
        fallback_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            primary_model: primary_model.into(),
            fallback_model: fallback_model.into(),
            timeout,
        }
    }

    pub fn model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Primary => &self.primary_model,
            ModelTier::Fallback => &self.fallback_model,
        }
    }

    /// Makes one call on the given tier. A timeout is reported as an error.
    pub async fn complete(
        &self,
        tier: ModelTier,
        messages: Vec<Turn>,
        temperature: f32,
    ) -> Result<String> {
        let request = CompletionRequest {
            model: self.model(tier).to_string(),
            messages,
            temperature,
        };
        debug!(model = %request.model, ?tier, "Sending completion request");
        tokio::time::timeout(self.timeout, self.client.complete(request))
            .await
            .map_err(|_| anyhow!("{:?} model call timed out after {:?}", tier, self.timeout))?
    }

    /// Tries the primary tier, then the fallback tier once.
    ///
    /// Each reply is validated by `parse`; a backend error, a timeout, or a
    /// rejected reply all move on to the next tier. Returns the last error
    /// when both tiers fail.
    pub async fn complete_with_fallback<T>(
        &self,
        stage: &'static str,
        messages: Vec<Turn>,
        temperature: f32,
        parse: impl Fn(&str) -> Result<T>,
    ) -> Result<T> {
        let mut last_error = anyhow!("{} produced no attempts", stage);
        for tier in [ModelTier::Primary, ModelTier::Fallback] {
            let attempt = self
                .complete(tier, messages.clone(), temperature)
                .await
                .and_then(|reply| parse(&reply));
            match attempt {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(stage, ?tier, error = %e, "Model attempt failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tiered(mock: MockLLMClient) -> TieredClient {
        TieredClient::new(Arc::new(mock), "cheap", "strong", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_fallback_not_used_when_primary_parses() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|req| req.model == "cheap")
            .times(1)
            .returning(|_| Ok("42".to_string()));
        mock.expect_complete()
            .withf(|req| req.model == "strong")
            .times(0);

        let client = tiered(mock);
        let value: i32 = client
            .complete_with_fallback("test", vec![Turn::new(Role::User, "q")], 0.1, |r| {
                Ok(r.trim().parse()?)
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_fallback_used_after_rejected_reply() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|req| req.model == "cheap")
            .times(1)
            .returning(|_| Ok("not a number".to_string()));
        mock.expect_complete()
            .withf(|req| req.model == "strong")
            .times(1)
            .returning(|_| Ok("7".to_string()));

        let client = tiered(mock);
        let value: i32 = client
            .complete_with_fallback("test", vec![], 0.1, |r| Ok(r.trim().parse()?))
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_fallback_returns_last_error() {
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .times(2)
            .returning(|req| Err(anyhow!("{} unavailable", req.model)));

        let client = tiered(mock);
        let err = client
            .complete_with_fallback("test", vec![], 0.1, |r| Ok(r.to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "strong unavailable");
    }

    struct SlowClient;

    #[async_trait]
    impl LLMClient for SlowClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let client = TieredClient::new(
            Arc::new(SlowClient),
            "cheap",
            "strong",
            Duration::from_millis(20),
        );
        let err = client
            .complete(ModelTier::Primary, vec![], 0.1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_system_prompt_accessor() {
        let request = CompletionRequest {
            model: "m".into(),
            messages: vec![
                Turn::new(Role::System, "be brief"),
                Turn::new(Role::User, "hi"),
            ],
            temperature: 0.0,
        };
        assert_eq!(request.system_prompt(), Some("be brief"));
    }

    #[tokio::test]
    async fn test_openai_client_reads_first_choice() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"ok\": true}"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
        });
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base(format!("{}/v1", server.uri()));
        let client = OpenAICompatibleClient::new(config);
        let reply = client
            .complete(CompletionRequest {
                model: "gpt-4o-mini".into(),
                messages: vec![
                    Turn::new(Role::System, "parse"),
                    Turn::new(Role::User, "hello"),
                ],
                temperature: 0.3,
            })
            .await
            .unwrap();
        assert_eq!(reply, "{\"ok\": true}");
    }
}
