//! Response Module
//!
//! Turns a dispatch report plus conversation history into the text shown (or
//! spoken) to the user. Speech rendering is delegated to a [`SpeechSink`] and
//! runs as a concurrent task the caller may await.

use crate::history::{ConversationHistory, Role, Turn};
use crate::llm_client::{ModelTier, TieredClient};
use crate::prompt;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Number of history turns the responder shows the model.
const RESPONSE_CONTEXT_TURNS: usize = 5;
const RESPONSE_TEMPERATURE: f32 = 0.8;

/// How replies are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    #[default]
    Text,
    Voice,
    TextToSpeech,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Text => "text",
            ResponseMode::Voice => "voice",
            ResponseMode::TextToSpeech => "text_to_speech",
        }
    }

    /// Whether replies in this mode are also spoken.
    pub fn speaks(&self) -> bool {
        matches!(self, ResponseMode::Voice | ResponseMode::TextToSpeech)
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("Invalid response mode '{0}'. Must be one of: text, voice, text_to_speech")]
pub struct ResponseModeError(pub String);

impl FromStr for ResponseMode {
    type Err = ResponseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(ResponseMode::Text),
            "voice" => Ok(ResponseMode::Voice),
            "text_to_speech" => Ok(ResponseMode::TextToSpeech),
            _ => Err(ResponseModeError(s.to_string())),
        }
    }
}

/// The reply text and, in speaking modes, the running speech task.
pub struct RenderedResponse {
    pub text: String,
    pub speech: Option<JoinHandle<Result<()>>>,
}

impl RenderedResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speech: None,
        }
    }
}

/// Produces user-facing replies from dispatch reports.
#[async_trait]
pub trait ResponseModule: Send + Sync {
    fn set_response_mode(&mut self, mode: ResponseMode);

    fn response_mode(&self) -> ResponseMode;

    async fn process_response(
        &self,
        history: &ConversationHistory,
        report: &Turn,
    ) -> Result<RenderedResponse>;
}

/// Renders text as audio for the user.
#[async_trait]
pub trait SpeechSink: Send + Sync {
    async fn speak(&self, text: &str, voice: &str) -> Result<()>;
}

/// Picks the synthesis voice matching a personality name.
pub fn voice_for_personality(personality: &str) -> &'static str {
    match personality.trim().to_lowercase().as_str() {
        "professional" => "onyx",
        "energetic" => "fable",
        "calming" => "echo",
        "wise" => "alloy",
        "playful" => "shimmer",
        _ => "nova",
    }
}

/// Returns the report text unchanged. Never speaks.
#[derive(Debug, Default)]
pub struct PlainResponder {
    mode: ResponseMode,
}

impl PlainResponder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseModule for PlainResponder {
    fn set_response_mode(&mut self, mode: ResponseMode) {
        self.mode = mode;
    }

    fn response_mode(&self) -> ResponseMode {
        self.mode
    }

    async fn process_response(
        &self,
        _history: &ConversationHistory,
        report: &Turn,
    ) -> Result<RenderedResponse> {
        Ok(RenderedResponse::text(report.content.clone()))
    }
}

/// Phrases replies with the completion backend in the assistant's persona.
pub struct LlmResponder {
    llm: TieredClient,
    system_prompt: String,
    voice: &'static str,
    mode: ResponseMode,
    speech: Option<Arc<dyn SpeechSink>>,
}

impl LlmResponder {
    pub fn new(llm: TieredClient, name: &str, personality: &str, mood: &str) -> Self {
        Self {
            llm,
            system_prompt: prompt::respond_system_prompt(name, personality, mood),
            voice: voice_for_personality(personality),
            mode: ResponseMode::default(),
            speech: None,
        }
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechSink>) -> Self {
        self.speech = Some(speech);
        self
    }

    fn messages(&self, history: &ConversationHistory, report: &Turn) -> Vec<Turn> {
        let mut messages = vec![Turn::new(Role::System, self.system_prompt.clone())];
        messages.extend(history.recent(RESPONSE_CONTEXT_TURNS).cloned());
        messages.push(report.clone());
        messages
    }
}

#[async_trait]
impl ResponseModule for LlmResponder {
    fn set_response_mode(&mut self, mode: ResponseMode) {
        info!(%mode, "Response mode set");
        self.mode = mode;
    }

    fn response_mode(&self) -> ResponseMode {
        self.mode
    }

    async fn process_response(
        &self,
        history: &ConversationHistory,
        report: &Turn,
    ) -> Result<RenderedResponse> {
        let text = match self
            .llm
            .complete(
                ModelTier::Primary,
                self.messages(history, report),
                RESPONSE_TEMPERATURE,
            )
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "Error generating response");
                format!("I apologize, but I encountered an error: {}", e)
            }
        };

        let speech = match (&self.speech, self.mode.speaks()) {
            (Some(sink), true) => {
                let sink = sink.clone();
                let spoken = text.clone();
                let voice = self.voice;
                Some(tokio::spawn(async move { sink.speak(&spoken, voice).await }))
            }
            _ => None,
        };

        Ok(RenderedResponse { text, speech })
    }
}
