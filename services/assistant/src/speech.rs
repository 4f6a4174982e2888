use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateSpeechRequestArgs, SpeechModel, SpeechResponseFormat, Voice},
};
use async_trait::async_trait;
use ginger_core::SpeechSink;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Synthesises replies with the OpenAI speech endpoint and writes each one
/// to a numbered MP3 file for the local player to pick up.
pub struct OpenAiSpeech {
    client: Client<OpenAIConfig>,
    output_dir: PathBuf,
    counter: AtomicU64,
}

impl OpenAiSpeech {
    pub fn new(config: OpenAIConfig, output_dir: PathBuf) -> Self {
        Self {
            client: Client::with_config(config),
            output_dir,
            counter: AtomicU64::new(0),
        }
    }
}

fn voice(name: &str) -> Voice {
    match name {
        "alloy" => Voice::Alloy,
        "echo" => Voice::Echo,
        "fable" => Voice::Fable,
        "onyx" => Voice::Onyx,
        "shimmer" => Voice::Shimmer,
        _ => Voice::Nova,
    }
}

#[async_trait]
impl SpeechSink for OpenAiSpeech {
    async fn speak(&self, text: &str, voice_name: &str) -> Result<()> {
        let request = CreateSpeechRequestArgs::default()
            .model(SpeechModel::Tts1)
            .voice(voice(voice_name))
            .response_format(SpeechResponseFormat::Mp3)
            .input(text)
            .build()?;
        let response = self
            .client
            .audio()
            .speech(request)
            .await
            .context("Speech synthesis failed")?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.output_dir.join(format!("reply-{:04}.mp3", n));
        response.save(&path).await?;
        info!(path = %path.display(), voice = voice_name, "Speech written");
        Ok(())
    }
}
