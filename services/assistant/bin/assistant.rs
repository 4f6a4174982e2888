//! Main Entrypoint for the Ginger Assistant
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command line.
//! 2. Loading the agent catalog.
//! 3. Building the completion client, capabilities and response module.
//! 4. Feeding each line typed on stdin through the command processor until
//!    end of input or `Ctrl+C`.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use clap::Parser;
use ginger_assistant::{catalog::load_agents, config::Config, speech::OpenAiSpeech};
use ginger_core::{
    BuiltinCapabilities, CommandProcessor, LLMClient, LlmResponder, OpenAICompatibleClient,
    ProcessorConfig, ResponseMode,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

const ASSISTANT_NAME: &str = "Ginger";

/// Ginger: routes natural-language commands to home and information agents.
#[derive(Parser, Debug)]
#[command(name = "assistant", version, about)]
struct Args {
    /// Path to the agent catalog (overrides AGENTS_PATH).
    #[arg(short, long)]
    agents: Option<PathBuf>,

    /// Response mode: text, voice or text_to_speech (overrides RESPONSE_MODE).
    #[arg(short, long)]
    mode: Option<ResponseMode>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let args = Args::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(path) = args.agents {
        config.agents_path = path;
    }
    if let Some(mode) = args.mode {
        config.response_mode = mode;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!("Configuration loaded. Initializing assistant...");

    // --- 3. Initialize Shared Services ---
    let agents = load_agents(&config.agents_path)?;

    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.openai_api_key)
        .with_api_base(&config.openai_api_base);
    let llm_client: Arc<dyn LLMClient> = Arc::new(OpenAICompatibleClient::new(openai_config.clone()));

    let processor_config = ProcessorConfig {
        primary_model: config.primary_model.clone(),
        fallback_model: config.fallback_model.clone(),
        cache_capacity: config.cache_capacity,
        call_timeout: config.llm_timeout,
        ..ProcessorConfig::default()
    };

    let responder = LlmResponder::new(
        processor_config.tiered_client(llm_client.clone()),
        ASSISTANT_NAME,
        &config.personality,
        &config.mood,
    )
    .with_speech(Arc::new(OpenAiSpeech::new(
        openai_config,
        config.speech_dir.clone(),
    )));

    let builtins = BuiltinCapabilities::new(
        reqwest::Client::new(),
        config.weather_base_url.clone(),
        config.home_assistant.clone(),
    );

    let mut processor = CommandProcessor::new(
        llm_client,
        agents,
        &builtins,
        Box::new(responder),
        processor_config,
    );
    processor.set_response_mode(config.response_mode);

    info!(
        primary = %config.primary_model,
        fallback = %config.fallback_model,
        mode = %config.response_mode,
        "Assistant ready. Type a command, `/mode <mode>` to switch output, or Ctrl+D to quit."
    );

    // --- 4. Command Loop ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal.");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let utterance = line.trim();
        if utterance.is_empty() {
            continue;
        }

        if let Some(mode) = utterance.strip_prefix("/mode") {
            match mode.trim().parse::<ResponseMode>() {
                Ok(mode) => {
                    processor.set_response_mode(mode);
                    stdout.write_all(format!("Response mode: {}\n", mode).as_bytes()).await?;
                }
                Err(e) => warn!(error = %e, "Ignoring mode change"),
            }
            continue;
        }

        let reply = processor.process_command(utterance).await;
        stdout.write_all(format!("{}: {}\n", ASSISTANT_NAME, reply).as_bytes()).await?;
    }

    info!("Assistant has shut down.");
    Ok(())
}
