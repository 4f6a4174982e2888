use ginger_core::ResponseMode;
use ginger_core::capabilities::{HomeAssistantConfig, WTTR_BASE_URL};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub primary_model: String,
    pub fallback_model: String,
    pub cache_capacity: usize,
    pub llm_timeout: Duration,
    pub log_level: Level,
    pub agents_path: PathBuf,
    pub personality: String,
    pub mood: String,
    pub response_mode: ResponseMode,
    pub speech_dir: PathBuf,
    pub weather_base_url: String,
    pub home_assistant: Option<HomeAssistantConfig>,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let raw = var_or(name, default);
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{}': {}", raw, e)))
}

/// Builds the Home Assistant base URL from `HA_HOST`. A bare host gets
/// `http://`, and `port` is only applied when the host names no port itself.
fn home_assistant_url(host: &str, port: u16) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue("HA_HOST".to_string(), reason);
    let host = host.trim();
    let with_scheme = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };
    let mut url = reqwest::Url::parse(&with_scheme).map_err(|e| invalid(e.to_string()))?;
    if url.port().is_none() {
        url.set_port(Some(port))
            .map_err(|_| invalid(format!("cannot apply port {} to '{}'", port, host)))?;
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
        let openai_api_base = var_or("OPENAI_API_BASE", "https://api.openai.com/v1");

        let primary_model = var_or("PRIMARY_MODEL", "gpt-4o-mini");
        let fallback_model = var_or("FALLBACK_MODEL", "gpt-4o");
        let cache_capacity = parse_var::<usize>("CACHE_CAPACITY", "1000")?;
        let llm_timeout = Duration::from_secs(parse_var::<u64>("LLM_TIMEOUT_SECS", "30")?);

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let agents_path = PathBuf::from(var_or("AGENTS_PATH", "./agents.json"));
        let personality = var_or("PERSONALITY", "Friendly");
        let mood = var_or("MOOD", "Happy");
        let response_mode = parse_var::<ResponseMode>("RESPONSE_MODE", "text")?;
        let speech_dir = PathBuf::from(var_or("SPEECH_DIR", "./speech"));
        let weather_base_url = var_or("WEATHER_BASE_URL", WTTR_BASE_URL);

        let home_assistant = match std::env::var("HA_HOST").ok() {
            Some(host) => {
                let token = std::env::var("HA_TOKEN").map_err(|_| {
                    ConfigError::MissingVar("HA_TOKEN must be set when HA_HOST is set".to_string())
                })?;
                let port = parse_var::<u16>("HA_PORT", "8123")?;
                let mut ha = HomeAssistantConfig::new(home_assistant_url(&host, port)?, token);
                if let Ok(entity) = std::env::var("VACUUM_ENTITY") {
                    ha = ha.with_vacuum_entity(entity);
                }
                Some(ha)
            }
            None => None,
        };

        Ok(Self {
            openai_api_key,
            openai_api_base,
            primary_model,
            fallback_model,
            cache_capacity,
            llm_timeout,
            log_level,
            agents_path,
            personality,
            mood,
            response_mode,
            speech_dir,
            weather_base_url,
            home_assistant,
        })
    }
}
