//! Built-in agent capabilities.

mod lights;
mod vacuum;
mod weather;

pub use lights::LightsAgent;
pub use vacuum::{HomeAssistantConfig, VacuumAgent};
pub use weather::{WTTR_BASE_URL, WeatherAgent};

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};

/// Reads a required, non-empty parameter as text.
///
/// Numbers and booleans are accepted and rendered as text.
pub(crate) fn required_text(params: &Map<String, Value>, name: &str) -> Result<String> {
    optional_text(params, name).ok_or_else(|| anyhow!("Missing required parameter '{}'", name))
}

pub(crate) fn optional_text(params: &Map<String, Value>, name: &str) -> Option<String> {
    match params.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
