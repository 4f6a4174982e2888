use crate::registry::Capability;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

/// Connection details for a Home Assistant instance.
#[derive(Debug, Clone, PartialEq)]
pub struct HomeAssistantConfig {
    /// Base URL including scheme and port, e.g. `http://homeassistant.local:8123`.
    pub base_url: String,
    pub token: String,
    pub vacuum_entity: String,
}

impl HomeAssistantConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            vacuum_entity: "vacuum.figi_bot".to_string(),
        }
    }

    pub fn with_vacuum_entity(mut self, entity: impl Into<String>) -> Self {
        self.vacuum_entity = entity.into();
        self
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Deserialize, Debug)]
struct EntityState {
    state: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

/// Robot vacuum control through Home Assistant's REST API.
pub struct VacuumAgent {
    http: reqwest::Client,
    config: HomeAssistantConfig,
}

impl VacuumAgent {
    pub fn new(http: reqwest::Client, config: HomeAssistantConfig) -> Self {
        Self { http, config }
    }

    async fn call_service(&self, service: &str) -> Result<()> {
        info!(service, entity = %self.config.vacuum_entity, "Calling vacuum service");
        self.http
            .post(self.config.api_url(&format!("services/vacuum/{}", service)))
            .bearer_auth(&self.config.token)
            .json(&json!({ "entity_id": self.config.vacuum_entity }))
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("Home Assistant rejected vacuum.{}", service))?;
        Ok(())
    }

    async fn status(&self) -> Result<String> {
        let state: EntityState = self
            .http
            .get(
                self.config
                    .api_url(&format!("states/{}", self.config.vacuum_entity)),
            )
            .bearer_auth(&self.config.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Malformed entity state")?;

        let battery = match state.attributes.get("battery_level") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => "unknown".to_string(),
        };
        Ok(format!("Vacuum status: {}, battery: {}%", state.state, battery))
    }
}

#[async_trait]
impl Capability for VacuumAgent {
    fn functions(&self) -> &[&'static str] {
        &[
            "start_cleaning",
            "stop_cleaning",
            "return_to_dock",
            "locate",
            "get_status",
        ]
    }

    async fn invoke(&self, function: &str, _params: &Map<String, Value>) -> Result<String> {
        match function {
            "start_cleaning" => {
                self.call_service("start").await?;
                Ok("Started cleaning".to_string())
            }
            "stop_cleaning" => {
                self.call_service("stop").await?;
                Ok("Stopped cleaning".to_string())
            }
            "return_to_dock" => {
                self.call_service("return_to_base").await?;
                Ok("Sending the vacuum back to its dock".to_string())
            }
            "locate" => {
                self.call_service("locate").await?;
                Ok("Locating the vacuum".to_string())
            }
            "get_status" => self.status().await,
            other => bail!("Unsupported vacuum function '{}'", other),
        }
    }
}
