use super::required_text;
use crate::registry::Capability;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Public wttr.in endpoint.
pub const WTTR_BASE_URL: &str = "https://wttr.in";

/// Current-conditions lookups against a wttr.in-compatible service.
pub struct WeatherAgent {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize, Debug)]
struct WttrReport {
    current_condition: Vec<CurrentCondition>,
}

#[derive(Deserialize, Debug)]
struct CurrentCondition {
    #[serde(rename = "temp_F")]
    temp_f: String,
    #[serde(rename = "FeelsLikeF", default)]
    feels_like_f: Option<String>,
    #[serde(rename = "weatherDesc", default)]
    weather_desc: Vec<TextValue>,
}

#[derive(Deserialize, Debug)]
struct TextValue {
    value: String,
}

impl WeatherAgent {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn report_url(&self, location: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid weather base URL '{}'", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Weather base URL cannot take a path"))?
            .pop_if_empty()
            .push(location);
        url.query_pairs_mut().append_pair("format", "j1");
        Ok(url)
    }

    /// Current temperature and conditions for a location, in imperial units.
    pub async fn get_weather(&self, location: &str) -> Result<String> {
        let url = self.report_url(location)?;
        let report: WttrReport = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Malformed weather report")?;

        let Some(current) = report.current_condition.first() else {
            bail!("No current conditions reported for {}", location);
        };
        let mut summary = format!("Weather in {}: {}°F", location, current.temp_f);
        if let Some(feels_like) = &current.feels_like_f {
            summary.push_str(&format!(" (feels like {}°F)", feels_like));
        }
        if let Some(desc) = current.weather_desc.first() {
            summary.push_str(&format!(", {}", desc.value.trim()));
        }
        Ok(summary)
    }
}

#[async_trait]
impl Capability for WeatherAgent {
    fn functions(&self) -> &[&'static str] {
        &["get_weather", "get_weather_today"]
    }

    async fn invoke(&self, function: &str, params: &Map<String, Value>) -> Result<String> {
        match function {
            "get_weather" | "get_weather_today" => {
                let location = required_text(params, "location")?;
                self.get_weather(&location).await
            }
            other => bail!("Unsupported weather function '{}'", other),
        }
    }
}
