use super::{optional_text, required_text};
use super::vacuum::HomeAssistantConfig;
use crate::registry::Capability;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

/// Named colors accepted by `set_color`, as RGB.
const COLORS: &[(&str, [u8; 3])] = &[
    ("red", [255, 0, 0]),
    ("green", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("yellow", [255, 255, 0]),
    ("purple", [255, 0, 255]),
    ("cyan", [0, 255, 255]),
    ("orange", [255, 165, 0]),
    ("pink", [255, 192, 203]),
    ("coral", [255, 127, 80]),
    ("peach", [255, 218, 185]),
    ("cream", [255, 253, 208]),
    ("skyblue", [135, 206, 235]),
    ("white", [255, 255, 255]),
    ("warm", [255, 180, 107]),
    ("neutral", [255, 228, 206]),
    ("cool", [201, 226, 255]),
    ("daylight", [255, 249, 253]),
];

/// Predefined moods: color name and brightness percentage.
const MOODS: &[(&str, &str, u8)] = &[
    ("relax", "peach", 40),
    ("focus", "skyblue", 100),
    ("energize", "white", 100),
    ("reading", "cream", 80),
    ("movie", "coral", 20),
    ("sunset", "orange", 60),
    ("ocean", "blue", 70),
    ("forest", "green", 60),
];

fn color_rgb(name: &str) -> Option<[u8; 3]> {
    let name = name.trim().to_lowercase().replace(' ', "");
    COLORS.iter().find(|(n, _)| *n == name).map(|(_, rgb)| *rgb)
}

/// Home Assistant brightness runs 0-255.
fn to_ha_brightness(percent: u8) -> u8 {
    ((percent as u16 * 255) / 100) as u8
}

fn parse_percent(value: &str) -> Result<u8> {
    let percent: u8 = value
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid brightness value '{}'", value))?;
    if percent > 100 {
        bail!("Brightness must be between 0 and 100");
    }
    Ok(percent)
}

#[derive(Deserialize, Debug)]
struct LightState {
    entity_id: String,
    state: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl LightState {
    /// `light.living_room` is addressed as "living room".
    fn room_name(&self) -> String {
        self.entity_id
            .trim_start_matches("light.")
            .replace('_', " ")
    }

    fn brightness_text(&self) -> String {
        match self.attributes.get("brightness").and_then(Value::as_f64) {
            Some(b) => format!("{}%", (b * 100.0 / 255.0).round() as u32),
            None => "unknown".to_string(),
        }
    }
}

/// The lights a room name refers to: every light for `all`, otherwise the
/// first light whose name contains the room.
enum Target {
    All(Vec<String>),
    Room(String),
}

impl Target {
    fn entity_ids(&self) -> Value {
        match self {
            Target::All(ids) => json!(ids),
            Target::Room(id) => json!(id),
        }
    }

    fn describe(&self, room: &str) -> String {
        match self {
            Target::All(_) => "all lights".to_string(),
            Target::Room(_) => format!("the {} light", room),
        }
    }
}

/// Light control through Home Assistant's `light` domain.
pub struct LightsAgent {
    http: reqwest::Client,
    config: HomeAssistantConfig,
}

impl LightsAgent {
    pub fn new(http: reqwest::Client, config: HomeAssistantConfig) -> Self {
        Self { http, config }
    }

    async fn lights(&self) -> Result<Vec<LightState>> {
        let states: Vec<LightState> = self
            .http
            .get(self.config.api_url("states"))
            .bearer_auth(&self.config.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Malformed state list")?;
        Ok(states
            .into_iter()
            .filter(|s| s.entity_id.starts_with("light."))
            .collect())
    }

    async fn find_target(&self, room: &str) -> Result<Target> {
        let room = room.trim().to_lowercase();
        let lights = self.lights().await?;
        if room == "all" {
            return Ok(Target::All(lights.into_iter().map(|l| l.entity_id).collect()));
        }
        lights
            .into_iter()
            .find(|l| l.room_name().contains(&room))
            .map(|l| Target::Room(l.entity_id))
            .ok_or_else(|| anyhow!("No light found for room '{}'", room))
    }

    async fn call_service(&self, service: &str, body: Value) -> Result<()> {
        info!(service, body = %body, "Calling light service");
        self.http
            .post(self.config.api_url(&format!("services/light/{}", service)))
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("Home Assistant rejected light.{}", service))?;
        Ok(())
    }

    async fn control_light(&self, room: &str, state: &str) -> Result<String> {
        let service = match state.trim().to_lowercase().as_str() {
            "on" => "turn_on",
            "off" => "turn_off",
            other => bail!("Invalid state '{}'. Use 'on' or 'off'.", other),
        };
        let target = self.find_target(room).await?;
        self.call_service(service, json!({ "entity_id": target.entity_ids() }))
            .await?;
        Ok(format!("Turned {} {}", state.trim().to_lowercase(), target.describe(room)))
    }

    async fn set_color(&self, room: &str, color: &str) -> Result<String> {
        let Some(rgb) = color_rgb(color) else {
            let known: Vec<&str> = COLORS.iter().map(|(n, _)| *n).collect();
            bail!("Unknown color '{}'. Available colors: {}", color, known.join(", "));
        };
        let target = self.find_target(room).await?;
        self.call_service(
            "turn_on",
            json!({ "entity_id": target.entity_ids(), "rgb_color": rgb }),
        )
        .await?;
        Ok(format!("Set {} to {}", target.describe(room), color))
    }

    async fn set_brightness(&self, room: &str, brightness: &str) -> Result<String> {
        let percent = parse_percent(brightness)?;
        let target = self.find_target(room).await?;
        self.call_service(
            "turn_on",
            json!({ "entity_id": target.entity_ids(), "brightness": to_ha_brightness(percent) }),
        )
        .await?;
        Ok(format!("Set {} brightness to {}%", target.describe(room), percent))
    }

    async fn set_mood(&self, room: &str, mood: &str) -> Result<String> {
        let mood = mood.trim().to_lowercase();
        let Some((_, color, percent)) = MOODS.iter().find(|(name, _, _)| *name == mood) else {
            let known: Vec<&str> = MOODS.iter().map(|(n, _, _)| *n).collect();
            bail!("Unknown mood '{}'. Available moods: {}", mood, known.join(", "));
        };
        let rgb = color_rgb(color).ok_or_else(|| anyhow!("Mood '{}' has no color", mood))?;
        let target = self.find_target(room).await?;
        self.call_service(
            "turn_on",
            json!({
                "entity_id": target.entity_ids(),
                "rgb_color": rgb,
                "brightness": to_ha_brightness(*percent),
            }),
        )
        .await?;
        Ok(format!("Set {} to {} mood", target.describe(room), mood))
    }

    async fn status(&self, room: Option<&str>) -> Result<String> {
        let lights = self.lights().await?;
        match room.map(|r| r.trim().to_lowercase()).filter(|r| r != "all") {
            Some(room) => lights
                .iter()
                .find(|l| l.room_name().contains(&room))
                .map(|l| {
                    format!(
                        "The {} light is {}, brightness: {}",
                        l.room_name(),
                        l.state,
                        l.brightness_text()
                    )
                })
                .ok_or_else(|| anyhow!("No light found for room '{}'", room)),
            None => Ok(lights
                .iter()
                .map(|l| format!("{}: {}, brightness: {}", l.room_name(), l.state, l.brightness_text()))
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }
}

#[async_trait]
impl Capability for LightsAgent {
    fn functions(&self) -> &[&'static str] {
        &[
            "control_light",
            "set_color",
            "set_brightness",
            "set_mood",
            "get_light_status",
        ]
    }

    async fn invoke(&self, function: &str, params: &Map<String, Value>) -> Result<String> {
        match function {
            "control_light" => {
                self.control_light(&required_text(params, "room")?, &required_text(params, "state")?)
                    .await
            }
            "set_color" => {
                self.set_color(&required_text(params, "room")?, &required_text(params, "color")?)
                    .await
            }
            "set_brightness" => {
                self.set_brightness(
                    &required_text(params, "room")?,
                    &required_text(params, "brightness")?,
                )
                .await
            }
            "set_mood" => {
                self.set_mood(&required_text(params, "room")?, &required_text(params, "mood")?)
                    .await
            }
            "get_light_status" => self.status(optional_text(params, "room").as_deref()).await,
            other => bail!("Unsupported lights function '{}'", other),
        }
    }
}
