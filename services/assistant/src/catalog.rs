use anyhow::{Context, Result, bail};
use ginger_core::AgentDescriptor;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Reads the agent catalog, a JSON array of agent descriptors.
pub fn load_agents(path: &Path) -> Result<Vec<AgentDescriptor>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read agent catalog {}", path.display()))?;
    let agents: Vec<AgentDescriptor> = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed agent catalog {}", path.display()))?;

    let mut seen = HashSet::new();
    for agent in &agents {
        if agent.name.trim().is_empty() {
            bail!("Agent catalog {} has an agent without a name", path.display());
        }
        if !seen.insert(agent.name.as_str()) {
            bail!("Agent '{}' is declared more than once", agent.name);
        }
    }

    info!(
        path = %path.display(),
        agents = ?agents.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
        "Loaded agent catalog"
    );
    Ok(agents)
}
