use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use gavel_engine::IntegrationConfig;

/// Find the gavel state root by walking up from the current directory.
pub fn find_state_root() -> anyhow::Result<PathBuf> {
    let mut dir = std::env::current_dir()?;
    loop {
        if dir.join(".gavel").is_dir() {
            return Ok(dir.join(".gavel"));
        }
        if !dir.pop() {
            anyhow::bail!("not in a gavel workspace (no .gavel directory found)");
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GavelConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrator: Option<String>,
    /// Worker threads for the integration queue. Zero drains on the calling
    /// thread, which is what a one-shot CLI invocation wants.
    pub workers: usize,
    pub integration: IntegrationConfig,
    /// Per-project overrides of `integration`, keyed by project name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub projects: BTreeMap<String, IntegrationConfig>,
}

impl GavelConfig {
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let path = root.join("gavel.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn write_default(root: &Path) -> anyhow::Result<()> {
        let path = root.join("gavel.toml");
        if path.exists() {
            return Ok(());
        }
        let rendered = toml::to_string_pretty(&Self::default())?;
        std::fs::write(path, rendered)?;
        Ok(())
    }
}
