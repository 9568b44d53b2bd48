use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// One configured device: a driver name plus its flat parameter string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterEntry {
    pub driver: String,
    #[serde(default)]
    pub parameters: String,
}

/// Daemon configuration. Table positions follow the order of `meters`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterConfig {
    pub meters: Vec<MeterEntry>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl MeterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Load a config file; `.yml`/`.yaml` are read as YAML, anything else as JSON.
pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<MeterConfig> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading config: {}", path.display()))?;
    let yaml = path
        .extension()
        .is_some_and(|ext| ext == "yml" || ext == "yaml");
    let cfg: MeterConfig = if yaml {
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?
    } else {
        serde_json::from_str(&raw).with_context(|| format!("parsing json: {}", path.display()))?
    };
    if cfg.meters.is_empty() {
        anyhow::bail!("no meters configured in {}", path.display());
    }
    Ok(cfg)
}
