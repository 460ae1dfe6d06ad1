use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::hierarchy::Scope;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct HpnConfig {
    /// Nodes that see a place once it is added to the interface.
    #[serde(default)]
    pub interface_access_scope: Scope,
    /// Clock value the animator resets to.
    #[serde(default)]
    pub start_time: u64,
    /// Seed for random transition choice; fresh entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_playback_tick_ms")]
    pub playback_tick_ms: u64,
    #[serde(default = "default_playback_step_ms")]
    pub playback_step_ms: u64,
    #[serde(default = "default_max_states")]
    pub max_states: usize,
}

impl Default for HpnConfig {
    fn default() -> Self {
        Self {
            interface_access_scope: Scope::default(),
            start_time: 0,
            seed: None,
            playback_tick_ms: default_playback_tick_ms(),
            playback_step_ms: default_playback_step_ms(),
            max_states: default_max_states(),
        }
    }
}

impl HpnConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: HpnConfig = toml::from_str(content)?;
        Ok(config)
    }
}

fn default_playback_tick_ms() -> u64 {
    100
}

fn default_playback_step_ms() -> u64 {
    100
}

fn default_max_states() -> usize {
    10_000
}
