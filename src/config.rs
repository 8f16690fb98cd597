//! Configuration management
//!
//! YAML configuration for the bridge binary: MIDI port name patterns and OSC
//! socket addresses. Library consumers construct dispatchers directly and do
//! not need this.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    pub midi: MidiPorts,
    #[serde(default)]
    pub osc: OscConfig,
}

/// MIDI port name patterns, matched by case-insensitive substring
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MidiPorts {
    pub input_port: String,
    pub output_port: String,
}

/// OSC socket addresses
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OscConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            remote_addr: None,
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl BridgeConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        serde_yaml::from_str(&raw).with_context(|| format!("Failed to parse config file: {path}"))
    }
}
