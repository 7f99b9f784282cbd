//! Scenario file support for the tcplab CLI

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Link section of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSection {
    /// One-way propagation delay in seconds
    #[serde(default = "default_delay")]
    pub delay_s: f64,
    /// Per-segment loss probability
    #[serde(default)]
    pub loss_rate: f64,
    /// Bandwidth in kilobytes per second
    #[serde(default = "default_bandwidth")]
    pub bandwidth_kb_per_s: f64,
}

fn default_delay() -> f64 {
    0.1
}

fn default_bandwidth() -> f64 {
    1000.0
}

impl Default for LinkSection {
    fn default() -> Self {
        LinkSection {
            delay_s: default_delay(),
            loss_rate: 0.0,
            bandwidth_kb_per_s: default_bandwidth(),
        }
    }
}

/// Run section of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Congestion algorithm name (Reno, NewReno, Cubic, BBR)
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Number of payloads the client sends
    #[serde(default = "default_payload_count")]
    pub payload_count: usize,
    /// Size of each payload in bytes
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
    /// Virtual clock step in seconds
    #[serde(default = "default_step")]
    pub step_s: f64,
    /// Simulated time budget in seconds
    #[serde(default = "default_duration")]
    pub duration_s: f64,
    /// Optional seed for the link loss draw
    pub seed: Option<u64>,
}

fn default_algorithm() -> String {
    "Reno".to_string()
}

fn default_payload_count() -> usize {
    10
}

fn default_payload_size() -> usize {
    32
}

fn default_step() -> f64 {
    0.02
}

fn default_duration() -> f64 {
    30.0
}

impl Default for RunSection {
    fn default() -> Self {
        RunSection {
            algorithm: default_algorithm(),
            payload_count: default_payload_count(),
            payload_size: default_payload_size(),
            step_s: default_step(),
            duration_s: default_duration(),
            seed: None,
        }
    }
}

/// A complete scenario.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub run: RunSection,
}

impl ScenarioConfig {
    /// Load a scenario from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: ScenarioConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save a scenario to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// A lossy-link example scenario.
    pub fn example() -> Self {
        ScenarioConfig {
            link: LinkSection {
                delay_s: 0.1,
                loss_rate: 0.05,
                bandwidth_kb_per_s: 500.0,
            },
            run: RunSection {
                algorithm: "Cubic".to_string(),
                payload_count: 40,
                payload_size: 64,
                step_s: 0.02,
                duration_s: 60.0,
                seed: Some(42),
            },
        }
    }
}

/// Scenario file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
