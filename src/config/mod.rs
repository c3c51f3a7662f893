use log::info;
use serde::{Deserialize, Serialize};
use serde_yml;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "PC321_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to find a config in {0}")]
    NotFound(String),
    #[error("Unable to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Unable to parse config file: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("Invalid setting for {0}, must not be empty")]
    Empty(&'static str),
}

fn mqtt_port_default() -> u16 { return 1883 }
fn mqtt_client_name_default() -> String { return "pc321mqtt".to_string() }
fn mqtt_ha_enabled_default() -> bool { return true }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default="mqtt_port_default")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
    /* false keeps the broker side session, and with it QoS 1/2 state, across reconnects */
    #[serde(default)]
    pub clean_session: bool,
    /// Topic the meter readings arrive on.
    #[serde(default)]
    pub topic: String,
    #[serde(default="mqtt_ha_enabled_default")]
    pub ha_enabled: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub mqtt: MqttConfig,
}

impl Config {
    /// Loads the config from `$PC321_CONFIG`, `config/pc321.yaml` or `pc321.yaml`, in that order.
    pub fn load() -> Result<Self, ConfigError> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            candidates.push(PathBuf::from(path));
        }
        candidates.push(PathBuf::from("config/pc321.yaml"));
        candidates.push(PathBuf::from("pc321.yaml"));

        let path = candidates.iter()
            .find(|p| p.is_file())
            .ok_or_else(|| ConfigError::NotFound(
                candidates.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
            ))?;

        return Self::load_from(path);
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading config from {}", path.display());
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        return Self::parse(&contents);
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let c: Config = serde_yml::from_str(contents)?;
        c.validate()?;
        return Ok(c);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Empty("mqtt.host"));
        }
        if self.mqtt.topic.trim().is_empty() {
            return Err(ConfigError::Empty("mqtt.topic"));
        }
        if self.mqtt.client_name.trim().is_empty() {
            return Err(ConfigError::Empty("mqtt.client_name"));
        }
        return Ok(());
    }
}
