//! Bridge for the Owon PC321 3-phase clamp power meter
//!
//! Register readings arrive as JSON on an MQTT topic, get rescaled into engineering
//! units and are republished together with Home Assistant discovery messages.

pub mod config;
pub mod mqtt;
pub mod metering_pc321;

// Re-export common types for easier access
pub use config::{Config, ConfigError};
pub use mqtt::{MqttConnection, MqttManager, Transmission};
pub use metering_pc321::{Pc321Manager, STATE_TOPIC};
