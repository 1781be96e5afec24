//! Configuration Module
//!
//! Configuration loading for the broker token agent.

mod settings;

pub use settings::{
    AgentConfig, BackendSettings, ConfigError, MonitoringSettings, ServerSettings, SessionSeed,
};
