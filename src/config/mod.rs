//! Daemon configuration
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables.

mod config;

pub use config::{
    ApiConfiguration, Configuration, MonitoringConfiguration, SystemConfiguration,
};
