//! Configuration structures and loading

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    /// Enable debug mode
    #[serde(default)]
    pub debug: bool,

    /// API server configuration
    #[serde(default)]
    pub api: ApiConfiguration,

    /// System paths
    #[serde(default)]
    pub system: SystemConfiguration,

    /// Monitoring and supervision settings
    #[serde(default)]
    pub monitoring: MonitoringConfiguration,
}

impl Configuration {
    /// Load configuration: TOML file if present, then environment
    /// overrides, then directory creation for the paths we own.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file: {}", p.display()))?;
                toml::from_str(&content).with_context(|| "Failed to parse configuration")?
            }
            _ => Configuration::default(),
        };

        config.apply_env();

        std::fs::create_dir_all(&config.system.bots_directory)?;
        std::fs::create_dir_all(&config.system.container_storage_dir)?;

        Ok(config)
    }

    /// Environment variables override file values.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("API_HOST") {
            self.api.host = v;
        }
        env_parse("API_PORT", &mut self.api.port);

        if let Ok(v) = std::env::var("BOTS_DIRECTORY") {
            self.system.bots_directory = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("REGISTRY_FILE") {
            self.system.registry_file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("INCIDENT_LOG_FILE") {
            self.system.incident_log_file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CONTAINER_STORAGE_DIR") {
            self.system.container_storage_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CONTAINER_ISOLATION_LEVEL") {
            self.monitoring.isolation_level = v;
        }

        env_parse("MEMORY_THRESHOLD_MB", &mut self.monitoring.memory_threshold_mb);
        env_parse("CPU_THRESHOLD_PERCENT", &mut self.monitoring.cpu_threshold_percent);
        env_parse("MONITORING_INTERVAL_SEC", &mut self.monitoring.monitoring_interval_sec);
        env_parse(
            "HEALTH_CHECK_INTERVAL_SEC",
            &mut self.monitoring.health_check_interval_sec,
        );
        env_parse("MAX_HEAL_FAILURES", &mut self.monitoring.max_heal_failures);
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => warn!("Ignoring invalid {}: {:?}", name, raw),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfiguration {
    /// Host to bind to
    #[serde(default = "default_api_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfiguration {
    fn default() -> Self {
        Self { host: default_api_host(), port: default_api_port() }
    }
}

fn default_api_host() -> String {
    "0.0.0.0".into()
}

fn default_api_port() -> u16 {
    8000
}

/// System paths
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfiguration {
    /// Directory holding bot blueprints (relative blueprint paths resolve
    /// against this)
    #[serde(default = "default_bots_directory")]
    pub bots_directory: PathBuf,

    /// Bot registry JSON file
    #[serde(default = "default_registry_file")]
    pub registry_file: PathBuf,

    /// Supervisor incident log (NDJSON)
    #[serde(default = "default_incident_log_file")]
    pub incident_log_file: PathBuf,

    /// Container engine storage root
    #[serde(default = "default_container_storage_dir")]
    pub container_storage_dir: PathBuf,
}

impl Default for SystemConfiguration {
    fn default() -> Self {
        Self {
            bots_directory: default_bots_directory(),
            registry_file: default_registry_file(),
            incident_log_file: default_incident_log_file(),
            container_storage_dir: default_container_storage_dir(),
        }
    }
}

fn default_bots_directory() -> PathBuf {
    "bots".into()
}

fn default_registry_file() -> PathBuf {
    "apiary_registry.json".into()
}

fn default_incident_log_file() -> PathBuf {
    "apiary_incidents.jsonl".into()
}

fn default_container_storage_dir() -> PathBuf {
    "/tmp/apiary-containers".into()
}

/// Monitoring and supervision settings
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfiguration {
    /// RSS above which a local-process bot is stopped
    #[serde(default = "default_memory_threshold_mb")]
    pub memory_threshold_mb: u64,

    /// CPU% above which a warning is recorded (bots are not killed for
    /// CPU spikes)
    #[serde(default = "default_cpu_threshold_percent")]
    pub cpu_threshold_percent: f64,

    /// External monitoring cadence hint
    #[serde(default = "default_monitoring_interval_sec")]
    pub monitoring_interval_sec: u64,

    /// Supervisor tick interval
    #[serde(default = "default_health_check_interval_sec")]
    pub health_check_interval_sec: u64,

    /// Heal attempts before quarantine
    #[serde(default = "default_max_heal_failures")]
    pub max_heal_failures: u32,

    /// Container isolation label: minimal, standard, or strict
    #[serde(default = "default_isolation_level")]
    pub isolation_level: String,
}

impl Default for MonitoringConfiguration {
    fn default() -> Self {
        Self {
            memory_threshold_mb: default_memory_threshold_mb(),
            cpu_threshold_percent: default_cpu_threshold_percent(),
            monitoring_interval_sec: default_monitoring_interval_sec(),
            health_check_interval_sec: default_health_check_interval_sec(),
            max_heal_failures: default_max_heal_failures(),
            isolation_level: default_isolation_level(),
        }
    }
}

fn default_memory_threshold_mb() -> u64 {
    500
}

fn default_cpu_threshold_percent() -> f64 {
    90.0
}

fn default_monitoring_interval_sec() -> u64 {
    30
}

fn default_health_check_interval_sec() -> u64 {
    10
}

fn default_max_heal_failures() -> u32 {
    5
}

fn default_isolation_level() -> String {
    "standard".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert_eq!(config.api.port, 8000);
        assert_eq!(config.system.bots_directory, PathBuf::from("bots"));
        assert_eq!(config.monitoring.memory_threshold_mb, 500);
        assert_eq!(config.monitoring.cpu_threshold_percent, 90.0);
        assert_eq!(config.monitoring.isolation_level, "standard");
    }

    #[test]
    fn test_toml_round_trip() {
        let raw = r#"
            debug = true

            [api]
            port = 9100

            [system]
            bots_directory = "/srv/bots"

            [monitoring]
            memory_threshold_mb = 256
        "#;
        let config: Configuration = toml::from_str(raw).unwrap();
        assert!(config.debug);
        assert_eq!(config.api.port, 9100);
        assert_eq!(config.system.bots_directory, PathBuf::from("/srv/bots"));
        assert_eq!(config.monitoring.memory_threshold_mb, 256);
        // Unspecified sections keep their defaults.
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.monitoring.cpu_threshold_percent, 90.0);
    }
}
