//! Bot record data model

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Bot lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    #[default]
    Created,
    Deploying,
    Running,
    Stopped,
    Failed,
    Error,
    Paused,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Created => "created",
            BotStatus::Deploying => "deploying",
            BotStatus::Running => "running",
            BotStatus::Stopped => "stopped",
            BotStatus::Failed => "failed",
            BotStatus::Error => "error",
            BotStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a bot is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentType {
    #[default]
    LocalProcess,
    CustomContainer,
}

impl DeploymentType {
    /// Normalize a persisted string. "custom_container" and "container"
    /// (case-insensitive) select container mode; anything else is local.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "custom_container" | "container" => DeploymentType::CustomContainer,
            _ => DeploymentType::LocalProcess,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentType::LocalProcess => "local_process",
            DeploymentType::CustomContainer => "custom_container",
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, DeploymentType::CustomContainer)
    }
}

impl std::fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DeploymentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeploymentType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(DeploymentType::parse(&raw))
    }
}

/// Deployment settings for a bot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub deployment_type: DeploymentType,

    /// Memory limit with units: plain digits = MB, "…mi" = MiB, "…gi" = GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,

    /// Environment passed to the bot process
    #[serde(default)]
    pub environment_vars: HashMap<String, String>,

    /// Free-form settings (e.g. "auto_restart")
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra_config: serde_json::Map<String, Value>,
}

/// One entry in a bot's performance trail: either a metrics sample or a
/// lifecycle event appended on stop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerformanceEntry {
    Metric {
        cpu_load: f64,
        memory_usage_mb: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uptime_seconds: Option<f64>,
        last_heartbeat: String,
    },
    Lifecycle {
        timestamp: String,
        event: String,
        status: String,
    },
}

/// Ordered performance trail
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Performance {
    #[serde(default)]
    pub logs: Vec<PerformanceEntry>,
}

impl Performance {
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

/// A registered bot.
///
/// Unknown fields round-trip through the flattened `extra` map so that
/// whole-record replacement never drops application-added keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotRecord {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Script path, absolute or relative to the configured bots directory
    #[serde(default)]
    pub blueprint: String,

    #[serde(default)]
    pub role: String,

    #[serde(default)]
    pub status: BotStatus,

    #[serde(default)]
    pub deployment_config: DeploymentConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,

    /// Container identifier, kept under its legacy wire name
    #[serde(
        default,
        rename = "k8s_pod_name",
        skip_serializing_if = "Option::is_none"
    )]
    pub pod_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub error_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Performance::is_empty")]
    pub performance: Performance,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl BotRecord {
    /// Minimal record with everything else defaulted
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            blueprint: String::new(),
            role: String::new(),
            status: BotStatus::Created,
            deployment_config: DeploymentConfig::default(),
            process_id: None,
            pod_name: None,
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
            started_at: None,
            stopped_at: None,
            error_count: 0,
            last_error: None,
            performance: Performance::default(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    /// Append a lifecycle entry ("stopped", etc.) to the performance trail
    pub fn push_lifecycle(&mut self, event: &str, status: &str) {
        self.performance.logs.push(PerformanceEntry::Lifecycle {
            timestamp: crate::system::timestamp(),
            event: event.to_string(),
            status: status.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_type_parse() {
        assert_eq!(DeploymentType::parse("custom_container"), DeploymentType::CustomContainer);
        assert_eq!(DeploymentType::parse("CONTAINER"), DeploymentType::CustomContainer);
        assert_eq!(DeploymentType::parse(" Container "), DeploymentType::CustomContainer);
        assert_eq!(DeploymentType::parse("local_process"), DeploymentType::LocalProcess);
        assert_eq!(DeploymentType::parse("anything-else"), DeploymentType::LocalProcess);
        assert_eq!(DeploymentType::parse(""), DeploymentType::LocalProcess);
    }

    #[test]
    fn test_status_round_trip() {
        let json = serde_json::to_string(&BotStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let back: BotStatus = serde_json::from_str("\"deploying\"").unwrap();
        assert_eq!(back, BotStatus::Deploying);
    }

    #[test]
    fn test_record_preserves_unknown_fields() {
        let raw = serde_json::json!({
            "id": "bot-1",
            "name": "My Bot",
            "status": "created",
            "custom_field": {"nested": true}
        });
        let record: BotRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.extra.get("custom_field").unwrap()["nested"], true);

        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["custom_field"]["nested"], true);
    }

    #[test]
    fn test_pod_name_uses_legacy_key() {
        let mut record = BotRecord::new("bot-1", "My Bot");
        record.pod_name = Some("abc123def456".into());
        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["k8s_pod_name"], "abc123def456");
    }

    #[test]
    fn test_performance_entry_shapes() {
        let raw = serde_json::json!({"logs": [
            {"cpu_load": 1.5, "memory_usage_mb": 20.0, "last_heartbeat": "2026-01-01T00:00:00Z"},
            {"timestamp": "2026-01-01T00:00:01Z", "event": "Manual stop", "status": "stopped"}
        ]});
        let perf: Performance = serde_json::from_value(raw).unwrap();
        assert!(matches!(perf.logs[0], PerformanceEntry::Metric { .. }));
        assert!(matches!(perf.logs[1], PerformanceEntry::Lifecycle { .. }));
    }
}
