//! Container runtime trait and shared engine types

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error type for engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container already exists: {0}")]
    AlreadyExists(String),

    #[error("failed to spawn container process: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Container lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    #[default]
    Created,
    Running,
    Paused,
    Stopped,
    Exited,
    Failed,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Stopped => "stopped",
            ContainerState::Exited => "exited",
            ContainerState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Isolation strength label. Advisory: the engine enforces rlimits only,
/// and MINIMAL skips even those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    Minimal,
    #[default]
    Standard,
    Strict,
}

impl IsolationLevel {
    /// Parse a configuration string; unknown values map to STANDARD.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "minimal" => IsolationLevel::Minimal,
            "strict" => IsolationLevel::Strict,
            _ => IsolationLevel::Standard,
        }
    }
}

/// Resource constraints for a container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU percentage limit (informational)
    pub cpu_limit_percent: f64,
    /// Memory limit in MB, enforced via RLIMIT_AS
    pub memory_limit_mb: u64,
    /// Disk I/O limit (informational)
    pub disk_io_limit_mbps: f64,
    /// Network bandwidth limit, 0 = unlimited (informational)
    pub network_bandwidth_limit_mbps: f64,
    /// Process count limit, enforced via RLIMIT_NPROC
    pub max_processes: u64,
    /// Open file limit, enforced via RLIMIT_NOFILE
    pub max_open_files: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_limit_percent: 100.0,
            memory_limit_mb: 512,
            disk_io_limit_mbps: 100.0,
            network_bandwidth_limit_mbps: 0.0,
            max_processes: 256,
            max_open_files: 1024,
        }
    }
}

/// Volume mount definition. Destinations are materialized as empty
/// directories or files inside the rootfs; real bind mounts are out of
/// scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Container configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Unique name within the engine
    pub name: String,

    /// Path to the executable or script the container runs
    pub image: String,

    /// Command to run
    pub entrypoint: String,

    #[serde(default)]
    pub entrypoint_args: Vec<String>,

    #[serde(default)]
    pub environment: HashMap<String, String>,

    #[serde(default)]
    pub volumes: Vec<VolumeMount>,

    /// container_port -> host_port, informational only
    #[serde(default)]
    pub ports: HashMap<u16, u16>,

    #[serde(default)]
    pub resource_limits: ResourceLimits,

    #[serde(default)]
    pub isolation_level: IsolationLevel,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Keep stdin open as a pipe
    #[serde(default)]
    pub stdin: bool,

    /// Capture stdout/stderr instead of discarding them
    #[serde(default)]
    pub capture_output: bool,

    #[serde(default)]
    pub auto_restart: bool,

    #[serde(default = "default_max_restart_count")]
    pub max_restart_count: u32,
}

fn default_max_restart_count() -> u32 {
    5
}

impl ContainerConfig {
    pub fn new(name: impl Into<String>, image: impl Into<String>, entrypoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            entrypoint: entrypoint.into(),
            entrypoint_args: Vec::new(),
            environment: HashMap::new(),
            volumes: Vec::new(),
            ports: HashMap::new(),
            resource_limits: ResourceLimits::default(),
            isolation_level: IsolationLevel::default(),
            labels: HashMap::new(),
            stdin: false,
            capture_output: false,
            auto_restart: false,
            max_restart_count: default_max_restart_count(),
        }
    }
}

/// Runtime metadata for a container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub name: String,

    /// First 12 hex chars of a content hash over name + creation time
    pub container_id: String,

    pub image: String,

    pub state: ContainerState,

    pub process_id: Option<u32>,

    pub created_at: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,

    pub stopped_at: Option<DateTime<Utc>>,

    pub exit_code: Option<i32>,

    pub error_message: Option<String>,

    /// Container filesystem root
    pub root_path: Option<PathBuf>,
}

/// Most recent monitor sample for a running container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSample {
    pub cpu_percent: f64,
    pub memory_rss_mb: f64,
    pub num_threads: usize,
    pub timestamp: String,
}

/// Container runtime interface.
///
/// The executor and supervisor depend on this trait rather than the
/// concrete engine so failure modes (refusing creation, hanging starts)
/// can be exercised in tests.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container. Fails with `AlreadyExists` on duplicate names.
    async fn create_container(&self, config: ContainerConfig) -> EngineResult<ContainerMetadata>;

    /// Start a container. `Ok(false)` means the start failed and the
    /// container is in the FAILED state with `error_message` set.
    async fn start_container(&self, name: &str) -> EngineResult<bool>;

    /// Stop a container gracefully (TERM, then KILL after the engine's
    /// stop timeout). Returns true even if the container never started.
    async fn stop_container(&self, name: &str) -> EngineResult<bool>;

    /// Best-effort stop plus unconditional cleanup; always drops the
    /// engine's reference.
    async fn remove_container(&self, name: &str) -> EngineResult<bool>;

    /// Metadata snapshot, without exposing the container object.
    fn get_container_info(&self, name: &str) -> Option<ContainerMetadata>;

    /// Last monitor sample, if any.
    fn get_container_metrics(&self, name: &str) -> Option<MetricsSample>;
}
