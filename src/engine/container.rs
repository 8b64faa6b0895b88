//! A single container instance
//!
//! Wraps one child process in a private root directory. The child runs in
//! its own session so the whole tree can be signalled as a process group,
//! and (outside MINIMAL isolation) with address-space, open-file, and
//! process-count rlimits installed before exec.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::system::{self, ProcessSampler};

use super::traits::{
    ContainerConfig, ContainerMetadata, ContainerState, EngineError, EngineResult,
    IsolationLevel, MetricsSample,
};

/// Monitor sampling period
const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Standard rootfs skeleton
const ROOTFS_DIRS: [&str; 6] = ["bin", "lib", "tmp", "var", "home", "app"];

/// A managed container
#[derive(Debug)]
pub struct Container {
    config: ContainerConfig,
    container_dir: PathBuf,
    metadata: RwLock<ContainerMetadata>,
    child: tokio::sync::Mutex<Option<Child>>,
    monitor: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    metrics: Arc<Mutex<Option<MetricsSample>>>,
}

impl Container {
    /// Prepare a container directory and metadata; does not start anything.
    pub fn new(config: ContainerConfig, storage_dir: &Path) -> EngineResult<Self> {
        let container_dir = storage_dir.join(&config.name);
        std::fs::create_dir_all(&container_dir)?;

        let created_at = Utc::now();
        let container_id =
            super::content_hash(&format!("{}{}", config.name, created_at.to_rfc3339()))[..12]
                .to_string();

        let metadata = ContainerMetadata {
            name: config.name.clone(),
            container_id,
            image: config.image.clone(),
            state: ContainerState::Created,
            process_id: None,
            created_at,
            started_at: None,
            stopped_at: None,
            exit_code: None,
            error_message: None,
            root_path: Some(container_dir.join("rootfs")),
        };

        Ok(Self {
            config,
            container_dir,
            metadata: RwLock::new(metadata),
            child: tokio::sync::Mutex::new(None),
            monitor: Mutex::new(None),
            metrics: Arc::new(Mutex::new(None)),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Metadata snapshot
    pub fn metadata(&self) -> ContainerMetadata {
        self.metadata.read().clone()
    }

    pub fn state(&self) -> ContainerState {
        self.metadata.read().state
    }

    /// Last monitor sample
    pub fn metrics(&self) -> Option<MetricsSample> {
        self.metrics.lock().clone()
    }

    /// Metadata plus configuration, for persistence/export
    pub fn export_state(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self.metadata()).unwrap_or_default();
        if let (Some(obj), Ok(config)) =
            (value.as_object_mut(), serde_json::to_value(&self.config))
        {
            obj.insert("config".into(), config);
        }
        value
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the container process. On failure the state moves to FAILED
    /// with `error_message` set and `Ok(false)` is returned.
    pub async fn start(&self) -> EngineResult<bool> {
        let mut child_slot = self.child.lock().await;
        if child_slot.is_some() {
            return Ok(true);
        }

        match self.spawn_process() {
            Ok(child) => {
                let pid = child.id();
                *child_slot = Some(child);
                drop(child_slot);

                {
                    let mut meta = self.metadata.write();
                    meta.process_id = pid;
                    meta.state = ContainerState::Running;
                    meta.started_at = Some(Utc::now());
                }

                info!("Container {} started with PID {:?}", self.config.name, pid);

                if let Some(pid) = pid {
                    self.spawn_monitor(pid);
                }
                Ok(true)
            }
            Err(e) => {
                {
                    let mut meta = self.metadata.write();
                    meta.state = ContainerState::Failed;
                    meta.error_message = Some(e.to_string());
                }
                error!("Failed to start container {}: {}", self.config.name, e);
                Ok(false)
            }
        }
    }

    fn spawn_process(&self) -> EngineResult<Child> {
        let rootfs = self.setup_rootfs()?;
        self.mount_volumes(&rootfs)?;

        let mut cmd = Command::new(&self.config.entrypoint);
        cmd.args(&self.config.entrypoint_args)
            .current_dir(&rootfs)
            .envs(std::env::vars())
            .envs(&self.config.environment)
            .stdin(if self.config.stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(if self.config.capture_output { Stdio::piped() } else { Stdio::null() })
            .stderr(if self.config.capture_output { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(false);

        #[cfg(unix)]
        {
            let apply_limits = self.config.isolation_level != IsolationLevel::Minimal;
            let limits = self.config.resource_limits.clone();
            unsafe {
                cmd.pre_exec(move || {
                    // New session: the container tree becomes one process group.
                    nix::unistd::setsid().map_err(std::io::Error::from)?;
                    if apply_limits {
                        use nix::sys::resource::{setrlimit, Resource};
                        let mem = limits.memory_limit_mb.saturating_mul(1024 * 1024);
                        // A failed rlimit leaves the child unconfined, not dead.
                        let _ = setrlimit(Resource::RLIMIT_AS, mem, mem);
                        let _ = setrlimit(
                            Resource::RLIMIT_NOFILE,
                            limits.max_open_files,
                            limits.max_open_files,
                        );
                        let _ = setrlimit(
                            Resource::RLIMIT_NPROC,
                            limits.max_processes,
                            limits.max_processes,
                        );
                    }
                    Ok(())
                });
            }
        }

        #[cfg(not(unix))]
        warn!(
            "Resource limits and process groups are not supported on this platform; \
             starting {} without them",
            self.config.name
        );

        cmd.spawn().map_err(|e| EngineError::Spawn(e.to_string()))
    }

    fn setup_rootfs(&self) -> EngineResult<PathBuf> {
        let rootfs = self.container_dir.join("rootfs");
        std::fs::create_dir_all(&rootfs)?;
        for dir in ROOTFS_DIRS {
            std::fs::create_dir_all(rootfs.join(dir))?;
        }
        debug!("Rootfs setup: {}", rootfs.display());
        Ok(rootfs)
    }

    /// Materialize volume mount points. Actual bind mounts are out of
    /// scope; directories get an empty directory, files an empty file.
    fn mount_volumes(&self, rootfs: &Path) -> EngineResult<()> {
        for volume in &self.config.volumes {
            let dest = rootfs.join(volume.destination.trim_start_matches('/'));
            let source = Path::new(&volume.source);

            if source.is_dir() {
                std::fs::create_dir_all(&dest)?;
                debug!("Volume mounted: {} -> {}", volume.source, volume.destination);
            } else {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                if !dest.exists() {
                    std::fs::File::create(&dest)?;
                }
            }
        }
        Ok(())
    }

    fn spawn_monitor(&self, pid: u32) {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let metrics = Arc::clone(&self.metrics);
        let name = self.config.name.clone();
        let limit_mb = self.config.resource_limits.memory_limit_mb as f64;

        let handle = tokio::spawn(async move {
            let mut sampler = ProcessSampler::new();
            loop {
                if task_token.is_cancelled() {
                    break;
                }
                let Some(sample) = sampler.sample(pid) else {
                    debug!("Monitor for container {} exiting: process {} is gone", name, pid);
                    break;
                };

                if sample.memory_rss_mb > limit_mb * 0.9 {
                    warn!(
                        "Container {} memory usage high: {:.1} MB",
                        name, sample.memory_rss_mb
                    );
                }

                *metrics.lock() = Some(MetricsSample {
                    cpu_percent: sample.cpu_percent,
                    memory_rss_mb: sample.memory_rss_mb,
                    num_threads: sample.num_threads,
                    timestamp: system::timestamp(),
                });

                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(MONITOR_INTERVAL) => {}
                }
            }
        });

        *self.monitor.lock() = Some((token, handle));
    }

    /// Stop the container: TERM to the process group, wait up to `timeout`,
    /// then KILL. Returns true even if the container was never started.
    pub async fn stop(&self, timeout: Duration) -> bool {
        let mut child_slot = self.child.lock().await;
        let Some(mut child) = child_slot.take() else {
            return true;
        };
        drop(child_slot);

        let pid = child.id();
        if let Some(pid) = pid {
            system::terminate_group(pid);
        }

        let exit_code = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status.code().unwrap_or(-1),
            Ok(Err(e)) => {
                warn!("Error waiting for container {}: {}", self.config.name, e);
                -1
            }
            Err(_) => {
                warn!(
                    "Container {} did not exit within {:?}, sending KILL",
                    self.config.name, timeout
                );
                if let Some(pid) = pid {
                    system::kill_group(pid);
                }
                match child.wait().await {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(e) => {
                        warn!("Error reaping container {}: {}", self.config.name, e);
                        -1
                    }
                }
            }
        };

        self.cancel_monitor().await;

        {
            let mut meta = self.metadata.write();
            meta.exit_code = Some(exit_code);
            meta.state = ContainerState::Exited;
            meta.stopped_at = Some(Utc::now());
        }

        info!("Container {} stopped (exit code: {})", self.config.name, exit_code);
        true
    }

    async fn cancel_monitor(&self) {
        let taken = self.monitor.lock().take();
        if let Some((token, handle)) = taken {
            token.cancel();
            let _ = handle.await;
        }
    }

    /// Remove the container's directory tree. Never fails.
    pub fn cleanup(&self) {
        if self.container_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.container_dir) {
                warn!("Failed to remove container dir {}: {}", self.container_dir.display(), e);
            }
        }
        debug!("Cleaned up container {}", self.config.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleeper_config(name: &str) -> ContainerConfig {
        let mut config = ContainerConfig::new(name, "/bin/sh", "sh");
        config.entrypoint_args = vec!["-c".into(), "sleep 30".into()];
        config
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let container = Container::new(sleeper_config("c1"), dir.path()).unwrap();
        assert_eq!(container.state(), ContainerState::Created);

        assert!(container.start().await.unwrap());
        let meta = container.metadata();
        assert_eq!(meta.state, ContainerState::Running);
        assert!(meta.process_id.is_some());
        assert!(meta.started_at.is_some());

        assert!(container.stop(Duration::from_secs(5)).await);
        let meta = container.metadata();
        assert_eq!(meta.state, ContainerState::Exited);
        assert!(meta.stopped_at.is_some());
        assert!(meta.exit_code.is_some());
    }

    #[tokio::test]
    async fn test_stop_without_start_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let container = Container::new(sleeper_config("c2"), dir.path()).unwrap();
        assert!(container.stop(Duration::from_secs(1)).await);
        assert_eq!(container.state(), ContainerState::Created);
    }

    #[tokio::test]
    async fn test_start_failure_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = ContainerConfig::new("c3", "/bin/false", "/nonexistent-entrypoint-xyz");
        let container = Container::new(config, dir.path()).unwrap();

        assert!(!container.start().await.unwrap());
        let meta = container.metadata();
        assert_eq!(meta.state, ContainerState::Failed);
        assert!(meta.error_message.is_some());
    }

    #[tokio::test]
    async fn test_term_resistant_process_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ContainerConfig::new("c4", "/bin/sh", "sh");
        config.entrypoint_args = vec!["-c".into(), "trap '' TERM; sleep 30".into()];
        let container = Container::new(config, dir.path()).unwrap();

        assert!(container.start().await.unwrap());
        // Give the shell a moment to install its trap.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = std::time::Instant::now();
        assert!(container.stop(Duration::from_secs(1)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(container.state(), ContainerState::Exited);
    }

    #[tokio::test]
    async fn test_rootfs_skeleton_created() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sleeper_config("c5");
        config.entrypoint_args = vec!["-c".into(), "true".into()];
        let container = Container::new(config, dir.path()).unwrap();
        assert!(container.start().await.unwrap());

        let rootfs = dir.path().join("c5/rootfs");
        for sub in ROOTFS_DIRS {
            assert!(rootfs.join(sub).is_dir(), "missing rootfs dir {}", sub);
        }

        container.stop(Duration::from_secs(5)).await;
        container.cleanup();
        assert!(!dir.path().join("c5").exists());
    }

    #[test]
    fn test_container_id_is_12_hex() {
        let dir = tempfile::tempdir().unwrap();
        let container = Container::new(sleeper_config("c6"), dir.path()).unwrap();
        let id = container.metadata().container_id;
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
