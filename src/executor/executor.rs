//! Bot execution: local processes and containers
//!
//! The executor decides the execution mode per bot, drives start/stop, and
//! tracks process handles. Container starts are bounded by a hard timeout;
//! any container failure falls back to a local process. The fallback is
//! silent at this level (no incidents) — the supervisor owns escalation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::config::Configuration;
use crate::engine::{ContainerConfig, ContainerRuntime, IsolationLevel, ResourceLimits};
use crate::registry::{BotRecord, BotRegistry, BotStatus, PerformanceEntry, RegistryError};
use crate::system::{self, ProcessSampler};

/// Hard deadline for container startup
const CONTAINER_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Graceful local-process stop deadline before KILL
const PROCESS_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Executor errors
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Bot blueprint not set")]
    BlueprintUnset,

    #[error("Bot script not found: {0}")]
    BlueprintMissing(String),

    #[error("container error: {0}")]
    Container(String),

    #[error("failed to spawn bot process: {0}")]
    Spawn(std::io::Error),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Outcome of a monitoring pass that required intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealAction {
    ProcessTerminated,
    MemoryLimitExceeded,
    BotNotInRegistry,
}

/// Detailed process information for a locally-running bot
#[derive(Debug, Clone, Serialize)]
pub struct BotProcessInfo {
    pub bot_id: String,
    pub pid: u32,
    pub cpu_percent: f64,
    pub memory_rss_mb: f64,
    pub num_threads: usize,
    pub uptime_seconds: f64,
}

/// Parse a memory limit string into megabytes.
///
/// Plain digits are MB, a "mi" suffix is MiB (same number), and "gi"
/// multiplies by 1024. Empty or non-numeric input yields the 512 MB
/// default.
pub fn parse_memory_limit_mb(raw: &str) -> u64 {
    let raw = raw.trim().to_ascii_lowercase();
    if raw.is_empty() {
        return 512;
    }
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let Ok(n) = digits.parse::<u64>() else {
        return 512;
    };
    if raw.ends_with("gi") {
        n.saturating_mul(1024)
    } else {
        n
    }
}

/// Interpreter for a blueprint, chosen by extension. `None` means the file
/// is executed directly.
pub fn interpreter_for(script: &Path) -> Option<&'static str> {
    match script.extension().and_then(|e| e.to_str()) {
        Some("py") => Some("python3"),
        Some("sh") => Some("sh"),
        Some("js") => Some("node"),
        _ => None,
    }
}

/// Manages bot subprocess execution, resource monitoring, and the
/// container→local fallback policy
pub struct AdaptiveExecutor {
    registry: Arc<BotRegistry>,
    engine: Arc<dyn ContainerRuntime>,
    config: Arc<Configuration>,

    /// bot_id -> local child handle
    processes: Mutex<HashMap<String, Child>>,

    /// bot_id -> container name
    containers: Mutex<HashMap<String, String>>,

    /// bot_id -> start instant, for uptime reporting
    started: Mutex<HashMap<String, DateTime<Utc>>>,

    sampler: Mutex<ProcessSampler>,
}

impl AdaptiveExecutor {
    pub fn new(
        registry: Arc<BotRegistry>,
        engine: Arc<dyn ContainerRuntime>,
        config: Arc<Configuration>,
    ) -> Self {
        Self {
            registry,
            engine,
            config,
            processes: Mutex::new(HashMap::new()),
            containers: Mutex::new(HashMap::new()),
            started: Mutex::new(HashMap::new()),
            sampler: Mutex::new(ProcessSampler::new()),
        }
    }

    pub fn engine(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&self.engine)
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Start a bot in its configured execution mode.
    ///
    /// Blueprint and spawn errors mark the bot FAILED/ERROR in the registry
    /// before propagating. Container failures fall back to a local process;
    /// only a failed fallback leaves the bot in ERROR.
    pub async fn run_bot(&self, bot: &BotRecord) -> Result<bool, ExecutorError> {
        let mut bot = bot.clone();

        let script_path = match self.resolve_blueprint(&bot) {
            Ok(path) => path,
            Err(e) => {
                error!("Bot script error for {}: {}", bot.id, e);
                bot.status = BotStatus::Failed;
                bot.last_error = Some(e.to_string());
                bot.error_count += 1;
                bot.touch();
                if let Err(pe) = self.registry.update_bot(bot.clone()) {
                    error!("Failed to persist failed bot {}: {}", bot.id, pe);
                }
                return Err(e);
            }
        };

        info!(
            "Starting bot: {} (ID: {}), script: {}",
            bot.name,
            bot.id,
            script_path.display()
        );

        bot.status = BotStatus::Deploying;
        bot.touch();
        self.registry.update_bot(bot.clone())?;

        if bot.deployment_config.deployment_type.is_container() {
            match self.run_bot_in_container(&mut bot, &script_path).await {
                Ok(ok) => Ok(ok),
                Err(container_err) => {
                    // Fail-safe fallback: container execution failed, try local.
                    error!(
                        "Container execution failed for {}; falling back to local process: {}",
                        bot.id, container_err
                    );
                    bot.last_error =
                        Some(format!("Container failed; fallback to local: {container_err}"));
                    bot.error_count += 1;
                    bot.touch();
                    self.registry.update_bot(bot.clone())?;

                    match self.run_bot_locally(&mut bot, &script_path).await {
                        Ok(ok) => Ok(ok),
                        Err(local_err) => {
                            error!(
                                "Local fallback also failed for {} after container failure: {}",
                                bot.id, local_err
                            );
                            bot.status = BotStatus::Error;
                            bot.last_error = Some(format!(
                                "Container failed ({container_err}); local fallback failed ({local_err})"
                            ));
                            bot.error_count += 1;
                            bot.touch();
                            if let Err(pe) = self.registry.update_bot(bot.clone()) {
                                error!("Failed to persist errored bot {}: {}", bot.id, pe);
                            }
                            Err(local_err)
                        }
                    }
                }
            }
        } else {
            match self.run_bot_locally(&mut bot, &script_path).await {
                Ok(ok) => Ok(ok),
                Err(e) => {
                    error!("Execution error for {}: {}", bot.id, e);
                    bot.status = BotStatus::Error;
                    bot.last_error = Some(e.to_string());
                    bot.error_count += 1;
                    bot.touch();
                    if let Err(pe) = self.registry.update_bot(bot.clone()) {
                        error!("Failed to persist errored bot {}: {}", bot.id, pe);
                    }
                    Err(e)
                }
            }
        }
    }

    fn resolve_blueprint(&self, bot: &BotRecord) -> Result<PathBuf, ExecutorError> {
        let blueprint = bot.blueprint.trim();
        if blueprint.is_empty() {
            return Err(ExecutorError::BlueprintUnset);
        }
        let path = Path::new(blueprint);
        let script_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.system.bots_directory.join(path)
        };
        if !script_path.exists() {
            return Err(ExecutorError::BlueprintMissing(script_path.display().to_string()));
        }
        Ok(script_path)
    }

    /// Start the bot as a local child process in its own session.
    ///
    /// Stdout/stderr are discarded rather than piped so a chatty bot can
    /// never deadlock the daemon.
    async fn run_bot_locally(
        &self,
        bot: &mut BotRecord,
        script_path: &Path,
    ) -> Result<bool, ExecutorError> {
        let mut cmd = match interpreter_for(script_path) {
            Some(interp) => {
                let mut c = Command::new(interp);
                c.arg(script_path);
                c
            }
            None => Command::new(script_path),
        };

        cmd.envs(std::env::vars())
            .envs(&bot.deployment_config.environment_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| nix::unistd::setsid().map(|_| ()).map_err(std::io::Error::from));
        }

        let child = cmd.spawn().map_err(ExecutorError::Spawn)?;
        let pid = child.id();

        self.processes.lock().insert(bot.id.clone(), child);
        self.started.lock().insert(bot.id.clone(), Utc::now());

        bot.status = BotStatus::Running;
        bot.process_id = pid;
        bot.started_at = Some(Utc::now());
        bot.touch();
        self.registry.update_bot(bot.clone())?;

        info!("Started bot locally: {} (ID: {}, PID: {:?})", bot.name, bot.id, pid);
        Ok(true)
    }

    /// Start the bot in a container, bounded by the start timeout.
    async fn run_bot_in_container(
        &self,
        bot: &mut BotRecord,
        script_path: &Path,
    ) -> Result<bool, ExecutorError> {
        let deployment = &bot.deployment_config;
        let memory_limit_mb =
            parse_memory_limit_mb(deployment.memory_limit.as_deref().unwrap_or(""));
        let isolation = IsolationLevel::parse(&self.config.monitoring.isolation_level);
        let auto_restart = deployment
            .extra_config
            .get("auto_restart")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let name = format!("bot-{}", bot.id);
        let script = script_path.display().to_string();
        let (entrypoint, entrypoint_args) = match interpreter_for(script_path) {
            Some(interp) => (interp.to_string(), vec![script.clone()]),
            None => (script.clone(), Vec::new()),
        };

        let mut container_config = ContainerConfig::new(&name, &script, entrypoint);
        container_config.entrypoint_args = entrypoint_args;
        container_config.environment = deployment.environment_vars.clone();
        container_config.resource_limits = ResourceLimits {
            cpu_limit_percent: 100.0,
            memory_limit_mb,
            disk_io_limit_mbps: 100.0,
            ..ResourceLimits::default()
        };
        container_config.isolation_level = isolation;
        container_config.labels = HashMap::from([
            ("bot_id".to_string(), bot.id.clone()),
            ("bot_name".to_string(), bot.name.clone()),
        ]);
        container_config.auto_restart = auto_restart;

        self.engine
            .create_container(container_config)
            .await
            .map_err(|e| ExecutorError::Container(format!("failed to run bot in container: {e}")))?;

        match tokio::time::timeout(
            CONTAINER_START_TIMEOUT,
            self.engine.start_container(&name),
        )
        .await
        {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                let reason = self
                    .engine
                    .get_container_info(&name)
                    .and_then(|m| m.error_message)
                    .unwrap_or_else(|| "start returned failure".into());
                let _ = self.engine.remove_container(&name).await;
                return Err(ExecutorError::Container(format!(
                    "failed to start container for bot {}: {}",
                    bot.id, reason
                )));
            }
            Ok(Err(e)) => {
                let _ = self.engine.remove_container(&name).await;
                return Err(ExecutorError::Container(format!(
                    "failed to run bot in container: {e}"
                )));
            }
            Err(_) => {
                // Startup hung past the deadline: best-effort teardown.
                let _ = self.engine.stop_container(&name).await;
                let _ = self.engine.remove_container(&name).await;
                return Err(ExecutorError::Container(format!(
                    "timed out starting container for bot {}",
                    bot.id
                )));
            }
        }

        self.containers.lock().insert(bot.id.clone(), name.clone());
        self.started.lock().insert(bot.id.clone(), Utc::now());

        let meta = self.engine.get_container_info(&name);
        bot.status = BotStatus::Running;
        bot.process_id = meta.as_ref().and_then(|m| m.process_id);
        bot.pod_name = meta.as_ref().map(|m| m.container_id.clone());
        bot.started_at = Some(Utc::now());
        bot.touch();
        self.registry.update_bot(bot.clone())?;

        info!(
            "Started bot in container: {} (ID: {}, Container: {})",
            bot.name,
            bot.id,
            bot.pod_name.as_deref().unwrap_or("?")
        );
        Ok(true)
    }

    // ========================================================================
    // Stop
    // ========================================================================

    /// Stop a running bot: graceful TERM with a timeout, then KILL on the
    /// whole process group. Returns false when the bot is not tracked.
    pub async fn stop_bot(&self, bot_id: &str, reason: &str) -> bool {
        let container_name = self.containers.lock().remove(bot_id);
        let child = self.processes.lock().remove(bot_id);
        self.started.lock().remove(bot_id);

        let bot = self.registry.get_bot_by_id(bot_id);

        if let Some(name) = container_name {
            // Retry stop once; a transient engine error while the container
            // is already exiting shouldn't strand the bot.
            let mut ok = matches!(self.engine.stop_container(&name).await, Ok(true));
            if !ok {
                tokio::time::sleep(Duration::from_millis(250)).await;
                ok = matches!(self.engine.stop_container(&name).await, Ok(true));
            }

            if let Err(e) = self.engine.remove_container(&name).await {
                debug!("Best-effort remove of {} failed: {}", name, e);
            }

            if let Some(mut bot) = bot {
                bot.status = BotStatus::Stopped;
                bot.stopped_at = Some(Utc::now());
                bot.push_lifecycle(reason, "stopped");
                bot.touch();
                if let Err(e) = self.registry.update_bot(bot) {
                    error!("Failed to persist stopped bot {}: {}", bot_id, e);
                }
            }

            info!("Container for bot {} stopped: {}", bot_id, reason);
            return ok;
        }

        let Some(mut child) = child else {
            warn!("Bot {} not found in running processes or containers", bot_id);
            return false;
        };

        let pid = child.id();
        if let Some(pid) = pid {
            system::terminate_group(pid);
        } else if let Err(e) = child.start_kill() {
            debug!("start_kill for bot {} failed: {}", bot_id, e);
        }

        match tokio::time::timeout(PROCESS_STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(_)) => info!("Bot {} terminated gracefully", bot_id),
            Ok(Err(e)) => {
                error!("Error stopping bot {}: {}", bot_id, e);
                if let Some(mut bot) = bot {
                    bot.status = BotStatus::Error;
                    bot.last_error = Some(format!("Stop failed: {e}"));
                    bot.touch();
                    if let Err(pe) = self.registry.update_bot(bot) {
                        error!("Failed to persist errored bot {}: {}", bot_id, pe);
                    }
                }
                return false;
            }
            Err(_) => {
                warn!("Forceful kill for bot {} after graceful termination timeout", bot_id);
                if let Some(pid) = pid {
                    system::kill_group(pid);
                } else if let Err(e) = child.start_kill() {
                    debug!("start_kill for bot {} failed: {}", bot_id, e);
                }
                if let Err(e) = child.wait().await {
                    warn!("Error reaping bot {}: {}", bot_id, e);
                }
            }
        }

        if let Some(mut bot) = bot {
            bot.status = BotStatus::Stopped;
            bot.stopped_at = Some(Utc::now());
            bot.push_lifecycle(reason, "stopped");
            bot.touch();
            if let Err(e) = self.registry.update_bot(bot) {
                error!("Failed to persist stopped bot {}: {}", bot_id, e);
            }
        }

        info!("Stopped bot {} due to: {}", bot_id, reason);
        true
    }

    /// Stop then start, with a brief pause in between.
    pub async fn restart_bot(&self, bot_id: &str, reason: &str) -> bool {
        let Some(bot) = self.registry.get_bot_by_id(bot_id) else {
            warn!("Cannot restart non-existent bot: {}", bot_id);
            return false;
        };

        info!("Restarting bot {}: {}", bot_id, reason);
        self.stop_bot(bot_id, reason).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        match self.run_bot(&bot).await {
            Ok(ok) => ok,
            Err(e) => {
                error!("Error restarting bot {}: {}", bot_id, e);
                if let Some(mut bot) = self.registry.get_bot_by_id(bot_id) {
                    bot.status = BotStatus::Error;
                    bot.last_error = Some(format!("Restart failed: {e}"));
                    bot.touch();
                    if let Err(pe) = self.registry.update_bot(bot) {
                        error!("Failed to persist errored bot {}: {}", bot_id, pe);
                    }
                }
                false
            }
        }
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    /// Monitor one bot and apply the resource policy.
    ///
    /// Appends a metrics sample to the bot's performance trail. A dead
    /// process or one over the memory threshold is stopped; CPU spikes only
    /// record a warning on `last_error` since they are usually transient.
    pub async fn monitor_and_heal(&self, bot_id: &str) -> Option<HealAction> {
        let container_name = self.containers.lock().get(bot_id).cloned();
        if let Some(name) = container_name {
            let metrics = self.engine.get_container_metrics(&name);
            let Some(mut bot) = self.registry.get_bot_by_id(bot_id) else {
                return Some(HealAction::BotNotInRegistry);
            };

            let (cpu, mem) = metrics
                .map(|m| (m.cpu_percent, m.memory_rss_mb))
                .unwrap_or((0.0, 0.0));
            bot.performance.logs.push(PerformanceEntry::Metric {
                cpu_load: cpu,
                memory_usage_mb: mem,
                uptime_seconds: None,
                last_heartbeat: system::timestamp(),
            });
            if let Err(e) = self.registry.update_bot(bot) {
                warn!("Error monitoring container bot {}: {}", bot_id, e);
            }
            return None;
        }

        let pid = {
            let processes = self.processes.lock();
            match processes.get(bot_id) {
                Some(child) => child.id(),
                None => return None, // not tracked
            }
        };

        let Some(mut bot) = self.registry.get_bot_by_id(bot_id) else {
            warn!("Bot {} not in registry during monitoring", bot_id);
            return Some(HealAction::BotNotInRegistry);
        };

        let sample = pid.and_then(|pid| {
            let mut sampler = self.sampler.lock();
            if sampler.is_alive(pid) {
                sampler.sample(pid)
            } else {
                None
            }
        });
        let Some(sample) = sample else {
            warn!("Bot {} process no longer running", bot_id);
            self.stop_bot(bot_id, "Process died unexpectedly").await;
            return Some(HealAction::ProcessTerminated);
        };

        let uptime_seconds = self
            .started
            .lock()
            .get(bot_id)
            .map(|t| (Utc::now() - *t).num_milliseconds() as f64 / 1000.0);

        bot.performance.logs.push(PerformanceEntry::Metric {
            cpu_load: sample.cpu_percent,
            memory_usage_mb: sample.memory_rss_mb,
            uptime_seconds,
            last_heartbeat: system::timestamp(),
        });

        let memory_threshold = self.config.monitoring.memory_threshold_mb as f64;
        if sample.memory_rss_mb > memory_threshold {
            warn!(
                "Bot {} exceeds memory threshold: {:.1}MB > {}MB",
                bot_id, sample.memory_rss_mb, memory_threshold
            );
            self.stop_bot(
                bot_id,
                &format!("Memory threshold exceeded: {:.1}MB", sample.memory_rss_mb),
            )
            .await;
            return Some(HealAction::MemoryLimitExceeded);
        }

        if sample.cpu_percent > self.config.monitoring.cpu_threshold_percent {
            warn!(
                "Bot {} exceeds CPU threshold: {:.1}% > {}%",
                bot_id, sample.cpu_percent, self.config.monitoring.cpu_threshold_percent
            );
            bot.last_error = Some(format!("CPU threshold exceeded: {:.1}%", sample.cpu_percent));
        }

        if let Err(e) = self.registry.update_bot(bot) {
            error!("Error monitoring bot {}: {}", bot_id, e);
        }
        None
    }

    /// Stop every tracked bot. Returns the number stopped.
    pub async fn cleanup_all_bots(&self) -> usize {
        let ids: HashSet<String> = {
            let mut ids: HashSet<String> = self.processes.lock().keys().cloned().collect();
            ids.extend(self.containers.lock().keys().cloned());
            ids
        };

        info!("Cleaning up {} running bots", ids.len());

        let mut count = 0;
        for bot_id in ids {
            if self.stop_bot(&bot_id, "Application shutdown").await {
                count += 1;
            }
        }
        count
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn container_for(&self, bot_id: &str) -> Option<String> {
        self.containers.lock().get(bot_id).cloned()
    }

    pub fn running_process_ids(&self) -> Vec<String> {
        self.processes.lock().keys().cloned().collect()
    }

    pub fn running_container_names(&self) -> HashMap<String, String> {
        self.containers.lock().clone()
    }

    pub fn get_all_running_bots(&self) -> Vec<String> {
        let mut ids: HashSet<String> = self.processes.lock().keys().cloned().collect();
        ids.extend(self.containers.lock().keys().cloned());
        ids.into_iter().collect()
    }

    pub fn is_bot_running(&self, bot_id: &str) -> bool {
        self.processes.lock().contains_key(bot_id) || self.containers.lock().contains_key(bot_id)
    }

    /// Process details for a locally-running bot.
    pub fn get_bot_process_info(&self, bot_id: &str) -> Option<BotProcessInfo> {
        let pid = {
            let processes = self.processes.lock();
            processes.get(bot_id)?.id()?
        };
        let sample = self.sampler.lock().sample(pid)?;
        let uptime_seconds = self
            .started
            .lock()
            .get(bot_id)
            .map(|t| (Utc::now() - *t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        Some(BotProcessInfo {
            bot_id: bot_id.to_string(),
            pid,
            cpu_percent: sample.cpu_percent,
            memory_rss_mb: sample.memory_rss_mb,
            num_threads: sample.num_threads,
            uptime_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        ContainerMetadata, ContainerState, EngineError, EngineResult, MetricsSample,
    };
    use crate::registry::DeploymentType;
    use async_trait::async_trait;

    /// Engine whose create_container always fails
    struct RefusingEngine;

    #[async_trait]
    impl ContainerRuntime for RefusingEngine {
        async fn create_container(&self, config: ContainerConfig) -> EngineResult<ContainerMetadata> {
            Err(EngineError::Other(format!("refusing to create {}", config.name)))
        }
        async fn start_container(&self, name: &str) -> EngineResult<bool> {
            Err(EngineError::NotFound(name.to_string()))
        }
        async fn stop_container(&self, _name: &str) -> EngineResult<bool> {
            Ok(true)
        }
        async fn remove_container(&self, _name: &str) -> EngineResult<bool> {
            Ok(true)
        }
        fn get_container_info(&self, _name: &str) -> Option<ContainerMetadata> {
            None
        }
        fn get_container_metrics(&self, _name: &str) -> Option<MetricsSample> {
            None
        }
    }

    /// Engine whose start_container never completes
    struct HangingEngine;

    #[async_trait]
    impl ContainerRuntime for HangingEngine {
        async fn create_container(&self, config: ContainerConfig) -> EngineResult<ContainerMetadata> {
            Ok(ContainerMetadata {
                name: config.name.clone(),
                container_id: "deadbeef0000".into(),
                image: config.image.clone(),
                state: ContainerState::Created,
                process_id: None,
                created_at: Utc::now(),
                started_at: None,
                stopped_at: None,
                exit_code: None,
                error_message: None,
                root_path: None,
            })
        }
        async fn start_container(&self, _name: &str) -> EngineResult<bool> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(true)
        }
        async fn stop_container(&self, _name: &str) -> EngineResult<bool> {
            Ok(true)
        }
        async fn remove_container(&self, _name: &str) -> EngineResult<bool> {
            Ok(true)
        }
        fn get_container_info(&self, _name: &str) -> Option<ContainerMetadata> {
            None
        }
        fn get_container_metrics(&self, _name: &str) -> Option<MetricsSample> {
            None
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        registry: Arc<BotRegistry>,
        config: Arc<Configuration>,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Configuration::default();
        config.system.bots_directory = dir.path().join("bots");
        config.system.registry_file = dir.path().join("registry.json");
        std::fs::create_dir_all(&config.system.bots_directory).unwrap();
        std::fs::write(
            config.system.bots_directory.join("sleeper.sh"),
            "#!/bin/sh\nsleep 30\n",
        )
        .unwrap();

        let registry = Arc::new(BotRegistry::new(&config.system.registry_file));
        Harness { _dir: dir, registry, config: Arc::new(config) }
    }

    fn container_bot(id: &str) -> BotRecord {
        let mut bot = BotRecord::new(id, "Test Bot");
        bot.blueprint = "sleeper.sh".into();
        bot.deployment_config.deployment_type = DeploymentType::CustomContainer;
        bot
    }

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit_mb("512Mi"), 512);
        assert_eq!(parse_memory_limit_mb("1Gi"), 1024);
        assert_eq!(parse_memory_limit_mb("1024"), 1024);
        assert_eq!(parse_memory_limit_mb(""), 512);
        assert_eq!(parse_memory_limit_mb("abc"), 512);
        assert_eq!(parse_memory_limit_mb("  2gi "), 2048);
        assert_eq!(parse_memory_limit_mb("512MB"), 512);
    }

    #[test]
    fn test_interpreter_selection() {
        assert_eq!(interpreter_for(Path::new("bot.py")), Some("python3"));
        assert_eq!(interpreter_for(Path::new("bot.sh")), Some("sh"));
        assert_eq!(interpreter_for(Path::new("bot.js")), Some("node"));
        assert_eq!(interpreter_for(Path::new("bot.bin")), None);
        assert_eq!(interpreter_for(Path::new("bot")), None);
    }

    #[tokio::test]
    async fn test_missing_blueprint_marks_failed() {
        let h = harness();
        let executor =
            AdaptiveExecutor::new(h.registry.clone(), Arc::new(RefusingEngine), h.config.clone());

        let mut bot = BotRecord::new("bot-1", "Ghost");
        bot.blueprint = "does_not_exist.py".into();
        h.registry.register_bot(bot.clone()).unwrap();

        let err = executor.run_bot(&bot).await.unwrap_err();
        assert!(err.to_string().contains("Bot script not found"));

        let stored = h.registry.get_bot_by_id("bot-1").unwrap();
        assert_eq!(stored.status, BotStatus::Failed);
        assert_eq!(stored.error_count, 1);
    }

    #[tokio::test]
    async fn test_container_failure_falls_back_to_local() {
        let h = harness();
        let executor =
            AdaptiveExecutor::new(h.registry.clone(), Arc::new(RefusingEngine), h.config.clone());

        let bot = container_bot("bot-fb");
        h.registry.register_bot(bot.clone()).unwrap();

        assert!(executor.run_bot(&bot).await.unwrap());

        // Ended up as a local process, not a container.
        assert!(executor.container_for("bot-fb").is_none());
        assert!(executor.running_process_ids().contains(&"bot-fb".to_string()));

        let stored = h.registry.get_bot_by_id("bot-fb").unwrap();
        assert_eq!(stored.status, BotStatus::Running);
        assert!(stored.error_count >= 1);
        assert!(stored.last_error.as_deref().unwrap().contains("Container failed"));

        assert!(executor.stop_bot("bot-fb", "test cleanup").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_container_start_timeout_falls_back() {
        let h = harness();
        let executor =
            AdaptiveExecutor::new(h.registry.clone(), Arc::new(HangingEngine), h.config.clone());

        let bot = container_bot("bot-to");
        h.registry.register_bot(bot.clone()).unwrap();

        assert!(executor.run_bot(&bot).await.unwrap());
        assert!(executor.running_process_ids().contains(&"bot-to".to_string()));

        let stored = h.registry.get_bot_by_id("bot-to").unwrap();
        assert!(stored.last_error.as_deref().unwrap().contains("timed out"));

        executor.stop_bot("bot-to", "test cleanup").await;
    }

    #[tokio::test]
    async fn test_stop_untracked_bot_returns_false() {
        let h = harness();
        let executor =
            AdaptiveExecutor::new(h.registry.clone(), Arc::new(RefusingEngine), h.config.clone());

        h.registry.register_bot(BotRecord::new("idle", "Idle")).unwrap();
        let before = h.registry.get_bot_by_id("idle").unwrap();

        assert!(!executor.stop_bot("idle", "no-op").await);

        // No registry side effects.
        let after = h.registry.get_bot_by_id("idle").unwrap();
        assert_eq!(after.status, before.status);
        assert!(after.performance.logs.is_empty());
    }

    #[tokio::test]
    async fn test_stop_clears_tracking_and_appends_lifecycle() {
        let h = harness();
        let executor =
            AdaptiveExecutor::new(h.registry.clone(), Arc::new(RefusingEngine), h.config.clone());

        let mut bot = BotRecord::new("bot-stop", "Stopper");
        bot.blueprint = "sleeper.sh".into();
        h.registry.register_bot(bot.clone()).unwrap();

        executor.run_bot(&bot).await.unwrap();
        assert!(executor.is_bot_running("bot-stop"));

        assert!(executor.stop_bot("bot-stop", "Manual stop").await);
        assert!(!executor.is_bot_running("bot-stop"));
        assert!(executor.get_all_running_bots().is_empty());

        let stored = h.registry.get_bot_by_id("bot-stop").unwrap();
        assert_eq!(stored.status, BotStatus::Stopped);
        assert!(stored.stopped_at.is_some());
        assert!(matches!(
            stored.performance.logs.last(),
            Some(PerformanceEntry::Lifecycle { status, .. }) if status == "stopped"
        ));
    }

    #[tokio::test]
    async fn test_term_resistant_bot_is_killed_within_deadline() {
        let h = harness();
        std::fs::write(
            h.config.system.bots_directory.join("stubborn.sh"),
            "#!/bin/sh\ntrap '' TERM\nsleep 30\n",
        )
        .unwrap();

        let executor =
            AdaptiveExecutor::new(h.registry.clone(), Arc::new(RefusingEngine), h.config.clone());

        let mut bot = BotRecord::new("bot-hard", "Stubborn");
        bot.blueprint = "stubborn.sh".into();
        h.registry.register_bot(bot.clone()).unwrap();
        executor.run_bot(&bot).await.unwrap();

        // Let the shell install its trap before stopping.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = std::time::Instant::now();
        assert!(executor.stop_bot("bot-hard", "forced").await);
        assert!(started.elapsed() < Duration::from_secs(7));

        let stored = h.registry.get_bot_by_id("bot-hard").unwrap();
        assert_eq!(stored.status, BotStatus::Stopped);
    }

    #[tokio::test]
    async fn test_cleanup_all_bots() {
        let h = harness();
        let executor =
            AdaptiveExecutor::new(h.registry.clone(), Arc::new(RefusingEngine), h.config.clone());

        for id in ["c1", "c2"] {
            let mut bot = BotRecord::new(id, id);
            bot.blueprint = "sleeper.sh".into();
            h.registry.register_bot(bot.clone()).unwrap();
            executor.run_bot(&bot).await.unwrap();
        }

        assert_eq!(executor.cleanup_all_bots().await, 2);
        assert!(executor.get_all_running_bots().is_empty());
    }

    #[tokio::test]
    async fn test_process_info_for_running_bot() {
        let h = harness();
        let executor =
            AdaptiveExecutor::new(h.registry.clone(), Arc::new(RefusingEngine), h.config.clone());

        let mut bot = BotRecord::new("bot-info", "Info");
        bot.blueprint = "sleeper.sh".into();
        h.registry.register_bot(bot.clone()).unwrap();
        executor.run_bot(&bot).await.unwrap();

        let info = executor.get_bot_process_info("bot-info").unwrap();
        assert_eq!(info.bot_id, "bot-info");
        assert!(info.pid > 0);
        assert!(info.memory_rss_mb > 0.0);

        assert!(executor.get_bot_process_info("missing").is_none());

        executor.stop_bot("bot-info", "test cleanup").await;
    }

    #[tokio::test]
    async fn test_monitor_untracked_bot_is_none() {
        let h = harness();
        let executor =
            AdaptiveExecutor::new(h.registry.clone(), Arc::new(RefusingEngine), h.config.clone());
        assert_eq!(executor.monitor_and_heal("nobody").await, None);
    }

    #[tokio::test]
    async fn test_monitor_appends_metrics_for_running_bot() {
        let h = harness();
        let executor =
            AdaptiveExecutor::new(h.registry.clone(), Arc::new(RefusingEngine), h.config.clone());

        let mut bot = BotRecord::new("bot-mon", "Monitored");
        bot.blueprint = "sleeper.sh".into();
        h.registry.register_bot(bot.clone()).unwrap();
        executor.run_bot(&bot).await.unwrap();

        assert_eq!(executor.monitor_and_heal("bot-mon").await, None);

        let stored = h.registry.get_bot_by_id("bot-mon").unwrap();
        assert!(matches!(
            stored.performance.logs.last(),
            Some(PerformanceEntry::Metric { uptime_seconds: Some(_), .. })
        ));

        executor.stop_bot("bot-mon", "test cleanup").await;
    }
}
