//! Self-healing supervisor
//!
//! A single periodic loop that re-checks every bot expected to be running
//! and applies a bounded heal policy: stop, restart in the original mode,
//! fall back from container to local process, and finally quarantine. The
//! loop is deliberately conservative: STOPPED and PAUSED bots are never
//! touched, and exponential backoff prevents restart storms.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::ContainerState;
use crate::executor::AdaptiveExecutor;
use crate::registry::{BotRecord, BotRegistry, BotStatus, DeploymentType};
use crate::system;

use super::incident::{Incident, IncidentKind, IncidentLog};

/// Join deadline when stopping the supervisor loop
const STOP_DEADLINE: Duration = Duration::from_secs(5);

/// Backoff cap between heal attempts for one bot
const MAX_BACKOFF_SECS: u64 = 60;

/// Per-bot heal bookkeeping. In-memory only.
#[derive(Debug, Clone, Default)]
pub struct RestartState {
    pub failures: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_allowed_at: Option<DateTime<Utc>>,
}

/// Continuously monitors bots and applies self-healing policies
pub struct BotSupervisor {
    registry: Arc<BotRegistry>,
    executor: Arc<AdaptiveExecutor>,
    incidents: Arc<IncidentLog>,
    interval: Duration,
    max_failures: u32,

    restart_state: Mutex<HashMap<String, RestartState>>,
    loop_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl BotSupervisor {
    /// `interval` is clamped to at least one second, `max_failures` to at
    /// least one attempt.
    pub fn new(
        registry: Arc<BotRegistry>,
        executor: Arc<AdaptiveExecutor>,
        incidents: Arc<IncidentLog>,
        interval: Duration,
        max_failures: u32,
    ) -> Self {
        Self {
            registry,
            executor,
            incidents,
            interval: interval.max(Duration::from_secs(1)),
            max_failures: max_failures.max(1),
            restart_state: Mutex::new(HashMap::new()),
            loop_task: Mutex::new(None),
        }
    }

    pub fn incidents(&self) -> &IncidentLog {
        &self.incidents
    }

    /// Whether the control loop is currently running.
    pub fn is_running(&self) -> bool {
        self.loop_task
            .lock()
            .as_ref()
            .map(|(_, handle)| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the control loop. A no-op when it is already running.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.loop_task.lock();
        if let Some((_, handle)) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let supervisor = Arc::clone(self);

        let handle = tokio::spawn(async move {
            loop {
                supervisor.tick().await;
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(supervisor.interval) => {}
                }
            }
        });

        *guard = Some((token, handle));
        info!("BotSupervisor started");
    }

    /// Cooperative stop with a join deadline; the task is aborted if it
    /// does not wind down in time.
    pub async fn stop(&self) {
        let taken = self.loop_task.lock().take();
        if let Some((token, mut handle)) = taken {
            token.cancel();
            if tokio::time::timeout(STOP_DEADLINE, &mut handle).await.is_err() {
                warn!("Supervisor loop did not stop within {:?}, aborting", STOP_DEADLINE);
                handle.abort();
            }
        }
        info!("BotSupervisor stopped");
    }

    /// One pass over the fleet: health-check every bot that is expected to
    /// be running and heal the unhealthy ones.
    pub async fn tick(&self) {
        let bots = self.registry.get_all_bots();
        let now = Utc::now();

        for bot in bots {
            if !matches!(bot.status, BotStatus::Running | BotStatus::Deploying) {
                continue;
            }
            if !self.is_bot_healthy(&bot) {
                self.handle_unhealthy(bot, now).await;
            }
        }
    }

    /// A container-tracked bot is healthy iff the engine reports RUNNING;
    /// a process-tracked bot iff its pid is alive and not a zombie.
    fn is_bot_healthy(&self, bot: &BotRecord) -> bool {
        if let Some(name) = self.executor.container_for(&bot.id) {
            return self
                .executor
                .engine()
                .get_container_info(&name)
                .map(|meta| meta.state == ContainerState::Running)
                .unwrap_or(false);
        }

        match bot.process_id {
            Some(pid) => system::process_alive(pid),
            None => false,
        }
    }

    pub(crate) async fn handle_unhealthy(&self, mut bot: BotRecord, now: DateTime<Utc>) {
        let bot_id = bot.id.clone();

        let failures = {
            let mut states = self.restart_state.lock();
            let state = states.entry(bot_id.clone()).or_default();
            if let Some(next) = state.next_allowed_at {
                if now < next {
                    return; // backoff gate
                }
            }
            state.failures += 1;
            state.last_attempt_at = Some(now);
            state.failures
        };

        if failures > self.max_failures {
            let message =
                format!("Supervisor quarantined bot after {failures} failed heal attempts");
            bot.status = BotStatus::Error;
            bot.last_error = Some(message.clone());
            bot.touch();
            if let Err(e) = self.registry.update_bot(bot.clone()) {
                error!("Failed to persist quarantined bot {}: {}", bot_id, e);
            }

            self.record(&bot, IncidentKind::Quarantined, message, json!({"failures": failures}));
            return;
        }

        self.record(
            &bot,
            IncidentKind::Unhealthy,
            "Bot unhealthy; attempting self-heal",
            json!({"failures": failures}),
        );

        // Best-effort stop before restarting.
        let _ = self.executor.stop_bot(&bot_id, "Supervisor self-heal").await;

        let mode = bot.deployment_config.deployment_type.to_string();
        match self.executor.run_bot(&bot).await {
            Ok(true) => {
                self.set_backoff(&bot_id, now, failures);
                self.record(
                    &bot,
                    IncidentKind::Restart,
                    "Restarted bot successfully",
                    json!({"mode": mode}),
                );
                return;
            }
            Ok(false) => {}
            Err(e) => {
                self.record(
                    &bot,
                    IncidentKind::RestartFailed,
                    format!("Restart failed: {e}"),
                    json!({"mode": mode}),
                );
            }
        }

        // Container bots get one more chance as a plain local process.
        if bot.deployment_config.deployment_type.is_container() {
            bot.deployment_config.deployment_type = DeploymentType::LocalProcess;
            bot.touch();
            match self.registry.update_bot(bot.clone()) {
                Ok(_) => match self.executor.run_bot(&bot).await {
                    Ok(true) => {
                        self.set_backoff(&bot_id, now, failures);
                        self.record(
                            &bot,
                            IncidentKind::Fallback,
                            "Fell back to local process and restarted successfully",
                            json!({}),
                        );
                        return;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.record(
                            &bot,
                            IncidentKind::FallbackFailed,
                            format!("Fallback restart failed: {e}"),
                            json!({}),
                        );
                    }
                },
                Err(e) => {
                    self.record(
                        &bot,
                        IncidentKind::FallbackFailed,
                        format!("Fallback restart failed: {e}"),
                        json!({}),
                    );
                }
            }
        }

        self.set_backoff(&bot_id, now, failures);
    }

    /// next_allowed_at = now + min(60, 2^failures) seconds
    fn set_backoff(&self, bot_id: &str, now: DateTime<Utc>, failures: u32) {
        let secs = if failures >= 6 {
            MAX_BACKOFF_SECS
        } else {
            (1u64 << failures).min(MAX_BACKOFF_SECS)
        };
        let mut states = self.restart_state.lock();
        if let Some(state) = states.get_mut(bot_id) {
            state.next_allowed_at = Some(now + chrono::Duration::seconds(secs as i64));
        }
    }

    fn record(
        &self,
        bot: &BotRecord,
        kind: IncidentKind,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        let data = data.as_object().cloned().unwrap_or_default();
        let incident = Incident::new(bot, kind, message, data);
        if let Err(e) = self.incidents.append(&incident) {
            warn!("Failed to write incident log: {}", e);
        }
    }

    #[cfg(test)]
    pub(crate) fn restart_state_for(&self, bot_id: &str) -> Option<RestartState> {
        self.restart_state.lock().get(bot_id).cloned()
    }

    #[cfg(test)]
    pub(crate) fn force_failures(&self, bot_id: &str, failures: u32) {
        let mut states = self.restart_state.lock();
        let state = states.entry(bot_id.to_string()).or_default();
        state.failures = failures;
        state.next_allowed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::engine::ContainerEngine;

    struct Harness {
        _dir: tempfile::TempDir,
        registry: Arc<BotRegistry>,
        executor: Arc<AdaptiveExecutor>,
        incidents: Arc<IncidentLog>,
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

        let config = Arc::new(config);
        let registry = Arc::new(BotRegistry::new(&config.system.registry_file));
        let engine =
            Arc::new(ContainerEngine::new(dir.path().join("containers")).unwrap());
        let executor = Arc::new(AdaptiveExecutor::new(registry.clone(), engine, config));
        let incidents = Arc::new(IncidentLog::new(dir.path().join("incidents.jsonl")));

        Harness { _dir: dir, registry, executor, incidents }
    }

    fn supervisor(h: &Harness, max_failures: u32) -> Arc<BotSupervisor> {
        Arc::new(BotSupervisor::new(
            h.registry.clone(),
            h.executor.clone(),
            h.incidents.clone(),
            Duration::from_secs(1),
            max_failures,
        ))
    }

    /// A RUNNING bot with no tracking and no live pid is unhealthy; one
    /// tick records an incident and attempts a heal.
    #[tokio::test]
    async fn test_tick_detects_unhealthy_running_bot() {
        let h = harness();
        let sup = supervisor(&h, 1);

        let mut bot = BotRecord::new("lost", "Lost Bot");
        bot.blueprint = "sleeper.sh".into();
        bot.status = BotStatus::Running;
        h.registry.register_bot(bot).unwrap();

        sup.tick().await;

        let incidents = h.incidents.tail(50);
        assert!(!incidents.is_empty());
        assert!(incidents.iter().any(|i| i["bot_id"] == "lost"));
        assert_eq!(incidents[0]["kind"], "unhealthy");

        // The heal restarted it as a local process.
        assert!(h.executor.is_bot_running("lost"));
        assert_eq!(h.registry.get_bot_by_id("lost").unwrap().status, BotStatus::Running);

        h.executor.cleanup_all_bots().await;
    }

    /// Stopped bots are left alone.
    #[tokio::test]
    async fn test_tick_ignores_stopped_bots() {
        let h = harness();
        let sup = supervisor(&h, 1);

        let mut bot = BotRecord::new("parked", "Parked");
        bot.status = BotStatus::Stopped;
        h.registry.register_bot(bot).unwrap();

        sup.tick().await;
        assert!(h.incidents.tail(10).is_empty());
    }

    /// Beyond max_failures the bot is quarantined exactly once: ERROR
    /// status plus a quarantined incident, and tick stops touching it.
    #[tokio::test]
    async fn test_quarantine_after_exhausted_failures() {
        let h = harness();
        let sup = supervisor(&h, 1);

        let mut bot = BotRecord::new("doomed", "Doomed");
        bot.blueprint = "missing.py".into(); // every restart will fail
        bot.status = BotStatus::Running;
        let bot = h.registry.register_bot(bot).unwrap();

        sup.force_failures("doomed", 1);
        sup.handle_unhealthy(bot, Utc::now()).await;

        let stored = h.registry.get_bot_by_id("doomed").unwrap();
        assert_eq!(stored.status, BotStatus::Error);
        assert!(stored.last_error.as_deref().unwrap().contains("quarantined"));

        let quarantined: Vec<_> = h
            .incidents
            .tail(50)
            .into_iter()
            .filter(|i| i["kind"] == "quarantined")
            .collect();
        assert_eq!(quarantined.len(), 1);

        // ERROR status means the next tick skips it entirely.
        sup.tick().await;
        let still: Vec<_> = h
            .incidents
            .tail(50)
            .into_iter()
            .filter(|i| i["kind"] == "quarantined")
            .collect();
        assert_eq!(still.len(), 1);
    }

    /// The backoff gate suppresses re-entry before the deadline.
    #[tokio::test]
    async fn test_backoff_gate() {
        let h = harness();
        let sup = supervisor(&h, 5);

        let mut bot = BotRecord::new("flappy", "Flappy");
        bot.blueprint = "missing.py".into();
        bot.status = BotStatus::Running;
        let bot = h.registry.register_bot(bot).unwrap();

        let now = Utc::now();
        sup.handle_unhealthy(bot.clone(), now).await;

        let state = sup.restart_state_for("flappy").unwrap();
        assert_eq!(state.failures, 1);
        let next = state.next_allowed_at.unwrap();
        assert!(next > now);
        assert!(next <= now + chrono::Duration::seconds(2));

        // A second attempt inside the backoff window is a no-op.
        sup.handle_unhealthy(bot, now).await;
        assert_eq!(sup.restart_state_for("flappy").unwrap().failures, 1);
    }

    /// Failed restarts record restart_failed incidents with the mode.
    #[tokio::test]
    async fn test_restart_failed_incident() {
        let h = harness();
        let sup = supervisor(&h, 5);

        let mut bot = BotRecord::new("broken", "Broken");
        bot.blueprint = "missing.py".into();
        bot.status = BotStatus::Running;
        let bot = h.registry.register_bot(bot).unwrap();

        sup.handle_unhealthy(bot, Utc::now()).await;

        let incidents = h.incidents.tail(50);
        let kinds: Vec<_> = incidents.iter().map(|i| i["kind"].clone()).collect();
        assert!(kinds.contains(&serde_json::json!("unhealthy")));
        assert!(kinds.contains(&serde_json::json!("restart_failed")));
        let failed = incidents.iter().find(|i| i["kind"] == "restart_failed").unwrap();
        assert_eq!(failed["data"]["mode"], "local_process");
    }

    /// Healing a container bot restarts it in its original mode when the
    /// container path still works; the incident records that mode.
    #[tokio::test]
    async fn test_heal_restarts_container_bot_in_original_mode() {
        let h = harness();
        let sup = supervisor(&h, 5);

        let mut bot = BotRecord::new("boxed", "Boxed");
        bot.blueprint = "sleeper.sh".into();
        bot.status = BotStatus::Running;
        bot.deployment_config.deployment_type = DeploymentType::CustomContainer;
        let bot = h.registry.register_bot(bot).unwrap();

        sup.handle_unhealthy(bot, Utc::now()).await;

        // The heal restarted it (container path works here, so the restart
        // incident carries the original container mode).
        let incidents = h.incidents.tail(50);
        let restart = incidents.iter().find(|i| i["kind"] == "restart");
        assert!(restart.is_some());
        assert_eq!(restart.unwrap()["data"]["mode"], "custom_container");

        h.executor.cleanup_all_bots().await;
    }

    #[tokio::test]
    async fn test_start_stop_loop() {
        let h = harness();
        let sup = supervisor(&h, 5);

        assert!(!sup.is_running());
        sup.start();
        assert!(sup.is_running());
        // Idempotent.
        sup.start();

        sup.stop().await;
        assert!(!sup.is_running());
    }
}
