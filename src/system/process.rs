//! Process liveness checks and resource sampling

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// A point-in-time resource sample for one process
#[derive(Debug, Clone, Copy)]
pub struct ProcessSample {
    /// CPU usage in percent of one core
    pub cpu_percent: f64,
    /// Resident set size in megabytes
    pub memory_rss_mb: f64,
    /// Number of tasks/threads, where the platform exposes it
    pub num_threads: usize,
}

/// Reusable process sampler.
///
/// CPU percentages are deltas between refreshes, so the first sample for a
/// pid reads as 0.0 and later samples converge.
pub struct ProcessSampler {
    system: System,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self { system: System::new() }
    }

    fn refresh(&mut self, pid: u32) {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    }

    /// True when the process exists and is not a zombie.
    pub fn is_alive(&mut self, pid: u32) -> bool {
        self.refresh(pid);
        match self.system.process(Pid::from_u32(pid)) {
            Some(proc) => !matches!(proc.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
            None => false,
        }
    }

    /// Sample CPU and memory for a process, if it still exists.
    pub fn sample(&mut self, pid: u32) -> Option<ProcessSample> {
        self.refresh(pid);
        let proc = self.system.process(Pid::from_u32(pid))?;
        Some(ProcessSample {
            cpu_percent: proc.cpu_usage() as f64,
            memory_rss_mb: proc.memory() as f64 / (1024.0 * 1024.0),
            num_threads: proc.tasks().map(|t| t.len()).unwrap_or(1),
        })
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot liveness check: the process exists and is not a zombie.
pub fn process_alive(pid: u32) -> bool {
    ProcessSampler::new().is_alive(pid)
}

/// Send SIGTERM to a process group. Children are spawned into their own
/// session, so the group id equals the leader's pid.
#[cfg(unix)]
pub fn terminate_group(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM);
}

/// Send SIGKILL to a process group.
#[cfg(unix)]
pub fn kill_group(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        tracing::debug!("killpg({}, {}) failed: {}", pid, signal, e);
    }
}

#[cfg(not(unix))]
pub fn terminate_group(_pid: u32) {
    tracing::warn!("Process-group signalling is not supported on this platform");
}

#[cfg(not(unix))]
pub fn kill_group(_pid: u32) {
    tracing::warn!("Process-group signalling is not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[test]
    fn test_unknown_pid_is_dead() {
        // PIDs wrap below this on every mainstream kernel config.
        assert!(!process_alive(u32::MAX - 1));
    }

    #[test]
    fn test_sample_current_process() {
        let mut sampler = ProcessSampler::new();
        let sample = sampler.sample(std::process::id()).unwrap();
        assert!(sample.memory_rss_mb > 0.0);
    }
}
