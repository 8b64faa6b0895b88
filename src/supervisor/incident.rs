//! Append-only incident log
//!
//! One JSON document per line. Readers only ever see a consistent prefix;
//! `tail` keeps a bounded number of lines in memory and skips anything
//! malformed.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::BotRecord;

/// Incident categories emitted by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    Unhealthy,
    Restart,
    RestartFailed,
    Fallback,
    FallbackFailed,
    Quarantined,
}

/// A recorded supervisor observation or action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    pub bot_id: String,
    pub bot_name: String,
    pub kind: IncidentKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
}

impl Incident {
    pub fn new(
        bot: &BotRecord,
        kind: IncidentKind,
        message: impl Into<String>,
        data: serde_json::Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            incident_id: format!("inc-{}-{}", bot.id, now.timestamp()),
            bot_id: bot.id.clone(),
            bot_name: bot.name.clone(),
            kind,
            message: message.into(),
            created_at: now,
            data,
        }
    }
}

/// File-backed NDJSON incident log
pub struct IncidentLog {
    path: PathBuf,
}

impl IncidentLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one incident as a single line.
    pub fn append(&self, incident: &Incident) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let line = serde_json::to_string(incident)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Read the last `limit` records. Malformed lines are skipped, a
    /// missing file yields an empty list.
    pub fn tail(&self, limit: usize) -> Vec<Value> {
        if limit == 0 || !self.path.exists() {
            return Vec::new();
        }

        let Ok(file) = std::fs::File::open(&self.path) else {
            return Vec::new();
        };

        let mut window: VecDeque<String> = VecDeque::with_capacity(limit);
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { continue };
            if window.len() == limit {
                window.pop_front();
            }
            window.push_back(line);
        }

        window
            .into_iter()
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect()
    }
}
