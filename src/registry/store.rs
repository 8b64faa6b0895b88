//! JSON-file-backed bot registry
//!
//! An in-memory map of bot records mirrored to a single JSON file through
//! the atomic store. All mutations persist immediately; the mutex is held
//! only for the duration of the swap and the persist call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::storage::{self, StorageError};

use super::record::{BotRecord, BotStatus};

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("bot with id '{0}' already exists")]
    AlreadyExists(String),

    #[error("bot with id '{0}' not found in registry")]
    NotFound(String),

    #[error("bot must include a non-empty id")]
    MissingId,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Aggregate counts over the registry
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_bots: usize,
    pub bots_by_status: HashMap<String, usize>,
    pub active_bots: usize,
    pub failed_bots: usize,
}

/// In-memory registry persisted to one JSON file
pub struct BotRegistry {
    path: PathBuf,
    cache: Mutex<HashMap<String, BotRecord>>,
}

impl BotRegistry {
    /// Open the registry, loading any existing state from disk. A missing
    /// or unreadable file yields an empty registry.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = match Self::load_initial(&path) {
            Ok(cache) => {
                info!("Loaded {} bots from registry: {}", cache.len(), path.display());
                cache
            }
            Err(e) => {
                error!("Failed to load registry from {}: {}", path.display(), e);
                HashMap::new()
            }
        };
        Self { path, cache: Mutex::new(cache) }
    }

    fn load_initial(path: &Path) -> Result<HashMap<String, BotRecord>, StorageError> {
        let raw = storage::load(path)?;
        Ok(Self::records_from_value(&raw))
    }

    fn records_from_value(raw: &Value) -> HashMap<String, BotRecord> {
        let mut cache = HashMap::new();
        let Some(bots) = raw.get("bots").and_then(Value::as_array) else {
            return cache;
        };
        for entry in bots {
            match serde_json::from_value::<BotRecord>(entry.clone()) {
                Ok(record) if !record.id.trim().is_empty() => {
                    cache.insert(record.id.clone(), record);
                }
                Ok(_) => warn!("Skipping registry entry with empty id"),
                Err(e) => warn!("Skipping malformed registry entry: {}", e),
            }
        }
        cache
    }

    /// Serialize the cache and write it atomically. Persistence failures
    /// are logged and returned to the caller.
    fn persist(&self, cache: &HashMap<String, BotRecord>) -> Result<(), RegistryError> {
        let last_updated = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64());

        let data = json!({
            "bots": cache.values().collect::<Vec<_>>(),
            "metadata": {
                "total_bots": cache.len(),
                "last_updated": last_updated,
            },
        });

        storage::atomic_save(&self.path, &data).map_err(|e| {
            error!("Failed to save registry: {}", e);
            RegistryError::Storage(e)
        })
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Register a new bot. Fails when the id is empty or already known.
    pub fn register_bot(&self, record: BotRecord) -> Result<BotRecord, RegistryError> {
        let bot_id = record.id.trim().to_string();
        if bot_id.is_empty() {
            return Err(RegistryError::MissingId);
        }

        let mut cache = self.cache.lock();
        if cache.contains_key(&bot_id) {
            return Err(RegistryError::AlreadyExists(bot_id));
        }

        cache.insert(bot_id.clone(), record);
        self.persist(&cache)?;

        let stored = cache[&bot_id].clone();
        info!("Registered bot: {} (ID: {})", stored.name, bot_id);
        Ok(stored)
    }

    /// Whole-record replacement keyed by id.
    pub fn update_bot(&self, record: BotRecord) -> Result<BotRecord, RegistryError> {
        let bot_id = record.id.trim().to_string();
        if bot_id.is_empty() {
            return Err(RegistryError::MissingId);
        }

        let mut cache = self.cache.lock();
        if !cache.contains_key(&bot_id) {
            return Err(RegistryError::NotFound(bot_id));
        }

        cache.insert(bot_id.clone(), record);
        self.persist(&cache)?;

        let stored = cache[&bot_id].clone();
        info!("Updated bot: {} (ID: {}), status: {}", stored.name, bot_id, stored.status);
        Ok(stored)
    }

    /// Set the status plus arbitrary extra keys merged over the stored
    /// record. A no-op returning `None` when the id is unknown.
    pub fn update_bot_status(
        &self,
        bot_id: &str,
        status: BotStatus,
        patch: serde_json::Map<String, Value>,
    ) -> Result<Option<BotRecord>, RegistryError> {
        let mut cache = self.cache.lock();
        let Some(record) = cache.get(bot_id) else {
            warn!("Attempted to update non-existent bot: {}", bot_id);
            return Ok(None);
        };

        let mut merged = serde_json::to_value(record)
            .map_err(|e| RegistryError::Storage(StorageError::Serialize(e)))?;
        if let Some(obj) = merged.as_object_mut() {
            obj.insert("status".into(), Value::String(status.to_string()));
            for (key, value) in patch {
                obj.insert(key, value);
            }
        }
        let updated: BotRecord = serde_json::from_value(merged)
            .map_err(|e| RegistryError::Storage(StorageError::Serialize(e)))?;

        cache.insert(bot_id.to_string(), updated);
        self.persist(&cache)?;

        info!("Updated bot {} status to {}", bot_id, status);
        Ok(Some(cache[bot_id].clone()))
    }

    /// Remove a bot. Returns false when the id is unknown.
    pub fn unregister_bot(&self, bot_id: &str) -> Result<bool, RegistryError> {
        let mut cache = self.cache.lock();
        let Some(removed) = cache.remove(bot_id) else {
            warn!("Attempted to unregister non-existent bot: {}", bot_id);
            return Ok(false);
        };

        self.persist(&cache)?;
        info!("Unregistered bot: {} (ID: {})", removed.name, bot_id);
        Ok(true)
    }

    /// Remove every bot. Destructive.
    pub fn clear_registry(&self) -> Result<(), RegistryError> {
        warn!("Clearing entire bot registry!");
        let mut cache = self.cache.lock();
        cache.clear();
        self.persist(&cache)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_all_bots(&self) -> Vec<BotRecord> {
        self.cache.lock().values().cloned().collect()
    }

    pub fn get_bot_by_id(&self, bot_id: &str) -> Option<BotRecord> {
        self.cache.lock().get(bot_id).cloned()
    }

    /// Case-insensitive lookup by name.
    pub fn get_bot_by_name(&self, name: &str) -> Option<BotRecord> {
        self.cache
            .lock()
            .values()
            .find(|b| b.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn get_bots_by_status(&self, status: BotStatus) -> Vec<BotRecord> {
        self.cache
            .lock()
            .values()
            .filter(|b| b.status == status)
            .cloned()
            .collect()
    }

    pub fn get_bots_by_role(&self, role: &str) -> Vec<BotRecord> {
        self.cache
            .lock()
            .values()
            .filter(|b| b.role == role)
            .cloned()
            .collect()
    }

    /// Single-pass counts over the cache.
    pub fn get_registry_stats(&self) -> RegistryStats {
        let cache = self.cache.lock();

        let mut bots_by_status: HashMap<String, usize> = HashMap::new();
        let mut active_bots = 0;
        let mut failed_bots = 0;

        for record in cache.values() {
            *bots_by_status.entry(record.status.to_string()).or_insert(0) += 1;
            if record.status == BotStatus::Running {
                active_bots += 1;
            }
            if matches!(record.status, BotStatus::Error | BotStatus::Failed)
                || truthy(record.extra.get("error"))
                || truthy(record.extra.get("error_message"))
            {
                failed_bots += 1;
            }
        }

        RegistryStats {
            total_bots: cache.len(),
            bots_by_status,
            active_bots,
            failed_bots,
        }
    }

    // ========================================================================
    // Import / Export
    // ========================================================================

    /// Write a backup copy of the registry to another file.
    pub fn export_registry(&self, filepath: &Path) -> bool {
        let cache = self.cache.lock();
        let data = json!({
            "bots": cache.values().collect::<Vec<_>>(),
            "metadata": {"total_bots": cache.len()},
        });
        match storage::atomic_save(filepath, &data) {
            Ok(()) => {
                info!("Registry exported to: {}", filepath.display());
                true
            }
            Err(e) => {
                error!("Failed to export registry: {}", e);
                false
            }
        }
    }

    /// Load records from a backup file, merging over or replacing the
    /// current cache, and persist the result.
    pub fn import_registry(&self, filepath: &Path, merge: bool) -> bool {
        let imported = match storage::load(filepath) {
            Ok(raw) => Self::records_from_value(&raw),
            Err(e) => {
                error!("Failed to import registry: {}", e);
                return false;
            }
        };

        let mut cache = self.cache.lock();
        if merge {
            let count = imported.len();
            cache.extend(imported);
            info!("Merged {} bots from: {}", count, filepath.display());
        } else {
            info!("Replaced registry with {} bots from: {}", imported.len(), filepath.display());
            *cache = imported;
        }

        match self.persist(&cache) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to import registry: {}", e);
                false
            }
        }
    }
}

/// JSON truthiness for legacy error markers in the extension map
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(_) => true,
    }
}
