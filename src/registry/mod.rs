//! Bot registry: data model and JSON-backed store

mod record;
mod store;

pub use record::{
    BotRecord, BotStatus, DeploymentConfig, DeploymentType, Performance, PerformanceEntry,
};
pub use store::{BotRegistry, RegistryError, RegistryStats};
