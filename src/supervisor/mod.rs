//! Self-healing supervisor and incident log

mod incident;
#[allow(clippy::module_inception)]
mod supervisor;

pub use incident::{Incident, IncidentKind, IncidentLog};
pub use supervisor::{BotSupervisor, RestartState};
