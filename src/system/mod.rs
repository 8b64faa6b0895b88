//! OS process helpers and shared time utilities

mod process;

pub use process::{kill_group, process_alive, terminate_group, ProcessSample, ProcessSampler};

use chrono::{SecondsFormat, Utc};

/// Current time as an ISO 8601 UTC string with a Z suffix
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
