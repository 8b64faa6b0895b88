//! Adaptive executor: bot lifecycle management and resource monitoring

#[allow(clippy::module_inception)]
mod executor;

pub use executor::{
    interpreter_for, parse_memory_limit_mb, AdaptiveExecutor, BotProcessInfo, ExecutorError,
    HealAction,
};
