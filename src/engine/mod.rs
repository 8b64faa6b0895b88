//! Process-based container engine
//!
//! A lightweight containerization layer: each container wraps one child
//! process in a private root directory with resource limits, lifecycle
//! states, a metrics monitor task, and image snapshots. There is no
//! namespace isolation; the engine approximates containment with rlimits
//! and per-container process groups.

mod container;
#[allow(clippy::module_inception)]
mod engine;
mod image;
mod traits;

pub use container::Container;
pub use engine::ContainerEngine;
pub use image::ContainerImage;
pub use traits::{
    ContainerConfig, ContainerMetadata, ContainerRuntime, ContainerState, EngineError,
    EngineResult, IsolationLevel, MetricsSample, ResourceLimits, VolumeMount,
};

use sha2::{Digest, Sha256};

/// Hex digest used for container ids and image layer names
pub(crate) fn content_hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}
