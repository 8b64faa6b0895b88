//! Container engine: the collection of containers on this node

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use super::container::Container;
use super::image::ContainerImage;
use super::traits::{
    ContainerConfig, ContainerMetadata, ContainerRuntime, EngineError, EngineResult,
    MetricsSample,
};

/// Graceful-stop deadline before escalating to KILL
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Engine owning all containers and their storage tree
pub struct ContainerEngine {
    storage_dir: PathBuf,
    running_dir: PathBuf,
    images_dir: PathBuf,
    containers: DashMap<String, Arc<Container>>,
}

impl ContainerEngine {
    /// Initialize the engine storage layout:
    /// `<storage_dir>/running/<name>/rootfs/...` and `<storage_dir>/images/`.
    pub fn new(storage_dir: impl Into<PathBuf>) -> EngineResult<Self> {
        let storage_dir = storage_dir.into();
        let running_dir = storage_dir.join("running");
        let images_dir = storage_dir.join("images");

        std::fs::create_dir_all(&running_dir)?;
        std::fs::create_dir_all(&images_dir)?;

        info!("ContainerEngine initialized at {}", storage_dir.display());

        Ok(Self {
            storage_dir,
            running_dir,
            images_dir,
            containers: DashMap::new(),
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Create a container and return a handle to it.
    pub async fn create(&self, config: ContainerConfig) -> EngineResult<Arc<Container>> {
        let name = config.name.clone();
        if self.containers.contains_key(&name) {
            return Err(EngineError::AlreadyExists(name));
        }

        let container = Arc::new(Container::new(config, &self.running_dir)?);
        self.containers.insert(name.clone(), container.clone());

        info!("Container created: {}", name);
        Ok(container)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Container>> {
        self.containers.get(name).map(|r| r.value().clone())
    }

    pub fn count(&self) -> usize {
        self.containers.len()
    }

    /// Metadata for every container
    pub fn list_containers(&self) -> Vec<ContainerMetadata> {
        self.containers.iter().map(|r| r.value().metadata()).collect()
    }

    /// Metadata plus configuration for persistence
    pub fn export_container_state(&self, name: &str) -> Option<serde_json::Value> {
        self.get(name).map(|c| c.export_state())
    }

    /// Snapshot a directory as an image layer under `images/<image_name>/`.
    /// Archival only; containers do not need images to run.
    pub fn create_image(&self, source_dir: &Path, image_name: &str) -> EngineResult<PathBuf> {
        let mut image = ContainerImage::open(self.images_dir.join(image_name));
        image.create_snapshot(source_dir)
    }

    /// Remove every container.
    pub async fn cleanup_all(&self) {
        let names: Vec<String> = self.containers.iter().map(|r| r.key().clone()).collect();
        for name in names {
            let _ = self.remove_container(&name).await;
        }
        info!("All containers cleaned up");
    }
}

#[async_trait]
impl ContainerRuntime for ContainerEngine {
    async fn create_container(&self, config: ContainerConfig) -> EngineResult<ContainerMetadata> {
        Ok(self.create(config).await?.metadata())
    }

    async fn start_container(&self, name: &str) -> EngineResult<bool> {
        let container = self
            .get(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        container.start().await
    }

    async fn stop_container(&self, name: &str) -> EngineResult<bool> {
        let container = self
            .get(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        Ok(container.stop(STOP_TIMEOUT).await)
    }

    async fn remove_container(&self, name: &str) -> EngineResult<bool> {
        let Some((_, container)) = self.containers.remove(name) else {
            return Err(EngineError::NotFound(name.to_string()));
        };

        // Stop is best-effort; cleanup and dereference run regardless.
        container.stop(STOP_TIMEOUT).await;
        container.cleanup();

        info!("Container removed: {}", name);
        Ok(true)
    }

    fn get_container_info(&self, name: &str) -> Option<ContainerMetadata> {
        self.get(name).map(|c| c.metadata())
    }

    fn get_container_metrics(&self, name: &str) -> Option<MetricsSample> {
        self.get(name).and_then(|c| c.metrics())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ContainerState;

    fn engine() -> (tempfile::TempDir, ContainerEngine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = ContainerEngine::new(dir.path().join("containers")).unwrap();
        (dir, engine)
    }

    fn sleeper(name: &str) -> ContainerConfig {
        let mut config = ContainerConfig::new(name, "/bin/sh", "sh");
        config.entrypoint_args = vec!["-c".into(), "sleep 30".into()];
        config
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (_dir, engine) = engine();
        engine.create(sleeper("dup")).await.unwrap();
        let err = engine.create(sleeper("dup")).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_unknown_container_operations() {
        let (_dir, engine) = engine();
        assert!(matches!(
            engine.start_container("ghost").await.unwrap_err(),
            EngineError::NotFound(_)
        ));
        assert!(matches!(
            engine.remove_container("ghost").await.unwrap_err(),
            EngineError::NotFound(_)
        ));
        assert!(engine.get_container_info("ghost").is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_through_engine() {
        let (_dir, engine) = engine();
        engine.create(sleeper("life")).await.unwrap();

        assert!(engine.start_container("life").await.unwrap());
        assert_eq!(
            engine.get_container_info("life").unwrap().state,
            ContainerState::Running
        );
        assert_eq!(engine.list_containers().len(), 1);

        let exported = engine.export_container_state("life").unwrap();
        assert_eq!(exported["state"], "running");
        assert_eq!(exported["config"]["entrypoint"], "sh");

        assert!(engine.stop_container("life").await.unwrap());
        assert_eq!(
            engine.get_container_info("life").unwrap().state,
            ContainerState::Exited
        );

        assert!(engine.remove_container("life").await.unwrap());
        assert!(engine.get_container_info("life").is_none());
    }

    #[tokio::test]
    async fn test_remove_cleans_directory() {
        let (dir, engine) = engine();
        engine.create(sleeper("gone")).await.unwrap();

        let container_dir = dir.path().join("containers/running/gone");
        assert!(container_dir.exists());

        engine.remove_container("gone").await.unwrap();
        assert!(!container_dir.exists());
    }

    #[tokio::test]
    async fn test_create_image_snapshot() {
        let (dir, engine) = engine();
        let source = dir.path().join("app-src");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("bot.sh"), "sleep 1\n").unwrap();

        let layer = engine.create_image(&source, "worker").unwrap();
        assert!(layer.join("bot.sh").is_file());
        assert!(dir.path().join("containers/images/worker/image.json").is_file());
    }

    #[tokio::test]
    async fn test_cleanup_all() {
        let (_dir, engine) = engine();
        engine.create(sleeper("a")).await.unwrap();
        engine.create(sleeper("b")).await.unwrap();
        assert_eq!(engine.count(), 2);

        engine.cleanup_all().await;
        assert_eq!(engine.count(), 0);
    }
}
