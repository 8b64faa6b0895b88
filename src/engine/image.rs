//! Container images: filesystem snapshots under the engine's images tree

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};
use walkdir::WalkDir;

use super::traits::EngineResult;

/// One image: a metadata file plus content-addressed layer snapshots
pub struct ContainerImage {
    image_path: PathBuf,
    metadata_file: PathBuf,
    layers_dir: PathBuf,
    metadata: serde_json::Map<String, Value>,
}

impl ContainerImage {
    /// Open (or lazily create) an image at the given path.
    pub fn open(image_path: impl Into<PathBuf>) -> Self {
        let image_path = image_path.into();
        let metadata_file = image_path.join("image.json");
        let layers_dir = image_path.join("layers");

        let metadata = std::fs::read_to_string(&metadata_file)
            .ok()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();

        Self { image_path, metadata_file, layers_dir, metadata }
    }

    /// Snapshot `source_dir` into a new layer and record it in image.json.
    pub fn create_snapshot(&mut self, source_dir: &Path) -> EngineResult<PathBuf> {
        std::fs::create_dir_all(&self.image_path)?;
        std::fs::create_dir_all(&self.layers_dir)?;

        let snapshot_name = super::content_hash(&format!(
            "{}{}",
            source_dir.display(),
            Utc::now().to_rfc3339()
        ))[..32]
            .to_string();
        let snapshot_path = self.layers_dir.join(&snapshot_name);

        copy_tree(source_dir, &snapshot_path)?;

        self.metadata.insert(
            snapshot_name.clone(),
            json!({
                "created_at": Utc::now(),
                "source": source_dir.display().to_string(),
                "size_bytes": dir_size(&snapshot_path),
            }),
        );
        self.save_metadata()?;

        info!("Created image snapshot: {}", snapshot_name);
        Ok(snapshot_path)
    }

    pub fn layers(&self) -> Vec<String> {
        self.metadata.keys().cloned().collect()
    }

    fn save_metadata(&self) -> EngineResult<()> {
        let raw = serde_json::to_string_pretty(&Value::Object(self.metadata.clone()))
            .unwrap_or_else(|_| "{}".into());
        std::fs::write(&self.metadata_file, raw)?;
        Ok(())
    }
}

/// Recursively copy a directory tree.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry during snapshot: {}", e);
                continue;
            }
        };
        let relative = entry
            .path()
            .strip_prefix(src)
            .unwrap_or_else(|_| Path::new(""));
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Total size in bytes of every file under a directory.
fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_copies_tree_and_records_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("app.py"), "print('hi')").unwrap();
        std::fs::write(source.join("nested/data.txt"), "payload").unwrap();

        let mut image = ContainerImage::open(dir.path().join("images/app"));
        let snapshot = image.create_snapshot(&source).unwrap();

        assert!(snapshot.join("app.py").is_file());
        assert!(snapshot.join("nested/data.txt").is_file());
        assert_eq!(image.layers().len(), 1);

        // Metadata survives reopening.
        let reopened = ContainerImage::open(dir.path().join("images/app"));
        assert_eq!(reopened.layers().len(), 1);
    }

    #[test]
    fn test_dir_size_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("b"), vec![0u8; 50]).unwrap();
        assert_eq!(dir_size(dir.path()), 150);
    }
}
