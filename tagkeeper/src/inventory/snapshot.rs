use super::{ImageRecord, Inventory, InventoryError, Target};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path of a JSON file holding a list of image records.
    pub path: String,
}

/// An image store backed by a JSON file. Useful for offline runs and for replaying an inventory captured
/// elsewhere; removals rewrite the file.
#[derive(Debug)]
pub struct Engine {
    path: PathBuf,
    /// Serializes read-modify-write cycles against the file.
    lock: Mutex<()>,
}

impl Engine {
    pub fn new(config: &Config) -> Result<Self, InventoryError> {
        if config.path.is_empty() {
            return Err(InventoryError::FailedPrecondition(
                "snapshot path cannot be empty".into(),
            ));
        }

        Ok(Self {
            path: PathBuf::from(&config.path),
            lock: Mutex::new(()),
        })
    }

    async fn read(&self) -> Result<Vec<ImageRecord>, InventoryError> {
        let raw = tokio::fs::read(&self.path).await.map_err(|e| {
            InventoryError::Query(format!(
                "could not read snapshot '{}'; {}",
                self.path.display(),
                e
            ))
        })?;

        serde_json::from_slice(&raw).map_err(|e| {
            InventoryError::Query(format!(
                "could not parse snapshot '{}'; {}",
                self.path.display(),
                e
            ))
        })
    }

    async fn write(&self, records: &[ImageRecord]) -> Result<(), InventoryError> {
        let raw = serde_json::to_vec_pretty(records)
            .map_err(|e| InventoryError::Unknown(format!("could not serialize snapshot; {e}")))?;

        tokio::fs::write(&self.path, raw).await.map_err(|e| {
            InventoryError::Unknown(format!(
                "could not write snapshot '{}'; {}",
                self.path.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl Inventory for Engine {
    #[instrument(skip(self), fields(origin = "inventory::snapshot"))]
    async fn list_images(&self) -> Result<Vec<ImageRecord>, InventoryError> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    #[instrument(skip(self, target), fields(origin = "inventory::snapshot", image = %target))]
    async fn remove_image(&self, target: &Target) -> Result<(), InventoryError> {
        let _guard = self.lock.lock().await;

        let mut records = self.read().await?;
        let before = records.len();

        records.retain(|record| Target::from(record) != *target);

        if records.len() == before {
            return Err(InventoryError::NotFound(target.to_string()));
        }

        self.write(&records).await?;

        debug!(removed = before - records.len(), "Removed image from snapshot");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    fn engine_with(records: &[ImageRecord]) -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, serde_json::to_vec(records).unwrap()).unwrap();

        let engine = Engine::new(&Config {
            path: path.to_string_lossy().to_string(),
        })
        .unwrap();

        (dir, engine)
    }

    #[tokio::test]
    /// Removing a record rewrites the file and a second removal reports the image as gone.
    async fn remove_then_list() {
        let records = vec![
            ImageRecord::tagged("sha256:1", "myapp", "1", at(0)),
            ImageRecord::tagged("sha256:2", "myapp", "2", at(1)),
            ImageRecord::dangling("sha256:3", at(2)),
        ];
        let (_dir, engine) = engine_with(&records);

        assert_eq!(engine.list_images().await.unwrap(), records);

        let target = Target::from(&records[0]);
        engine.remove_image(&target).await.unwrap();

        assert_eq!(engine.list_images().await.unwrap(), records[1..].to_vec());

        let err = engine.remove_image(&target).await.unwrap_err();
        assert_eq!(err, InventoryError::NotFound("myapp:1".into()));

        engine
            .remove_image(&Target::Dangling {
                id: "sha256:3".into(),
            })
            .await
            .unwrap();
        assert_eq!(engine.list_images().await.unwrap(), vec![records[1].clone()]);
    }

    #[tokio::test]
    async fn missing_file_is_a_query_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(&Config {
            path: dir.path().join("absent.json").to_string_lossy().to_string(),
        })
        .unwrap();

        let err = engine.list_images().await.unwrap_err();
        assert!(matches!(err, InventoryError::Query(_)));
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = Engine::new(&Config::default()).unwrap_err();
        assert!(matches!(err, InventoryError::FailedPrecondition(_)));
    }
}
