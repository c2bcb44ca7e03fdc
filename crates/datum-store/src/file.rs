//! Filesystem record store
//!
//! Layout: `<root>/<namespace>/<slug>.json`. Writes go to a sibling temp
//! file that is synced and then renamed over the target, so a crash leaves
//! either the old or the new document. Writers to the same identifier are
//! serialized by an async mutex held across the read-modify-write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use datum_core::{ChainHash, DatumError, Identifier, Release, Result};
use datum_journal::RegistryRecord;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::{append_checked, apply_update, AppendOutcome, RecordStore, RecordUpdate};

const RECORD_EXTENSION: &str = "json";

/// One JSON document per identifier under a root directory
#[derive(Debug)]
pub struct FileRecordStore {
    root: PathBuf,
    locks: parking_lot::Mutex<HashMap<Identifier, Arc<AsyncMutex<()>>>>,
}

impl FileRecordStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| DatumError::storage(format!("cannot create {}: {e}", root.display())))?;
        info!(root = %root.display(), "opened file record store");
        Ok(Self {
            root,
            locks: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, identifier: &Identifier) -> PathBuf {
        self.root
            .join(identifier.namespace())
            .join(format!("{}.{RECORD_EXTENSION}", identifier.slug()))
    }

    fn lock_for(&self, identifier: &Identifier) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(identifier.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn read(&self, identifier: &Identifier) -> Result<Option<RegistryRecord>> {
        let path = self.path_for(identifier);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DatumError::storage(format!("cannot read {}: {e}", path.display())));
            }
        };
        let record: RegistryRecord = serde_json::from_slice(&bytes)
            .map_err(|e| DatumError::serialization(format!("{}: {e}", path.display())))?;
        if record.identifier() != identifier {
            return Err(DatumError::storage(format!(
                "{} holds record for {}",
                path.display(),
                record.identifier()
            )));
        }
        Ok(Some(record))
    }

    async fn write(&self, record: &RegistryRecord) -> Result<()> {
        let path = self.path_for(record.identifier());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DatumError::storage(format!("cannot create {}: {e}", parent.display())))?;
        }
        let data = serde_json::to_vec_pretty(record)?;

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| DatumError::storage(format!("failed to create temp file: {e}")))?;
        file.write_all(&data)
            .await
            .map_err(|e| DatumError::storage(format!("failed to write record: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| DatumError::storage(format!("failed to sync record: {e}")))?;
        drop(file);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| DatumError::storage(format!("failed to rename temp file: {e}")))?;
        debug!(identifier = %record.identifier(), bytes = data.len(), "record written");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn load(&self, identifier: &Identifier) -> Result<Option<RegistryRecord>> {
        self.read(identifier).await
    }

    async fn create(&self, record: RegistryRecord) -> Result<()> {
        let lock = self.lock_for(record.identifier());
        let _guard = lock.lock().await;
        if self.read(record.identifier()).await?.is_some() {
            return Err(DatumError::already_exists(record.identifier()));
        }
        self.write(&record).await
    }

    async fn append_if_tip_matches(
        &self,
        identifier: &Identifier,
        expected_tip: Option<ChainHash>,
        release: Release,
    ) -> Result<AppendOutcome> {
        let lock = self.lock_for(identifier);
        let _guard = lock.lock().await;
        let mut record = self
            .read(identifier)
            .await?
            .ok_or_else(|| DatumError::not_found(identifier.to_string()))?;
        let outcome = append_checked(&mut record, expected_tip, release)?;
        if outcome == AppendOutcome::Appended {
            self.write(&record).await?;
        }
        Ok(outcome)
    }

    async fn update(&self, identifier: &Identifier, update: RecordUpdate) -> Result<RegistryRecord> {
        let lock = self.lock_for(identifier);
        let _guard = lock.lock().await;
        let mut record = self
            .read(identifier)
            .await?
            .ok_or_else(|| DatumError::not_found(identifier.to_string()))?;
        if apply_update(&mut record, update) {
            self.write(&record).await?;
        }
        Ok(record)
    }

    async fn identifiers(&self) -> Result<Vec<Identifier>> {
        let mut found = Vec::new();
        let mut namespaces = fs::read_dir(&self.root)
            .await
            .map_err(|e| DatumError::storage(format!("cannot list {}: {e}", self.root.display())))?;
        while let Some(ns_entry) = namespaces.next_entry().await? {
            if !ns_entry.file_type().await?.is_dir() {
                continue;
            }
            let namespace = ns_entry.file_name().to_string_lossy().into_owned();
            let mut files = fs::read_dir(ns_entry.path()).await?;
            while let Some(entry) = files.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                    continue;
                }
                let Some(slug) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match Identifier::new(namespace.clone(), slug) {
                    Ok(id) => found.push(id),
                    Err(e) => debug!(path = %path.display(), error = %e, "skipping foreign file"),
                }
            }
        }
        found.sort();
        Ok(found)
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use datum_core::RegistryId;

    #[tokio::test]
    async fn test_layout_uses_namespace_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordStore::open(dir.path()).await.unwrap();
        let id = Identifier::parse("data.gov/air-quality").unwrap();
        store
            .create(RegistryRecord::new(id.clone(), RegistryId::from_u128(1), Utc::now()))
            .await
            .unwrap();

        assert!(dir.path().join("data.gov").join("air-quality.json").exists());
        assert!(!dir.path().join("data.gov").join("air-quality.tmp").exists());
    }

    #[tokio::test]
    async fn test_garbage_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordStore::open(dir.path()).await.unwrap();
        std::fs::create_dir_all(dir.path().join("acme")).unwrap();
        std::fs::write(dir.path().join("acme").join("broken.json"), b"{not json").unwrap();

        let id = Identifier::parse("acme/broken").unwrap();
        let err = store.load(&id).await.unwrap_err();
        assert_eq!(err.code(), "serialization");
    }
}
