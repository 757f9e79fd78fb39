use super::{OffsetBackingStore, OffsetEntries};
use crate::error::{OffsetError, OffsetResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Offset store persisted to a local JSON file.
///
/// The whole map is kept in memory and rewritten on every `set`; the file is
/// replaced atomically through a temporary sibling so a crash mid-write leaves
/// the previous offsets intact. Keys and values are hex-encoded.
pub struct FileOffsetBackingStore {
    path: PathBuf,
    data: RwLock<OffsetEntries>,
    write_lock: Mutex<()>,
}

impl FileOffsetBackingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: RwLock::new(OffsetEntries::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> OffsetResult<OffsetEntries> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(OffsetEntries::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Ok(OffsetEntries::new());
        }

        let encoded: BTreeMap<String, String> = serde_json::from_slice(&bytes)?;
        encoded
            .into_iter()
            .map(|(k, v)| -> OffsetResult<(Vec<u8>, Vec<u8>)> { Ok((decode(&k)?, decode(&v)?)) })
            .collect()
    }

    async fn save(&self, snapshot: &OffsetEntries) -> OffsetResult<()> {
        let encoded: BTreeMap<String, String> = snapshot
            .iter()
            .map(|(k, v)| (hex::encode(k), hex::encode(v)))
            .collect();
        let bytes = serde_json::to_vec_pretty(&encoded)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), entries = snapshot.len(), "Offsets written to file");
        Ok(())
    }
}

fn decode(text: &str) -> OffsetResult<Vec<u8>> {
    hex::decode(text).map_err(|e| OffsetError::Corrupt(format!("invalid hex '{}': {}", text, e)))
}

#[async_trait]
impl OffsetBackingStore for FileOffsetBackingStore {
    async fn start(&self) -> OffsetResult<()> {
        let loaded = self.load().await?;
        info!(
            path = %self.path.display(),
            entries = loaded.len(),
            "Loaded offsets from file"
        );
        *self.data.write() = loaded;
        Ok(())
    }

    async fn get(&self, keys: &[Vec<u8>]) -> OffsetResult<OffsetEntries> {
        let data = self.data.read();
        Ok(keys
            .iter()
            .filter_map(|k| data.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: OffsetEntries) -> OffsetResult<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = {
            let mut data = self.data.write();
            data.extend(entries);
            data.clone()
        };
        self.save(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offsets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.json");

        let store = FileOffsetBackingStore::new(&path);
        store.start().await.unwrap();
        store
            .set(OffsetEntries::from([(b"key".to_vec(), b"{\"lsn\":7}".to_vec())]))
            .await
            .unwrap();
        store.stop().await;

        let reopened = FileOffsetBackingStore::new(&path);
        reopened.start().await.unwrap();
        let got = reopened.get(&[b"key".to_vec()]).await.unwrap();
        assert_eq!(got[&b"key".to_vec()], b"{\"lsn\":7}".to_vec());
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOffsetBackingStore::new(dir.path().join("nested/offsets.json"));
        store.start().await.unwrap();
        assert!(store.get(&[b"key".to_vec()]).await.unwrap().is_empty());

        // first write creates the parent directory
        store
            .set(OffsetEntries::from([(b"key".to_vec(), b"1".to_vec())]))
            .await
            .unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.json");
        tokio::fs::write(&path, br#"{"zz": "00"}"#).await.unwrap();

        let store = FileOffsetBackingStore::new(&path);
        assert!(matches!(store.start().await, Err(OffsetError::Corrupt(_))));
    }
}
