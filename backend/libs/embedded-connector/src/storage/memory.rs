use super::{OffsetBackingStore, OffsetEntries};
use crate::error::OffsetResult;
use async_trait::async_trait;
use parking_lot::RwLock;

/// Volatile in-process offset store. Offsets are lost when the process exits.
#[derive(Default)]
pub struct MemoryOffsetBackingStore {
    data: RwLock<OffsetEntries>,
}

impl MemoryOffsetBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl OffsetBackingStore for MemoryOffsetBackingStore {
    async fn get(&self, keys: &[Vec<u8>]) -> OffsetResult<OffsetEntries> {
        let data = self.data.read();
        Ok(keys
            .iter()
            .filter_map(|k| data.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: OffsetEntries) -> OffsetResult<()> {
        self.data.write().extend(entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_is_an_upsert() {
        let store = MemoryOffsetBackingStore::new();
        let key = b"k".to_vec();

        store
            .set(OffsetEntries::from([(key.clone(), b"1".to_vec())]))
            .await
            .unwrap();
        store
            .set(OffsetEntries::from([(key.clone(), b"2".to_vec())]))
            .await
            .unwrap();

        let got = store.get(&[key.clone(), b"missing".to_vec()]).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[&key], b"2".to_vec());
        assert_eq!(store.len(), 1);
    }
}
