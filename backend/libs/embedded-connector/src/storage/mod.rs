//! Offset backing stores.
//!
//! A backing store is a plain byte-oriented key/value medium. It knows nothing
//! about partitions or converters; [`crate::offset`] handles that. Every
//! implementation must treat `set` as an idempotent upsert: a flush that was
//! cancelled by the runtime may still land, and the next flush rewrites the
//! same or a newer offset under the same key.

use crate::error::OffsetResult;
use async_trait::async_trait;
use std::collections::HashMap;

mod file;
mod memory;
mod postgres;

pub use file::FileOffsetBackingStore;
pub use memory::MemoryOffsetBackingStore;
pub use postgres::PostgresOffsetBackingStore;

/// Raw offset entries keyed by serialized offset key.
pub type OffsetEntries = HashMap<Vec<u8>, Vec<u8>>;

/// Storage medium for committed offsets.
#[async_trait]
pub trait OffsetBackingStore: Send + Sync {
    /// Prepare the store before the first read or write.
    async fn start(&self) -> OffsetResult<()> {
        Ok(())
    }

    /// Release resources held by the store.
    async fn stop(&self) {}

    /// Fetch the values stored for `keys`. Missing keys are absent from the result.
    async fn get(&self, keys: &[Vec<u8>]) -> OffsetResult<OffsetEntries>;

    /// Upsert all `entries`.
    async fn set(&self, entries: OffsetEntries) -> OffsetResult<()>;
}
