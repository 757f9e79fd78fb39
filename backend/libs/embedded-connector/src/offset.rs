//! Offset tracking: the writer that accumulates and flushes source positions,
//! and the reader tasks use to resume from committed positions.
//!
//! # Flush protocol
//!
//! ```text
//! offset(p, o) ... offset(p, o')        accumulate, last writer wins
//! begin_flush()                         snapshot pending positions
//! do_flush(cb) -> FlushHandle           write snapshot in a background task
//!   ├─ success  -> complete_flush(id)   snapshot committed
//!   └─ failure  -> cancel_flush()       snapshot merged back, retried next time
//! ```
//!
//! All writer methods take `&mut self`: the writer belongs to the run loop and
//! the background task only ever sees an already-serialized copy.

use crate::converter::Converter;
use crate::error::{OffsetError, OffsetResult};
use crate::record::{partition_key, SourceOffset, SourcePartition};
use crate::storage::{OffsetBackingStore, OffsetEntries};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

type PositionMap = HashMap<String, (SourcePartition, SourceOffset)>;

/// Serialize the store key for `partition` under `namespace`.
///
/// The key is the two-element array `[namespace, partition]`, so several
/// connectors can share one store.
fn offset_key(
    converter: &dyn Converter,
    namespace: &str,
    partition: &SourcePartition,
) -> OffsetResult<Vec<u8>> {
    converter.to_bytes(&Value::Array(vec![
        Value::String(namespace.to_string()),
        Value::Object(partition.clone()),
    ]))
}

/// Accumulates the latest offset per partition and flushes them to the store.
pub struct OffsetStorageWriter {
    store: Arc<dyn OffsetBackingStore>,
    namespace: String,
    key_converter: Arc<dyn Converter>,
    value_converter: Arc<dyn Converter>,
    data: PositionMap,
    to_flush: Option<PositionMap>,
    current_flush_id: u64,
}

impl OffsetStorageWriter {
    pub fn new(
        store: Arc<dyn OffsetBackingStore>,
        namespace: impl Into<String>,
        key_converter: Arc<dyn Converter>,
        value_converter: Arc<dyn Converter>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            key_converter,
            value_converter,
            data: PositionMap::new(),
            to_flush: None,
            current_flush_id: 0,
        }
    }

    /// Record the latest position for `partition`, replacing any earlier one.
    pub fn offset(&mut self, partition: SourcePartition, offset: SourceOffset) {
        self.data.insert(partition_key(&partition), (partition, offset));
    }

    /// Positions recorded since the last snapshot.
    pub fn pending(&self) -> usize {
        self.data.len()
    }

    /// Whether a snapshot is waiting for `complete_flush` or `cancel_flush`.
    pub fn flush_in_progress(&self) -> bool {
        self.to_flush.is_some()
    }

    /// Snapshot pending positions for flushing.
    ///
    /// Returns `Ok(false)` when there is nothing to flush. Fails if the previous
    /// snapshot has not been completed or cancelled yet.
    pub fn begin_flush(&mut self) -> OffsetResult<bool> {
        if self.to_flush.is_some() {
            error!(
                namespace = %self.namespace,
                "Invalid offset flush: previous flush still in progress"
            );
            return Err(OffsetError::FlushInProgress);
        }
        if self.data.is_empty() {
            return Ok(false);
        }
        self.to_flush = Some(std::mem::take(&mut self.data));
        Ok(true)
    }

    /// Write the current snapshot to the backing store in a background task.
    ///
    /// Returns `Ok(None)` when no snapshot is pending. `on_complete` runs on the
    /// background task once the store answers. If serialization fails the
    /// snapshot is restored, the callback receives the error, and the error is
    /// returned.
    pub fn do_flush<F>(&mut self, on_complete: F) -> OffsetResult<Option<FlushHandle>>
    where
        F: FnOnce(Option<&OffsetError>) + Send + 'static,
    {
        let Some(snapshot) = self.to_flush.as_ref() else {
            return Ok(None);
        };
        if snapshot.is_empty() {
            self.to_flush = None;
            return Ok(None);
        }

        let entries = match self.serialize(snapshot) {
            Ok(entries) => entries,
            Err(e) => {
                error!(
                    namespace = %self.namespace,
                    error = %e,
                    "Failed to serialize offset data, cancelling flush"
                );
                on_complete(Some(&e));
                self.cancel_flush();
                return Err(e);
            }
        };

        let flush_id = self.current_flush_id;
        let store = self.store.clone();
        debug!(
            namespace = %self.namespace,
            flush_id,
            partitions = entries.len(),
            "Submitting offset flush"
        );

        let task = tokio::spawn(async move {
            let result = store.set(entries).await;
            on_complete(result.as_ref().err());
            result
        });

        Ok(Some(FlushHandle { id: flush_id, task }))
    }

    /// Mark the flush identified by `flush_id` as committed.
    ///
    /// Returns `false` (and keeps state untouched) when the id does not match
    /// the outstanding snapshot, e.g. because it was already cancelled.
    pub fn complete_flush(&mut self, flush_id: u64) -> bool {
        if self.to_flush.is_none() || flush_id != self.current_flush_id {
            warn!(
                namespace = %self.namespace,
                flush_id,
                current_flush_id = self.current_flush_id,
                "Ignoring completion of stale offset flush"
            );
            return false;
        }
        self.to_flush = None;
        self.current_flush_id += 1;
        true
    }

    /// Abandon the outstanding snapshot.
    ///
    /// Positions recorded after `begin_flush` take precedence over the
    /// snapshot's; everything else is restored so the next flush includes it.
    pub fn cancel_flush(&mut self) {
        if let Some(mut snapshot) = self.to_flush.take() {
            snapshot.extend(std::mem::take(&mut self.data));
            self.data = snapshot;
            self.current_flush_id += 1;
        }
    }

    fn serialize(&self, snapshot: &PositionMap) -> OffsetResult<OffsetEntries> {
        snapshot
            .values()
            .map(|(partition, offset)| -> OffsetResult<(Vec<u8>, Vec<u8>)> {
                let key = offset_key(self.key_converter.as_ref(), &self.namespace, partition)?;
                let value = self
                    .value_converter
                    .to_bytes(&Value::Object(offset.clone()))?;
                Ok((key, value))
            })
            .collect()
    }
}

/// An in-flight offset flush.
///
/// Awaiting the handle yields the store's result. Dropping it does not stop
/// the write; call [`FlushHandle::cancel`] for that.
pub struct FlushHandle {
    id: u64,
    task: JoinHandle<OffsetResult<()>>,
}

impl FlushHandle {
    /// Identifier to pass to [`OffsetStorageWriter::complete_flush`].
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Abort the background write.
    ///
    /// A write the store already accepted may still land; stores upsert, so a
    /// later flush simply overwrites it.
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Future for FlushHandle {
    type Output = OffsetResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task)
            .poll(cx)
            .map(|joined| joined.unwrap_or_else(|e| Err(OffsetError::FlushAborted(e.to_string()))))
    }
}

/// Reads committed offsets for a single connector namespace.
#[derive(Clone)]
pub struct OffsetStorageReader {
    store: Arc<dyn OffsetBackingStore>,
    namespace: String,
    key_converter: Arc<dyn Converter>,
    value_converter: Arc<dyn Converter>,
}

impl OffsetStorageReader {
    pub fn new(
        store: Arc<dyn OffsetBackingStore>,
        namespace: impl Into<String>,
        key_converter: Arc<dyn Converter>,
        value_converter: Arc<dyn Converter>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            key_converter,
            value_converter,
        }
    }

    /// Committed offset for one partition, if any.
    pub async fn offset(&self, partition: &SourcePartition) -> OffsetResult<Option<SourceOffset>> {
        let mut found = self.offsets(std::slice::from_ref(partition)).await?;
        Ok(found.pop().map(|(_, offset)| offset))
    }

    /// Committed offsets for several partitions.
    ///
    /// Partitions without a committed offset are omitted. Entries that cannot be
    /// decoded are logged and skipped.
    pub async fn offsets(
        &self,
        partitions: &[SourcePartition],
    ) -> OffsetResult<Vec<(SourcePartition, SourceOffset)>> {
        let mut keys = Vec::with_capacity(partitions.len());
        for partition in partitions {
            keys.push(offset_key(
                self.key_converter.as_ref(),
                &self.namespace,
                partition,
            )?);
        }

        let raw = self.store.get(&keys).await?;

        let mut result = Vec::with_capacity(raw.len());
        for (partition, key) in partitions.iter().zip(keys.iter()) {
            let Some(bytes) = raw.get(key) else {
                continue;
            };
            // text converters hand back the JSON the writer rendered
            let decoded = self.value_converter.from_bytes(bytes).and_then(|value| match value {
                Value::String(text) => Ok(serde_json::from_str(&text)?),
                other => Ok(other),
            });
            match decoded {
                Ok(Value::Object(offset)) => result.push((partition.clone(), offset)),
                Ok(Value::Null) => {}
                Ok(other) => {
                    warn!(
                        namespace = %self.namespace,
                        value = %other,
                        "Ignoring stored offset that is not an object"
                    );
                }
                Err(e) => {
                    error!(
                        namespace = %self.namespace,
                        error = %e,
                        "Failed to deserialize stored offset"
                    );
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{JsonConverter, StringConverter};
    use crate::storage::MemoryOffsetBackingStore;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    fn setup() -> (Arc<MemoryOffsetBackingStore>, OffsetStorageWriter, OffsetStorageReader) {
        let store = Arc::new(MemoryOffsetBackingStore::new());
        let writer = OffsetStorageWriter::new(
            store.clone(),
            "inventory",
            Arc::new(StringConverter),
            Arc::new(JsonConverter),
        );
        let reader = OffsetStorageReader::new(
            store.clone(),
            "inventory",
            Arc::new(StringConverter),
            Arc::new(JsonConverter),
        );
        (store, writer, reader)
    }

    #[tokio::test]
    async fn test_flush_commits_latest_offset() {
        let (_store, mut writer, reader) = setup();
        let partition = obj(json!({"table": "orders"}));

        writer.offset(partition.clone(), obj(json!({"lsn": 1})));
        writer.offset(partition.clone(), obj(json!({"lsn": 2})));
        assert_eq!(writer.pending(), 1);

        assert!(writer.begin_flush().unwrap());
        let completed = Arc::new(AtomicBool::new(false));
        let flag = completed.clone();
        let handle = writer
            .do_flush(move |err| flag.store(err.is_none(), Ordering::SeqCst))
            .unwrap()
            .expect("flush handle");
        let id = handle.id();
        handle.await.unwrap();
        assert!(writer.complete_flush(id));
        assert!(completed.load(Ordering::SeqCst));
        assert!(!writer.flush_in_progress());

        let offset = reader.offset(&partition).await.unwrap();
        assert_eq!(offset, Some(obj(json!({"lsn": 2}))));
    }

    #[tokio::test]
    async fn test_every_converter_combination_reads_back() {
        use crate::converter::ConverterKind;

        let kinds = [ConverterKind::String, ConverterKind::Json];
        for key_kind in kinds {
            for value_kind in kinds {
                let store = Arc::new(MemoryOffsetBackingStore::new());
                let mut writer = OffsetStorageWriter::new(
                    store.clone(),
                    "inventory",
                    key_kind.create(),
                    value_kind.create(),
                );
                let reader =
                    OffsetStorageReader::new(store, "inventory", key_kind.create(), value_kind.create());
                let partition = obj(json!({"table": "orders"}));

                writer.offset(partition.clone(), obj(json!({"position": 2})));
                assert!(writer.begin_flush().unwrap());
                let handle = writer.do_flush(|_| {}).unwrap().unwrap();
                let id = handle.id();
                handle.await.unwrap();
                assert!(writer.complete_flush(id));

                assert_eq!(
                    reader.offset(&partition).await.unwrap(),
                    Some(obj(json!({"position": 2}))),
                    "key={} value={}",
                    key_kind,
                    value_kind
                );
            }
        }
    }

    #[tokio::test]
    async fn test_nothing_to_flush() {
        let (_store, mut writer, _reader) = setup();
        assert!(!writer.begin_flush().unwrap());
        assert!(writer.do_flush(|_| {}).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_begin_flush_twice_fails() {
        let (_store, mut writer, _reader) = setup();
        writer.offset(obj(json!({"p": 0})), obj(json!({"o": 1})));
        assert!(writer.begin_flush().unwrap());
        assert!(matches!(
            writer.begin_flush(),
            Err(OffsetError::FlushInProgress)
        ));
    }

    #[tokio::test]
    async fn test_cancel_keeps_newer_positions() {
        let (store, mut writer, reader) = setup();
        let p0 = obj(json!({"p": 0}));
        let p1 = obj(json!({"p": 1}));

        writer.offset(p0.clone(), obj(json!({"o": 1})));
        writer.offset(p1.clone(), obj(json!({"o": 10})));
        assert!(writer.begin_flush().unwrap());

        // recorded while the snapshot is outstanding
        writer.offset(p0.clone(), obj(json!({"o": 2})));

        writer.cancel_flush();
        assert!(!writer.flush_in_progress());
        assert_eq!(writer.pending(), 2);
        assert!(store.is_empty());

        assert!(writer.begin_flush().unwrap());
        let handle = writer.do_flush(|_| {}).unwrap().unwrap();
        let id = handle.id();
        handle.await.unwrap();
        assert!(writer.complete_flush(id));

        assert_eq!(reader.offset(&p0).await.unwrap(), Some(obj(json!({"o": 2}))));
        assert_eq!(reader.offset(&p1).await.unwrap(), Some(obj(json!({"o": 10}))));
    }

    #[tokio::test]
    async fn test_stale_completion_is_ignored() {
        let (_store, mut writer, _reader) = setup();
        writer.offset(obj(json!({"p": 0})), obj(json!({"o": 1})));
        assert!(writer.begin_flush().unwrap());
        let handle = writer.do_flush(|_| {}).unwrap().unwrap();
        let stale_id = handle.id();
        handle.cancel();
        writer.cancel_flush();

        assert!(!writer.complete_flush(stale_id));
        assert_eq!(writer.pending(), 1);
    }

    #[tokio::test]
    async fn test_reader_namespaces_are_isolated() {
        let (store, mut writer, _reader) = setup();
        let partition = obj(json!({"table": "orders"}));
        writer.offset(partition.clone(), obj(json!({"lsn": 5})));
        writer.begin_flush().unwrap();
        let handle = writer.do_flush(|_| {}).unwrap().unwrap();
        handle.await.unwrap();

        let other = OffsetStorageReader::new(
            store,
            "billing",
            Arc::new(StringConverter),
            Arc::new(JsonConverter),
        );
        assert_eq!(other.offset(&partition).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_skips_undecodable_values() {
        let (store, _writer, reader) = setup();
        let good = obj(json!({"p": "good"}));
        let bad = obj(json!({"p": "bad"}));

        let key = |p: &SourcePartition| offset_key(&StringConverter, "inventory", p).unwrap();
        store
            .set(OffsetEntries::from([
                (key(&good), br#"{"o": 1}"#.to_vec()),
                (key(&bad), b"not json".to_vec()),
            ]))
            .await
            .unwrap();

        let found = reader.offsets(&[good.clone(), bad]).await.unwrap();
        assert_eq!(found, vec![(good, obj(json!({"o": 1})))]);
    }
}
