//! # Embedded Connector Runtime
//!
//! Runs a single change-data-capture source connector inside the host
//! application's process. There is no broker and no cluster: the connector
//! polls its source system, every change record is handed to a function the
//! application supplies, and the positions of delivered records ("offsets")
//! are committed to an offset store so a restarted connector resumes where it
//! left off instead of replaying from scratch.
//!
//! ## Architecture
//!
//! ```text
//!  stop() / interrupt() / await_completion()
//!               │
//!          ┌────▼─────┐   poll()   ┌────────────┐
//!          │ run loop ├───────────►│ SourceTask │
//!          └────┬─────┘            └────────────┘
//!               │ offset(last record)        ┌──────────────────┐
//!               ├───────────────────────────►│ OffsetStorage-   │  set()  ┌───────────────┐
//!               │ consumer(record) ...       │ Writer           ├────────►│ OffsetBacking-│
//!               │ should_commit()?  ─ yes ──►│  flush (bounded) │         │ Store         │
//!               ▼                            └──────────────────┘         └───────────────┘
//!        OffsetCommitPolicy
//! ```
//!
//! ## Delivery guarantees
//!
//! - **At-least-once**: a batch's last offset is recorded before its records
//!   are delivered, but only committed after delivery, so a crash replays from
//!   the last committed position and never skips ahead
//! - **Ordering**: records are delivered in the order the task returned them
//! - **Retry**: a failed or timed-out offset flush is cancelled and its
//!   positions are included in the next flush
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use embedded_connector::{
//!     policy, ConnectorRegistry, EmbeddedConfig, EmbeddedConnector, FileOffsetBackingStore,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(registry: ConnectorRegistry) -> Result<(), Box<dyn std::error::Error>> {
//! let config = EmbeddedConfig::from_env()?;
//!
//! let connector = Arc::new(
//!     EmbeddedConnector::builder()
//!         .using_config(config)
//!         .using_registry(registry)
//!         .using_store(Arc::new(FileOffsetBackingStore::new("/var/lib/app/offsets.json")))
//!         .using_policy(policy::periodic(Duration::from_secs(10)))
//!         .notifying(|record| {
//!             println!("{}: {}", record.topic, record.value);
//!             Ok(())
//!         })
//!         .build()?,
//! );
//!
//! let runner = connector.clone();
//! let task = tokio::spawn(async move { runner.run().await });
//!
//! tokio::signal::ctrl_c().await?;
//! connector.stop();
//! connector.await_completion(Duration::from_secs(30)).await;
//! task.await??;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod converter;
mod engine;
mod error;
pub mod lifecycle;
pub mod metrics;
pub mod offset;
pub mod policy;
pub mod record;
pub mod storage;

pub use config::EmbeddedConfig;
pub use connector::{
    ConnectorContext, ConnectorFactory, ConnectorRegistry, Properties, SourceConnector,
    SourceTask, SourceTaskContext,
};
pub use converter::{Converter, ConverterKind, JsonConverter, StringConverter};
pub use engine::{
    ConnectorHandle, EmbeddedConnector, EmbeddedConnectorBuilder, RecordConsumer, RunExit,
};
pub use error::{
    ConfigError, ConnectorError, ConnectorResult, OffsetError, OffsetResult, TaskError,
    TaskResult,
};
pub use lifecycle::RunState;
pub use metrics::ConnectorMetrics;
pub use offset::{FlushHandle, OffsetStorageReader, OffsetStorageWriter};
pub use policy::OffsetCommitPolicy;
pub use record::{SourceOffset, SourcePartition, SourceRecord};
pub use storage::{
    FileOffsetBackingStore, MemoryOffsetBackingStore, OffsetBackingStore, OffsetEntries,
    PostgresOffsetBackingStore,
};
