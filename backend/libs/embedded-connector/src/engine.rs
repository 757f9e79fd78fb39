//! The embedded connector: lifecycle control plus the poll → deliver → commit loop.

use crate::config::EmbeddedConfig;
use crate::connector::{
    ConnectorContext, ConnectorRegistry, SourceConnector, SourceTask, SourceTaskContext,
};
use crate::converter::Converter;
use crate::error::{ConfigError, ConnectorError, ConnectorResult, OffsetError, TaskError};
use crate::lifecycle::{Lifecycle, RunState};
use crate::metrics::ConnectorMetrics;
use crate::offset::{OffsetStorageReader, OffsetStorageWriter};
use crate::policy::{self, OffsetCommitPolicy};
use crate::record::SourceRecord;
use crate::storage::{MemoryOffsetBackingStore, OffsetBackingStore};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use validator::Validate;

/// Receives every change record, in order, on the run loop's task.
///
/// Returning an error ends the run.
pub type RecordConsumer = Box<dyn FnMut(SourceRecord) -> anyhow::Result<()> + Send>;

/// How a call to [`EmbeddedConnector::run`] ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Another run was already active; this call did nothing
    AlreadyRunning,
    /// The loop observed a stop request
    Stopped,
    /// The loop was interrupted and made a final commit attempt
    Interrupted,
}

/// Records delivered and time elapsed since the last confirmed flush.
#[derive(Debug)]
struct CommitCounters {
    records_since_last_commit: u64,
    last_commit: Instant,
}

impl CommitCounters {
    fn new() -> Self {
        Self {
            records_since_last_commit: 0,
            last_commit: Instant::now(),
        }
    }

    fn since_last_commit(&self) -> Duration {
        self.last_commit.elapsed()
    }

    fn reset(&mut self) {
        self.records_since_last_commit = 0;
        self.last_commit = Instant::now();
    }
}

enum FlushWait {
    Committed,
    Failed(OffsetError),
    TimedOut,
    Interrupted,
}

/// Runs a single source connector inside the host process.
///
/// The connector reads from its source system and hands every change record to
/// the registered consumer; no broker or cluster is involved. Offsets are
/// committed to the configured [`OffsetBackingStore`] according to the
/// [`OffsetCommitPolicy`]. With the default in-memory store they are lost when
/// the process exits.
///
/// `run` is meant to be spawned on the host's runtime. A running connector is
/// stopped either by [`EmbeddedConnector::stop`], which lets the current batch
/// finish, or by [`EmbeddedConnector::interrupt`], which abandons the current
/// poll and makes one last commit attempt.
///
/// ```rust,no_run
/// use embedded_connector::{ConnectorRegistry, EmbeddedConfig, EmbeddedConnector};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example(registry: ConnectorRegistry) -> Result<(), Box<dyn std::error::Error>> {
/// let config = EmbeddedConfig::from_properties(
///     [("name", "inventory"), ("connector.class", "postgres")]
///         .into_iter()
///         .map(|(k, v)| (k.to_string(), v.to_string()))
///         .collect(),
/// )?;
///
/// let connector = Arc::new(
///     EmbeddedConnector::builder()
///         .using_config(config)
///         .using_registry(registry)
///         .notifying(|record| {
///             println!("{} {}", record.topic, record.value);
///             Ok(())
///         })
///         .build()?,
/// );
///
/// let runner = connector.clone();
/// tokio::spawn(async move { runner.run().await });
///
/// // ... later
/// connector.stop();
/// connector.await_completion(Duration::from_secs(30)).await;
/// # Ok(())
/// # }
/// ```
pub struct EmbeddedConnector {
    config: EmbeddedConfig,
    registry: ConnectorRegistry,
    store: Arc<dyn OffsetBackingStore>,
    policy: Arc<dyn OffsetCommitPolicy>,
    consumer: Mutex<RecordConsumer>,
    lifecycle: Arc<Lifecycle>,
    metrics: Option<ConnectorMetrics>,
}

impl EmbeddedConnector {
    pub fn builder() -> EmbeddedConnectorBuilder {
        EmbeddedConnectorBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &EmbeddedConfig {
        &self.config
    }

    /// Control handle that can be moved to other tasks.
    pub fn handle(&self) -> ConnectorHandle {
        ConnectorHandle {
            lifecycle: self.lifecycle.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn state(&self) -> RunState {
        self.lifecycle.state()
    }

    /// Request the run loop to stop after its current batch.
    ///
    /// Returns `true` if the connector was running. Does not wait; use
    /// [`EmbeddedConnector::await_completion`].
    pub fn stop(&self) -> bool {
        self.lifecycle.stop()
    }

    /// Abandon the current poll or flush wait, commit once more, and exit.
    pub fn interrupt(&self) -> bool {
        self.lifecycle.interrupt()
    }

    /// Wait up to `timeout` for the connector to finish.
    ///
    /// Returns `true` if it completed (or was not running), `false` if it is
    /// still running. If the connector is stopped and restarted while waiting,
    /// this only returns once the later run completes.
    pub async fn await_completion(&self, timeout: Duration) -> bool {
        self.lifecycle.await_completion(timeout).await
    }

    /// Run the connector until it is stopped, interrupted, or fails.
    ///
    /// Returns immediately with [`RunExit::AlreadyRunning`] if another run is
    /// active. Configuration, instantiation, task, and delivery failures end
    /// the run and are returned after cleanup. Offset flush failures never end
    /// the run.
    pub async fn run(&self) -> ConnectorResult<RunExit> {
        if !self.lifecycle.try_start() {
            debug!(connector = %self.config.name, "Connector already running");
            return Ok(RunExit::AlreadyRunning);
        }
        let _finish = FinishGuard(&self.lifecycle);

        info!(
            connector = %self.config.name,
            connector_class = %self.config.connector_class,
            "Embedded connector starting"
        );

        let result = self.run_started().await;
        match &result {
            Ok(exit) => info!(connector = %self.config.name, exit = ?exit, "Embedded connector stopped"),
            Err(e) => error!(
                connector = %self.config.name,
                connector_class = %self.config.connector_class,
                error = %e,
                "Embedded connector failed"
            ),
        }
        result
    }

    async fn run_started(&self) -> ConnectorResult<RunExit> {
        self.config.validate().map_err(ConfigError::from)?;

        let mut connector = self
            .registry
            .create(&self.config.connector_class)
            .ok_or_else(|| ConnectorError::UnknownConnectorClass(self.config.connector_class.clone()))?;

        let key_converter = self.config.key_converter.create();
        let value_converter = self.config.value_converter.create();

        self.store.start().await?;
        let result = self
            .run_connector(connector.as_mut(), key_converter, value_converter)
            .await;
        self.store.stop().await;
        result
    }

    async fn run_connector(
        &self,
        connector: &mut dyn SourceConnector,
        key_converter: Arc<dyn Converter>,
        value_converter: Arc<dyn Converter>,
    ) -> ConnectorResult<RunExit> {
        connector.initialize(ConnectorContext::new(self.config.name.clone()));

        let mut writer = OffsetStorageWriter::new(
            self.store.clone(),
            self.config.name.clone(),
            key_converter.clone(),
            value_converter.clone(),
        );
        let reader = OffsetStorageReader::new(
            self.store.clone(),
            self.config.name.clone(),
            key_converter,
            value_converter,
        );

        // a connector that fails part way through start still gets its stop hook
        let result = match connector.start(&self.config.properties).await {
            Ok(()) => self.run_task(connector, &mut writer, reader).await,
            Err(e) => {
                error!(
                    connector = %self.config.name,
                    connector_class = %self.config.connector_class,
                    error = %e,
                    "Unable to start connector"
                );
                Err(e.into())
            }
        };
        connector.stop().await;
        result
    }

    async fn run_task(
        &self,
        connector: &mut dyn SourceConnector,
        writer: &mut OffsetStorageWriter,
        reader: OffsetStorageReader,
    ) -> ConnectorResult<RunExit> {
        let task_config = connector
            .task_configs(1)
            .into_iter()
            .next()
            .ok_or_else(|| TaskError::NoTaskConfig(self.config.connector_class.clone()))?;

        let mut task = connector.create_task()?;
        task.initialize(SourceTaskContext::new(reader));
        if let Err(e) = task.start(&task_config).await {
            error!(
                connector = %self.config.name,
                task_config = ?task_config,
                error = %e,
                "Unable to start connector task"
            );
            return Err(e.into());
        }

        let result = self.poll_loop(task.as_mut(), writer).await;
        task.stop().await;
        result
    }

    async fn poll_loop(
        &self,
        task: &mut dyn SourceTask,
        writer: &mut OffsetStorageWriter,
    ) -> ConnectorResult<RunExit> {
        let mut counters = CommitCounters::new();

        while self.lifecycle.is_running() {
            let polled = tokio::select! {
                biased;
                _ = self.lifecycle.interrupted() => Err(TaskError::Interrupted),
                polled = task.poll() => polled,
            };

            match polled {
                Ok(Some(batch)) if !batch.is_empty() => {
                    self.deliver(batch, writer, &mut counters)?;
                    self.maybe_flush(writer, &mut counters).await;
                }
                Ok(_) => {}
                Err(e) if e.is_interrupted() => {
                    return Ok(self.finish_interrupted(writer, &mut counters).await);
                }
                Err(e) => return Err(e.into()),
            }
        }

        // stop and interrupt can both land while a flush wait is cancelled
        if self.lifecycle.is_interrupted() {
            return Ok(self.finish_interrupted(writer, &mut counters).await);
        }

        Ok(RunExit::Stopped)
    }

    /// Clear the interrupt and make one last commit attempt.
    async fn finish_interrupted(
        &self,
        writer: &mut OffsetStorageWriter,
        counters: &mut CommitCounters,
    ) -> RunExit {
        self.lifecycle.clear_interrupt();
        info!(
            connector = %self.config.name,
            pending_records = counters.records_since_last_commit,
            "Connector interrupted, committing offsets before exit"
        );
        self.maybe_flush(writer, counters).await;
        RunExit::Interrupted
    }

    /// Record the batch's last position, then hand every record to the consumer.
    fn deliver(
        &self,
        batch: Vec<SourceRecord>,
        writer: &mut OffsetStorageWriter,
        counters: &mut CommitCounters,
    ) -> ConnectorResult<()> {
        let size = batch.len() as u64;
        if let Some(last) = batch.last() {
            writer.offset(last.source_partition.clone(), last.source_offset.clone());
        }

        {
            let mut consumer = self.consumer.lock();
            for record in batch {
                consumer(record).map_err(ConnectorError::Delivery)?;
            }
        }

        counters.records_since_last_commit += size;
        if let Some(metrics) = &self.metrics {
            metrics.batches_polled.inc();
            metrics.records_delivered.inc_by(size);
            metrics
                .records_pending_commit
                .set(counters.records_since_last_commit as i64);
        }
        debug!(
            connector = %self.config.name,
            records = size,
            pending_records = counters.records_since_last_commit,
            "Delivered batch"
        );
        Ok(())
    }

    /// Flush offsets if the commit policy asks for it.
    ///
    /// Counters are reset only when the store confirms the write within the
    /// commit timeout. Any other outcome cancels the flush and leaves the
    /// counters alone so the next commit retries the same positions.
    async fn maybe_flush(&self, writer: &mut OffsetStorageWriter, counters: &mut CommitCounters) {
        if !self
            .policy
            .should_commit(counters.records_since_last_commit, counters.since_last_commit())
        {
            return;
        }

        let deadline = Instant::now() + self.config.commit_timeout();

        if let Err(e) = writer.begin_flush() {
            error!(connector = %self.config.name, error = %e, "Unable to begin offset flush");
            self.record_flush_failure();
            return;
        }

        let name = self.config.name.clone();
        let flush = writer.do_flush(move |err| match err {
            Some(e) => error!(connector = %name, error = %e, "Failed to flush offsets to storage"),
            None => trace!(connector = %name, "Finished flushing offsets to storage"),
        });
        let mut handle = match flush {
            Ok(Some(handle)) => handle,
            Ok(None) => return,
            Err(e) => {
                error!(
                    connector = %self.config.name,
                    error = %e,
                    "Flush of offsets failed before reaching storage"
                );
                self.record_flush_failure();
                return;
            }
        };

        let waited = tokio::select! {
            biased;
            _ = self.lifecycle.interrupted() => FlushWait::Interrupted,
            result = tokio::time::timeout_at(deadline, &mut handle) => match result {
                Ok(Ok(())) => FlushWait::Committed,
                Ok(Err(e)) => FlushWait::Failed(e),
                Err(_) => FlushWait::TimedOut,
            },
        };

        match waited {
            FlushWait::Committed => {
                writer.complete_flush(handle.id());
                debug!(
                    connector = %self.config.name,
                    records = counters.records_since_last_commit,
                    "Committed offsets"
                );
                counters.reset();
                if let Some(metrics) = &self.metrics {
                    metrics.flushes_committed.inc();
                    metrics.records_pending_commit.set(0);
                }
                return;
            }
            FlushWait::Interrupted => {
                warn!(connector = %self.config.name, "Flush of offsets interrupted, cancelling");
            }
            FlushWait::Failed(e) => {
                error!(
                    connector = %self.config.name,
                    error = %e,
                    "Flush of offsets threw an unexpected error"
                );
            }
            FlushWait::TimedOut => {
                error!(
                    connector = %self.config.name,
                    timeout_ms = self.config.offset_flush_timeout_ms,
                    "Timed out waiting to flush offsets to storage"
                );
            }
        }

        handle.cancel();
        writer.cancel_flush();
        self.record_flush_failure();
    }

    fn record_flush_failure(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.flushes_failed.inc();
        }
    }
}

impl fmt::Display for EmbeddedConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EmbeddedConnector{{id={}}}", self.config.name)
    }
}

/// Marks the run finished even if the run future is dropped or panics.
struct FinishGuard<'a>(&'a Lifecycle);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Cloneable control surface for a connector owned elsewhere.
#[derive(Clone)]
pub struct ConnectorHandle {
    lifecycle: Arc<Lifecycle>,
}

impl ConnectorHandle {
    pub fn stop(&self) -> bool {
        self.lifecycle.stop()
    }

    pub fn interrupt(&self) -> bool {
        self.lifecycle.interrupt()
    }

    pub async fn await_completion(&self, timeout: Duration) -> bool {
        self.lifecycle.await_completion(timeout).await
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn state(&self) -> RunState {
        self.lifecycle.state()
    }
}

/// Builder for [`EmbeddedConnector`].
///
/// A configuration and a consumer are required. Defaults: in-memory offsets,
/// commit after every batch, empty registry, no metrics.
#[derive(Default)]
pub struct EmbeddedConnectorBuilder {
    config: Option<EmbeddedConfig>,
    registry: Option<ConnectorRegistry>,
    store: Option<Arc<dyn OffsetBackingStore>>,
    policy: Option<Arc<dyn OffsetCommitPolicy>>,
    consumer: Option<RecordConsumer>,
    metrics: Option<ConnectorMetrics>,
}

impl EmbeddedConnectorBuilder {
    pub fn using_config(mut self, config: EmbeddedConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Connectors available to `connector.class`.
    pub fn using_registry(mut self, registry: ConnectorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Where offsets are committed. Without this, offsets live in memory only.
    pub fn using_store(mut self, store: Arc<dyn OffsetBackingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// When offsets are committed. Without this, after every batch.
    pub fn using_policy(mut self, policy: Arc<dyn OffsetCommitPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_metrics(mut self, metrics: ConnectorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Function that receives every change record.
    pub fn notifying<F>(mut self, consumer: F) -> Self
    where
        F: FnMut(SourceRecord) -> anyhow::Result<()> + Send + 'static,
    {
        self.consumer = Some(Box::new(consumer));
        self
    }

    pub fn build(self) -> ConnectorResult<EmbeddedConnector> {
        let config = self
            .config
            .ok_or(ConnectorError::Build("a connector configuration must be specified"))?;
        let consumer = self
            .consumer
            .ok_or(ConnectorError::Build("a connector consumer must be specified"))?;

        Ok(EmbeddedConnector {
            config,
            registry: self.registry.unwrap_or_default(),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryOffsetBackingStore::new())),
            policy: self.policy.unwrap_or_else(policy::always),
            consumer: Mutex::new(consumer),
            lifecycle: Arc::new(Lifecycle::new()),
            metrics: self.metrics,
        })
    }
}
