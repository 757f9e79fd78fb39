use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use embedded_connector::{
    ConnectorRegistry, EmbeddedConfig, EmbeddedConnector, FileOffsetBackingStore, Properties,
    SourceConnector, SourcePartition, SourceRecord, SourceTask, SourceTaskContext, TaskResult,
};
use serde_json::{json, Map, Value};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const COUNTER_CLASS: &str = "counter";

/// Emits `batch.size` increasing numbers every `poll.interval.ms`, resuming
/// from the last committed position.
struct CounterConnector {
    config: Properties,
}

#[async_trait]
impl SourceConnector for CounterConnector {
    async fn start(&mut self, config: &Properties) -> TaskResult<()> {
        self.config = config.clone();
        Ok(())
    }

    fn task_configs(&self, _max_tasks: usize) -> Vec<Properties> {
        vec![self.config.clone()]
    }

    fn create_task(&self) -> TaskResult<Box<dyn SourceTask>> {
        Ok(Box::new(CounterTask::default()))
    }

    async fn stop(&mut self) {}
}

#[derive(Default)]
struct CounterTask {
    context: Option<SourceTaskContext>,
    next: u64,
    batch_size: u64,
    interval: Duration,
}

fn partition() -> SourcePartition {
    let mut partition = Map::new();
    partition.insert("source".to_string(), json!("counter"));
    partition
}

fn parse_or<T: std::str::FromStr>(config: &Properties, key: &str, default: T) -> T {
    config
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[async_trait]
impl SourceTask for CounterTask {
    fn initialize(&mut self, context: SourceTaskContext) {
        self.context = Some(context);
    }

    async fn start(&mut self, config: &Properties) -> TaskResult<()> {
        self.batch_size = parse_or(config, "batch.size", 5);
        self.interval = Duration::from_millis(parse_or(config, "poll.interval.ms", 1000));

        if let Some(context) = &self.context {
            if let Some(offset) = context.offset_reader().offset(&partition()).await? {
                self.next = offset.get("position").and_then(Value::as_u64).unwrap_or(0) + 1;
                info!(resume_from = self.next, "Resuming counter from committed offset");
            }
        }
        Ok(())
    }

    async fn poll(&mut self) -> TaskResult<Option<Vec<SourceRecord>>> {
        tokio::time::sleep(self.interval).await;

        let batch = (0..self.batch_size)
            .map(|_| {
                let position = self.next;
                self.next += 1;
                let mut offset = Map::new();
                offset.insert("position".to_string(), json!(position));
                SourceRecord::new(partition(), offset, "demo.counter", json!({ "n": position }))
                    .with_timestamp(chrono::Utc::now())
            })
            .collect();
        Ok(Some(batch))
    }

    async fn stop(&mut self) {}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,embedded_connector=debug".into());
    if env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_thread_names(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let offsets_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "embedded-connector-offsets.json".to_string());

    let mut config = EmbeddedConfig::from_env()?;
    if config.name.is_empty() {
        config.name = "demo-counter".to_string();
    }
    if config.connector_class.is_empty() {
        config.connector_class = COUNTER_CLASS.to_string();
    }

    let registry = ConnectorRegistry::new().with(COUNTER_CLASS, || {
        Box::new(CounterConnector {
            config: Properties::new(),
        })
    });

    let connector = Arc::new(
        EmbeddedConnector::builder()
            .using_config(config)
            .using_registry(registry)
            .using_store(Arc::new(FileOffsetBackingStore::new(offsets_path)))
            .notifying(|record| {
                println!("{} {}", record.topic, record.value);
                Ok(())
            })
            .build()?,
    );

    let runner = connector.clone();
    let task = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, stopping connector");
    connector.stop();

    if !connector.await_completion(Duration::from_secs(10)).await {
        info!("Connector did not stop in time, interrupting");
        connector.interrupt();
    }

    let exit = task.await??;
    info!(exit = ?exit, "Demo finished");
    Ok(())
}
