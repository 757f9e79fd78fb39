//! Source connector and task plugin boundary, plus the registry that maps a
//! configured `connector.class` to a connector factory.

use crate::error::TaskResult;
use crate::offset::OffsetStorageReader;
use crate::record::SourceRecord;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// String properties handed to connectors and tasks.
pub type Properties = BTreeMap<String, String>;

/// Context given to a connector. The embedded runtime never reconfigures
/// tasks, so it only carries the connector's name.
#[derive(Debug, Clone)]
pub struct ConnectorContext {
    name: String,
}

impl ConnectorContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Context given to a task: access to offsets committed by earlier runs.
#[derive(Clone)]
pub struct SourceTaskContext {
    offset_reader: OffsetStorageReader,
}

impl SourceTaskContext {
    pub fn new(offset_reader: OffsetStorageReader) -> Self {
        Self { offset_reader }
    }

    pub fn offset_reader(&self) -> &OffsetStorageReader {
        &self.offset_reader
    }
}

/// Configures and creates the task that reads from the source system.
#[async_trait]
pub trait SourceConnector: Send {
    /// Called once, before `start`.
    fn initialize(&mut self, _context: ConnectorContext) {}

    /// Start the connector with the full connector configuration.
    async fn start(&mut self, config: &Properties) -> TaskResult<()>;

    /// Produce up to `max_tasks` task configurations.
    fn task_configs(&self, max_tasks: usize) -> Vec<Properties>;

    /// Create a new, unstarted task instance.
    fn create_task(&self) -> TaskResult<Box<dyn SourceTask>>;

    /// Release connector resources. Called once on every exit path after
    /// `start` was attempted, including when `start` itself failed.
    async fn stop(&mut self);
}

/// Reads change records from the source system.
#[async_trait]
pub trait SourceTask: Send {
    /// Called once, before `start`.
    fn initialize(&mut self, _context: SourceTaskContext) {}

    /// Start the task with its task configuration.
    async fn start(&mut self, config: &Properties) -> TaskResult<()>;

    /// Wait for the next batch of records.
    ///
    /// May suspend indefinitely. `Ok(None)` or an empty batch means no data this
    /// cycle. Return [`crate::TaskError::Interrupted`] to request shutdown.
    ///
    /// Must be cancel safe: an interrupt drops the in-flight poll future.
    async fn poll(&mut self) -> TaskResult<Option<Vec<SourceRecord>>>;

    /// Release task resources. Called once on every exit path after a
    /// successful `start`.
    async fn stop(&mut self);
}

/// Creates a fresh connector instance.
pub type ConnectorFactory = Arc<dyn Fn() -> Box<dyn SourceConnector> + Send + Sync>;

/// Closed set of connectors the host knows how to build, keyed by class name.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `class`, replacing any previous one.
    pub fn register<F>(&mut self, class: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn SourceConnector> + Send + Sync + 'static,
    {
        self.factories.insert(class.into(), Arc::new(factory));
        self
    }

    /// Builder-style [`ConnectorRegistry::register`].
    pub fn with<F>(mut self, class: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn SourceConnector> + Send + Sync + 'static,
    {
        self.register(class, factory);
        self
    }

    /// Instantiate the connector registered under `class`.
    pub fn create(&self, class: &str) -> Option<Box<dyn SourceConnector>> {
        self.factories.get(class).map(|factory| factory())
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Registered class names, sorted.
    pub fn classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("classes", &self.classes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopConnector;

    #[async_trait]
    impl SourceConnector for NoopConnector {
        async fn start(&mut self, _config: &Properties) -> TaskResult<()> {
            Ok(())
        }

        fn task_configs(&self, _max_tasks: usize) -> Vec<Properties> {
            vec![Properties::new()]
        }

        fn create_task(&self) -> TaskResult<Box<dyn SourceTask>> {
            Err(anyhow::anyhow!("no task").into())
        }

        async fn stop(&mut self) {}
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ConnectorRegistry::new()
            .with("noop", || Box::new(NoopConnector))
            .with("also-noop", || Box::new(NoopConnector));

        assert!(registry.contains("noop"));
        assert!(registry.create("noop").is_some());
        assert!(registry.create("missing").is_none());
        assert_eq!(registry.classes(), vec!["also-noop", "noop"]);
    }
}
