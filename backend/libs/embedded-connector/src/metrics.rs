use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct ConnectorMetrics {
    pub records_delivered: IntCounter,
    pub batches_polled: IntCounter,
    pub flushes_committed: IntCounter,
    pub flushes_failed: IntCounter,
    pub records_pending_commit: IntGauge,
}

impl ConnectorMetrics {
    /// Create metrics labelled with `connector` and register them on the
    /// default registry.
    pub fn new(connector: &str) -> Self {
        let metrics = Self::unregistered(connector);
        let registry = prometheus::default_registry();

        for metric in [
            Box::new(metrics.records_delivered.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(metrics.batches_polled.clone()),
            Box::new(metrics.flushes_committed.clone()),
            Box::new(metrics.flushes_failed.clone()),
            Box::new(metrics.records_pending_commit.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register connector metric: {}", e);
            }
        }

        metrics
    }

    /// Create metrics without registering them anywhere.
    pub fn unregistered(connector: &str) -> Self {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help).const_label("connector", connector.to_string())
        };

        Self {
            records_delivered: IntCounter::with_opts(opts(
                "embedded_connector_records_delivered_total",
                "Total number of change records handed to the consumer",
            ))
            .expect("valid metric opts for embedded_connector_records_delivered_total"),
            batches_polled: IntCounter::with_opts(opts(
                "embedded_connector_batches_total",
                "Total number of non-empty batches returned by the source task",
            ))
            .expect("valid metric opts for embedded_connector_batches_total"),
            flushes_committed: IntCounter::with_opts(opts(
                "embedded_connector_offset_flushes_total",
                "Total number of offset flushes confirmed by the offset store",
            ))
            .expect("valid metric opts for embedded_connector_offset_flushes_total"),
            flushes_failed: IntCounter::with_opts(opts(
                "embedded_connector_offset_flush_failures_total",
                "Total number of offset flushes that failed, timed out, or were interrupted",
            ))
            .expect("valid metric opts for embedded_connector_offset_flush_failures_total"),
            records_pending_commit: IntGauge::with_opts(opts(
                "embedded_connector_records_pending_commit",
                "Records delivered since the last successful offset flush",
            ))
            .expect("valid metric opts for embedded_connector_records_pending_commit"),
        }
    }
}
