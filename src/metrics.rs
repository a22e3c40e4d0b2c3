//! Prometheus metrics exposition server.
//!
//! This module provides an HTTP server that exposes logmailer metrics
//! in Prometheus format on a configurable port.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Register all metric descriptions for Prometheus.
///
/// Called once after the recorder is installed.
pub fn register_metric_descriptions() {
    use metrics::describe_counter;

    describe_counter!(
        "logmailer_events_received_total",
        "Total number of events parsed from the input stream"
    );
    describe_counter!(
        "logmailer_input_parse_errors_total",
        "Total number of malformed input lines skipped"
    );
    describe_counter!(
        "logmailer_encoding_recoveries_total",
        "Total number of substitutions retried after replacing invalid UTF-8"
    );
    describe_counter!(
        "logmailer_compose_errors_total",
        "Total number of events skipped because the message could not be composed"
    );
    describe_counter!(
        "logmailer_messages_sent_total",
        "Total number of messages accepted by the SMTP server"
    );
    describe_counter!(
        "logmailer_delivery_errors_total",
        "Total number of messages that failed delivery, by error kind"
    );
}

/// Initialize counters to zero so they are visible from startup.
pub fn initialize_metrics() {
    use metrics::counter;

    counter!("logmailer_events_received_total").absolute(0);
    counter!("logmailer_input_parse_errors_total").absolute(0);
    counter!("logmailer_compose_errors_total").absolute(0);
    counter!("logmailer_messages_sent_total").absolute(0);
    for kind in ["connect", "tls", "auth", "envelope", "send"] {
        counter!("logmailer_delivery_errors_total", "kind" => kind).absolute(0);
    }
}

/// Metrics server for Prometheus exposition on `/metrics`.
pub struct MetricsServer {
    port: u16,
    /// Signalled once the recorder is installed, so callers can wait before
    /// emitting metrics that would otherwise be lost.
    ready_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MetricsServer {
    /// Create a new metrics server bound to the given port.
    ///
    /// Use port 0 to let the OS assign an available port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ready_tx: None,
        }
    }

    /// Create a new metrics server with a ready signal channel.
    pub fn with_ready_signal(port: u16, ready_tx: tokio::sync::oneshot::Sender<()>) -> Self {
        Self {
            port,
            ready_tx: Some(ready_tx),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Install the global recorder and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be installed (for example
    /// when the port is taken or a recorder is already set).
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();

        // The recorder can only be installed once per process.
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

        register_metric_descriptions();
        initialize_metrics();

        if let Some(tx) = self.ready_tx {
            let _ = tx.send(());
        }

        info!(port = self.port, "Metrics server started on /metrics");

        cancel.cancelled().await;

        info!("Metrics server shutting down");

        Ok(())
    }
}
