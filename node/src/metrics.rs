//! # Prometheus Metrics
//!
//! Flow-level metrics for the node, rendered at `/metrics`.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] with
//! the `concord` prefix so they do not collide with any default global
//! registry consumers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

use concord_protocol::{FlowError, TransitionOutcome};

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub flows_started_total: IntCounter,
    pub flows_finalized_total: IntCounter,
    /// Failed flows, labelled by error kind.
    pub flows_failed_total: IntCounterVec,
    /// Finalized flows whose observer copy was not delivered.
    pub compliance_exceptions_total: IntCounter,
    /// Session messages sent on the in-process network.
    pub session_messages_total: IntCounter,
    /// Wall-clock time from flow start to outcome.
    pub flow_latency_seconds: Histogram,
}

fn register<C: prometheus::core::Collector + Clone + 'static>(
    registry: &Registry,
    collector: C,
) -> prometheus::Result<C> {
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

impl NodeMetrics {
    /// Create and register all metrics. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("concord".into()), None)?;

        let flows_started_total = register(
            &registry,
            IntCounter::new("flows_started_total", "Transition flows started")?,
        )?;
        let flows_finalized_total = register(
            &registry,
            IntCounter::new("flows_finalized_total", "Transition flows finalized by the notary")?,
        )?;
        let flows_failed_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("flows_failed_total", "Transition flows that failed, by error kind"),
                &["kind"],
            )?,
        )?;
        let compliance_exceptions_total = register(
            &registry,
            IntCounter::new(
                "compliance_exceptions_total",
                "Finalized transitions whose compliance copy was not delivered",
            )?,
        )?;
        let session_messages_total = register(
            &registry,
            IntCounter::new("session_messages_total", "Session messages sent between nodes")?,
        )?;
        let flow_latency_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "flow_latency_seconds",
                    "End-to-end transition flow latency in seconds",
                )
                .buckets(vec![
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ]),
            )?,
        )?;

        Ok(Self {
            registry,
            flows_started_total,
            flows_finalized_total,
            flows_failed_total,
            compliance_exceptions_total,
            session_messages_total,
            flow_latency_seconds,
        })
    }

    /// Account for one finished flow.
    pub fn record_flow(&self, result: &Result<TransitionOutcome, FlowError>, elapsed: Duration) {
        self.flow_latency_seconds.observe(elapsed.as_secs_f64());
        match result {
            Ok(outcome) => {
                self.flows_finalized_total.inc();
                let compliance = outcome
                    .exceptions
                    .iter()
                    .filter(|e| matches!(e, concord_protocol::PostCommitException::Compliance { .. }))
                    .count();
                self.compliance_exceptions_total.inc_by(compliance as u64);
            }
            Err(e) => {
                self.flows_failed_total.with_label_values(&[e.kind()]).inc();
            }
        }
    }

    /// Bring the message counter up to the network's running total.
    pub fn sync_session_messages(&self, total: u64) {
        let seen = self.session_messages_total.get();
        if total > seen {
            self.session_messages_total.inc_by(total - seen);
        }
    }

    /// Encode all registered metrics into the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Render `metrics` as a `/metrics` response. 500 if encoding fails.
pub fn render(metrics: &NodeMetrics) -> Response {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_labelled_by_kind() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.flows_started_total.inc();
        metrics.record_flow(
            &Err(FlowError::Conflict {
                account: "alice".into(),
            }),
            Duration::from_millis(3),
        );

        let text = metrics.encode().unwrap();
        assert!(text.contains("concord_flows_started_total 1"));
        assert!(text.contains("concord_flows_failed_total{kind=\"conflict\"} 1"));
        assert_eq!(metrics.flows_finalized_total.get(), 0);
    }

    #[test]
    fn message_counter_follows_network_total() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.sync_session_messages(5);
        metrics.sync_session_messages(3);
        metrics.sync_session_messages(8);
        assert_eq!(metrics.session_messages_total.get(), 8);
    }
}
