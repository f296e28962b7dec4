//! # Prometheus Metrics
//!
//! Operational metrics for the escrow node, scraped by Prometheus at the
//! `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] under
//! the `escrow` namespace so they do not collide with the default global
//! registry.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

use escrow_contracts::EscrowError;
use escrow_protocol::EscrowState;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Escrows that entered custody.
    pub escrows_created_total: IntCounter,
    /// Escrows paid out to the seller.
    pub escrows_released_total: IntCounter,
    /// Escrows paid back to the buyer.
    pub escrows_refunded_total: IntCounter,
    /// Rejected operations, labelled by error kind.
    pub operations_rejected_total: IntCounterVec,
    /// Escrows currently holding value.
    pub escrows_awaiting_delivery: IntGauge,
    /// Ledger call latency, labelled by operation.
    pub operation_latency_seconds: HistogramVec,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("escrow".into()), None)?;

        let escrows_created_total = IntCounter::new(
            "escrows_created_total",
            "Total number of escrows that entered custody",
        )?;
        registry.register(Box::new(escrows_created_total.clone()))?;

        let escrows_released_total = IntCounter::new(
            "escrows_released_total",
            "Total number of escrows released to the seller",
        )?;
        registry.register(Box::new(escrows_released_total.clone()))?;

        let escrows_refunded_total = IntCounter::new(
            "escrows_refunded_total",
            "Total number of escrows refunded to the buyer",
        )?;
        registry.register(Box::new(escrows_refunded_total.clone()))?;

        let operations_rejected_total = IntCounterVec::new(
            Opts::new(
                "operations_rejected_total",
                "Total number of rejected ledger operations by error kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(operations_rejected_total.clone()))?;

        let escrows_awaiting_delivery = IntGauge::new(
            "escrows_awaiting_delivery",
            "Number of escrows currently awaiting delivery",
        )?;
        registry.register(Box::new(escrows_awaiting_delivery.clone()))?;

        let operation_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Ledger operation latency in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            escrows_created_total,
            escrows_released_total,
            escrows_refunded_total,
            operations_rejected_total,
            escrows_awaiting_delivery,
            operation_latency_seconds,
        })
    }

    /// Records the outcome of one mutating ledger call.
    ///
    /// `terminal` is the state a successful call moved the record into;
    /// `AwaitingDelivery` means a creation.
    pub fn observe<T>(
        &self,
        operation: &str,
        terminal: EscrowState,
        started: Instant,
        outcome: &Result<T, EscrowError>,
    ) {
        self.operation_latency_seconds
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());

        match outcome {
            Ok(_) => match terminal {
                EscrowState::AwaitingDelivery => {
                    self.escrows_created_total.inc();
                    self.escrows_awaiting_delivery.inc();
                }
                EscrowState::Complete => {
                    self.escrows_released_total.inc();
                    self.escrows_awaiting_delivery.dec();
                }
                EscrowState::Refunded => {
                    self.escrows_refunded_total.inc();
                    self.escrows_awaiting_delivery.dec();
                }
            },
            Err(e) => self
                .operations_rejected_total
                .with_label_values(&[e.kind().as_str()])
                .inc(),
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
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
    fn outcomes_update_counters_and_gauge() {
        let metrics = NodeMetrics::new().unwrap();
        let ok: Result<(), EscrowError> = Ok(());

        metrics.observe("create_escrow", EscrowState::AwaitingDelivery, Instant::now(), &ok);
        metrics.observe("create_escrow", EscrowState::AwaitingDelivery, Instant::now(), &ok);
        metrics.observe("release_funds", EscrowState::Complete, Instant::now(), &ok);
        metrics.observe(
            "refund",
            EscrowState::Refunded,
            Instant::now(),
            &Err::<(), _>(EscrowError::NotFound(9)),
        );

        assert_eq!(metrics.escrows_created_total.get(), 2);
        assert_eq!(metrics.escrows_released_total.get(), 1);
        assert_eq!(metrics.escrows_refunded_total.get(), 0);
        assert_eq!(metrics.escrows_awaiting_delivery.get(), 1);
        assert_eq!(
            metrics
                .operations_rejected_total
                .with_label_values(&["NotFound"])
                .get(),
            1
        );
    }

    #[test]
    fn encoded_output_uses_namespace() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.escrows_created_total.inc();
        let text = metrics.encode().unwrap();
        assert!(text.contains("escrow_escrows_created_total 1"));
    }
}
