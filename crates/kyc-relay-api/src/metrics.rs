//! Prometheus metrics for the webhook pipeline.
//!
//! Each [`ServiceMetrics`] owns its registry, so several instances can live in
//! one process (tests build one per router).

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;

/// Service metrics for observability
#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    pub webhook_requests_total: IntCounter,
    pub webhook_duration_seconds: Histogram,
    pub signature_failures_total: IntCounter,
    pub malformed_payloads_total: IntCounter,
    pub ignored_events_total: IntCounter,

    /// Published events, labelled by routing key
    pub events_published_total: IntCounterVec,
    pub publish_failures_total: IntCounter,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new_custom(Some("kyc_relay".to_string()), None)?;

        let webhook_requests_total = IntCounter::new(
            "webhook_requests_total",
            "Total webhook requests received",
        )?;
        let webhook_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "webhook_duration_seconds",
                "Webhook processing time distribution",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0]),
        )?;
        let signature_failures_total = IntCounter::new(
            "webhook_signature_failures_total",
            "Webhooks rejected for a missing or invalid signature",
        )?;
        let malformed_payloads_total = IntCounter::new(
            "webhook_malformed_payloads_total",
            "Webhooks rejected for an unparseable body",
        )?;
        let ignored_events_total = IntCounter::new(
            "webhook_ignored_events_total",
            "Webhooks accepted with an unhandled event name",
        )?;
        let events_published_total = IntCounterVec::new(
            Opts::new("events_published_total", "Canonical events published"),
            &["routing_key"],
        )?;
        let publish_failures_total = IntCounter::new(
            "publish_failures_total",
            "Canonical events that could not be published",
        )?;

        registry.register(Box::new(webhook_requests_total.clone()))?;
        registry.register(Box::new(webhook_duration_seconds.clone()))?;
        registry.register(Box::new(signature_failures_total.clone()))?;
        registry.register(Box::new(malformed_payloads_total.clone()))?;
        registry.register(Box::new(ignored_events_total.clone()))?;
        registry.register(Box::new(events_published_total.clone()))?;
        registry.register(Box::new(publish_failures_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            webhook_requests_total,
            webhook_duration_seconds,
            signature_failures_total,
            malformed_payloads_total,
            ignored_events_total,
            events_published_total,
            publish_failures_total,
        }))
    }

    pub fn record_webhook_request(&self, duration: Duration) {
        self.webhook_requests_total.inc();
        self.webhook_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_published(&self, routing_key: &str) {
        self.events_published_total
            .with_label_values(&[routing_key])
            .inc();
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
