//! Tests for service metrics.

use super::*;

#[test]
fn test_instances_do_not_conflict() {
    let first = ServiceMetrics::new().unwrap();
    let second = ServiceMetrics::new().unwrap();

    first.webhook_requests_total.inc();

    assert_eq!(first.webhook_requests_total.get(), 1);
    assert_eq!(second.webhook_requests_total.get(), 0);
}

#[test]
fn test_render_contains_prefixed_counters() {
    let metrics = ServiceMetrics::new().unwrap();
    metrics.record_webhook_request(Duration::from_millis(12));
    metrics.record_published("customer.verified");
    metrics.signature_failures_total.inc();

    let text = metrics.render().unwrap();

    assert!(text.contains("kyc_relay_webhook_requests_total 1"));
    assert!(text.contains("kyc_relay_webhook_signature_failures_total 1"));
    assert!(text.contains(r#"kyc_relay_events_published_total{routing_key="customer.verified"} 1"#));
    assert!(text.contains("kyc_relay_webhook_duration_seconds_count 1"));
}
