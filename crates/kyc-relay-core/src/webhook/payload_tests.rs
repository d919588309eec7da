//! Tests for webhook payload parsing.

use super::*;
use serde_json::json;

fn parse(value: serde_json::Value) -> Result<WebhookPayload, PayloadError> {
    WebhookPayload::parse(Bytes::from(serde_json::to_vec(&value).unwrap()))
}

#[test]
fn test_parses_full_envelope() {
    let payload = parse(json!({
        "event": "customer.identification.rejected",
        "data": {
            "id": "42-anc_ind_cst",
            "type": "individualCustomer",
            "attributes": {
                "message": "Document expired",
                "verification": { "level": "KYC_TIER_2" }
            }
        },
        "included": [
            { "id": "v1", "type": "Verification", "attributes": { "level": "tier3" } }
        ]
    }))
    .unwrap();

    assert_eq!(payload.data.id.as_str(), "42-anc_ind_cst");
    assert_eq!(payload.data.resource_type, "individualCustomer");
    assert_eq!(payload.data.attributes.message.as_deref(), Some("Document expired"));
    assert_eq!(
        payload
            .data
            .attributes
            .verification
            .as_ref()
            .and_then(|v| v.level.as_deref()),
        Some("KYC_TIER_2")
    );
    assert_eq!(payload.included.len(), 1);
    assert!(payload.included[0].is_verification());
    assert_eq!(payload.event_suffix(), "rejected");
    assert!(!payload.raw.is_empty());
}

#[test]
fn test_included_and_attributes_are_optional() {
    let payload = parse(json!({
        "event": "customer.identification.approved",
        "data": { "id": "7-anc_ind_cst", "type": "individualCustomer" }
    }))
    .unwrap();

    assert!(payload.included.is_empty());
    assert!(payload.data.attributes.message.is_none());
    assert!(payload.data.attributes.level.is_none());
}

#[test]
fn test_numeric_level_read_as_text() {
    let payload = parse(json!({
        "event": "customer.identification.approved",
        "data": { "id": "7-anc_ind_cst", "type": "individualCustomer", "attributes": { "level": 2 } }
    }))
    .unwrap();

    assert_eq!(payload.data.attributes.level.as_deref(), Some("2"));
}

#[test]
fn test_unexpected_attribute_types_are_treated_as_absent() {
    let payload = parse(json!({
        "event": "customer.identification.error",
        "data": {
            "id": "7-anc_ind_cst",
            "type": "individualCustomer",
            "attributes": { "message": { "code": 17 }, "detail": ["a"], "level": null }
        }
    }))
    .unwrap();

    assert!(payload.data.attributes.message.is_none());
    assert!(payload.data.attributes.detail.is_none());
    assert!(payload.data.attributes.level.is_none());
}

#[test]
fn test_rejects_non_json_body() {
    let result = WebhookPayload::parse(Bytes::from_static(b"event=approved"));

    assert!(matches!(result, Err(PayloadError::Json(_))));
}

#[test]
fn test_rejects_missing_data() {
    let result = parse(json!({ "event": "customer.identification.approved" }));

    assert!(matches!(result, Err(PayloadError::Json(_))));
}

#[test]
fn test_rejects_empty_resource_id() {
    let result = parse(json!({
        "event": "customer.identification.approved",
        "data": { "id": "", "type": "individualCustomer" }
    }));

    assert!(matches!(result, Err(PayloadError::Json(_))));
}

#[test]
fn test_rejects_blank_event() {
    let result = parse(json!({
        "event": "  ",
        "data": { "id": "7-anc_ind_cst", "type": "individualCustomer" }
    }));

    assert!(matches!(result, Err(PayloadError::MissingField { .. })));
}
