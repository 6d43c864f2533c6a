//! Enrollment orchestration tests over a scripted transport

use std::sync::Arc;

use chrono::{Duration, Utc};
use ecs_ca_gateway::models::{params, EnrollmentIntent, GenericStatus};
use ecs_ca_gateway::services::{CertificateDataReader, InMemoryCertificateReader};
use ecs_ca_gateway::GatewayError;
use reqwest::Method;
use serde_json::json;

use crate::common::*;

const PRIOR_SERIAL: &str = "1a2b";

fn account(transport: &MockTransport) {
    transport.on_get("organizations", organizations_json());
    transport.on_get("inventories", inventories_json(PRODUCT_ID, 5));
}

fn new_order_routes(transport: &MockTransport, tracking_id: i64) {
    account(transport);
    // validateOnly dry run, then the real order
    transport.on_post("certificates", json!({}));
    transport.on_post("certificates", order_response_json(tracking_id));
}

fn reader() -> Arc<InMemoryCertificateReader> {
    Arc::new(InMemoryCertificateReader::new())
}

fn body_of(request: &ecs_ca_gateway::services::RemoteRequest) -> serde_json::Value {
    request.body.clone().unwrap_or_default()
}

#[tokio::test]
async fn test_underscore_common_name_makes_no_remote_calls() {
    let transport = Arc::new(MockTransport::new());
    account(&transport);
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let request = enrollment_request(
        "CN=bad_name.example.com",
        EnrollmentIntent::New,
        standard_product(),
    );
    let err = gateway.enroll(&request).await.unwrap_err();

    assert!(matches!(err, GatewayError::InvalidCharacter(_)));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_common_name_without_domain_is_rejected() {
    let transport = Arc::new(MockTransport::new());
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let request = enrollment_request("CN=localhost", EnrollmentIntent::New, standard_product());
    let err = gateway.enroll(&request).await.unwrap_err();

    assert!(matches!(err, GatewayError::InvalidCommonName(_)));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_new_enrollment_validates_then_orders() {
    let transport = Arc::new(MockTransport::new());
    new_order_routes(&transport, 100);
    transport.on_get("certificates/100", detail_json(100, "ACTIVE"));
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let request = enrollment_request(
        "CN=www.example.com,O=Contoso",
        EnrollmentIntent::New,
        standard_product(),
    );
    let result = gateway.enroll(&request).await.unwrap();

    assert_eq!(result.ca_request_id, "100");
    assert_eq!(result.status, GenericStatus::Generated);
    assert_eq!(result.certificate.as_deref(), Some(TEST_PEM));
    assert_eq!(
        result.status_message,
        "Certificate with trackingId 100 issued successfully"
    );

    let posts = transport.requests_to(Method::POST, "certificates");
    assert_eq!(posts.len(), 2);
    let dry_run = body_of(&posts[0]);
    let order = body_of(&posts[1]);
    assert_eq!(dry_run["validateOnly"], true);
    assert_eq!(order["validateOnly"], false);
    assert_eq!(order["clientId"], 4);
    assert_eq!(order["org"], "Contoso");
    assert_eq!(order["certType"], PRODUCT_ID);
    assert_eq!(order["cn"], "www.example.com");
    assert_eq!(order["subjectAltName"], json!(["www.example.com"]));
    assert_eq!(order["tracking"]["requesterName"], "PKI Team");
    assert_eq!(order["tracking"]["requesterPhone"], "5551234567");
}

#[tokio::test]
async fn test_request_parameters_override_configured_requester() {
    let transport = Arc::new(MockTransport::new());
    new_order_routes(&transport, 101);
    transport.on_get("certificates/101", detail_json(101, "ACTIVE"));
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let product = standard_product()
        .with_parameter(params::EMAIL, "owner@example.com")
        .with_parameter(params::LIFETIME_MONTHS, "24")
        .with_parameter(params::CERTIFICATE_USAGE, "server");
    let request = enrollment_request("CN=www.example.com", EnrollmentIntent::New, product);
    gateway.enroll(&request).await.unwrap();

    let order = body_of(&transport.requests_to(Method::POST, "certificates")[1]);
    assert_eq!(order["clientId"], 1);
    assert!(order.get("org").is_none());
    assert_eq!(order["certEmail"], "owner@example.com");
    assert_eq!(order["certLifetime"], "P2Y");
    assert_eq!(order["eku"], "SERVER_AUTH");
}

#[tokio::test]
async fn test_unknown_organization_submits_nothing() {
    let transport = Arc::new(MockTransport::new());
    account(&transport);
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let request = enrollment_request(
        "CN=www.example.com,O=Fabrikam",
        EnrollmentIntent::New,
        standard_product(),
    );
    let err = gateway.enroll(&request).await.unwrap_err();

    match err {
        GatewayError::OrganizationNotFound {
            organization,
            approved,
        } => {
            assert_eq!(organization, "Fabrikam");
            assert_eq!(approved, vec!["Contoso".to_string()]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(transport.mutating_calls(), 0);
}

#[tokio::test]
async fn test_exhausted_inventory_submits_nothing() {
    let transport = Arc::new(MockTransport::new());
    transport.on_get("organizations", organizations_json());
    transport.on_get("inventories", inventories_json(PRODUCT_ID, 0));
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let request = enrollment_request("CN=www.example.com", EnrollmentIntent::New, standard_product());
    let err = gateway.enroll(&request).await.unwrap_err();

    assert!(matches!(err, GatewayError::InventoryExhausted(ref p) if p == PRODUCT_ID));
    assert_eq!(transport.mutating_calls(), 0);
}

#[tokio::test]
async fn test_failed_dry_run_stops_enrollment() {
    let transport = Arc::new(MockTransport::new());
    account(&transport);
    transport.on(
        Method::POST,
        "certificates",
        400,
        json!({ "errors": [{ "message": "CSR is malformed" }], "status": 400 }),
    );
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let request = enrollment_request("CN=www.example.com", EnrollmentIntent::New, standard_product());
    let err = gateway.enroll(&request).await.unwrap_err();

    assert!(err.is_validation());
    assert_eq!(transport.requests_to(Method::POST, "certificates").len(), 1);
}

#[tokio::test]
async fn test_pending_order_is_approved() {
    let transport = Arc::new(MockTransport::new());
    new_order_routes(&transport, 200);
    transport.on_get("certificates/200", detail_json(200, "PENDING"));
    transport.on_get("certificates/200", detail_json(200, "ACTIVE"));
    transport.on_patch("certificates/200", json!({}));
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let request = enrollment_request("CN=www.example.com", EnrollmentIntent::New, standard_product());
    let result = gateway.enroll(&request).await.unwrap();

    assert_eq!(result.status, GenericStatus::Generated);
    assert!(result.certificate.is_some());
    assert!(result
        .status_message
        .contains("issued after Entrust returned it with a pending status"));

    let patches = transport.requests_to(Method::PATCH, "certificates/200");
    assert_eq!(patches.len(), 1);
    assert_eq!(body_of(&patches[0]), json!({ "operation": "APPROVE" }));
}

#[tokio::test]
async fn test_pending_order_needing_external_validation() {
    let transport = Arc::new(MockTransport::new());
    new_order_routes(&transport, 201);
    transport.on_get("certificates/201", detail_json(201, "PENDING"));
    transport.on_patch("certificates/201", json!({}));
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let request = enrollment_request("CN=www.example.com", EnrollmentIntent::New, standard_product());
    let result = gateway.enroll(&request).await.unwrap();

    assert_eq!(result.status, GenericStatus::ExternalValidation);
    assert_eq!(result.certificate, None);
    assert!(result.status_message.contains("External validation is required"));
}

#[tokio::test]
async fn test_pending_order_declined_after_approval() {
    let transport = Arc::new(MockTransport::new());
    new_order_routes(&transport, 202);
    transport.on_get("certificates/202", detail_json(202, "PENDING"));
    transport.on_get("certificates/202", detail_json(202, "DECLINED"));
    transport.on_patch("certificates/202", json!({}));
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let request = enrollment_request("CN=www.example.com", EnrollmentIntent::New, standard_product());
    let err = gateway.enroll(&request).await.unwrap_err();

    assert!(matches!(
        err,
        GatewayError::ApprovalFailed { tracking_id: 202, ref status } if status == "DECLINED"
    ));
}

#[tokio::test]
async fn test_declined_order_reports_failed() {
    let transport = Arc::new(MockTransport::new());
    new_order_routes(&transport, 203);
    transport.on_get("certificates/203", detail_json(203, "DECLINED"));
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let request = enrollment_request("CN=www.example.com", EnrollmentIntent::New, standard_product());
    let result = gateway.enroll(&request).await.unwrap();

    assert_eq!(result.status, GenericStatus::Failed);
    assert_eq!(result.certificate, None);
    assert_eq!(result.status_message, "Certificate with trackingId 203 is denied");
    assert!(transport
        .requests_to(Method::PATCH, "certificates/203")
        .is_empty());
}

async fn renew_or_reissue(days_to_expiry: i64) -> (Arc<MockTransport>, GenericStatus) {
    let transport = Arc::new(MockTransport::new());
    account(&transport);
    let expires = Utc::now() + Duration::days(days_to_expiry);
    transport.on_get("certificates", page_json(vec![certificate_json(55, "ACTIVE", expires)], 1));
    transport.on_post("certificates/55/renewals", order_response_json(56));
    transport.on_post("certificates/55/reissues", order_response_json(56));
    transport.on_get("certificates/56", detail_json(56, "ACTIVE"));

    let reader = reader();
    reader
        .upsert("55", Some(PRIOR_SERIAL.to_string()), Some(expires), GenericStatus::Generated)
        .await;
    let gateway = gateway_with(test_config(), transport.clone(), reader);

    let product = standard_product()
        .with_parameter(params::PRIOR_CERT_SN, PRIOR_SERIAL)
        .with_parameter(params::RENEWAL_WINDOW_DAYS, "90");
    let request = enrollment_request(
        "CN=www.example.com",
        EnrollmentIntent::RenewOrReissue,
        product,
    );
    let result = gateway.enroll(&request).await.unwrap();
    (transport, result.status)
}

#[tokio::test]
async fn test_renew_or_reissue_inside_window_renews() {
    let (transport, status) = renew_or_reissue(10).await;

    assert_eq!(status, GenericStatus::Generated);
    let renewals = transport.requests_to(Method::POST, "certificates/55/renewals");
    assert_eq!(renewals.len(), 1);
    assert!(transport
        .requests_to(Method::POST, "certificates/55/reissues")
        .is_empty());

    let body = body_of(&renewals[0]);
    assert_eq!(body["certLifetime"], "P1Y");
    assert!(body.get("org").is_none());
}

#[tokio::test]
async fn test_renew_or_reissue_outside_window_reissues() {
    let (transport, status) = renew_or_reissue(200).await;

    assert_eq!(status, GenericStatus::Generated);
    assert!(transport
        .requests_to(Method::POST, "certificates/55/renewals")
        .is_empty());
    let reissues = transport.requests_to(Method::POST, "certificates/55/reissues");
    assert_eq!(reissues.len(), 1);
    assert!(body_of(&reissues[0]).get("certLifetime").is_none());
}

#[tokio::test]
async fn test_renewal_of_certificate_without_tracking_id() {
    let transport = Arc::new(MockTransport::new());
    account(&transport);
    transport.on_get(
        "certificates",
        page_json(vec![thumbprint_certificate_json("ABCDEF", "ACTIVE")], 1),
    );
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let product = standard_product().with_parameter(params::PRIOR_CERT_SN, PRIOR_SERIAL);
    let request = enrollment_request("CN=www.example.com", EnrollmentIntent::Renew, product);
    let err = gateway.enroll(&request).await.unwrap_err();

    assert!(matches!(err, GatewayError::UnassignedTrackingId(ref s) if s == PRIOR_SERIAL));
    assert_eq!(transport.mutating_calls(), 0);
}

#[tokio::test]
async fn test_renewal_of_unknown_serial_number() {
    let transport = Arc::new(MockTransport::new());
    account(&transport);
    transport.on(
        Method::GET,
        "certificates",
        404,
        json!({ "errors": [{ "message": "Certificate not found" }], "status": 404 }),
    );
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let product = standard_product().with_parameter(params::PRIOR_CERT_SN, "dead");
    let request = enrollment_request("CN=www.example.com", EnrollmentIntent::Reissue, product);
    let err = gateway.enroll(&request).await.unwrap_err();

    assert!(matches!(err, GatewayError::TrackingIdNotFound(ref s) if s == "dead"));
    assert_eq!(transport.mutating_calls(), 0);
}

#[tokio::test]
async fn test_renew_or_reissue_with_unreadable_certificate_store() {
    let transport = Arc::new(MockTransport::new());
    account(&transport);
    let expires = Utc::now() + Duration::days(10);
    transport.on_get("certificates", page_json(vec![certificate_json(55, "ACTIVE", expires)], 1));
    let reader: Arc<dyn CertificateDataReader> = Arc::new(FailingReader);
    let gateway = gateway_with(test_config(), transport.clone(), reader);

    let product = standard_product().with_parameter(params::PRIOR_CERT_SN, PRIOR_SERIAL);
    let request = enrollment_request(
        "CN=www.example.com",
        EnrollmentIntent::RenewOrReissue,
        product,
    );
    let err = gateway.enroll(&request).await.unwrap_err();

    assert!(matches!(err, GatewayError::TrackingIdNotFound(_)));
    assert_eq!(transport.mutating_calls(), 0);
}

#[tokio::test]
async fn test_oversized_renewal_window_is_rejected_locally() {
    let transport = Arc::new(MockTransport::new());
    account(&transport);
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let product = standard_product()
        .with_parameter(params::PRIOR_CERT_SN, PRIOR_SERIAL)
        .with_parameter(params::RENEWAL_WINDOW_DAYS, "1000000000");
    let request = enrollment_request(
        "CN=www.example.com",
        EnrollmentIntent::RenewOrReissue,
        product,
    );
    let err = gateway.enroll(&request).await.unwrap_err();

    assert!(err.is_validation());
    assert!(err.to_string().contains(params::RENEWAL_WINDOW_DAYS));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_renewal_without_prior_serial_number() {
    let transport = Arc::new(MockTransport::new());
    account(&transport);
    let gateway = gateway_with(test_config(), transport.clone(), reader());

    let request = enrollment_request("CN=www.example.com", EnrollmentIntent::Renew, standard_product());
    let err = gateway.enroll(&request).await.unwrap_err();

    assert!(err.is_validation());
    assert!(err.to_string().contains(params::PRIOR_CERT_SN));
    assert_eq!(transport.call_count(), 0);
}
