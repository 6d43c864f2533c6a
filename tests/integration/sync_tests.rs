//! Synchronization tests

use std::sync::Arc;

use chrono::{Duration, Utc};
use ecs_ca_gateway::models::{GenericCertificateRecord, GenericStatus};
use ecs_ca_gateway::services::{CertificateDataReader, InMemoryCertificateReader};
use ecs_ca_gateway::GatewayError;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::common::*;

fn active(tracking_id: i64) -> Value {
    certificate_json(tracking_id, "ACTIVE", Utc::now() + Duration::days(300))
}

fn list(transport: &MockTransport, certificates: Vec<Value>) {
    let total = certificates.len();
    transport.on_get("certificates", page_json(certificates, total));
}

/// Drain everything the pass emitted
fn drain(rx: &mut mpsc::Receiver<GenericCertificateRecord>) -> Vec<GenericCertificateRecord> {
    let mut records = Vec::new();
    while let Ok(record) = rx.try_recv() {
        records.push(record);
    }
    records
}

#[tokio::test]
async fn test_second_pass_emits_nothing() {
    let transport = Arc::new(MockTransport::new());
    list(&transport, vec![active(1), active(2)]);
    transport.on_get("certificates/1", detail_json(1, "ACTIVE"));
    transport.on_get("certificates/2", detail_json(2, "ACTIVE"));
    let reader = Arc::new(InMemoryCertificateReader::new());
    let gateway = gateway_with(test_config(), transport.clone(), reader.clone());

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let first = gateway.synchronize(&tx, None, false, &cancel).await.unwrap();
    let records = drain(&mut rx);

    assert_eq!(first.total, 2);
    assert_eq!(first.emitted, 2);
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.status == GenericStatus::Generated && r.certificate.is_some()));

    for record in &records {
        reader.record_status(&record.ca_request_id, record.status).await;
    }

    let second = gateway
        .synchronize(&tx, Some(Utc::now()), false, &cancel)
        .await
        .unwrap();
    assert_eq!(second.emitted, 0);
    assert_eq!(second.unchanged, 2);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_full_sync_emits_known_certificates() {
    let transport = Arc::new(MockTransport::new());
    list(&transport, vec![active(1)]);
    transport.on_get("certificates/1", detail_json(1, "ACTIVE"));
    let reader = Arc::new(InMemoryCertificateReader::new());
    reader.record_status("1", GenericStatus::Generated).await;
    let gateway = gateway_with(test_config(), transport.clone(), reader);

    let (tx, mut rx) = mpsc::channel(16);
    let summary = gateway
        .synchronize(&tx, None, true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.emitted, 1);
    assert_eq!(drain(&mut rx).len(), 1);
}

#[tokio::test]
async fn test_status_change_is_emitted() {
    let transport = Arc::new(MockTransport::new());
    list(
        &transport,
        vec![certificate_json(3, "REVOKED", Utc::now() + Duration::days(30))],
    );
    transport.on_get("certificates/3", detail_json(3, "REVOKED"));
    let reader = Arc::new(InMemoryCertificateReader::new());
    reader.record_status("3", GenericStatus::Generated).await;
    let gateway = gateway_with(test_config(), transport.clone(), reader);

    let (tx, mut rx) = mpsc::channel(16);
    gateway
        .synchronize(&tx, None, false, &CancellationToken::new())
        .await
        .unwrap();

    let records = drain(&mut rx);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, GenericStatus::Revoked);
    assert!(records[0].revocation_date.is_some());
}

#[tokio::test]
async fn test_certificate_without_tracking_id_uses_thumbprint() {
    let transport = Arc::new(MockTransport::new());
    list(&transport, vec![thumbprint_certificate_json("abcdef", "ACTIVE")]);
    transport.on_get("certificates/thumbprints/ABCDEF", detail_json(0, "ACTIVE"));
    let gateway = gateway_with(
        test_config(),
        transport.clone(),
        Arc::new(InMemoryCertificateReader::new()),
    );

    let (tx, mut rx) = mpsc::channel(16);
    let summary = gateway
        .synchronize(&tx, None, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.emitted, 1);
    let records = drain(&mut rx);
    assert_eq!(records[0].ca_request_id, "0-ABCDEF");
}

#[tokio::test]
async fn test_declined_and_unidentifiable_certificates_are_skipped() {
    let mut anonymous = active(0);
    anonymous["uri"] = Value::String("https://api.entrust.net/enterprise/v2/certificates/0".into());

    let transport = Arc::new(MockTransport::new());
    list(
        &transport,
        vec![
            certificate_json(4, "DECLINED", Utc::now() + Duration::days(30)),
            anonymous,
            active(5),
        ],
    );
    transport.on_get("certificates/5", detail_json(5, "ACTIVE"));
    let gateway = gateway_with(
        test_config(),
        transport.clone(),
        Arc::new(InMemoryCertificateReader::new()),
    );

    let (tx, mut rx) = mpsc::channel(16);
    let summary = gateway
        .synchronize(&tx, None, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.denied, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.emitted, 1);
    assert_eq!(drain(&mut rx)[0].ca_request_id, "5");
}

#[tokio::test]
async fn test_expired_certificates_skipped_when_configured() {
    let transport = Arc::new(MockTransport::new());
    list(
        &transport,
        vec![
            certificate_json(6, "EXPIRED", Utc::now() - Duration::days(1)),
            active(7),
        ],
    );
    transport.on_get("certificates/6", detail_json(6, "EXPIRED"));
    transport.on_get("certificates/7", detail_json(7, "ACTIVE"));

    let mut config = test_config();
    config.ignore_expired = true;
    let gateway = gateway_with(
        config,
        transport.clone(),
        Arc::new(InMemoryCertificateReader::new()),
    );

    let (tx, _rx) = mpsc::channel(16);
    let summary = gateway
        .synchronize(&tx, None, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.expired_skipped, 1);
    assert_eq!(summary.emitted, 1);
    assert!(transport
        .requests_to(reqwest::Method::GET, "certificates/6")
        .is_empty());
}

#[tokio::test]
async fn test_unknown_status_is_counted_not_fatal() {
    let transport = Arc::new(MockTransport::new());
    list(
        &transport,
        vec![
            certificate_json(8, "ON_HOLD", Utc::now() + Duration::days(30)),
            active(9),
        ],
    );
    transport.on_get("certificates/9", detail_json(9, "ACTIVE"));
    let gateway = gateway_with(
        test_config(),
        transport.clone(),
        Arc::new(InMemoryCertificateReader::new()),
    );

    let (tx, _rx) = mpsc::channel(16);
    let summary = gateway
        .synchronize(&tx, None, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.emitted, 1);
}

#[tokio::test]
async fn test_unreadable_certificate_store_emits_everything() {
    let transport = Arc::new(MockTransport::new());
    list(&transport, vec![active(10)]);
    transport.on_get("certificates/10", detail_json(10, "ACTIVE"));
    let reader: Arc<dyn CertificateDataReader> = Arc::new(FailingReader);
    let gateway = gateway_with(test_config(), transport.clone(), reader);

    let (tx, _rx) = mpsc::channel(16);
    let summary = gateway
        .synchronize(&tx, None, false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.emitted, 1);
}

#[tokio::test]
async fn test_closed_sink_ends_pass() {
    let transport = Arc::new(MockTransport::new());
    list(&transport, vec![active(11), active(12)]);
    transport.on_get("certificates/11", detail_json(11, "ACTIVE"));
    transport.on_get("certificates/12", detail_json(12, "ACTIVE"));
    let gateway = gateway_with(
        test_config(),
        transport.clone(),
        Arc::new(InMemoryCertificateReader::new()),
    );

    let (tx, rx) = mpsc::channel(16);
    drop(rx);
    let err = gateway
        .synchronize(&tx, None, false, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::SinkClosed));
    assert!(transport
        .requests_to(reqwest::Method::GET, "certificates/12")
        .is_empty());
}

#[tokio::test]
async fn test_cancellation_mid_pass() {
    let transport = Arc::new(MockTransport::new());
    list(&transport, vec![active(21), active(22), active(23)]);
    for id in 21..=23 {
        transport.on_get(&format!("certificates/{}", id), detail_json(id, "ACTIVE"));
    }
    let gateway = gateway_with(
        test_config(),
        transport.clone(),
        Arc::new(InMemoryCertificateReader::new()),
    );

    let (tx, mut rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let consumer_cancel = cancel.clone();

    let consumer = async move {
        let mut received = Vec::new();
        if let Some(record) = rx.recv().await {
            received.push(record);
            consumer_cancel.cancel();
        }
        received
    };
    let producer = async {
        let result = gateway.synchronize(&tx, None, false, &cancel).await;
        drop(tx);
        result
    };

    let (result, received) = tokio::join!(producer, consumer);

    assert!(matches!(result, Err(GatewayError::Cancelled)));
    assert_eq!(received.len(), 1);
    assert!(transport
        .requests_to(reqwest::Method::GET, "certificates/23")
        .is_empty());
}

#[tokio::test]
async fn test_cancelled_before_listing() {
    let transport = Arc::new(MockTransport::new());
    list(&transport, vec![active(1)]);
    let gateway = gateway_with(
        test_config(),
        transport.clone(),
        Arc::new(InMemoryCertificateReader::new()),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let (tx, _rx) = mpsc::channel(1);
    let err = gateway
        .synchronize(&tx, None, false, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled));
}
