//! Reconciliation of the remote certificate inventory with the platform
//!
//! A pass fetches every certificate on the account once and emits a fresh record for
//! each certificate whose status the platform does not know yet or has recorded
//! differently. Errors on one certificate are logged and counted; only cancellation
//! and a closed sink end the pass early.

use crate::models::{CaRequestId, GenericCertificateRecord, GenericStatus, RemoteCertificate};
use crate::services::ecs_client::EcsClient;
use crate::services::reader::CertificateDataReader;
use crate::services::status::{translate_status, translate_thumbprint_status};
use crate::utils::error::{GatewayError, GatewayResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters of one synchronization pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Certificates returned by the CA
    pub total: usize,
    pub emitted: usize,
    /// Status already known to the platform
    pub unchanged: usize,
    pub expired_skipped: usize,
    /// Declined orders, which have no certificate
    pub denied: usize,
    /// No tracking id and no thumbprint
    pub skipped: usize,
    /// Per-certificate errors
    pub failed: usize,
}

impl SyncSummary {
    fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Emitted => self.emitted += 1,
            SyncOutcome::Unchanged => self.unchanged += 1,
            SyncOutcome::ExpiredSkipped => self.expired_skipped += 1,
            SyncOutcome::Denied => self.denied += 1,
            SyncOutcome::NoIdentity => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncOutcome {
    Emitted,
    Unchanged,
    ExpiredSkipped,
    Denied,
    NoIdentity,
}

/// Fetch a certificate and normalize it into a platform record
pub async fn fetch_record(
    client: &EcsClient,
    ca_request_id: &str,
    now: DateTime<Utc>,
) -> GatewayResult<GenericCertificateRecord> {
    let id = CaRequestId::parse(ca_request_id)?;
    let correlation_id = id.to_string();

    let (detail, status) = match &id {
        CaRequestId::TrackingId(tracking_id) => {
            let detail = client.get_certificate_by_tracking_id(*tracking_id).await?;
            let status = translate_status(&detail.summary.status, &correlation_id)?;
            (detail, status)
        }
        CaRequestId::Thumbprint(thumbprint) => {
            let detail = client.get_certificate_by_thumbprint(thumbprint).await?;
            let status = translate_thumbprint_status(&detail.summary.status, &correlation_id)?;
            (detail, status)
        }
    };

    Ok(GenericCertificateRecord::from_detail(
        correlation_id,
        status,
        &detail,
        now,
    ))
}

/// Runs synchronization passes
#[derive(Clone)]
pub struct Synchronizer {
    client: EcsClient,
    reader: Arc<dyn CertificateDataReader>,
    ignore_expired: bool,
}

impl Synchronizer {
    pub fn new(
        client: EcsClient,
        reader: Arc<dyn CertificateDataReader>,
        ignore_expired: bool,
    ) -> Self {
        Self {
            client,
            reader,
            ignore_expired,
        }
    }

    /// Run one pass, sending records into `sink`
    ///
    /// `last_sync` is informational; the CA is always listed in full. With
    /// `full_sync` every certificate with an identity is emitted.
    pub async fn synchronize(
        &self,
        sink: &mpsc::Sender<GenericCertificateRecord>,
        last_sync: Option<DateTime<Utc>>,
        full_sync: bool,
        cancel: &CancellationToken,
    ) -> GatewayResult<SyncSummary> {
        info!(
            "Starting {} synchronization (last sync: {})",
            if full_sync { "full" } else { "incremental" },
            last_sync
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );

        let client = self.client.with_cancellation(cancel.clone());
        let certificates = client.get_all_certificates().await?;
        let now = Utc::now();

        let mut summary = SyncSummary {
            total: certificates.len(),
            ..Default::default()
        };

        for certificate in &certificates {
            if cancel.is_cancelled() {
                warn!(
                    "Synchronization cancelled after {} of {} certificates",
                    summary.emitted + summary.unchanged,
                    summary.total
                );
                return Err(GatewayError::Cancelled);
            }

            match self
                .process(&client, certificate, full_sync, now, sink, cancel)
                .await
            {
                Ok(outcome) => summary.record(outcome),
                Err(e) if e.is_fatal_for_batch() => return Err(e),
                Err(e) => {
                    error!(
                        tracking_id = certificate.tracking_id,
                        "Failed to synchronize certificate: {}", e
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            total = summary.total,
            emitted = summary.emitted,
            unchanged = summary.unchanged,
            expired_skipped = summary.expired_skipped,
            denied = summary.denied,
            skipped = summary.skipped,
            failed = summary.failed,
            "Synchronization complete"
        );
        Ok(summary)
    }

    async fn process(
        &self,
        client: &EcsClient,
        certificate: &RemoteCertificate,
        full_sync: bool,
        now: DateTime<Utc>,
        sink: &mpsc::Sender<GenericCertificateRecord>,
        cancel: &CancellationToken,
    ) -> GatewayResult<SyncOutcome> {
        if self.ignore_expired && certificate.is_expired_at(now) {
            debug!(
                tracking_id = certificate.tracking_id,
                "Skipping expired certificate"
            );
            return Ok(SyncOutcome::ExpiredSkipped);
        }

        let Some(correlation_id) = certificate.correlation_id() else {
            warn!(
                "Skipping certificate without tracking id or thumbprint (uri: {:?})",
                certificate.uri
            );
            return Ok(SyncOutcome::NoIdentity);
        };

        let status = if certificate.tracking_id == 0 {
            translate_thumbprint_status(&certificate.status, &correlation_id)?
        } else {
            translate_status(&certificate.status, &correlation_id)?
        };
        if status == GenericStatus::Failed {
            debug!("Skipping declined order {}", correlation_id);
            return Ok(SyncOutcome::Denied);
        }

        let known = match self.reader.get_status_by_request_id(&correlation_id).await {
            Ok(known) => known,
            Err(e) => {
                debug!("No local status for {}: {:#}", correlation_id, e);
                None
            }
        };
        if !full_sync && known == Some(status) {
            return Ok(SyncOutcome::Unchanged);
        }

        let record = fetch_record(client, &correlation_id, now).await?;
        debug!(
            "Emitting {} with status {} (known: {:?})",
            correlation_id, record.status, known
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            sent = sink.send(record) => sent.map_err(|_| GatewayError::SinkClosed)?,
        }
        Ok(SyncOutcome::Emitted)
    }
}
