//! Read access to certificates the host platform already knows about

use crate::models::GenericStatus;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Point queries against the platform's certificate database
///
/// Errors are reported through `anyhow`; callers treat a failed lookup like a
/// missing one where the distinction does not matter.
#[async_trait]
pub trait CertificateDataReader: Send + Sync {
    /// Correlation id of the certificate with the given serial number
    async fn get_request_id_by_serial_number(&self, serial_number: &str)
        -> Result<Option<String>>;

    /// Expiration of the certificate with the given correlation id
    async fn get_expiration_date_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Last status the platform recorded for the given correlation id
    async fn get_status_by_request_id(&self, request_id: &str) -> Result<Option<GenericStatus>>;
}

#[derive(Debug, Clone)]
struct KnownCertificate {
    serial_number: Option<String>,
    expires: Option<DateTime<Utc>>,
    status: GenericStatus,
}

/// In-memory reader
///
/// Used by the CLI, which has no platform database, and by tests. Records can be
/// fed back after a synchronization so later passes only see changes.
#[derive(Debug, Default)]
pub struct InMemoryCertificateReader {
    records: RwLock<HashMap<String, KnownCertificate>>,
}

impl InMemoryCertificateReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record
    pub async fn upsert(
        &self,
        request_id: impl Into<String>,
        serial_number: Option<String>,
        expires: Option<DateTime<Utc>>,
        status: GenericStatus,
    ) {
        let mut records = self.records.write().await;
        records.insert(
            request_id.into(),
            KnownCertificate {
                serial_number: serial_number.map(|s| normalize_serial(&s)),
                expires,
                status,
            },
        );
    }

    /// Record only the status of a certificate, keeping other fields
    pub async fn record_status(&self, request_id: &str, status: GenericStatus) {
        let mut records = self.records.write().await;
        records
            .entry(request_id.to_string())
            .and_modify(|r| r.status = status)
            .or_insert(KnownCertificate {
                serial_number: None,
                expires: None,
                status,
            });
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn normalize_serial(serial: &str) -> String {
    serial.trim().trim_start_matches('0').to_ascii_uppercase()
}

#[async_trait]
impl CertificateDataReader for InMemoryCertificateReader {
    async fn get_request_id_by_serial_number(
        &self,
        serial_number: &str,
    ) -> Result<Option<String>> {
        let wanted = normalize_serial(serial_number);
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|(_, r)| r.serial_number.as_deref() == Some(wanted.as_str()))
            .map(|(id, _)| id.clone()))
    }

    async fn get_expiration_date_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let records = self.records.read().await;
        Ok(records.get(request_id).and_then(|r| r.expires))
    }

    async fn get_status_by_request_id(&self, request_id: &str) -> Result<Option<GenericStatus>> {
        let records = self.records.read().await;
        Ok(records.get(request_id).map(|r| r.status))
    }
}
