//! Certificate models for the ECS API and the generic platform records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::{GatewayError, GatewayResult};

/// Generic lifecycle status exposed to the host platform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenericStatus {
    /// Certificate is issued and usable
    Generated,
    /// Order is waiting on validation outside the CA
    ExternalValidation,
    /// Certificate has been revoked, suspended or deactivated
    Revoked,
    /// Order was declined; no certificate exists
    Failed,
}

impl std::fmt::Display for GenericStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GenericStatus::Generated => "GENERATED",
            GenericStatus::ExternalValidation => "EXTERNAL_VALIDATION",
            GenericStatus::Revoked => "REVOKED",
            GenericStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Certificate summary as returned by `GET certificates`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCertificate {
    /// Tracking id of the order; 0 when the CA never assigned one
    #[serde(default)]
    pub tracking_id: i64,
    /// Free-form status string
    #[serde(default)]
    pub status: String,
    /// Certificate URI, the only place the thumbprint appears
    #[serde(default, rename = "uri")]
    pub uri: Option<String>,
    /// Distinguished name
    #[serde(default)]
    pub dn: Option<String>,
    /// Serial number in hexadecimal format
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub issue_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signing_alg: Option<String>,
    #[serde(default)]
    pub eku: Option<String>,
    #[serde(default)]
    pub key_size: Option<u32>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub ou: Vec<String>,
    /// Product code, e.g. STANDARD_SSL
    #[serde(default)]
    pub cert_type: Option<String>,
    #[serde(default)]
    pub domain_used: Option<String>,
    #[serde(default)]
    pub is_third_party: Option<bool>,
}

impl RemoteCertificate {
    /// Thumbprint extracted from `.../thumbprints/<tp>`, upper-cased
    pub fn thumbprint(&self) -> Option<String> {
        let uri = self.uri.as_deref()?;
        let (_, tail) = uri.rsplit_once("/thumbprints/")?;
        let thumbprint = tail.trim_matches('/');
        if thumbprint.is_empty() {
            None
        } else {
            Some(thumbprint.to_uppercase())
        }
    }

    /// Correlation id used by the platform for this certificate
    ///
    /// Returns `None` for tracking id 0 when no thumbprint can be extracted.
    pub fn correlation_id(&self) -> Option<String> {
        if self.tracking_id != 0 {
            Some(self.tracking_id.to_string())
        } else {
            self.thumbprint().map(|tp| thumbprint_correlation_id(&tp))
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        // Missing expiry counts as expired
        self.expires_after.map(|exp| exp <= now).unwrap_or(true)
    }
}

/// Synthetic correlation id for certificates without a tracking id
pub fn thumbprint_correlation_id(thumbprint: &str) -> String {
    format!("0-{}", thumbprint)
}

/// How a correlation id addresses a certificate on the CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaRequestId {
    TrackingId(i64),
    Thumbprint(String),
}

impl CaRequestId {
    /// Parse a tracking id or a `0-<thumbprint>` correlation id
    pub fn parse(ca_request_id: &str) -> GatewayResult<Self> {
        let id = ca_request_id.trim();
        if let Some(thumbprint) = id.strip_prefix("0-") {
            if thumbprint.is_empty() {
                return Err(GatewayError::Validation(format!(
                    "Request id '{}' has an empty thumbprint",
                    ca_request_id
                )));
            }
            return Ok(CaRequestId::Thumbprint(thumbprint.to_uppercase()));
        }

        match id.parse::<i64>() {
            Ok(tracking_id) if tracking_id > 0 => Ok(CaRequestId::TrackingId(tracking_id)),
            _ => Err(GatewayError::Validation(format!(
                "Request id '{}' is neither a tracking id nor a thumbprint id",
                ca_request_id
            ))),
        }
    }
}

impl std::fmt::Display for CaRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaRequestId::TrackingId(id) => write!(f, "{}", id),
            CaRequestId::Thumbprint(tp) => f.write_str(&thumbprint_correlation_id(tp)),
        }
    }
}

/// Certificate detail as returned by `GET certificates/{id}` and the thumbprint lookup
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDetail {
    #[serde(flatten)]
    pub summary: RemoteCertificate,
    #[serde(default)]
    pub subject_alt_name: Vec<SubjectAltName>,
    #[serde(default)]
    pub tracking: Option<Tracking>,
    /// PEM encoded end-entity certificate
    #[serde(default)]
    pub end_entity_cert: Option<String>,
    #[serde(default)]
    pub csr: Option<String>,
    #[serde(default)]
    pub chain_certs: Vec<String>,
    #[serde(default)]
    pub creator_name: Option<String>,
}

impl CertificateDetail {
    /// Revocation date derived from the tracking deactivation flag
    pub fn revocation_date(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.tracking {
            Some(tracking) if tracking.deactivated => Some(tracking.deactivated_on.unwrap_or(now)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectAltName {
    #[serde(rename = "type")]
    pub san_type: String,
    pub value: String,
}

/// Requester tracking block attached to every order
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tracking {
    #[serde(default)]
    pub tracking_info: String,
    #[serde(default)]
    pub requester_name: String,
    #[serde(default)]
    pub requester_email: String,
    #[serde(default)]
    pub requester_phone: String,
    #[serde(default)]
    pub deactivated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivated_on: Option<DateTime<Utc>>,
}

/// Paging summary of `GET certificates`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Summary {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub elapsed: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub sort: Option<String>,
}

/// One page of `GET certificates`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CertificatesPage {
    #[serde(default)]
    pub summary: Summary,
    #[serde(default)]
    pub certificates: Vec<RemoteCertificate>,
}

/// Response of the create, renew and reissue calls
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CertificateResponse {
    pub tracking_id: i64,
    #[serde(default)]
    pub end_entity_cert: Option<String>,
    #[serde(default)]
    pub chain_certs: Vec<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub expires_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pickup_url: Option<String>,
    #[serde(default)]
    pub pkcs12: Option<String>,
}

/// Normalized certificate record handed to the platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenericCertificateRecord {
    /// Tracking id or `0-<thumbprint>`
    pub ca_request_id: String,
    pub status: GenericStatus,
    /// PEM body, absent while pending or declined
    pub certificate: Option<String>,
    pub csr: Option<String>,
    pub product_id: Option<String>,
    pub revocation_date: Option<DateTime<Utc>>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

impl GenericCertificateRecord {
    /// Build a record from a freshly fetched detail
    pub fn from_detail(
        ca_request_id: String,
        status: GenericStatus,
        detail: &CertificateDetail,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            ca_request_id,
            status,
            certificate: non_empty(&detail.end_entity_cert),
            csr: non_empty(&detail.csr),
            product_id: detail.summary.cert_type.clone(),
            revocation_date: detail.revocation_date(now),
        }
    }
}
