//! Enrollment models: intents, product parameters and ECS order payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{GenericStatus, Tracking};
use crate::utils::error::{GatewayError, GatewayResult};

/// Product parameter keys understood by the gateway
pub mod params {
    pub const LIFETIME_MONTHS: &str = "LifetimeMonths";
    pub const LIFETIME_LEGACY: &str = "Lifetime";
    pub const ORGANIZATION: &str = "Organization";
    pub const CERTIFICATE_USAGE: &str = "CertificateUsage";
    pub const RENEWAL_WINDOW_DAYS: &str = "RenewalWindowDays";
    pub const EMAIL: &str = "Email";
    pub const PHONE: &str = "PhoneNumber";
    pub const NAME: &str = "Name";
    pub const PRIOR_CERT_SN: &str = "PriorCertSN";
}

pub const DEFAULT_LIFETIME_MONTHS: u32 = 12;
pub const DEFAULT_RENEWAL_WINDOW_DAYS: i64 = 90;
/// Largest renewal window accepted from a product parameter, ten years
pub const MAX_RENEWAL_WINDOW_DAYS: i64 = 3650;

/// What the platform asked for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EnrollmentIntent {
    New,
    Renew,
    Reissue,
    RenewOrReissue,
}

impl EnrollmentIntent {
    /// Whether the intent refers to a previously issued certificate
    pub fn needs_prior_certificate(&self) -> bool {
        !matches!(self, EnrollmentIntent::New)
    }
}

/// Intent after RenewOrReissue has been collapsed
///
/// Submission only accepts this type, so an unresolved intent can never reach the CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedIntent {
    New,
    Renew,
    Reissue,
}

impl std::fmt::Display for ResolvedIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedIntent::New => f.write_str("new"),
            ResolvedIntent::Renew => f.write_str("renew"),
            ResolvedIntent::Reissue => f.write_str("reissue"),
        }
    }
}

/// Product id plus the per-template and per-request parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_id: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl ProductInfo {
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<String>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// Non-empty parameter value
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn lifetime_months(&self) -> GatewayResult<u32> {
        let raw = self
            .parameter(params::LIFETIME_MONTHS)
            .or_else(|| self.parameter(params::LIFETIME_LEGACY));
        match raw {
            Some(value) => parse_number(params::LIFETIME_MONTHS, value),
            None => Ok(DEFAULT_LIFETIME_MONTHS),
        }
    }

    pub fn renewal_window_days(&self) -> GatewayResult<i64> {
        let Some(value) = self.parameter(params::RENEWAL_WINDOW_DAYS) else {
            return Ok(DEFAULT_RENEWAL_WINDOW_DAYS);
        };
        let days: i64 = parse_number(params::RENEWAL_WINDOW_DAYS, value)?;
        if !(0..=MAX_RENEWAL_WINDOW_DAYS).contains(&days) {
            return Err(GatewayError::Validation(format!(
                "Product parameter {} must be between 0 and {} days, got {}",
                params::RENEWAL_WINDOW_DAYS,
                MAX_RENEWAL_WINDOW_DAYS,
                days
            )));
        }
        Ok(days)
    }

    pub fn prior_serial_number(&self) -> Option<&str> {
        self.parameter(params::PRIOR_CERT_SN)
    }

    pub fn certificate_usage(&self) -> ExtendedKeyUsage {
        ExtendedKeyUsage::from_usage_hint(self.parameter(params::CERTIFICATE_USAGE).unwrap_or(""))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> GatewayResult<T> {
    value.trim().parse().map_err(|_| {
        GatewayError::Validation(format!(
            "Product parameter {} must be a whole number, got '{}'",
            key, value
        ))
    })
}

/// Extended key usage requested from the CA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedKeyUsage {
    ServerAuth,
    ClientAuth,
    ServerAndClientAuth,
    /// No restriction; sent as an empty string
    Unrestricted,
}

impl ExtendedKeyUsage {
    pub fn from_usage_hint(hint: &str) -> Self {
        match hint.trim().to_ascii_lowercase().as_str() {
            "server" => ExtendedKeyUsage::ServerAuth,
            "client" => ExtendedKeyUsage::ClientAuth,
            "serverclient" => ExtendedKeyUsage::ServerAndClientAuth,
            _ => ExtendedKeyUsage::Unrestricted,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            ExtendedKeyUsage::ServerAuth => "SERVER_AUTH",
            ExtendedKeyUsage::ClientAuth => "CLIENT_AUTH",
            ExtendedKeyUsage::ServerAndClientAuth => "SERVER_AND_CLIENT_AUTH",
            ExtendedKeyUsage::Unrestricted => "",
        }
    }
}

/// Enrollment request from the platform
#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    /// PEM or base64 CSR
    pub csr: String,
    /// Subject DN, e.g. `CN=www.example.com,O=Example`
    pub subject: String,
    /// SANs keyed by type (`Dns`, ...)
    pub san: HashMap<String, Vec<String>>,
    pub product: ProductInfo,
    pub intent: EnrollmentIntent,
}

impl EnrollmentRequest {
    /// DNS subject alternative names
    pub fn dns_names(&self) -> Vec<String> {
        self.san
            .iter()
            .find(|(kind, _)| kind.eq_ignore_ascii_case("dns"))
            .map(|(_, names)| names.clone())
            .unwrap_or_default()
    }
}

/// Result of an enrollment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrollmentResult {
    pub ca_request_id: String,
    pub certificate: Option<String>,
    pub status: GenericStatus,
    pub status_message: String,
}

/// Fields shared by the new, renew and reissue payloads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestBody {
    pub csr: String,
    pub subject_alt_name: Vec<String>,
    pub signing_alg: String,
    pub eku: String,
    pub cn: String,
    pub cert_email: String,
    pub upn: String,
    pub client_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    pub ou: Vec<String>,
    pub password: String,
    pub tracking: Tracking,
    pub end_user_key_storage_agreement: bool,
}

/// Payload of `POST certificates`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewCertificateRequest {
    #[serde(flatten)]
    pub body: CertificateRequestBody,
    pub cert_type: String,
    pub cert_expiry_date: DateTime<Utc>,
    pub cert_lifetime: String,
    pub queue_for_approval: bool,
    /// When true the CA only validates the order and consumes no inventory
    pub validate_only: bool,
}

/// Payload of `POST certificates/{id}/renewals`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenewCertificateRequest {
    #[serde(flatten)]
    pub body: CertificateRequestBody,
    pub cert_expiry_date: DateTime<Utc>,
    pub cert_lifetime: String,
}

/// Payload of `POST certificates/{id}/reissues`
pub type ReissueCertificateRequest = CertificateRequestBody;

/// Operations accepted by `PATCH certificates/{id}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertificateOperation {
    Approve,
    Decline,
}

/// Payload of `PATCH certificates/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchCertificateRequest {
    pub operation: CertificateOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<String>,
}

/// ISO 8601 lifetime in whole years, rounding half to even
pub fn certificate_lifetime(months: u32) -> String {
    let years = (f64::from(months) / 12.0).round_ties_even();
    format!("P{}Y", years as i64)
}
