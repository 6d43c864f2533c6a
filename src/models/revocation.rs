//! Revocation reasons and the ECS revocation payload

use serde::{Deserialize, Serialize};

/// CRL reason derived from the platform's numeric reason code
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CrlReason {
    KeyCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    Unspecified,
}

impl CrlReason {
    /// Map an RFC 5280 style reason code
    ///
    /// CA compromise (2) folds into key compromise and certificate hold (6) into
    /// cessation of operation, since the CA accepts neither from subscribers.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 | 2 => CrlReason::KeyCompromise,
            3 => CrlReason::AffiliationChanged,
            4 => CrlReason::Superseded,
            5 | 6 => CrlReason::CessationOfOperation,
            _ => CrlReason::AffiliationChanged,
        }
    }

    /// Reason actually transmitted; ECS only accepts keyCompromise and unspecified
    pub fn for_transmission(self) -> Self {
        match self {
            CrlReason::KeyCompromise => CrlReason::KeyCompromise,
            _ => CrlReason::Unspecified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CrlReason::KeyCompromise => "keyCompromise",
            CrlReason::AffiliationChanged => "affiliationChanged",
            CrlReason::Superseded => "superseded",
            CrlReason::CessationOfOperation => "cessationOfOperation",
            CrlReason::Unspecified => "unspecified",
        }
    }
}

impl std::fmt::Display for CrlReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `POST certificates/{id}/revocations`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevokeCertificateRequest {
    pub crl_reason: CrlReason,
    pub revocation_comment: String,
}
