//! Translation of ECS certificate statuses into the generic lifecycle status

use crate::models::GenericStatus;
use crate::utils::error::{GatewayError, GatewayResult};

/// Status the thumbprint endpoint reports for certificates it cannot classify
pub const THUMBPRINT_UNKNOWN_STATUS: &str = "UNKNOWN";

/// Map a remote status string onto [`GenericStatus`]
///
/// Matching is case-insensitive. Statuses outside the known vocabulary fail with
/// [`GatewayError::UnknownStatus`] naming `id`.
pub fn translate_status(remote_status: &str, id: &str) -> GatewayResult<GenericStatus> {
    match remote_status.trim().to_ascii_lowercase().as_str() {
        "active" | "ready" | "reissued" | "renewed" | "expired" => Ok(GenericStatus::Generated),
        "pending" => Ok(GenericStatus::ExternalValidation),
        "deactivated" | "suspended" | "revoked" => Ok(GenericStatus::Revoked),
        "declined" => Ok(GenericStatus::Failed),
        _ => Err(GatewayError::UnknownStatus {
            id: id.to_string(),
            status: remote_status.to_string(),
        }),
    }
}

/// Status of a certificate fetched through its thumbprint
///
/// Certificates without a tracking id may come back as `UNKNOWN`; those are treated
/// as awaiting validation.
pub fn translate_thumbprint_status(remote_status: &str, id: &str) -> GatewayResult<GenericStatus> {
    if remote_status.eq_ignore_ascii_case(THUMBPRINT_UNKNOWN_STATUS) {
        return Ok(GenericStatus::ExternalValidation);
    }
    translate_status(remote_status, id)
}
