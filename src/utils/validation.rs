//! Input validation utilities

use crate::utils::error::{GatewayError, GatewayResult};

/// Validate the common name of an order
///
/// The CA rejects underscores in DNS names and needs a domain to validate against.
pub fn validate_common_name(common_name: &str) -> GatewayResult<()> {
    if common_name.contains('_') {
        return Err(GatewayError::InvalidCharacter(common_name.to_string()));
    }
    if common_name.trim().is_empty() || !common_name.contains('.') {
        return Err(GatewayError::InvalidCommonName(common_name.to_string()));
    }
    Ok(())
}

/// Validate a DNS subject alternative name
pub fn validate_dns_name(name: &str) -> GatewayResult<()> {
    if name.contains('_') {
        return Err(GatewayError::InvalidCharacter(name.to_string()));
    }
    Ok(())
}

/// Whether an optional setting is missing or blank
pub fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}
