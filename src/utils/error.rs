//! Error types and handling
//!
//! Every failure the gateway can surface is a variant of [`GatewayError`]. Callers
//! match on the variant to decide whether a failure is an input problem, a remote
//! rejection or a transport fault.

use thiserror::Error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network, DNS or TLS failure talking to the CA (terminal, never retried)
    #[error("Unable to establish connection to the ECS web service: {0}")]
    Transport(String),

    /// Rate limited without a usable Retry-After header
    #[error("Rate limited by the ECS web service: {0}")]
    RateLimited(String),

    /// Structured error envelope returned by the CA
    #[error("ECS API error{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    RemoteApi { status: Option<u16>, message: String },

    /// Remote certificate status outside the known vocabulary
    #[error("Order {id} has unknown status {status}")]
    UnknownStatus { id: String, status: String },

    /// Input, subject or product misconfiguration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Common name missing or without a domain separator
    #[error("Domain cannot be determined from Common Name: {0:?}")]
    InvalidCommonName(String),

    /// Character the CA refuses in a DNS name
    #[error("Underscore is not allowed in DNSName: {0}")]
    InvalidCharacter(String),

    /// Requested organization is not approved on the account
    #[error(
        "Organization {organization} is not a valid Entrust organization for this account. The following organizations are approved: {}.",
        .approved.join(", ")
    )]
    OrganizationNotFound {
        organization: String,
        approved: Vec<String>,
    },

    /// No remaining inventory for the product
    #[error("Inventory for certificate type '{0}' has been used up. To perform the operation, revoke existing certificates or contact Entrust to acquire new inventory.")]
    InventoryExhausted(String),

    /// Prior certificate could not be located
    #[error("Certificate with serial number {0} not found")]
    TrackingIdNotFound(String),

    /// Prior certificate exists but has tracking id 0
    #[error("The tracking ID of the certificate with serial number {0} is 0. This certificate must be renewed or reissued through the Entrust portal.")]
    UnassignedTrackingId(String),

    /// Approval of a pending certificate left it in an unexpected state
    #[error("Unable to approve certificate with trackingId {tracking_id}. Status is neither issued or pending: {status}")]
    ApprovalFailed { tracking_id: i64, status: String },

    /// Operation cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Consumer side of the output queue went away
    #[error("Certificate sink closed")]
    SinkClosed,

    /// Response body could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Whether the error stems from caller input rather than the remote service
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GatewayError::Validation(_)
                | GatewayError::InvalidCommonName(_)
                | GatewayError::InvalidCharacter(_)
        )
    }

    /// Errors that must stop a batch instead of being counted per certificate
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(self, GatewayError::Cancelled | GatewayError::SinkClosed)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Transport("ECS request timed out".to_string())
        } else if err.is_connect() {
            GatewayError::Transport(format!("Failed to connect to ECS: {}", err))
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(format!("JSON parsing error: {}", err))
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
