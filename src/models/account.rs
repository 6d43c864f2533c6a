//! Account-level ECS resources: organizations, clients, inventory and version

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verification status an organization needs before it can be used for orders
pub const APPROVED_STATUS: &str = "APPROVED";

/// Client id used when no organization is requested
pub const DEFAULT_CLIENT_ID: i64 = 1;

/// Organization registered on the ECS account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub name: String,
    #[serde(default)]
    pub verification_status: String,
    pub client_id: i64,
}

impl Organization {
    pub fn is_approved(&self) -> bool {
        self.verification_status.eq_ignore_ascii_case(APPROVED_STATUS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrganizationsResponse {
    #[serde(default)]
    pub organizations: Vec<Organization>,
}

/// Client (sub-account) on the ECS account
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client id; the primary client is 1
    pub client_id: i64,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub friendly_client_name: Option<String>,
    #[serde(default)]
    pub verification_status: Option<String>,
    #[serde(default, rename = "evVerificationStatus")]
    pub ev_verification_status: Option<String>,
    #[serde(default)]
    pub ov_expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ev_expiry_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientsResponse {
    #[serde(default)]
    pub clients: Vec<ClientInfo>,
}

/// Inventory of one product type
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub product_type: String,
    /// Total inventory ever added to the account
    #[serde(default)]
    pub total_count: Option<i64>,
    /// Unused, unexpired inventory
    #[serde(default)]
    pub remaining_count: Option<i64>,
    #[serde(default)]
    pub used_count: Option<i64>,
}

impl InventoryItem {
    pub fn matches_product(&self, product_id: &str) -> bool {
        self.product_type.eq_ignore_ascii_case(product_id)
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining_count.unwrap_or(0) > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InventoriesResponse {
    #[serde(default)]
    pub inventories: Vec<InventoryItem>,
}

/// Response of `GET application/version`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

/// Message inside the ECS error envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    #[serde(default)]
    pub message: String,
}

/// `{ "errors": [{ "message": ... }], "status": ... }`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub errors: Vec<ErrorMessage>,
    #[serde(default)]
    pub status: Option<u16>,
}

impl ErrorEnvelope {
    /// First message of the envelope, the one surfaced to callers
    pub fn first_message(&self) -> Option<&str> {
        self.errors
            .first()
            .map(|e| e.message.as_str())
            .filter(|m| !m.is_empty())
    }
}
