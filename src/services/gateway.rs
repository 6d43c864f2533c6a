//! The gateway adapter
//!
//! One [`EcsGateway`] owns one configuration and one resource client for its whole
//! lifetime and exposes every operation the host platform calls.

use crate::config::GatewayConfig;
use crate::models::{
    CaRequestId, CrlReason, EnrollmentRequest, EnrollmentResult, GenericCertificateRecord,
    GenericStatus, RevokeCertificateRequest,
};
use crate::services::ecs_client::EcsClient;
use crate::services::enrollment::EnrollmentOrchestrator;
use crate::services::reader::CertificateDataReader;
use crate::services::sync::{fetch_record, SyncSummary, Synchronizer};
use crate::utils::error::{GatewayError, GatewayResult};
use crate::utils::validation::is_blank;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// ECS certificate authority gateway
#[derive(Clone)]
pub struct EcsGateway {
    config: GatewayConfig,
    client: EcsClient,
    enrollment: EnrollmentOrchestrator,
    synchronizer: Synchronizer,
}

impl EcsGateway {
    /// Build a gateway talking HTTP to the configured ECS endpoint
    pub fn new(
        config: GatewayConfig,
        reader: Arc<dyn CertificateDataReader>,
    ) -> GatewayResult<Self> {
        let client = EcsClient::from_config(&config.connection)?;
        Ok(Self::with_client(config, client, reader))
    }

    /// Build a gateway over an existing client
    pub fn with_client(
        config: GatewayConfig,
        client: EcsClient,
        reader: Arc<dyn CertificateDataReader>,
    ) -> Self {
        let enrollment = EnrollmentOrchestrator::new(
            client.clone(),
            Arc::clone(&reader),
            config.requester.clone(),
        );
        let synchronizer = Synchronizer::new(client.clone(), reader, config.ignore_expired);

        Self {
            config,
            client,
            enrollment,
            synchronizer,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn client(&self) -> &EcsClient {
        &self.client
    }

    /// Enroll a new, renewed or reissued certificate
    pub async fn enroll(&self, request: &EnrollmentRequest) -> GatewayResult<EnrollmentResult> {
        self.enrollment.enroll(request).await
    }

    /// Reconcile the CA inventory into `sink`
    pub async fn synchronize(
        &self,
        sink: &mpsc::Sender<GenericCertificateRecord>,
        last_sync: Option<DateTime<Utc>>,
        full_sync: bool,
        cancel: &CancellationToken,
    ) -> GatewayResult<SyncSummary> {
        self.synchronizer
            .synchronize(sink, last_sync, full_sync, cancel)
            .await
    }

    /// Current record of one certificate
    pub async fn get_single_record(
        &self,
        ca_request_id: &str,
    ) -> GatewayResult<GenericCertificateRecord> {
        fetch_record(&self.client, ca_request_id, Utc::now()).await
    }

    /// Revoke an issued certificate
    ///
    /// `reason_code` is the RFC 5280 reason; the CA only receives keyCompromise or
    /// unspecified.
    pub async fn revoke(
        &self,
        ca_request_id: &str,
        hex_serial_number: &str,
        reason_code: u32,
    ) -> GatewayResult<GenericStatus> {
        let tracking_id = match CaRequestId::parse(ca_request_id)? {
            CaRequestId::TrackingId(id) => id,
            CaRequestId::Thumbprint(_) => {
                return Err(GatewayError::Validation(format!(
                    "Certificate {} has no tracking id and must be revoked through the Entrust portal",
                    ca_request_id
                )))
            }
        };

        let current = self.get_single_record(ca_request_id).await?;
        if current.status != GenericStatus::Generated {
            return Err(GatewayError::Validation(format!(
                "Request {} was not found or is not in an issued state ({})",
                ca_request_id, current.status
            )));
        }

        let reason = CrlReason::from_code(reason_code);
        let payload = RevokeCertificateRequest {
            crl_reason: reason.for_transmission(),
            revocation_comment: format!(
                "Revoked by ECS Gateway for the following reason: {}",
                reason
            ),
        };

        info!(
            tracking_id,
            serial_number = hex_serial_number,
            "Revoking certificate ({})",
            reason
        );
        self.client.revoke_certificate(tracking_id, &payload).await?;
        Ok(GenericStatus::Revoked)
    }

    /// Check that the CA answers with the configured credentials
    pub async fn ping(&self) -> GatewayResult<()> {
        match self.client.get_clients().await {
            Ok(clients) => {
                info!("ECS ping succeeded ({} clients)", clients.len());
                Ok(())
            }
            Err(e) => {
                error!("ECS ping failed: {}", e);
                Err(e)
            }
        }
    }

    /// Product types with inventory on the account
    ///
    /// Failures are logged and produce an empty list.
    pub async fn get_product_ids(&self) -> Vec<String> {
        match self.client.get_inventories().await {
            Ok(inventories) => inventories
                .into_iter()
                .map(|item| item.product_type)
                .collect(),
            Err(e) => {
                error!("Unable to list ECS products: {}", e);
                Vec::new()
            }
        }
    }

    /// Validate a candidate configuration against the CA it points at
    pub async fn validate_connection_info(candidate: &GatewayConfig) -> GatewayResult<()> {
        if !candidate.enabled {
            warn!("Gateway is disabled, skipping connection validation");
            return Ok(());
        }
        let client = EcsClient::from_config(&candidate.connection)?;
        validate_connection_with(&client, candidate).await
    }

    /// Check that a product id is sold on this account
    pub async fn validate_product_info(&self, product_id: &str) -> GatewayResult<()> {
        let inventories = self.client.get_inventories().await?;
        if inventories.iter().any(|item| item.matches_product(product_id)) {
            Ok(())
        } else {
            let known: Vec<_> = inventories.into_iter().map(|i| i.product_type).collect();
            Err(GatewayError::Validation(format!(
                "Product {} is not available on this account. Available products: {}",
                product_id,
                known.join(", ")
            )))
        }
    }

    pub async fn application_version(&self) -> GatewayResult<String> {
        self.client.get_application_version().await
    }
}

/// Collect every problem with `candidate` into one validation error
pub async fn validate_connection_with(
    client: &EcsClient,
    candidate: &GatewayConfig,
) -> GatewayResult<()> {
    if !candidate.enabled {
        warn!("Gateway is disabled, skipping connection validation");
        return Ok(());
    }

    let mut problems = Vec::new();
    let connection = &candidate.connection;
    let requester = &candidate.requester;

    if connection.username.trim().is_empty() {
        problems.push("Username is required.".to_string());
    }
    if connection.password.trim().is_empty() {
        problems.push("Password is required.".to_string());
    }
    if is_blank(requester.name.as_deref()) {
        problems.push("Requester name is required.".to_string());
    }
    if is_blank(requester.email.as_deref()) {
        problems.push("Requester email is required.".to_string());
    }
    if is_blank(requester.phone_number.as_deref()) {
        problems.push("Requester phone number is required.".to_string());
    }

    match client.get_clients().await {
        Ok(clients) if clients.is_empty() => {
            problems.push("No clients are available for this account.".to_string());
        }
        Ok(_) => {}
        Err(e) => problems.push(format!("Unable to retrieve clients: {}", e)),
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::Validation(problems.join("\n")))
    }
}
