//! Typed client for the ECS REST resources
//!
//! Every response body is checked for the `errors` marker before it is decoded into
//! its success shape. The check is a plain substring match on the raw body, so a
//! successful payload that happens to contain the word is reported as a failure.

use crate::config::ConnectionConfig;
use crate::models::{
    CertificateDetail, CertificateOperation, CertificateResponse, CertificatesPage, ClientInfo,
    ClientsResponse, ErrorEnvelope, InventoriesResponse, InventoryItem, NewCertificateRequest,
    Organization, OrganizationsResponse, PatchCertificateRequest, ReissueCertificateRequest,
    RemoteCertificate, RenewCertificateRequest, RevokeCertificateRequest, VersionResponse,
};
use crate::services::transport::{HttpTransport, RawResponse, RemoteRequest, Transport};
use crate::utils::error::{GatewayError, GatewayResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Page size used when listing certificates
pub const PAGE_SIZE: u64 = 1000;

/// Substring that marks a response body as an error envelope
pub const ERROR_MARKER: &str = "errors";

const UNKNOWN_FAILURE: &str = "unknown failure";

/// ECS resource client
#[derive(Clone)]
pub struct EcsClient {
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
}

impl EcsClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cancel: CancellationToken::new(),
        }
    }

    /// Client over an HTTP transport built from configuration
    pub fn from_config(config: &ConnectionConfig) -> GatewayResult<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    /// Same client, with every call observing `cancel`
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            cancel,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Send a request and reject error envelopes and non-success statuses
    async fn execute_raw(&self, request: RemoteRequest) -> GatewayResult<RawResponse> {
        let response = self.transport.send(&request, &self.cancel).await?;

        if let Some(err) = detect_error(&response) {
            debug!(
                "ECS: {} {} returned an error envelope: {}",
                request.method, request.resource, err
            );
            return Err(err);
        }
        if !response.is_success() {
            error!(
                "ECS: {} {} failed with status {}",
                request.method, request.resource, response.status
            );
            return Err(GatewayError::RemoteApi {
                status: Some(response.status),
                message: format!(
                    "Request to {} failed: {}",
                    request.resource,
                    truncate(&response.body)
                ),
            });
        }
        Ok(response)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RemoteRequest) -> GatewayResult<T> {
        let resource = request.resource.clone();
        let response = self.execute_raw(request).await?;
        serde_json::from_str(&response.body).map_err(|e| {
            GatewayError::Serialization(format!(
                "Failed to parse response from {}: {}: {}",
                resource,
                e,
                truncate(&response.body)
            ))
        })
    }

    fn json_body<P: Serialize>(payload: &P) -> GatewayResult<serde_json::Value> {
        Ok(serde_json::to_value(payload)?)
    }

    /// `GET application/version`
    pub async fn get_application_version(&self) -> GatewayResult<String> {
        let version: VersionResponse = self
            .execute(RemoteRequest::get("application/version"))
            .await?;
        Ok(version.version)
    }

    /// `GET organizations`
    pub async fn get_organizations(&self) -> GatewayResult<Vec<Organization>> {
        let response: OrganizationsResponse =
            self.execute(RemoteRequest::get("organizations")).await?;
        Ok(response.organizations)
    }

    /// `GET clients`
    pub async fn get_clients(&self) -> GatewayResult<Vec<ClientInfo>> {
        let response: ClientsResponse = self.execute(RemoteRequest::get("clients")).await?;
        Ok(response.clients)
    }

    /// `GET inventories`
    pub async fn get_inventories(&self) -> GatewayResult<Vec<InventoryItem>> {
        let response: InventoriesResponse =
            self.execute(RemoteRequest::get("inventories")).await?;
        Ok(response.inventories)
    }

    pub async fn get_certificates_page(
        &self,
        offset: u64,
        limit: u64,
    ) -> GatewayResult<CertificatesPage> {
        self.execute(
            RemoteRequest::get("certificates")
                .with_query("limit", limit)
                .with_query("offset", offset),
        )
        .await
    }

    /// Every certificate on the account, fetched page by page
    ///
    /// Stops once the received count reaches the total reported by the last page, or
    /// when a page comes back empty.
    pub async fn get_all_certificates(&self) -> GatewayResult<Vec<RemoteCertificate>> {
        let mut certificates = Vec::new();
        let mut offset = 0u64;

        loop {
            let page = self.get_certificates_page(offset, PAGE_SIZE).await?;
            let received = page.certificates.len() as u64;
            let total = page.summary.total.unwrap_or(0);
            certificates.extend(page.certificates);
            offset += received;

            debug!(
                "ECS: received {} certificates ({} of {})",
                received, offset, total
            );

            if received == 0 || offset >= total {
                break;
            }
        }

        Ok(certificates)
    }

    /// `GET certificates/{trackingId}`
    pub async fn get_certificate_by_tracking_id(
        &self,
        tracking_id: i64,
    ) -> GatewayResult<CertificateDetail> {
        self.execute(RemoteRequest::get(format!("certificates/{}", tracking_id)))
            .await
    }

    /// `GET certificates/thumbprints/{thumbprint}`
    pub async fn get_certificate_by_thumbprint(
        &self,
        thumbprint: &str,
    ) -> GatewayResult<CertificateDetail> {
        self.execute(RemoteRequest::get(format!(
            "certificates/thumbprints/{}",
            thumbprint
        )))
        .await
    }

    /// Certificate with the given hexadecimal serial number, if any
    pub async fn get_certificate_by_serial_number(
        &self,
        serial_number: &str,
    ) -> GatewayResult<Option<RemoteCertificate>> {
        let serial = serial_number.trim().trim_start_matches('0');
        let request = RemoteRequest::get("certificates")
            .with_query("limit", 1)
            .with_query("offset", 0)
            .with_query("serialNumber", serial);

        match self.execute::<CertificatesPage>(request).await {
            Ok(page) => Ok(page.certificates.into_iter().next()),
            Err(GatewayError::RemoteApi {
                status: Some(404), ..
            }) => {
                debug!("ECS: no certificate with serial number {}", serial);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Dry run of a new order; consumes no inventory
    pub async fn validate_new_certificate(
        &self,
        payload: &NewCertificateRequest,
    ) -> GatewayResult<()> {
        let mut dry_run = payload.clone();
        dry_run.validate_only = true;

        let body = Self::json_body(&dry_run)?;
        match self
            .execute_raw(RemoteRequest::post("certificates", body))
            .await
        {
            Ok(_) => Ok(()),
            Err(GatewayError::RemoteApi { message, .. }) => Err(GatewayError::Validation(
                format!("Request validation failed. {}", message),
            )),
            Err(e) => Err(e),
        }
    }

    /// `POST certificates`
    pub async fn request_new_certificate(
        &self,
        payload: &NewCertificateRequest,
    ) -> GatewayResult<CertificateResponse> {
        let body = Self::json_body(payload)?;
        self.execute(RemoteRequest::post("certificates", body)).await
    }

    /// `POST certificates/{trackingId}/renewals`
    pub async fn renew_certificate(
        &self,
        tracking_id: i64,
        payload: &RenewCertificateRequest,
    ) -> GatewayResult<CertificateResponse> {
        let body = Self::json_body(payload)?;
        self.execute(RemoteRequest::post(
            format!("certificates/{}/renewals", tracking_id),
            body,
        ))
        .await
    }

    /// `POST certificates/{trackingId}/reissues`
    pub async fn reissue_certificate(
        &self,
        tracking_id: i64,
        payload: &ReissueCertificateRequest,
    ) -> GatewayResult<CertificateResponse> {
        let body = Self::json_body(payload)?;
        self.execute(RemoteRequest::post(
            format!("certificates/{}/reissues", tracking_id),
            body,
        ))
        .await
    }

    /// `POST certificates/{trackingId}/revocations`
    pub async fn revoke_certificate(
        &self,
        tracking_id: i64,
        payload: &RevokeCertificateRequest,
    ) -> GatewayResult<()> {
        let body = Self::json_body(payload)?;
        self.execute_raw(RemoteRequest::post(
            format!("certificates/{}/revocations", tracking_id),
            body,
        ))
        .await?;
        Ok(())
    }

    /// `PATCH certificates/{trackingId}` with the APPROVE operation
    pub async fn approve_certificate(&self, tracking_id: i64) -> GatewayResult<()> {
        let body = Self::json_body(&PatchCertificateRequest {
            operation: CertificateOperation::Approve,
            decline_reason: None,
        })?;
        self.execute_raw(RemoteRequest::patch(
            format!("certificates/{}", tracking_id),
            body,
        ))
        .await?;
        Ok(())
    }
}

/// Error carried by a response body, if the body contains the error marker
pub fn detect_error(response: &RawResponse) -> Option<GatewayError> {
    if !response.body.contains(ERROR_MARKER) {
        return None;
    }

    let envelope: ErrorEnvelope = serde_json::from_str(&response.body).unwrap_or_default();
    let status = envelope
        .status
        .or_else(|| (!response.is_success()).then_some(response.status));
    let message = envelope
        .first_message()
        .unwrap_or(UNKNOWN_FAILURE)
        .to_string();

    Some(GatewayError::RemoteApi { status, message })
}

fn truncate(body: &str) -> String {
    if body.len() > 500 {
        let mut end = 500;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}
