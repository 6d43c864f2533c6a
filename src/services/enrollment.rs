//! Enrollment orchestration
//!
//! Turns an [`EnrollmentRequest`] into one ECS order. Everything that can be
//! checked locally (subject, product parameters) is checked before the first remote
//! call, and every lookup that can fail runs before the order is submitted, so a
//! failed enrollment never leaves a partial order behind.

use crate::config::RequesterDefaults;
use crate::models::{
    certificate_lifetime, params, CertificateDetail, CertificateRequestBody, CertificateResponse,
    EnrollmentIntent, EnrollmentRequest, EnrollmentResult, ExtendedKeyUsage, GenericStatus,
    NewCertificateRequest, ProductInfo, RenewCertificateRequest, ResolvedIntent, Tracking,
    DEFAULT_CLIENT_ID, MAX_RENEWAL_WINDOW_DAYS,
};
use crate::services::ecs_client::EcsClient;
use crate::services::reader::CertificateDataReader;
use crate::services::status::translate_status;
use crate::utils::error::{GatewayError, GatewayResult};
use crate::utils::subject::SubjectName;
use crate::utils::validation::{validate_common_name, validate_dns_name};
use chrono::{DateTime, Duration, Months, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FALLBACK_EMAIL: &str = "email@email.invalid";
const FALLBACK_PHONE: &str = "0000000000";
const FALLBACK_NAME: &str = "TestUser";
const SIGNING_ALGORITHM: &str = "SHA-2";

/// Requester and subject details of one order
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectAttributes {
    pub common_name: String,
    pub organization: Option<String>,
    pub email: String,
    pub phone: String,
    pub name: String,
    pub dns_names: Vec<String>,
}

impl SubjectAttributes {
    /// Derive and validate the attributes of a request
    ///
    /// Per-request parameters win over the subject, which wins over the configured
    /// requester, which wins over a fixed fallback.
    pub fn derive(request: &EnrollmentRequest, defaults: &RequesterDefaults) -> GatewayResult<Self> {
        let subject = SubjectName::parse(&request.subject);
        let product = &request.product;

        let common_name = subject.common_name().unwrap_or_default().to_string();
        validate_common_name(&common_name)?;

        let dns_names = request.dns_names();
        for name in &dns_names {
            validate_dns_name(name)?;
        }

        let organization = product
            .parameter(params::ORGANIZATION)
            .or_else(|| subject.organization())
            .map(str::to_string);

        let email = product
            .parameter(params::EMAIL)
            .or_else(|| subject.email())
            .or_else(|| configured(&defaults.email))
            .unwrap_or(FALLBACK_EMAIL)
            .to_string();

        let phone = product
            .parameter(params::PHONE)
            .or_else(|| configured(&defaults.phone_number))
            .unwrap_or(FALLBACK_PHONE)
            .to_string();

        let name = product
            .parameter(params::NAME)
            .or_else(|| configured(&defaults.name))
            .unwrap_or(FALLBACK_NAME)
            .to_string();

        Ok(Self {
            common_name,
            organization,
            email,
            phone,
            name,
            dns_names,
        })
    }

    fn tracking(&self) -> Tracking {
        Tracking {
            tracking_info: String::new(),
            requester_name: self.name.clone(),
            requester_email: self.email.clone(),
            requester_phone: self.phone.clone(),
            deactivated: false,
            deactivated_on: None,
        }
    }
}

fn configured(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Renew when the prior certificate expires inside the renewal window, else reissue
///
/// The window spans `window_days` on both sides of `now`, clamped to
/// `0..=MAX_RENEWAL_WINDOW_DAYS`; bounds past the calendar saturate.
pub fn resolve_renewal_intent(
    expiration: DateTime<Utc>,
    now: DateTime<Utc>,
    window_days: i64,
) -> ResolvedIntent {
    let window = Duration::days(window_days.clamp(0, MAX_RENEWAL_WINDOW_DAYS));
    let earliest = now
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let latest = now
        .checked_add_signed(window)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    if expiration > earliest && expiration <= latest {
        ResolvedIntent::Renew
    } else {
        ResolvedIntent::Reissue
    }
}

/// Validated order parameters, assembled before any mutating call
struct OrderPlan {
    intent: ResolvedIntent,
    prior_tracking_id: Option<i64>,
    client_id: i64,
    attributes: SubjectAttributes,
    eku: ExtendedKeyUsage,
    lifetime_months: u32,
}

/// Drives one enrollment from request to final status
#[derive(Clone)]
pub struct EnrollmentOrchestrator {
    client: EcsClient,
    reader: Arc<dyn CertificateDataReader>,
    requester: RequesterDefaults,
}

impl EnrollmentOrchestrator {
    pub fn new(
        client: EcsClient,
        reader: Arc<dyn CertificateDataReader>,
        requester: RequesterDefaults,
    ) -> Self {
        Self {
            client,
            reader,
            requester,
        }
    }

    pub async fn enroll(&self, request: &EnrollmentRequest) -> GatewayResult<EnrollmentResult> {
        self.enroll_at(request, Utc::now()).await
    }

    /// Enroll with an explicit clock
    pub async fn enroll_at(
        &self,
        request: &EnrollmentRequest,
        now: DateTime<Utc>,
    ) -> GatewayResult<EnrollmentResult> {
        info!(
            "Enrolling {:?} for product {}",
            request.intent, request.product.product_id
        );

        let plan = self.plan(request, now).await?;
        debug!(
            intent = %plan.intent,
            client_id = plan.client_id,
            "Submitting {} order for {}",
            plan.intent,
            plan.attributes.common_name
        );

        let response = self.submit(request, &plan, now).await?;
        info!(
            tracking_id = response.tracking_id,
            "ECS accepted {} order",
            plan.intent
        );

        self.resolve_final_status(response).await
    }

    async fn plan(&self, request: &EnrollmentRequest, now: DateTime<Utc>) -> GatewayResult<OrderPlan> {
        let product = &request.product;

        // Local checks first; nothing below may run for a malformed request
        let attributes = SubjectAttributes::derive(request, &self.requester)?;
        let lifetime_months = product.lifetime_months()?;
        let renewal_window_days = product.renewal_window_days()?;
        let eku = product.certificate_usage();

        let prior_tracking_id = if request.intent.needs_prior_certificate() {
            Some(self.resolve_tracking_id(product).await?)
        } else {
            None
        };

        let client_id = self
            .resolve_client_id(attributes.organization.as_deref())
            .await?;
        self.ensure_inventory(&product.product_id).await?;

        let intent = match request.intent {
            EnrollmentIntent::New => ResolvedIntent::New,
            EnrollmentIntent::Renew => ResolvedIntent::Renew,
            EnrollmentIntent::Reissue => ResolvedIntent::Reissue,
            EnrollmentIntent::RenewOrReissue => {
                self.collapse_renew_or_reissue(product, renewal_window_days, now)
                    .await?
            }
        };

        Ok(OrderPlan {
            intent,
            prior_tracking_id,
            client_id,
            attributes,
            eku,
            lifetime_months,
        })
    }

    /// Tracking id of the certificate named by `PriorCertSN`
    async fn resolve_tracking_id(&self, product: &ProductInfo) -> GatewayResult<i64> {
        let serial = product.prior_serial_number().ok_or_else(|| {
            GatewayError::Validation(format!(
                "Product parameter {} is required to renew or reissue a certificate",
                params::PRIOR_CERT_SN
            ))
        })?;

        let certificate = self
            .client
            .get_certificate_by_serial_number(serial)
            .await?
            .ok_or_else(|| GatewayError::TrackingIdNotFound(serial.to_string()))?;

        if certificate.tracking_id == 0 {
            warn!("Certificate with serial number {} has no tracking id", serial);
            return Err(GatewayError::UnassignedTrackingId(serial.to_string()));
        }

        debug!(
            tracking_id = certificate.tracking_id,
            "Resolved prior certificate {}", serial
        );
        Ok(certificate.tracking_id)
    }

    async fn resolve_client_id(&self, organization: Option<&str>) -> GatewayResult<i64> {
        let approved: Vec<_> = self
            .client
            .get_organizations()
            .await?
            .into_iter()
            .filter(|org| org.is_approved())
            .collect();

        let Some(organization) = organization.filter(|o| !o.trim().is_empty()) else {
            return Ok(DEFAULT_CLIENT_ID);
        };

        approved
            .iter()
            .find(|org| org.name.eq_ignore_ascii_case(organization))
            .map(|org| org.client_id)
            .ok_or_else(|| GatewayError::OrganizationNotFound {
                organization: organization.to_string(),
                approved: approved.iter().map(|org| org.name.clone()).collect(),
            })
    }

    async fn ensure_inventory(&self, product_id: &str) -> GatewayResult<()> {
        let inventories = self.client.get_inventories().await?;
        let available = inventories
            .iter()
            .any(|item| item.matches_product(product_id) && item.has_remaining());

        if available {
            Ok(())
        } else {
            warn!("No inventory left for {}", product_id);
            Err(GatewayError::InventoryExhausted(product_id.to_string()))
        }
    }

    async fn collapse_renew_or_reissue(
        &self,
        product: &ProductInfo,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> GatewayResult<ResolvedIntent> {
        let serial = product.prior_serial_number().unwrap_or_default();

        let request_id = self
            .reader
            .get_request_id_by_serial_number(serial)
            .await
            .map_err(|e| {
                GatewayError::TrackingIdNotFound(format!("{} ({:#})", serial, e))
            })?
            .ok_or_else(|| GatewayError::TrackingIdNotFound(serial.to_string()))?;

        let expiration = self
            .reader
            .get_expiration_date_by_request_id(&request_id)
            .await
            .map_err(|e| {
                GatewayError::TrackingIdNotFound(format!("{} ({:#})", serial, e))
            })?
            .ok_or_else(|| GatewayError::TrackingIdNotFound(serial.to_string()))?;

        let intent = resolve_renewal_intent(expiration, now, window_days);
        info!(
            "Certificate {} expires {}; renewal window {} days, choosing {}",
            serial, expiration, window_days, intent
        );
        Ok(intent)
    }

    fn request_body(
        request: &EnrollmentRequest,
        plan: &OrderPlan,
        org: Option<String>,
    ) -> CertificateRequestBody {
        let attributes = &plan.attributes;
        CertificateRequestBody {
            csr: request.csr.clone(),
            subject_alt_name: attributes.dns_names.clone(),
            signing_alg: SIGNING_ALGORITHM.to_string(),
            eku: plan.eku.as_wire().to_string(),
            cn: attributes.common_name.clone(),
            cert_email: attributes.email.clone(),
            upn: attributes.email.clone(),
            client_id: plan.client_id,
            org,
            ou: Vec::new(),
            password: String::new(),
            tracking: attributes.tracking(),
            end_user_key_storage_agreement: true,
        }
    }

    async fn submit(
        &self,
        request: &EnrollmentRequest,
        plan: &OrderPlan,
        now: DateTime<Utc>,
    ) -> GatewayResult<CertificateResponse> {
        let expiry = now
            .checked_add_months(Months::new(plan.lifetime_months))
            .ok_or_else(|| {
                GatewayError::Validation(format!(
                    "Lifetime of {} months is out of range",
                    plan.lifetime_months
                ))
            })?;
        let lifetime = certificate_lifetime(plan.lifetime_months);

        match (plan.intent, plan.prior_tracking_id) {
            (ResolvedIntent::New, _) => {
                let payload = NewCertificateRequest {
                    body: Self::request_body(request, plan, plan.attributes.organization.clone()),
                    cert_type: request.product.product_id.to_uppercase(),
                    cert_expiry_date: expiry,
                    cert_lifetime: lifetime,
                    queue_for_approval: false,
                    validate_only: false,
                };
                self.client.validate_new_certificate(&payload).await?;
                self.client.request_new_certificate(&payload).await
            }
            (ResolvedIntent::Renew, Some(tracking_id)) => {
                let payload = RenewCertificateRequest {
                    body: Self::request_body(request, plan, None),
                    cert_expiry_date: expiry,
                    cert_lifetime: lifetime,
                };
                self.client.renew_certificate(tracking_id, &payload).await
            }
            (ResolvedIntent::Reissue, Some(tracking_id)) => {
                let payload = Self::request_body(request, plan, None);
                self.client.reissue_certificate(tracking_id, &payload).await
            }
            (intent, None) => Err(GatewayError::Validation(format!(
                "A {} request requires the prior certificate serial number",
                intent
            ))),
        }
    }

    async fn resolve_final_status(
        &self,
        response: CertificateResponse,
    ) -> GatewayResult<EnrollmentResult> {
        let tracking_id = response.tracking_id;
        let id = tracking_id.to_string();

        let detail = self.client.get_certificate_by_tracking_id(tracking_id).await?;
        let status = translate_status(&detail.summary.status, &id)?;

        let result = match status {
            GenericStatus::Generated => EnrollmentResult {
                ca_request_id: id.clone(),
                certificate: issued_certificate(&response, &detail),
                status,
                status_message: format!("Certificate with trackingId {} issued successfully", id),
            },
            GenericStatus::ExternalValidation => {
                info!(tracking_id, "Certificate is pending, attempting approval");
                self.client.approve_certificate(tracking_id).await?;

                let detail = self.client.get_certificate_by_tracking_id(tracking_id).await?;
                match translate_status(&detail.summary.status, &id)? {
                    GenericStatus::ExternalValidation => EnrollmentResult {
                        ca_request_id: id.clone(),
                        certificate: None,
                        status: GenericStatus::ExternalValidation,
                        status_message: format!(
                            "Certificate with trackingId {} is still pending after approval attempt. External validation is required.",
                            id
                        ),
                    },
                    GenericStatus::Generated => EnrollmentResult {
                        ca_request_id: id.clone(),
                        certificate: issued_certificate(&response, &detail),
                        status: GenericStatus::Generated,
                        status_message: format!(
                            "Certificate with trackingId {} has been issued after Entrust returned it with a pending status",
                            id
                        ),
                    },
                    _ => {
                        return Err(GatewayError::ApprovalFailed {
                            tracking_id,
                            status: detail.summary.status,
                        })
                    }
                }
            }
            GenericStatus::Failed => EnrollmentResult {
                ca_request_id: id.clone(),
                certificate: None,
                status,
                status_message: format!("Certificate with trackingId {} is denied", id),
            },
            GenericStatus::Revoked => EnrollmentResult {
                ca_request_id: id.clone(),
                certificate: None,
                status,
                status_message: GatewayError::UnknownStatus {
                    id: id.clone(),
                    status: detail.summary.status.clone(),
                }
                .to_string(),
            },
        };

        info!(tracking_id, status = %result.status, "{}", result.status_message);
        Ok(result)
    }
}

fn issued_certificate(response: &CertificateResponse, detail: &CertificateDetail) -> Option<String> {
    let non_empty = |pem: &&String| !pem.is_empty();
    response
        .end_entity_cert
        .as_ref()
        .filter(non_empty)
        .or_else(|| detail.end_entity_cert.as_ref().filter(non_empty))
        .cloned()
}
