//! Billing service client for the clinic-frontend BFF.
//!
//! The billing backend owns the ledger and the gateway integrations; this
//! client only speaks its four settlement endpoints over JSON/HTTP.

use crate::config::BillingServiceSettings;
use crate::models::{
    BillableReference, ChargeLine, CompositeSettlement, OutstandingSummary, PaymentStatus,
    SettlementMethod,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use service_core::observability::{TracedClientExt, TracedRequest};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("billing service unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("billing service did not answer in time")]
    Timeout,

    #[error("billing service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected billing service response: {0}")]
    Decode(String),
}

impl BillingError {
    /// Message suitable for the cashier, preferring what the backend said.
    pub fn user_message(&self) -> String {
        match self {
            BillingError::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether repeating the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BillingError::Transport(_) | BillingError::Timeout => true,
            BillingError::Rejected { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
                    || *status >= StatusCode::INTERNAL_SERVER_ERROR.as_u16()
            }
            BillingError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BillingError::Timeout
        } else if err.is_decode() {
            BillingError::Decode(err.to_string())
        } else {
            BillingError::Transport(err)
        }
    }
}

/// Body of `createCompositePayment`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompositePaymentRequest {
    pub encounter_id: String,
    pub reference_ids: Vec<BillableReference>,
    pub method: SettlementMethod,
    pub description: String,
}

/// Body of `processBulkSettlement`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkSettlementRequest {
    pub charge_codes: Vec<String>,
    pub method: SettlementMethod,
    /// Declared unpaid total, checked by the backend against its ledger.
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkSettlementReceipt {
    #[serde(default)]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    pub settled_codes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusReport {
    #[serde(default)]
    pub payment_id: Option<String>,
    pub status: PaymentStatus,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The four billing operations the settlement engine depends on.
#[async_trait]
pub trait BillingBackend: Send + Sync {
    async fn get_outstanding_payments(
        &self,
        reference_ids: &[BillableReference],
    ) -> Result<OutstandingSummary, BillingError>;

    async fn create_composite_payment(
        &self,
        request: &CompositePaymentRequest,
    ) -> Result<CompositeSettlement, BillingError>;

    async fn get_payment_status(&self, payment_id: &str)
        -> Result<PaymentStatusReport, BillingError>;

    async fn process_bulk_settlement(
        &self,
        request: &BulkSettlementRequest,
    ) -> Result<BulkSettlementReceipt, BillingError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutstandingPaymentsRequest<'a> {
    reference_ids: &'a [BillableReference],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutstandingPaymentsResponse {
    #[serde(default)]
    payments: Vec<ChargeLine>,
    #[serde(default)]
    total_unpaid: Option<Decimal>,
    #[serde(default)]
    total_paid: Option<Decimal>,
}

#[derive(Deserialize)]
struct BackendErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// HTTP implementation of [`BillingBackend`].
#[derive(Clone)]
pub struct HttpBillingClient {
    client: Client,
    settings: BillingServiceSettings,
}

impl HttpBillingClient {
    pub fn new(settings: BillingServiceSettings) -> Result<Self, BillingError> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(BillingError::Transport)?;

        Ok(Self { client, settings })
    }

    pub fn base_url(&self) -> &str {
        self.settings.url.trim_end_matches('/')
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    fn authorize(&self, request: TracedRequest) -> TracedRequest {
        match &self.settings.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: TracedRequest,
    ) -> Result<T, BillingError> {
        let response = self.authorize(request).send().await.map_err(|e| {
            tracing::error!(operation, error = %e, "Billing request failed");
            BillingError::from(e)
        })?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(operation, status = %status, "Billing service response");

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                tracing::error!(operation, error = %e, "Billing response could not be decoded");
                BillingError::Decode(e.to_string())
            })
        } else {
            let message = serde_json::from_str::<BackendErrorBody>(&body)
                .ok()
                .and_then(|b| b.message.or(b.error))
                .unwrap_or(body);
            tracing::warn!(
                operation,
                status = %status,
                message = %message,
                "Billing service rejected request"
            );
            Err(BillingError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl BillingBackend for HttpBillingClient {
    async fn get_outstanding_payments(
        &self,
        reference_ids: &[BillableReference],
    ) -> Result<OutstandingSummary, BillingError> {
        let request = self
            .client
            .traced_post(&self.url("/billing/outstanding-payments"))
            .json(&OutstandingPaymentsRequest { reference_ids });

        let response: OutstandingPaymentsResponse =
            self.execute("get_outstanding_payments", request).await?;

        let summary = OutstandingSummary::from_lines(response.payments);

        let reported = (response.total_unpaid, response.total_paid);
        let mismatch = reported.0.is_some_and(|t| t != summary.total_unpaid())
            || reported.1.is_some_and(|t| t != summary.total_paid());
        if mismatch {
            tracing::warn!(
                reported_unpaid = ?reported.0,
                reported_paid = ?reported.1,
                total_unpaid = %summary.total_unpaid(),
                total_paid = %summary.total_paid(),
                "Backend totals disagree with charge lines, using line sums"
            );
        }

        Ok(summary)
    }

    async fn create_composite_payment(
        &self,
        request: &CompositePaymentRequest,
    ) -> Result<CompositeSettlement, BillingError> {
        let http = self
            .client
            .traced_post(&self.url("/billing/composite-payments"))
            .json(request);

        self.execute("create_composite_payment", http).await
    }

    async fn get_payment_status(
        &self,
        payment_id: &str,
    ) -> Result<PaymentStatusReport, BillingError> {
        let http = self
            .client
            .traced_get(&self.url(&format!("/billing/payments/{}/status", payment_id)));

        self.execute("get_payment_status", http).await
    }

    async fn process_bulk_settlement(
        &self,
        request: &BulkSettlementRequest,
    ) -> Result<BulkSettlementReceipt, BillingError> {
        let http = self
            .client
            .traced_post(&self.url("/billing/bulk-settlements"))
            .json(request);

        self.execute("process_bulk_settlement", http).await
    }
}
