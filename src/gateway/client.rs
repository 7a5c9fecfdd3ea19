use async_trait::async_trait;
use chrono::Utc;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::signature::SignatureCodec;
use crate::config::GatewayConfig;
use crate::domain::{PayerProfile, Transaction};
use crate::ports::{GatewayAck, GatewayError, GatewayStatus, PaymentGateway, RESULT_SUCCESS};

pub const INQUIRY_PATH: &str = "/api/merchant/v2/inquiry";
pub const STATUS_PATH: &str = "/api/merchant/transactionStatus";

/// Timestamp layout the gateway expects in `datetime` fields.
pub const GATEWAY_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InquiryRequest<'a> {
    merchant_id: &'a str,
    amount: String,
    method_code: &'a str,
    order_ref: &'a str,
    product_label: &'a str,
    payer_email: &'a str,
    payer_name: &'a str,
    callback_url: &'a str,
    return_url: &'a str,
    expiry_minutes: i64,
    signature: String,
    datetime: String,
}

/// Response from the gateway inquiry endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryResponse {
    pub status_code: String,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub payment_url: Option<String>,
    #[serde(default)]
    pub va_number: Option<String>,
    #[serde(default)]
    pub qr_string: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusRequest<'a> {
    merchant_id: &'a str,
    order_ref: &'a str,
    signature: String,
    datetime: String,
}

/// HTTP client for the payment gateway's merchant API
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    callback_url: String,
    return_url: String,
    expiry_minutes: i64,
    codec: Arc<SignatureCodec>,
    circuit_breaker: Breaker,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig, codec: Arc<SignatureCodec>, expiry_minutes: i64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        GatewayClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            callback_url: config.callback_url.clone(),
            return_url: config.return_url.clone(),
            expiry_minutes,
            codec,
            circuit_breaker: breaker(config.failure_threshold, config.reset_timeout_secs),
        }
    }

    /// Replaces the circuit breaker configuration
    pub fn with_circuit_breaker(mut self, failure_threshold: u32, reset_timeout_secs: u64) -> Self {
        self.circuit_breaker = breaker(failure_threshold, reset_timeout_secs);
        self
    }

    /// Returns the current state of the circuit breaker
    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    async fn guarded<T, F>(&self, fut: F) -> Result<T, GatewayError>
    where
        F: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let result = self
            .circuit_breaker
            .call_with(|err: &GatewayError| err.is_transient(), fut)
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(GatewayError::Unavailable(
                "gateway circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

fn breaker(failure_threshold: u32, reset_timeout_secs: u64) -> Breaker {
    let backoff = backoff::equal_jittered(
        Duration::from_secs(reset_timeout_secs),
        Duration::from_secs(reset_timeout_secs * 2),
    );
    let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
    Config::new().failure_policy(policy).build()
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Unavailable(err.to_string())
}

/// Any non-2xx answer is treated as an outage. The body stays in the log.
async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail: String = body.chars().take(200).collect();
    tracing::warn!(status = %status, body = %detail, "Gateway returned an error status");
    Err(GatewayError::Unavailable(format!("HTTP {}", status.as_u16())))
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    async fn request_payment(
        &self,
        transaction: &Transaction,
        payer: &PayerProfile,
        item_label: &str,
    ) -> Result<GatewayAck, GatewayError> {
        let url = format!("{}{}", self.base_url, INQUIRY_PATH);
        let amount = transaction.gateway_amount();
        let body = InquiryRequest {
            merchant_id: self.codec.merchant_id(),
            signature: self
                .codec
                .sign_payment_request(&transaction.order_ref, &amount),
            amount,
            method_code: &transaction.method_code,
            order_ref: &transaction.order_ref,
            product_label: item_label,
            payer_email: &payer.email,
            payer_name: &payer.name,
            callback_url: &self.callback_url,
            return_url: &self.return_url,
            expiry_minutes: self.expiry_minutes,
            datetime: Utc::now().format(GATEWAY_DATETIME_FORMAT).to_string(),
        };
        let client = self.client.clone();

        tracing::debug!(order_ref = %transaction.order_ref, "Requesting payment from gateway");

        let inquiry = self
            .guarded(async move {
                let response = client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(transport_error)?;
                let response = check_status(response).await?;
                response
                    .json::<InquiryResponse>()
                    .await
                    .map_err(|e| GatewayError::Unavailable(format!("invalid response: {}", e)))
            })
            .await?;

        if inquiry.status_code != RESULT_SUCCESS {
            tracing::warn!(
                order_ref = %transaction.order_ref,
                status_code = %inquiry.status_code,
                "Gateway declined payment request"
            );
            return Err(GatewayError::Rejected(
                inquiry
                    .status_message
                    .unwrap_or_else(|| "payment request declined".to_string()),
            ));
        }

        let reference = inquiry.reference.ok_or_else(|| {
            GatewayError::Unavailable("acknowledgement without reference".to_string())
        })?;

        Ok(GatewayAck {
            reference,
            payment_url: inquiry.payment_url,
            va_number: inquiry.va_number,
            qr_payload: inquiry.qr_string,
        })
    }

    async fn query_status(&self, order_ref: &str) -> Result<GatewayStatus, GatewayError> {
        let url = format!("{}{}", self.base_url, STATUS_PATH);
        let datetime = Utc::now().format(GATEWAY_DATETIME_FORMAT).to_string();
        let body = StatusRequest {
            merchant_id: self.codec.merchant_id(),
            order_ref,
            signature: self.codec.sign_status_query(order_ref, &datetime),
            datetime,
        };
        let client = self.client.clone();

        let raw = self
            .guarded(async move {
                let response = client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(transport_error)?;
                let response = check_status(response).await?;
                response
                    .json::<serde_json::Value>()
                    .await
                    .map_err(|e| GatewayError::Unavailable(format!("invalid response: {}", e)))
            })
            .await?;

        let result_code = raw
            .get("statusCode")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::Unavailable("status response without statusCode".to_string()))?
            .to_string();
        let reference = raw
            .get("reference")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(GatewayStatus {
            result_code,
            reference,
            raw,
        })
    }
}
