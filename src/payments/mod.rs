//! Two-phase payment provider integration.
//!
//! Every provider implements [`PaymentGateway`]: `ready` starts a payment and
//! returns the provider reference (tid) plus a redirect for the buyer, and
//! `approve` confirms it once the buyer comes back with the provider's token.
//! Providers are looked up by [`PaymentMethod`] through [`PaymentGatewayRegistry`].
//!
//! Retries are safe only because every request carries the merchant order id,
//! which the providers use to refuse double initiation. Adapters do not add
//! their own idempotency layer.

pub mod kakao;
pub mod naver;
pub mod registry;
pub mod toss;

use crate::entities::order::PaymentMethod;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use kakao::KakaoPayGateway;
pub use naver::NaverPayGateway;
pub use registry::PaymentGatewayRegistry;
pub use toss::TossPayGateway;

/// Longest provider error body kept for diagnostics
const MAX_ERROR_BODY: usize = 512;

/// Input for the first phase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReadyRequest {
    pub payment_method: PaymentMethod,
    pub merchant_order_id: String,
    pub merchant_user_id: String,
    pub item_name: String,
    pub quantity: i32,
    pub total_amount: i64,
    pub approval_url: String,
    pub cancel_url: String,
    pub fail_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyResponse {
    /// Provider reference, stored on the order as its tid
    pub tid: String,
    /// Where the buyer's browser goes next; `None` when the client drives the provider widget
    pub redirect_url: Option<String>,
}

/// Tokens the provider handed back to the buyer after authorization.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTokens {
    /// One-time authorization token (KakaoPay)
    pub pg_token: Option<String>,
    /// Payment id issued after the buyer authorized (NaverPay)
    pub payment_id: Option<String>,
    /// Payment key issued by the widget (TossPayments)
    pub payment_key: Option<String>,
    /// Amount the buyer confirmed; must match the order total when present
    pub amount: Option<i64>,
}

/// Input for the second phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApproveRequest {
    pub payment_method: PaymentMethod,
    pub tid: String,
    pub merchant_order_id: String,
    pub merchant_user_id: String,
    pub total_amount: i64,
    pub tokens: ApprovalTokens,
}

/// Outcome of a successful approval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Approval {
    /// Provider handle for the settled payment
    pub tid: String,
}

/// Failure talking to a payment provider. Never carries credentials.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{provider}: transport failure: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider}: rejected with status {status}: {body}")]
    Rejected {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider}: malformed response: {message}")]
    MalformedResponse {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: missing {field}")]
    MissingToken {
        provider: &'static str,
        field: &'static str,
    },
}

impl GatewayError {
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Transport { provider, .. }
            | Self::Timeout { provider }
            | Self::Rejected { provider, .. }
            | Self::MalformedResponse { provider, .. }
            | Self::MissingToken { provider, .. } => provider,
        }
    }

    pub(crate) fn from_reqwest(provider: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { provider }
        } else if err.is_decode() {
            Self::MalformedResponse {
                provider,
                message: err.to_string(),
            }
        } else {
            Self::Transport {
                provider,
                message: err.without_url().to_string(),
            }
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Method this adapter serves in the registry
    fn payment_method(&self) -> PaymentMethod;

    async fn ready(&self, request: &ReadyRequest) -> Result<ReadyResponse, GatewayError>;

    async fn approve(&self, request: &ApproveRequest) -> Result<Approval, GatewayError>;
}

/// Client shared by the adapters; every call is bounded by `timeout`.
pub fn http_client(provider: &'static str, timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| GatewayError::from_reqwest(provider, e))
}

/// Turns a provider response into `T`, mapping non-2xx statuses to `Rejected`.
pub(crate) async fn decode_response<T: DeserializeOwned>(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GatewayError::from_reqwest(provider, e))?;

    if !status.is_success() {
        return Err(GatewayError::Rejected {
            provider,
            status: status.as_u16(),
            body: truncate(&body),
        });
    }

    serde_json::from_str(&body).map_err(|e| GatewayError::MalformedResponse {
        provider,
        message: e.to_string(),
    })
}

pub(crate) fn require_token<'a>(
    provider: &'static str,
    field: &'static str,
    value: &'a Option<String>,
) -> Result<&'a str, GatewayError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(GatewayError::MissingToken { provider, field })
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
