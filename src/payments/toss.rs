use super::{
    decode_response, http_client, require_token, Approval, ApproveRequest, GatewayError,
    PaymentGateway, ReadyRequest, ReadyResponse,
};
use crate::config::TossPayConfig;
use crate::entities::order::PaymentMethod;
use crate::models::order::MERCHANT_ORDER_PREFIX;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, instrument};

const PROVIDER: &str = "toss";
const CONFIRM_PATH: &str = "/v1/payments/confirm";

/// TossPayments widget adapter. The widget runs client side, so `ready` makes no call.
#[derive(Clone)]
pub struct TossPayGateway {
    config: TossPayConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TossConfirmBody<'a> {
    payment_key: &'a str,
    order_id: &'a str,
    amount: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TossPayment {
    payment_key: String,
    status: Option<String>,
}

impl TossPayGateway {
    pub fn new(config: TossPayConfig, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(PROVIDER, timeout)?,
            config,
        })
    }
}

#[async_trait]
impl PaymentGateway for TossPayGateway {
    fn payment_method(&self) -> PaymentMethod {
        PaymentMethod::TossPay
    }

    async fn ready(&self, request: &ReadyRequest) -> Result<ReadyResponse, GatewayError> {
        let tid = format!("{}{}", MERCHANT_ORDER_PREFIX, request.merchant_order_id);
        info!(%tid, "TossPay ready");
        Ok(ReadyResponse {
            tid,
            redirect_url: None,
        })
    }

    #[instrument(skip(self, request), fields(tid = %request.tid))]
    async fn approve(&self, request: &ApproveRequest) -> Result<Approval, GatewayError> {
        let payment_key = require_token(PROVIDER, "payment_key", &request.tokens.payment_key)?;
        let amount = request.tokens.amount.ok_or(GatewayError::MissingToken {
            provider: PROVIDER,
            field: "amount",
        })?;

        let body = TossConfirmBody {
            payment_key,
            order_id: &request.tid,
            amount,
        };

        let response = self
            .client
            .post(format!(
                "{}{}",
                self.config.base_url.trim_end_matches('/'),
                CONFIRM_PATH
            ))
            .basic_auth(&self.config.secret_key, Some(""))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(PROVIDER, e))?;

        let payment: TossPayment = decode_response(PROVIDER, response).await.map_err(|e| {
            error!("TossPay confirm failed: {}", e);
            e
        })?;

        info!(
            payment_key = %payment.payment_key,
            status = payment.status.as_deref().unwrap_or("UNKNOWN"),
            "TossPay payment confirmed"
        );
        Ok(Approval {
            tid: payment.payment_key,
        })
    }
}
