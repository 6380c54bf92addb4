use super::{
    decode_response, http_client, require_token, Approval, ApproveRequest, GatewayError,
    PaymentGateway, ReadyRequest, ReadyResponse,
};
use crate::config::NaverPayConfig;
use crate::entities::order::PaymentMethod;
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

const PROVIDER: &str = "naver";
const SUCCESS_CODE: &str = "Success";

/// NaverPay reserve/apply adapter.
#[derive(Clone)]
pub struct NaverPayGateway {
    config: NaverPayConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NaverReserveBody<'a> {
    model_version: &'static str,
    merchant_pay_key: &'a str,
    merchant_user_key: &'a str,
    product_name: &'a str,
    product_count: i32,
    total_pay_amount: i64,
    tax_scope_amount: i64,
    tax_ex_scope_amount: i64,
    return_url: &'a str,
}

/// NaverPay wraps every payload in `{code, message, body}`; HTTP 200 alone does not mean success.
#[derive(Deserialize)]
struct NaverEnvelope<T> {
    code: String,
    message: Option<String>,
    body: Option<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReserveBody {
    reserve_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyBody {
    payment_id: String,
}

impl NaverPayGateway {
    pub fn new(config: NaverPayConfig, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(PROVIDER, timeout)?,
            config,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}/naverpay/payments/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.partner_id,
            path
        )
    }

    fn with_credentials(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("X-Naver-Client-Id", &self.config.client_id)
            .header("X-Naver-Client-Secret", &self.config.client_secret)
            .header("X-NaverPay-Chain-Id", &self.config.chain_id)
    }

    fn unwrap_envelope<T>(envelope: NaverEnvelope<T>) -> Result<T, GatewayError> {
        if envelope.code != SUCCESS_CODE {
            warn!(code = %envelope.code, "NaverPay returned a failure code");
            return Err(GatewayError::Rejected {
                provider: PROVIDER,
                status: 200,
                body: format!(
                    "{}: {}",
                    envelope.code,
                    envelope.message.unwrap_or_default()
                ),
            });
        }
        envelope.body.ok_or_else(|| GatewayError::MalformedResponse {
            provider: PROVIDER,
            message: "success envelope without body".to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for NaverPayGateway {
    fn payment_method(&self) -> PaymentMethod {
        PaymentMethod::NaverPay
    }

    #[instrument(skip(self, request), fields(merchant_order_id = %request.merchant_order_id))]
    async fn ready(&self, request: &ReadyRequest) -> Result<ReadyResponse, GatewayError> {
        let body = NaverReserveBody {
            model_version: "2",
            merchant_pay_key: &request.merchant_order_id,
            merchant_user_key: &request.merchant_user_id,
            product_name: &request.item_name,
            product_count: request.quantity,
            total_pay_amount: request.total_amount,
            tax_scope_amount: request.total_amount,
            tax_ex_scope_amount: 0,
            return_url: &request.approval_url,
        };

        let response = self
            .with_credentials(self.client.post(self.endpoint("v2/reserve")))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(PROVIDER, e))?;

        let envelope: NaverEnvelope<ReserveBody> = decode_response(PROVIDER, response)
            .await
            .map_err(|e| {
                error!("NaverPay reserve failed: {}", e);
                e
            })?;
        let reserved = Self::unwrap_envelope(envelope)?;

        info!(reserve_id = %reserved.reserve_id, "NaverPay payment reserved");
        Ok(ReadyResponse {
            redirect_url: Some(format!(
                "{}{}",
                self.config.redirect_base_url, reserved.reserve_id
            )),
            tid: reserved.reserve_id,
        })
    }

    #[instrument(skip(self, request), fields(tid = %request.tid))]
    async fn approve(&self, request: &ApproveRequest) -> Result<Approval, GatewayError> {
        let payment_id = require_token(PROVIDER, "payment_id", &request.tokens.payment_id)?;

        let response = self
            .with_credentials(self.client.post(self.endpoint("v2.2/apply/payment")))
            .form(&[("paymentId", payment_id)])
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(PROVIDER, e))?;

        let envelope: NaverEnvelope<ApplyBody> = decode_response(PROVIDER, response)
            .await
            .map_err(|e| {
                error!("NaverPay apply failed: {}", e);
                e
            })?;
        let applied = Self::unwrap_envelope(envelope)?;

        info!(payment_id = %applied.payment_id, "NaverPay payment approved");
        Ok(Approval {
            tid: applied.payment_id,
        })
    }
}
