use super::{
    decode_response, http_client, require_token, Approval, ApproveRequest, GatewayError,
    PaymentGateway, ReadyRequest, ReadyResponse,
};
use crate::config::KakaoPayConfig;
use crate::entities::order::PaymentMethod;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, instrument};

const PROVIDER: &str = "kakao";
const READY_PATH: &str = "/online/v1/payment/ready";
const APPROVE_PATH: &str = "/online/v1/payment/approve";

/// KakaoPay single-payment adapter.
#[derive(Clone)]
pub struct KakaoPayGateway {
    config: KakaoPayConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct KakaoReadyBody<'a> {
    cid: &'a str,
    partner_order_id: &'a str,
    partner_user_id: &'a str,
    item_name: &'a str,
    quantity: i32,
    total_amount: i64,
    tax_free_amount: i64,
    approval_url: &'a str,
    cancel_url: &'a str,
    fail_url: &'a str,
}

#[derive(Deserialize)]
struct KakaoReadyReply {
    tid: String,
    next_redirect_pc_url: Option<String>,
    next_redirect_mobile_url: Option<String>,
}

#[derive(Serialize)]
struct KakaoApproveBody<'a> {
    cid: &'a str,
    tid: &'a str,
    partner_order_id: &'a str,
    partner_user_id: &'a str,
    pg_token: &'a str,
}

#[derive(Deserialize)]
struct KakaoApproveReply {
    tid: String,
}

impl KakaoPayGateway {
    pub fn new(config: KakaoPayConfig, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(PROVIDER, timeout)?,
            config,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorization(&self) -> String {
        format!("SECRET_KEY {}", self.config.secret_key)
    }
}

#[async_trait]
impl PaymentGateway for KakaoPayGateway {
    fn payment_method(&self) -> PaymentMethod {
        PaymentMethod::KakaoPay
    }

    #[instrument(skip(self, request), fields(merchant_order_id = %request.merchant_order_id))]
    async fn ready(&self, request: &ReadyRequest) -> Result<ReadyResponse, GatewayError> {
        let body = KakaoReadyBody {
            cid: &self.config.cid,
            partner_order_id: &request.merchant_order_id,
            partner_user_id: &request.merchant_user_id,
            item_name: &request.item_name,
            quantity: request.quantity,
            total_amount: request.total_amount,
            tax_free_amount: 0,
            approval_url: &request.approval_url,
            cancel_url: &request.cancel_url,
            fail_url: &request.fail_url,
        };

        let response = self
            .client
            .post(self.endpoint(READY_PATH))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(PROVIDER, e))?;

        let reply: KakaoReadyReply = decode_response(PROVIDER, response).await.map_err(|e| {
            error!("KakaoPay ready failed: {}", e);
            e
        })?;

        let redirect_url = reply.next_redirect_pc_url.or(reply.next_redirect_mobile_url);
        if redirect_url.is_none() {
            return Err(GatewayError::MalformedResponse {
                provider: PROVIDER,
                message: "ready response carried no redirect url".to_string(),
            });
        }

        info!(tid = %reply.tid, "KakaoPay payment ready");
        Ok(ReadyResponse {
            tid: reply.tid,
            redirect_url,
        })
    }

    #[instrument(skip(self, request), fields(tid = %request.tid))]
    async fn approve(&self, request: &ApproveRequest) -> Result<Approval, GatewayError> {
        let pg_token = require_token(PROVIDER, "pg_token", &request.tokens.pg_token)?;

        let body = KakaoApproveBody {
            cid: &self.config.cid,
            tid: &request.tid,
            partner_order_id: &request.merchant_order_id,
            partner_user_id: &request.merchant_user_id,
            pg_token,
        };

        let response = self
            .client
            .post(self.endpoint(APPROVE_PATH))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(PROVIDER, e))?;

        let reply: KakaoApproveReply = decode_response(PROVIDER, response).await.map_err(|e| {
            error!("KakaoPay approve failed: {}", e);
            e
        })?;

        info!(tid = %reply.tid, "KakaoPay payment approved");
        Ok(Approval { tid: reply.tid })
    }
}
