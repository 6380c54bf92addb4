use assert_matches::assert_matches;
use serde_json::json;
use std::time::Duration;
use storefront_orders::{
    config::{KakaoPayConfig, NaverPayConfig, TossPayConfig},
    entities::order::PaymentMethod,
    payments::{
        ApprovalTokens, ApproveRequest, GatewayError, KakaoPayGateway, NaverPayGateway,
        PaymentGateway, ReadyRequest, TossPayGateway,
    },
};
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn ready_request(payment_method: PaymentMethod) -> ReadyRequest {
    ReadyRequest {
        payment_method,
        merchant_order_id: "5b1f8c8e-6a7e-4d8e-9d61-8f3a1c2b4d5e".to_string(),
        merchant_user_id: "9f0c4b7a-1111-4222-8333-944455556666".to_string(),
        item_name: "Keyboard +1 more".to_string(),
        quantity: 3,
        total_amount: 45_000,
        approval_url: "https://shop.example.test/approve".to_string(),
        cancel_url: "https://shop.example.test/cancel".to_string(),
        fail_url: "https://shop.example.test/fail".to_string(),
    }
}

fn approve_request(payment_method: PaymentMethod, tid: &str, tokens: ApprovalTokens) -> ApproveRequest {
    ApproveRequest {
        payment_method,
        tid: tid.to_string(),
        merchant_order_id: "5b1f8c8e-6a7e-4d8e-9d61-8f3a1c2b4d5e".to_string(),
        merchant_user_id: "9f0c4b7a-1111-4222-8333-944455556666".to_string(),
        total_amount: 45_000,
        tokens,
    }
}

fn kakao(server: &MockServer, timeout: Duration) -> KakaoPayGateway {
    KakaoPayGateway::new(
        KakaoPayConfig {
            base_url: server.uri(),
            cid: "TC0ONETIME".to_string(),
            secret_key: "kakao_secret".to_string(),
        },
        timeout,
    )
    .unwrap()
}

fn naver(server: &MockServer) -> NaverPayGateway {
    NaverPayGateway::new(
        NaverPayConfig {
            base_url: server.uri(),
            redirect_base_url: "https://pay.naver.test/payments/".to_string(),
            partner_id: "np_partner".to_string(),
            client_id: "client".to_string(),
            client_secret: "naver_secret".to_string(),
            chain_id: "chain".to_string(),
        },
        TIMEOUT,
    )
    .unwrap()
}

fn toss(server: &MockServer) -> TossPayGateway {
    TossPayGateway::new(
        TossPayConfig {
            base_url: server.uri(),
            secret_key: "test_sk".to_string(),
        },
        TIMEOUT,
    )
    .unwrap()
}

#[tokio::test]
async fn kakao_ready_sends_secret_key_and_order_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/ready"))
        .and(header("Authorization", "SECRET_KEY kakao_secret"))
        .and(body_json(json!({
            "cid": "TC0ONETIME",
            "partner_order_id": "5b1f8c8e-6a7e-4d8e-9d61-8f3a1c2b4d5e",
            "partner_user_id": "9f0c4b7a-1111-4222-8333-944455556666",
            "item_name": "Keyboard +1 more",
            "quantity": 3,
            "total_amount": 45000,
            "tax_free_amount": 0,
            "approval_url": "https://shop.example.test/approve",
            "cancel_url": "https://shop.example.test/cancel",
            "fail_url": "https://shop.example.test/fail"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tid": "T1234567890",
            "next_redirect_pc_url": "https://online-pay.kakao.test/pc/T1234567890"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ready = kakao(&server, TIMEOUT)
        .ready(&ready_request(PaymentMethod::KakaoPay))
        .await
        .unwrap();

    assert_eq!(ready.tid, "T1234567890");
    assert_eq!(
        ready.redirect_url.as_deref(),
        Some("https://online-pay.kakao.test/pc/T1234567890")
    );
}

#[tokio::test]
async fn kakao_approve_forwards_pg_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/approve"))
        .and(body_string_contains("\"pg_token\":\"pg-abc\""))
        .and(body_string_contains("\"tid\":\"T1234567890\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tid": "T1234567890",
            "aid": "A1",
            "amount": { "total": 45000 }
        })))
        .mount(&server)
        .await;

    let tokens = ApprovalTokens {
        pg_token: Some("pg-abc".to_string()),
        ..Default::default()
    };
    let approval = kakao(&server, TIMEOUT)
        .approve(&approve_request(PaymentMethod::KakaoPay, "T1234567890", tokens))
        .await
        .unwrap();
    assert_eq!(approval.tid, "T1234567890");
}

#[tokio::test]
async fn kakao_approve_without_token_never_calls_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = kakao(&server, TIMEOUT)
        .approve(&approve_request(
            PaymentMethod::KakaoPay,
            "T1",
            ApprovalTokens::default(),
        ))
        .await;
    assert_matches!(
        result,
        Err(GatewayError::MissingToken { provider: "kakao", field: "pg_token" })
    );
}

#[tokio::test]
async fn provider_rejection_is_reported_without_secrets() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/online/v1/payment/ready"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_code": -780,
            "error_message": "approval failure"
        })))
        .mount(&server)
        .await;

    let error = kakao(&server, TIMEOUT)
        .ready(&ready_request(PaymentMethod::KakaoPay))
        .await
        .unwrap_err();

    assert_matches!(error, GatewayError::Rejected { provider: "kakao", status: 400, .. });
    assert!(!error.to_string().contains("kakao_secret"));
}

#[tokio::test]
async fn slow_provider_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "tid": "T1", "next_redirect_pc_url": "https://x" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let result = kakao(&server, Duration::from_millis(200))
        .ready(&ready_request(PaymentMethod::KakaoPay))
        .await;
    assert_matches!(result, Err(GatewayError::Timeout { provider: "kakao" }));
}

#[tokio::test]
async fn naver_reserve_builds_redirect_from_reserve_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/np_partner/naverpay/payments/v2/reserve"))
        .and(header("X-Naver-Client-Id", "client"))
        .and(header("X-Naver-Client-Secret", "naver_secret"))
        .and(header("X-NaverPay-Chain-Id", "chain"))
        .and(body_string_contains("\"merchantPayKey\":\"5b1f8c8e-6a7e-4d8e-9d61-8f3a1c2b4d5e\""))
        .and(body_string_contains("\"totalPayAmount\":45000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "Success",
            "message": "detail",
            "body": { "reserveId": "R-777" }
        })))
        .mount(&server)
        .await;

    let ready = naver(&server)
        .ready(&ready_request(PaymentMethod::NaverPay))
        .await
        .unwrap();
    assert_eq!(ready.tid, "R-777");
    assert_eq!(
        ready.redirect_url.as_deref(),
        Some("https://pay.naver.test/payments/R-777")
    );
}

#[tokio::test]
async fn naver_failure_code_in_ok_envelope_is_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/np_partner/naverpay/payments/v2/reserve"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "InvalidMerchant",
            "message": "unknown partner"
        })))
        .mount(&server)
        .await;

    let result = naver(&server)
        .ready(&ready_request(PaymentMethod::NaverPay))
        .await;
    assert_matches!(
        result,
        Err(GatewayError::Rejected { provider: "naver", status: 200, ref body }) if body.contains("InvalidMerchant")
    );
}

#[tokio::test]
async fn naver_apply_posts_payment_id_form() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/np_partner/naverpay/payments/v2.2/apply/payment"))
        .and(body_string_contains("paymentId=NP-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "Success",
            "body": { "paymentId": "NP-42" }
        })))
        .mount(&server)
        .await;

    let tokens = ApprovalTokens {
        payment_id: Some("NP-42".to_string()),
        ..Default::default()
    };
    let approval = naver(&server)
        .approve(&approve_request(PaymentMethod::NaverPay, "R-777", tokens))
        .await
        .unwrap();
    assert_eq!(approval.tid, "NP-42");
}

#[tokio::test]
async fn toss_ready_is_local_and_confirm_uses_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments/confirm"))
        .and(header("Authorization", "Basic dGVzdF9zazo="))
        .and(body_json(json!({
            "paymentKey": "pk_live_1",
            "orderId": "ORDER_5b1f8c8e-6a7e-4d8e-9d61-8f3a1c2b4d5e",
            "amount": 45000
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "paymentKey": "pk_live_1",
            "status": "DONE"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = toss(&server);
    let ready = gateway
        .ready(&ready_request(PaymentMethod::TossPay))
        .await
        .unwrap();
    assert_eq!(ready.tid, "ORDER_5b1f8c8e-6a7e-4d8e-9d61-8f3a1c2b4d5e");
    assert!(ready.redirect_url.is_none());

    let tokens = ApprovalTokens {
        payment_key: Some("pk_live_1".to_string()),
        amount: Some(45_000),
        ..Default::default()
    };
    let approval = gateway
        .approve(&approve_request(PaymentMethod::TossPay, &ready.tid, tokens))
        .await
        .unwrap();
    assert_eq!(approval.tid, "pk_live_1");
}

#[tokio::test]
async fn toss_requires_amount() {
    let server = MockServer::start().await;
    let tokens = ApprovalTokens {
        payment_key: Some("pk_live_1".to_string()),
        ..Default::default()
    };
    let result = toss(&server)
        .approve(&approve_request(PaymentMethod::TossPay, "ORDER_x", tokens))
        .await;
    assert_matches!(
        result,
        Err(GatewayError::MissingToken { provider: "toss", field: "amount" })
    );
}
