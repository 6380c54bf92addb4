mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{line, order_request, TestApp};
use futures::future::join_all;
use storefront_orders::{
    entities::{
        coupon::{CouponScope, DiscountType},
        order::PaymentMethod,
        user::UserRole,
    },
    errors::ServiceError,
    services::coupons::CreateCouponRequest,
};

fn coupon_request(scope: CouponScope) -> CreateCouponRequest {
    CreateCouponRequest {
        name: "spring sale".to_string(),
        discount_type: DiscountType::Percent,
        discount_value: 15,
        scope,
        category: None,
        target_item_id: None,
        expired_at: Utc::now() + Duration::days(7),
        total_quantity: 100,
    }
}

#[tokio::test]
async fn supply_is_never_exceeded_under_contention() {
    let app = TestApp::new().await;
    let admin = app.seed_user(UserRole::Admin).await;
    let coupon = app
        .seed_coupon(admin.id, DiscountType::Fixed, 500, 3, Duration::days(1))
        .await;

    let mut users = Vec::new();
    for _ in 0..10 {
        users.push(app.seed_user(UserRole::User).await);
    }

    let tasks = users.iter().map(|user| {
        let coupons = app.coupons.clone();
        let (user_id, coupon_id) = (user.id, coupon.id);
        tokio::spawn(async move { coupons.issue(user_id, coupon_id).await })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    for rejected in results.iter().filter(|r| r.is_err()) {
        assert_matches!(rejected, Err(ServiceError::CouponExhausted(_)));
    }

    let stored = app.coupons.get_coupon(coupon.id).await.unwrap();
    assert_eq!(stored.issued_quantity, 3);
}

#[tokio::test]
async fn a_user_holds_at_most_one_copy() {
    let app = TestApp::new().await;
    let admin = app.seed_user(UserRole::Admin).await;
    let buyer = app.seed_user(UserRole::User).await;
    let coupon = app
        .seed_coupon(admin.id, DiscountType::Fixed, 500, 10, Duration::days(1))
        .await;

    let tasks = (0..5).map(|_| {
        let coupons = app.coupons.clone();
        let (user_id, coupon_id) = (buyer.id, coupon.id);
        tokio::spawn(async move { coupons.issue(user_id, coupon_id).await })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for rejected in results.iter().filter(|r| r.is_err()) {
        assert_matches!(rejected, Err(ServiceError::CouponAlreadyIssued(_)));
    }
    assert_eq!(app.coupons.get_coupon(coupon.id).await.unwrap().issued_quantity, 1);
}

#[tokio::test]
async fn expired_unknown_and_anonymous_issuance() {
    let app = TestApp::new().await;
    let admin = app.seed_user(UserRole::Admin).await;
    let buyer = app.seed_user(UserRole::User).await;
    let expired = app
        .seed_coupon(admin.id, DiscountType::Fixed, 500, 10, Duration::hours(-1))
        .await;

    assert_matches!(
        app.coupons.issue(buyer.id, expired.id).await,
        Err(ServiceError::CouponExpired(_))
    );
    assert_matches!(
        app.coupons.issue(buyer.id, uuid::Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        app.coupons.issue(uuid::Uuid::new_v4(), expired.id).await,
        Err(ServiceError::Unauthorized(_))
    );
    assert_eq!(app.coupons.get_coupon(expired.id).await.unwrap().issued_quantity, 0);
}

#[tokio::test]
async fn creation_is_gated_by_role() {
    let app = TestApp::new().await;
    let admin = app.seed_user(UserRole::Admin).await;
    let seller = app.seed_user(UserRole::Seller).await;
    let other_seller = app.seed_user(UserRole::Seller).await;
    let buyer = app.seed_user(UserRole::User).await;
    let item = app.seed_item(seller.id, 10_000, None, 5).await;

    let created = app
        .coupons
        .create_coupon(admin.id, coupon_request(CouponScope::All))
        .await
        .unwrap();
    assert_eq!(created.issued_quantity, 0);
    assert_eq!(created.created_by, admin.id);

    assert_matches!(
        app.coupons.create_coupon(seller.id, coupon_request(CouponScope::All)).await,
        Err(ServiceError::Forbidden(_))
    );
    assert_matches!(
        app.coupons.create_coupon(buyer.id, coupon_request(CouponScope::All)).await,
        Err(ServiceError::Forbidden(_))
    );

    let mut target = coupon_request(CouponScope::Target);
    target.target_item_id = Some(item.id);
    let target_coupon = app
        .coupons
        .create_coupon(seller.id, target.clone())
        .await
        .unwrap();
    assert_eq!(target_coupon.target_item_id, Some(item.id));

    assert_matches!(
        app.coupons.create_coupon(other_seller.id, target.clone()).await,
        Err(ServiceError::Forbidden(_))
    );
    assert_matches!(
        app.coupons.create_coupon(admin.id, target).await,
        Err(ServiceError::Forbidden(_))
    );
}

#[tokio::test]
async fn creation_validates_request() {
    let app = TestApp::new().await;
    let admin = app.seed_user(UserRole::Admin).await;

    let mut past = coupon_request(CouponScope::All);
    past.expired_at = Utc::now() - Duration::minutes(1);
    assert_matches!(
        app.coupons.create_coupon(admin.id, past).await,
        Err(ServiceError::ValidationError(_))
    );

    let mut too_much = coupon_request(CouponScope::All);
    too_much.discount_value = 150;
    assert_matches!(
        app.coupons.create_coupon(admin.id, too_much).await,
        Err(ServiceError::ValidationError(_))
    );

    assert_matches!(
        app.coupons
            .create_coupon(admin.id, coupon_request(CouponScope::Category))
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn category_coupon_applies_only_to_its_category() {
    let app = TestApp::new().await;
    let admin = app.seed_user(UserRole::Admin).await;
    let seller = app.seed_user(UserRole::Seller).await;
    let buyer = app.seed_user(UserRole::User).await;
    let book = app.seed_item_in(seller.id, "books", 20_000, None, 5).await;
    let shoe = app.seed_item_in(seller.id, "shoes", 50_000, None, 5).await;

    let mut request = coupon_request(CouponScope::Category);
    request.category = Some("books".to_string());
    let coupon = app.coupons.create_coupon(admin.id, request).await.unwrap();
    app.coupons.issue(buyer.id, coupon.id).await.unwrap();

    assert_matches!(
        app.orders
            .create_order(
                buyer.id,
                order_request(PaymentMethod::KakaoPay, vec![line(shoe.id, 1, Some(coupon.id))]),
            )
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_eq!(app.item_quantity(shoe.id).await, 5);

    let order = app
        .orders
        .create_order(
            buyer.id,
            order_request(PaymentMethod::KakaoPay, vec![line(book.id, 1, Some(coupon.id))]),
        )
        .await
        .unwrap();
    assert_eq!(order.total_amount, 17_000);

    let mine = app.coupons.list_user_coupons(buyer.id).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert!(mine[0].used);
}

#[tokio::test]
async fn http_coupon_lookup_shows_issued_count() {
    let app = TestApp::new().await;
    let admin = app.seed_user(UserRole::Admin).await;
    let buyer = app.seed_user(UserRole::User).await;
    let coupon = app
        .seed_coupon(admin.id, DiscountType::Fixed, 500, 10, Duration::days(1))
        .await;
    let token = app.token_for(buyer.id);

    let (status, _) = app
        .request(Method::POST, &format!("/api/v1/coupons/{}/issue", coupon.id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/coupons/{}", coupon.id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["issued_quantity"], 1);
    assert_eq!(body["data"]["total_quantity"], 10);

    let (status, body) = app
        .request(Method::GET, "/api/v1/coupons/mine", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/coupons/{}", uuid::Uuid::new_v4()),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
