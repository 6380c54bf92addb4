mod common;

use assert_matches::assert_matches;
use common::TestApp;
use futures::future::join_all;
use storefront_orders::{entities::user::UserRole, errors::ServiceError};

#[tokio::test]
async fn concurrent_reservations_never_oversell() {
    let app = TestApp::new().await;
    let seller = app.seed_user(UserRole::Seller).await;
    let item = app.seed_item(seller.id, 1_000, None, 5).await;

    let tasks = (0..20).map(|_| {
        let inventory = app.inventory.clone();
        let item_id = item.id;
        tokio::spawn(async move { inventory.reserve(item_id, 1).await })
    });

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 5);
    for rejected in results.iter().filter(|r| r.is_err()) {
        assert_matches!(rejected, Err(ServiceError::InsufficientStock { requested: 1, .. }));
    }
    assert_eq!(app.item_quantity(item.id).await, 0);
}

#[tokio::test]
async fn exact_stock_can_be_taken_in_one_go() {
    let app = TestApp::new().await;
    let seller = app.seed_user(UserRole::Seller).await;
    let item = app.seed_item(seller.id, 1_000, None, 3).await;

    app.inventory.reserve(item.id, 3).await.unwrap();
    assert_eq!(app.item_quantity(item.id).await, 0);

    assert_matches!(
        app.inventory.reserve(item.id, 1).await,
        Err(ServiceError::InsufficientStock { .. })
    );
}

#[tokio::test]
async fn reservation_rejects_bad_input() {
    let app = TestApp::new().await;
    let seller = app.seed_user(UserRole::Seller).await;
    let item = app.seed_item(seller.id, 1_000, None, 3).await;

    assert_matches!(
        app.inventory.reserve(item.id, 0).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        app.inventory.reserve(uuid::Uuid::new_v4(), 1).await,
        Err(ServiceError::NotFound(_))
    );
    assert_eq!(app.item_quantity(item.id).await, 3);
}
