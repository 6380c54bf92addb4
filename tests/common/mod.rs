#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use storefront_orders::{
    auth::AuthService,
    config::AppConfig,
    db::{self, DbPool},
    entities::{
        cart_item,
        coupon::{self, CouponScope, DiscountType},
        item,
        order::PaymentMethod,
        user::{self, UserRole},
        user_coupon,
    },
    events::{self, EventSender},
    handlers::AppServices,
    payments::{
        Approval, ApproveRequest, GatewayError, PaymentGateway, PaymentGatewayRegistry,
        ReadyRequest, ReadyResponse,
    },
    services::{
        addresses::NewAddress,
        coupons::CouponService,
        inventory::InventoryService,
        orders::{CreateOrderRequest, OrderLineRequest, OrderService},
    },
    AppState,
};
use tokio::sync::Notify;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Scripted stand-in for a payment provider. Calls succeed unless a failure is queued.
pub struct FakeGateway {
    method: PaymentMethod,
    ready_failures: Mutex<VecDeque<GatewayError>>,
    approve_failures: Mutex<VecDeque<GatewayError>>,
    ready_requests: Mutex<Vec<ReadyRequest>>,
    approve_requests: Mutex<Vec<ApproveRequest>>,
    ready_calls: AtomicUsize,
    approve_calls: AtomicUsize,
    approve_pause: Mutex<Option<ApprovePause>>,
}

/// Holds the next `approve` call inside the provider until released.
#[derive(Clone, Default)]
pub struct ApprovePause {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl FakeGateway {
    pub fn new(method: PaymentMethod) -> Arc<Self> {
        Arc::new(Self {
            method,
            ready_failures: Mutex::new(VecDeque::new()),
            approve_failures: Mutex::new(VecDeque::new()),
            ready_requests: Mutex::new(Vec::new()),
            approve_requests: Mutex::new(Vec::new()),
            ready_calls: AtomicUsize::new(0),
            approve_calls: AtomicUsize::new(0),
            approve_pause: Mutex::new(None),
        })
    }

    pub fn fail_next_ready(&self, error: GatewayError) {
        self.ready_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_next_approve(&self, error: GatewayError) {
        self.approve_failures.lock().unwrap().push_back(error);
    }

    pub fn pause_next_approve(&self) -> ApprovePause {
        let pause = ApprovePause::default();
        *self.approve_pause.lock().unwrap() = Some(pause.clone());
        pause
    }

    pub fn ready_calls(&self) -> usize {
        self.ready_calls.load(Ordering::SeqCst)
    }

    pub fn approve_calls(&self) -> usize {
        self.approve_calls.load(Ordering::SeqCst)
    }

    pub fn last_ready_request(&self) -> Option<ReadyRequest> {
        self.ready_requests.lock().unwrap().last().cloned()
    }

    pub fn last_approve_request(&self) -> Option<ApproveRequest> {
        self.approve_requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn payment_method(&self) -> PaymentMethod {
        self.method
    }

    async fn ready(&self, request: &ReadyRequest) -> Result<ReadyResponse, GatewayError> {
        self.ready_calls.fetch_add(1, Ordering::SeqCst);
        self.ready_requests.lock().unwrap().push(request.clone());
        if let Some(error) = self.ready_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(ReadyResponse {
            tid: format!("T{}", request.merchant_order_id.replace('-', "")),
            redirect_url: Some(format!(
                "https://pay.example.test/redirect/{}",
                request.merchant_order_id
            )),
        })
    }

    async fn approve(&self, request: &ApproveRequest) -> Result<Approval, GatewayError> {
        self.approve_calls.fetch_add(1, Ordering::SeqCst);
        self.approve_requests.lock().unwrap().push(request.clone());
        let pause = self.approve_pause.lock().unwrap().take();
        if let Some(pause) = pause {
            pause.entered.notify_one();
            pause.release.notified().await;
        }
        if let Some(error) = self.approve_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let tid = request
            .tokens
            .payment_key
            .clone()
            .unwrap_or_else(|| request.tid.clone());
        Ok(Approval { tid })
    }
}

/// Services and router over a fresh in-memory SQLite database.
///
/// Kakao and Toss fakes are registered; NaverPay is deliberately left out.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub orders: Arc<OrderService>,
    pub coupons: Arc<CouponService>,
    pub inventory: InventoryService,
    pub kakao: Arc<FakeGateway>,
    pub toss: Arc<FakeGateway>,
    pub auth: Arc<AuthService>,
    router: Router,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_sender, event_rx) = events::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));
        let event_sender: Arc<EventSender> = Arc::new(event_sender);

        let kakao = FakeGateway::new(PaymentMethod::KakaoPay);
        let toss = FakeGateway::new(PaymentMethod::TossPay);
        let gateways = PaymentGatewayRegistry::new([
            kakao.clone() as Arc<dyn PaymentGateway>,
            toss.clone() as Arc<dyn PaymentGateway>,
        ]);

        let services = AppServices::new(db_arc.clone(), Arc::new(gateways), Some(event_sender));
        let auth = Arc::new(AuthService::new(JWT_SECRET));

        let state = AppState {
            db: db_arc.clone(),
            config: Arc::new(cfg),
            auth: auth.clone(),
            services: services.clone(),
        };

        Self {
            inventory: InventoryService::new(db_arc.clone()),
            db: db_arc,
            orders: services.orders,
            coupons: services.coupons,
            kakao,
            toss,
            auth,
            router: storefront_orders::build_app(state),
            _event_task: event_task,
        }
    }

    pub async fn seed_user(&self, role: UserRole) -> user::Model {
        let id = Uuid::new_v4();
        user::ActiveModel {
            id: Set(id),
            email: Set(format!("{}@example.com", id.simple())),
            nickname: Set(format!("user-{}", &id.simple().to_string()[..8])),
            role: Set(role),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_item(
        &self,
        seller_id: Uuid,
        price: i64,
        discount_price: Option<i64>,
        quantity: i32,
    ) -> item::Model {
        self.seed_item_in(seller_id, "books", price, discount_price, quantity)
            .await
    }

    pub async fn seed_item_in(
        &self,
        seller_id: Uuid,
        category: &str,
        price: i64,
        discount_price: Option<i64>,
        quantity: i32,
    ) -> item::Model {
        let id = Uuid::new_v4();
        item::ActiveModel {
            id: Set(id),
            seller_id: Set(seller_id),
            name: Set(format!("item-{}", &id.simple().to_string()[..8])),
            category: Set(category.to_string()),
            price: Set(price),
            discount_price: Set(discount_price),
            quantity: Set(quantity),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed item")
    }

    pub async fn seed_coupon(
        &self,
        created_by: Uuid,
        discount_type: DiscountType,
        discount_value: i64,
        total_quantity: i32,
        expires_in: Duration,
    ) -> coupon::Model {
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("welcome".to_string()),
            discount_type: Set(discount_type),
            discount_value: Set(discount_value),
            scope: Set(CouponScope::All),
            category: Set(None),
            target_item_id: Set(None),
            created_by: Set(created_by),
            expired_at: Set(Utc::now() + expires_in),
            total_quantity: Set(total_quantity),
            issued_quantity: Set(0),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed coupon")
    }

    pub async fn seed_cart_line(&self, user_id: Uuid, item_id: Uuid, quantity: i32) {
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            item_id: Set(item_id),
            quantity: Set(quantity),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed cart line");
    }

    pub async fn item_quantity(&self, item_id: Uuid) -> i32 {
        item::Entity::find_by_id(item_id)
            .one(&*self.db)
            .await
            .expect("load item")
            .expect("item exists")
            .quantity
    }

    pub async fn user_coupon(&self, user_id: Uuid, coupon_id: Uuid) -> Option<user_coupon::Model> {
        use sea_orm::{ColumnTrait, QueryFilter};
        user_coupon::Entity::find()
            .filter(user_coupon::Column::UserId.eq(user_id))
            .filter(user_coupon::Column::CouponId.eq(coupon_id))
            .one(&*self.db)
            .await
            .expect("load user coupon")
    }

    pub async fn cart_line_count(&self, user_id: Uuid) -> usize {
        use sea_orm::{ColumnTrait, QueryFilter};
        cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .all(&*self.db)
            .await
            .expect("load cart")
            .len()
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.auth
            .generate_token(user_id, Duration::hours(1))
            .expect("token")
    }

    /// Sends one request through the full router and decodes the JSON body (Null when empty).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

pub fn line(item_id: Uuid, quantity: i32, coupon_id: Option<Uuid>) -> OrderLineRequest {
    OrderLineRequest {
        item_id,
        quantity,
        coupon_id,
    }
}

pub fn new_address() -> NewAddress {
    NewAddress {
        zip_code: "06236".to_string(),
        road_address: "123 Teheran-ro".to_string(),
        detail_address: "4F".to_string(),
        recipient_name: "Kim".to_string(),
        recipient_phone: "010-1234-5678".to_string(),
    }
}

pub fn order_request(method: PaymentMethod, lines: Vec<OrderLineRequest>) -> CreateOrderRequest {
    CreateOrderRequest {
        payment_method: method,
        lines,
        address_id: None,
        new_address: Some(new_address()),
        approval_url: "https://shop.example.test/orders/{orderId}/approve".to_string(),
        cancel_url: "https://shop.example.test/cancel".to_string(),
        fail_url: "https://shop.example.test/fail".to_string(),
    }
}
