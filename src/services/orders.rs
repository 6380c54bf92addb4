use crate::{
    db::DbPool,
    entities::{
        address,
        order::{self, OrderStatus, PaymentMethod},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::{Order, OrderIdentifier, OrderLine},
    payments::{ApprovalTokens, ApproveRequest, PaymentGatewayRegistry, ReadyRequest},
    services::{
        addresses::{AddressService, NewAddress},
        cart::CartService,
        catalog::CatalogService,
        coupons::CouponService,
        inventory::InventoryService,
        users::UserService,
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Placeholder substituted with the new order id in the approval callback.
pub const ORDER_ID_PLACEHOLDER: &str = "{orderId}";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderLineRequest {
    pub item_id: Uuid,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
    #[serde(default)]
    pub coupon_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub payment_method: PaymentMethod,
    #[validate(length(min = 1, message = "an order needs at least one line"))]
    pub lines: Vec<OrderLineRequest>,
    /// Existing shipping address; takes precedence over `new_address`
    #[serde(default)]
    pub address_id: Option<Uuid>,
    #[serde(default)]
    pub new_address: Option<NewAddress>,
    #[validate(length(min = 1, message = "approval url is required"))]
    pub approval_url: String,
    #[validate(length(min = 1, message = "cancel url is required"))]
    pub cancel_url: String,
    #[validate(length(min = 1, message = "fail url is required"))]
    pub fail_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressView {
    pub address_id: Uuid,
    pub zip_code: String,
    pub road_address: String,
    pub detail_address: String,
    pub recipient_name: String,
    pub recipient_phone: String,
}

impl From<address::Model> for AddressView {
    fn from(model: address::Model) -> Self {
        Self {
            address_id: model.id,
            zip_code: model.zip_code,
            road_address: model.road_address,
            detail_address: model.detail_address,
            recipient_name: model.recipient_name,
            recipient_phone: model.recipient_phone,
        }
    }
}

/// Result of checkout: where to send the buyer next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub tid: String,
    pub redirect_url: Option<String>,
    pub ordered_at: DateTime<Utc>,
    pub total_amount: i64,
    pub shipping_address: AddressView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemView {
    pub order_item_id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    pub quantity: i32,
    pub original_price: i64,
    pub coupon_id: Option<Uuid>,
    pub coupon_discount: i64,
    pub final_price: i64,
    pub total_price: i64,
    pub review_written: bool,
}

impl From<&OrderLine> for OrderItemView {
    fn from(line: &OrderLine) -> Self {
        Self {
            order_item_id: line.id,
            item_id: line.item_id,
            item_name: line.item_name.clone(),
            quantity: line.quantity(),
            original_price: line.original_price(),
            coupon_id: line.coupon_id(),
            coupon_discount: line.coupon_discount(),
            final_price: line.final_price(),
            total_price: line.total_price(),
            review_written: line.review_written(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub order_id: Uuid,
    pub tid: Option<String>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub ordered_at: DateTime<Utc>,
    pub total_amount: i64,
    pub total_quantity: i32,
    pub items: Vec<OrderItemView>,
    pub address: AddressView,
}

impl OrderDetail {
    fn from_parts(order: &Order, address: address::Model) -> Self {
        Self {
            order_id: order.id,
            tid: order.tid().map(str::to_string),
            status: order.status(),
            payment_method: order.payment_method(),
            ordered_at: order.ordered_at,
            total_amount: order.total_amount(),
            total_quantity: order.total_quantity(),
            items: order.lines().iter().map(OrderItemView::from).collect(),
            address: address.into(),
        }
    }
}

/// Order orchestration: checkout, payment approval and the order read paths.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    gateways: Arc<PaymentGatewayRegistry>,
    cart: CartService,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateways: Arc<PaymentGatewayRegistry>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            cart: CartService::new(db_pool.clone()),
            db_pool,
            gateways,
            event_sender,
        }
    }

    /// Reserves stock, redeems coupons and persists the order in one transaction,
    /// then asks the provider to start the payment.
    ///
    /// If the provider refuses, the reservation is compensated: stock and coupons
    /// are given back and the order is cancelled.
    #[instrument(skip(self, request), fields(user_id = %user_id, payment_method = %request.payment_method))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        let gateway = self.gateways.get(request.payment_method)?;

        let db = &*self.db_pool;
        let user = UserService::find_with(db, user_id).await?;

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::db_error(e)
        })?;

        let address = Self::resolve_address(&txn, user.id, &request).await?;

        let mut lines = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            InventoryService::reserve_with(&txn, line.item_id, line.quantity).await?;
            let item = CatalogService::find_with(&txn, line.item_id).await?;
            let mut order_line = OrderLine::create(&item, line.quantity)?;
            if let Some(coupon_id) = line.coupon_id {
                let discount = CouponService::redeem_with(
                    &txn,
                    user.id,
                    coupon_id,
                    &item,
                    order_line.original_price(),
                )
                .await?;
                order_line.apply_coupon(coupon_id, discount);
            }
            lines.push(order_line);
        }

        let mut order = Order::place(user.id, address.id, request.payment_method, lines)?;
        Self::insert_order(&txn, &order).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to commit order creation transaction");
            ServiceError::db_error(e)
        })?;

        let ready_request = ReadyRequest {
            payment_method: order.payment_method(),
            merchant_order_id: order.id.to_string(),
            merchant_user_id: user.id.to_string(),
            item_name: order.item_summary(),
            quantity: order.total_quantity(),
            total_amount: order.total_amount(),
            approval_url: request
                .approval_url
                .replace(ORDER_ID_PLACEHOLDER, &order.id.to_string()),
            cancel_url: request.cancel_url.clone(),
            fail_url: request.fail_url.clone(),
        };

        let ready = match gateway.ready(&ready_request).await {
            Ok(ready) => ready,
            Err(e) => {
                counter!("payments.gateway_failures", 1);
                error!(error = %e, order_id = %order.id, "Payment ready failed; releasing reservation");
                self.compensate_failed_checkout(&mut order).await;
                return Err(e.into());
            }
        };

        order.assign_tid(ready.tid.clone());
        order::Entity::update_many()
            .col_expr(order::Column::Tid, Expr::value(ready.tid.clone()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id))
            .exec(db)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order.id, tid = %ready.tid, "Failed to store payment reference");
                ServiceError::db_error(e)
            })?;

        counter!("orders.created", 1);
        info!(order_id = %order.id, tid = %ready.tid, total_amount = order.total_amount(), "Order created");

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderCreated {
                    order_id: order.id,
                    user_id: user.id,
                    total_amount: order.total_amount(),
                })
                .await;
        }

        Ok(OrderResponse {
            order_id: order.id,
            tid: ready.tid,
            redirect_url: ready.redirect_url,
            ordered_at: order.ordered_at,
            total_amount: order.total_amount(),
            shipping_address: address.into(),
        })
    }

    /// Confirms a payment with the provider and marks the order paid.
    #[instrument(skip(self, tokens), fields(order_id = %identifier, user_id = %user_id))]
    pub async fn approve_order(
        &self,
        identifier: OrderIdentifier,
        tokens: ApprovalTokens,
        user_id: Uuid,
    ) -> Result<OrderDetail, ServiceError> {
        let db = &*self.db_pool;
        let (mut order, address) = Self::fetch_order(db, identifier.0).await?;
        Self::ensure_owner(&order, user_id)?;

        if order.status() != OrderStatus::PaymentPending {
            warn!(
                status = %order.status(),
                "Approval for an order that is not awaiting payment; possible duplicate provider callback"
            );
            return Err(ServiceError::InvalidStateTransition {
                from: order.status().to_string(),
                action: "complete payment for",
            });
        }

        let tid = order
            .tid()
            .map(str::to_string)
            .ok_or_else(|| ServiceError::ValidationError("order has no payment reference".to_string()))?;

        if let Some(amount) = tokens.amount {
            if amount != order.total_amount() {
                warn!(amount, expected = order.total_amount(), "Approval amount mismatch");
                return Err(ServiceError::ValidationError(format!(
                    "amount {} does not match order total {}",
                    amount,
                    order.total_amount()
                )));
            }
        }

        let gateway = self.gateways.get(order.payment_method())?;
        let approve_request = ApproveRequest {
            payment_method: order.payment_method(),
            tid,
            merchant_order_id: order.id.to_string(),
            merchant_user_id: user_id.to_string(),
            total_amount: order.total_amount(),
            tokens,
        };

        let approval = gateway.approve(&approve_request).await.map_err(|e| {
            counter!("payments.gateway_failures", 1);
            error!(error = %e, "Payment approval failed; order stays pending");
            ServiceError::from(e)
        })?;

        order.complete_payment(&approval.tid)?;

        // Guarded on the previous status so a concurrent approval cannot pay twice.
        let updated = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid))
            .col_expr(order::Column::Tid, Expr::value(order.tid().map(str::to_string)))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Status.eq(OrderStatus::PaymentPending))
            .exec(db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to persist paid status");
                ServiceError::db_error(e)
            })?;

        if updated.rows_affected == 0 {
            let current = Self::current_status(db, order.id).await?;
            error!(
                tid = %approval.tid,
                status = %current,
                "Provider approved a payment but the order left PAYMENT_PENDING concurrently"
            );
            return Err(ServiceError::InvalidStateTransition {
                from: current.to_string(),
                action: "complete payment for",
            });
        }

        counter!("orders.paid", 1);
        info!(tid = ?order.tid(), "Order paid");

        let item_ids: Vec<Uuid> = order.lines().iter().map(|line| line.item_id).collect();
        if let Err(e) = self.cart.delete_cart_lines(user_id, &item_ids).await {
            warn!(error = %e, "Cart cleanup after payment failed");
        }

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderPaid {
                    order_id: order.id,
                    tid: approval.tid,
                })
                .await;
        }

        Ok(OrderDetail::from_parts(&order, address))
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let (order, address) = Self::fetch_order(&*self.db_pool, order_id).await?;
        Self::ensure_owner(&order, user_id)?;
        Ok(OrderDetail::from_parts(&order, address))
    }

    /// All of a user's orders, newest first. Lines and addresses are fetched in two batched queries.
    #[instrument(skip(self))]
    pub async fn list_orders(&self, user_id: Uuid) -> Result<Vec<OrderDetail>, ServiceError> {
        let db = &*self.db_pool;
        UserService::find_with(db, user_id).await?;

        let orders = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::OrderedAt)
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to list orders");
                ServiceError::db_error(e)
            })?;

        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let address_ids: Vec<Uuid> = orders.iter().map(|o| o.address_id).collect();

        let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
        {
            items_by_order.entry(item.order_id).or_default().push(item);
        }

        let addresses: HashMap<Uuid, address::Model> = address::Entity::find()
            .filter(address::Column::Id.is_in(address_ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        orders
            .into_iter()
            .map(|model| {
                let address = addresses.get(&model.address_id).cloned().ok_or_else(|| {
                    ServiceError::InternalError(format!("address missing for order {}", model.id))
                })?;
                let items = items_by_order.remove(&model.id).unwrap_or_default();
                let order = Order::from_models(model, items);
                Ok(OrderDetail::from_parts(&order, address))
            })
            .collect()
    }

    /// Owner-initiated cancellation. No refund is issued here.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let db = &*self.db_pool;
        let (mut order, address) = Self::fetch_order(db, order_id).await?;
        Self::ensure_owner(&order, user_id)?;

        order.cancel()?;
        order.to_update_active_model().update(db).await.map_err(|e| {
            error!(error = %e, "Failed to persist cancellation");
            ServiceError::db_error(e)
        })?;

        info!("Order cancelled");
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(Event::OrderCancelled(order.id)).await;
        }

        Ok(OrderDetail::from_parts(&order, address))
    }

    /// One-way flag set once the buyer reviewed a purchased line.
    #[instrument(skip(self))]
    pub async fn mark_review_written(
        &self,
        user_id: Uuid,
        order_item_id: Uuid,
    ) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let item = order_item::Entity::find_by_id(order_item_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| order_item_not_found(order_item_id))?;

        let (mut order, _) = Self::fetch_order(db, item.order_id).await?;
        Self::ensure_owner(&order, user_id).map_err(|_| order_item_not_found(order_item_id))?;

        if !order.accepts_reviews() {
            return Err(ServiceError::ValidationError(format!(
                "order in {} state cannot be reviewed",
                order.status()
            )));
        }

        let line = order.line_mut(order_item_id).ok_or_else(|| {
            ServiceError::InternalError(format!("line {} missing from its order", order_item_id))
        })?;
        line.mark_review_written()?;

        let result = order_item::Entity::update_many()
            .col_expr(order_item::Column::ReviewWritten, Expr::value(true))
            .filter(order_item::Column::Id.eq(order_item_id))
            .filter(order_item::Column::ReviewWritten.eq(false))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ValidationError(format!(
                "a review was already written for order item {}",
                order_item_id
            )));
        }
        Ok(())
    }

    async fn resolve_address<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        request: &CreateOrderRequest,
    ) -> Result<address::Model, ServiceError> {
        match (&request.address_id, &request.new_address) {
            (Some(address_id), _) => {
                let address = AddressService::find_with(conn, *address_id).await?;
                if address.user_id != user_id {
                    return Err(ServiceError::NotFound(format!(
                        "Address {} not found",
                        address_id
                    )));
                }
                Ok(address)
            }
            (None, Some(fields)) => AddressService::create_with(conn, user_id, fields.clone()).await,
            (None, None) => Err(ServiceError::ValidationError(
                "either an address id or a new address is required".to_string(),
            )),
        }
    }

    async fn insert_order<C: ConnectionTrait>(conn: &C, order: &Order) -> Result<(), ServiceError> {
        order.to_new_active_model().insert(conn).await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to create order in database");
            ServiceError::db_error(e)
        })?;

        order_item::Entity::insert_many(
            order
                .lines()
                .iter()
                .map(|line| line.into_active_model(order.id)),
        )
        .exec_without_returning(conn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to create order items");
            ServiceError::db_error(e)
        })?;

        Ok(())
    }

    /// Order with its lines and address: three point lookups, no per-line queries.
    async fn fetch_order<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<(Order, address::Model), ServiceError> {
        let (model, address) = order::Entity::find_by_id(order_id)
            .find_also_related(address::Entity)
            .one(conn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to fetch order");
                ServiceError::db_error(e)
            })?
            .ok_or_else(|| order_not_found(order_id))?;

        let address = address.ok_or_else(|| {
            ServiceError::InternalError(format!("address missing for order {}", order_id))
        })?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((Order::from_models(model, items), address))
    }

    /// A foreign order is reported exactly like a missing one.
    fn ensure_owner(order: &Order, user_id: Uuid) -> Result<(), ServiceError> {
        if order.is_owned_by(user_id) {
            Ok(())
        } else {
            warn!(order_id = %order.id, user_id = %user_id, "Order access by non-owner");
            Err(order_not_found(order.id))
        }
    }

    async fn current_status<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<OrderStatus, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .map(|model| model.status)
            .ok_or_else(|| order_not_found(order_id))
    }

    /// Gives back stock and coupons held by an order whose payment never started.
    async fn compensate_failed_checkout(&self, order: &mut Order) {
        if let Err(e) = self.try_compensate(order).await {
            error!(
                error = %e,
                order_id = %order.id,
                "Compensation failed; order remains PAYMENT_PENDING with stock held"
            );
        }
    }

    async fn try_compensate(&self, order: &mut Order) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await.map_err(ServiceError::db_error)?;

        for line in order.lines() {
            InventoryService::release_with(&txn, line.item_id, line.quantity()).await?;
        }
        let coupon_ids: Vec<Uuid> = order.lines().iter().filter_map(OrderLine::coupon_id).collect();
        CouponService::restore_with(&txn, order.user_id, &coupon_ids).await?;

        order.cancel()?;
        order
            .to_update_active_model()
            .update(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;
        info!(order_id = %order.id, "Checkout compensated");
        Ok(())
    }
}

fn order_not_found(order_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Order {} not found", order_id))
}

fn order_item_not_found(order_item_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Order item {} not found", order_item_id))
}
