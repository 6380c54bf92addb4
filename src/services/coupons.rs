use crate::{
    db::DbPool,
    entities::{
        coupon::{self, CouponScope, DiscountType},
        item,
        user::{self, UserRole},
        user_coupon,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::coupon::{ensure_applicable, ensure_issuable},
    models::calculate_discount,
    services::{catalog::CatalogService, users::UserService},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_coupon_request", skip_on_field_errors = false))]
pub struct CreateCouponRequest {
    #[validate(length(min = 1, max = 100, message = "coupon name is required"))]
    pub name: String,
    pub discount_type: DiscountType,
    #[validate(range(min = 1, message = "discount value must be positive"))]
    pub discount_value: i64,
    pub scope: CouponScope,
    pub category: Option<String>,
    pub target_item_id: Option<Uuid>,
    pub expired_at: DateTime<Utc>,
    #[validate(range(min = 1, message = "total quantity must be positive"))]
    pub total_quantity: i32,
}

fn validate_coupon_request(req: &CreateCouponRequest) -> Result<(), ValidationError> {
    if req.discount_type == DiscountType::Percent && req.discount_value > 100 {
        return Err(ValidationError::new("percent_over_100"));
    }
    match req.scope {
        CouponScope::Category if req.category.as_deref().map_or(true, str::is_empty) => {
            Err(ValidationError::new("category_required"))
        }
        CouponScope::Target if req.target_item_id.is_none() => {
            Err(ValidationError::new("target_item_required"))
        }
        _ => Ok(()),
    }
}

/// A coupon as held by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCouponView {
    pub user_coupon_id: Uuid,
    pub coupon_id: Uuid,
    pub name: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub scope: CouponScope,
    pub category: Option<String>,
    pub target_item_id: Option<Uuid>,
    pub expired_at: DateTime<Utc>,
    pub used: bool,
}

/// Coupon issuance ledger.
///
/// Issuance for one coupon is serialized by an exclusive row lock on the coupon;
/// different coupons never contend.
#[derive(Clone)]
pub struct CouponService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl CouponService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Pure discount for one unit; see [`calculate_discount`].
    pub fn discount_for(coupon: &coupon::Model, original_price: i64) -> i64 {
        calculate_discount(coupon.discount_type, coupon.discount_value, original_price)
    }

    #[instrument(skip(self, request), fields(user_id = %user_id, scope = %request.scope))]
    pub async fn create_coupon(
        &self,
        user_id: Uuid,
        request: CreateCouponRequest,
    ) -> Result<coupon::Model, ServiceError> {
        request.validate()?;
        let now = Utc::now();
        if request.expired_at <= now {
            return Err(ServiceError::ValidationError(
                "expiry must be in the future".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let creator = UserService::find_with(db, user_id).await?;

        match request.scope {
            CouponScope::All | CouponScope::Category => {
                require_role(&creator, UserRole::Admin, "only administrators create this coupon")?
            }
            CouponScope::Target => {
                require_role(&creator, UserRole::Seller, "only sellers create target coupons")?;
                let item_id = request.target_item_id.ok_or_else(|| {
                    ServiceError::ValidationError("target coupons need an item".to_string())
                })?;
                let target: item::Model = CatalogService::find_with(db, item_id).await?;
                if target.seller_id != creator.id {
                    warn!(item_id = %item_id, "Seller tried to create a coupon for another seller's item");
                    return Err(ServiceError::Forbidden(format!(
                        "item {} is not sold by user {}",
                        item_id, creator.id
                    )));
                }
            }
        }

        let (category, target_item_id) = match request.scope {
            CouponScope::All => (None, None),
            CouponScope::Category => (request.category, None),
            CouponScope::Target => (None, request.target_item_id),
        };

        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name),
            discount_type: Set(request.discount_type),
            discount_value: Set(request.discount_value),
            scope: Set(request.scope),
            category: Set(category),
            target_item_id: Set(target_item_id),
            created_by: Set(creator.id),
            expired_at: Set(request.expired_at),
            total_quantity: Set(request.total_quantity),
            issued_quantity: Set(0),
            created_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create coupon");
            ServiceError::db_error(e)
        })?;

        info!(coupon_id = %model.id, "Coupon created");
        Ok(model)
    }

    /// Issues one coupon to one user, first come first served.
    #[instrument(skip(self), fields(user_id = %user_id, coupon_id = %coupon_id))]
    pub async fn issue(
        &self,
        user_id: Uuid,
        coupon_id: Uuid,
    ) -> Result<user_coupon::Model, ServiceError> {
        let db = &*self.db_pool;

        if user::Entity::find_by_id(user_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .is_none()
        {
            return Err(ServiceError::Unauthorized(format!("unknown user {}", user_id)));
        }

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start coupon issuance transaction");
            ServiceError::db_error(e)
        })?;

        let coupon = coupon::Entity::find_by_id(coupon_id)
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))?;

        if Self::holds_coupon(&txn, user_id, coupon_id).await? {
            warn!("Duplicate coupon issuance rejected");
            return Err(ServiceError::CouponAlreadyIssued(coupon_id));
        }

        ensure_issuable(&coupon, Utc::now()).map_err(|e| {
            warn!(error = %e, "Coupon issuance rejected");
            e
        })?;

        coupon::Entity::update_many()
            .col_expr(
                coupon::Column::IssuedQuantity,
                Expr::col(coupon::Column::IssuedQuantity).add(1),
            )
            .filter(coupon::Column::Id.eq(coupon_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let issued = user_coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            coupon_id: Set(coupon_id),
            used: Set(false),
            issued_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            if ServiceError::is_unique_violation(&e) {
                ServiceError::CouponAlreadyIssued(coupon_id)
            } else {
                ServiceError::db_error(e)
            }
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit coupon issuance");
            ServiceError::db_error(e)
        })?;

        counter!("coupons.issued", 1);
        info!("Coupon issued");

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::CouponIssued { coupon_id, user_id })
                .await;
        }

        Ok(issued)
    }

    pub async fn get_coupon(&self, coupon_id: Uuid) -> Result<coupon::Model, ServiceError> {
        coupon::Entity::find_by_id(coupon_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))
    }

    #[instrument(skip(self))]
    pub async fn list_user_coupons(&self, user_id: Uuid) -> Result<Vec<UserCouponView>, ServiceError> {
        let held = user_coupon::Entity::find()
            .filter(user_coupon::Column::UserId.eq(user_id))
            .find_also_related(coupon::Entity)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(held
            .into_iter()
            .filter_map(|(uc, coupon)| coupon.map(|c| to_view(uc, c)))
            .collect())
    }

    async fn holds_coupon<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        coupon_id: Uuid,
    ) -> Result<bool, ServiceError> {
        Ok(user_coupon::Entity::find()
            .filter(user_coupon::Column::UserId.eq(user_id))
            .filter(user_coupon::Column::CouponId.eq(coupon_id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .is_some())
    }

    /// Validates a coupon for one order line and marks the user's copy used.
    /// Returns the per-unit discount. Runs on the order transaction.
    pub(crate) async fn redeem_with<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        coupon_id: Uuid,
        item: &item::Model,
        original_price: i64,
    ) -> Result<i64, ServiceError> {
        let coupon = coupon::Entity::find_by_id(coupon_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))?;

        if coupon.is_expired_at(Utc::now()) {
            return Err(ServiceError::CouponExpired(coupon_id));
        }
        ensure_applicable(&coupon, item)?;

        let result = user_coupon::Entity::update_many()
            .col_expr(user_coupon::Column::Used, Expr::value(true))
            .filter(user_coupon::Column::UserId.eq(user_id))
            .filter(user_coupon::Column::CouponId.eq(coupon_id))
            .filter(user_coupon::Column::Used.eq(false))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ValidationError(format!(
                "coupon {} is not held unused by user {}",
                coupon_id, user_id
            )));
        }

        Ok(Self::discount_for(&coupon, original_price))
    }

    /// Gives redeemed coupons back after a checkout is rolled back.
    pub(crate) async fn restore_with<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        coupon_ids: &[Uuid],
    ) -> Result<(), ServiceError> {
        if coupon_ids.is_empty() {
            return Ok(());
        }
        user_coupon::Entity::update_many()
            .col_expr(user_coupon::Column::Used, Expr::value(false))
            .filter(user_coupon::Column::UserId.eq(user_id))
            .filter(user_coupon::Column::CouponId.is_in(coupon_ids.iter().copied()))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(())
    }
}

fn require_role(user: &user::Model, role: UserRole, message: &str) -> Result<(), ServiceError> {
    if user.role == role {
        Ok(())
    } else {
        warn!(user_id = %user.id, role = %user.role, required = %role, "Coupon creation refused");
        Err(ServiceError::Forbidden(message.to_string()))
    }
}

fn to_view(uc: user_coupon::Model, c: coupon::Model) -> UserCouponView {
    UserCouponView {
        user_coupon_id: uc.id,
        coupon_id: c.id,
        name: c.name,
        discount_type: c.discount_type,
        discount_value: c.discount_value,
        scope: c.scope,
        category: c.category,
        target_item_id: c.target_item_id,
        expired_at: c.expired_at,
        used: uc.used,
    }
}
