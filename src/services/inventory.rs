use crate::{db::DbPool, entities::item, errors::ServiceError};
use metrics::counter;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{error, instrument, warn};
use uuid::Uuid;

/// Stock ledger over `items.quantity`.
///
/// Reservation is a single conditional `UPDATE ... WHERE quantity >= n`, so the
/// check and the decrement cannot interleave with another buyer's, whatever the
/// number of service instances.
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Reserves stock outside of any caller transaction.
    pub async fn reserve(&self, item_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        Self::reserve_with(&*self.db_pool, item_id, quantity).await
    }

    /// Decrements `quantity` units of `item_id` on `conn`, or fails with `InsufficientStock`.
    #[instrument(skip(conn))]
    pub async fn reserve_with<C: ConnectionTrait>(
        conn: &C,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "reservation quantity must be positive, got {}",
                quantity
            )));
        }

        let result = item::Entity::update_many()
            .col_expr(
                item::Column::Quantity,
                Expr::col(item::Column::Quantity).sub(quantity),
            )
            .filter(item::Column::Id.eq(item_id))
            .filter(item::Column::Quantity.gte(quantity))
            .exec(conn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to reserve stock");
                ServiceError::db_error(e)
            })?;

        if result.rows_affected == 0 {
            let exists = item::Entity::find_by_id(item_id)
                .one(conn)
                .await
                .map_err(ServiceError::db_error)?
                .is_some();
            if !exists {
                return Err(ServiceError::NotFound(format!("Item {} not found", item_id)));
            }
            counter!("inventory.reservation_rejected", 1);
            warn!("Insufficient stock");
            return Err(ServiceError::InsufficientStock {
                item_id,
                requested: quantity,
            });
        }

        Ok(())
    }

    /// Returns previously reserved units to stock.
    #[instrument(skip(conn))]
    pub async fn release_with<C: ConnectionTrait>(
        conn: &C,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity < 1 {
            return Ok(());
        }

        let result = item::Entity::update_many()
            .col_expr(
                item::Column::Quantity,
                Expr::col(item::Column::Quantity).add(quantity),
            )
            .filter(item::Column::Id.eq(item_id))
            .exec(conn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to release stock");
                ServiceError::db_error(e)
            })?;

        if result.rows_affected == 0 {
            warn!("Released stock for an item that no longer exists");
        }
        Ok(())
    }
}
