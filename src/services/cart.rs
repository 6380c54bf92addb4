use crate::{db::DbPool, entities::cart_item, errors::ServiceError};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DbPool>,
}

impl CartService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    pub async fn find_cart_lines_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<cart_item::Model>, ServiceError> {
        cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Bulk delete; lines that are already gone are ignored.
    #[instrument(skip(self, item_ids), fields(user_id = %user_id, items = item_ids.len()))]
    pub async fn delete_cart_lines(&self, user_id: Uuid, item_ids: &[Uuid]) -> Result<u64, ServiceError> {
        if item_ids.is_empty() {
            return Ok(0);
        }

        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ItemId.is_in(item_ids.iter().copied()))
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to delete cart lines");
                ServiceError::db_error(e)
            })?;

        debug!(deleted = result.rows_affected, "Cart lines removed");
        Ok(result.rows_affected)
    }
}
