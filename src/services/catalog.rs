use crate::{db::DbPool, entities::item, errors::ServiceError};
use sea_orm::{ConnectionTrait, EntityTrait};
use std::sync::Arc;
use uuid::Uuid;

/// Read-only view of the item catalog.
#[derive(Clone)]
pub struct CatalogService {
    db_pool: Arc<DbPool>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    pub async fn find_item_by_id(&self, item_id: Uuid) -> Result<item::Model, ServiceError> {
        Self::find_with(&*self.db_pool, item_id).await
    }

    pub(crate) async fn find_with<C: ConnectionTrait>(
        conn: &C,
        item_id: Uuid,
    ) -> Result<item::Model, ServiceError> {
        item::Entity::find_by_id(item_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found", item_id)))
    }
}
