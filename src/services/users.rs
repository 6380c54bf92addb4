use crate::{db::DbPool, entities::user, errors::ServiceError};
use sea_orm::{ConnectionTrait, EntityTrait};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct UserService {
    db_pool: Arc<DbPool>,
}

impl UserService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    pub async fn find_user_by_id(&self, user_id: Uuid) -> Result<user::Model, ServiceError> {
        Self::find_with(&*self.db_pool, user_id).await
    }

    pub(crate) async fn find_with<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))
    }
}
