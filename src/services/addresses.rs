use crate::{db::DbPool, entities::address, errors::ServiceError};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;
use validator::Validate;

/// Shipping address fields supplied at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewAddress {
    #[validate(length(min = 1, max = 10, message = "zip code is required"))]
    pub zip_code: String,
    #[validate(length(min = 1, message = "road address is required"))]
    pub road_address: String,
    #[serde(default)]
    pub detail_address: String,
    #[validate(length(min = 1, max = 50, message = "recipient name is required"))]
    pub recipient_name: String,
    #[validate(length(min = 1, max = 20, message = "recipient phone is required"))]
    pub recipient_phone: String,
}

#[derive(Clone)]
pub struct AddressService {
    db_pool: Arc<DbPool>,
}

impl AddressService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    pub async fn find_address_by_id(&self, address_id: Uuid) -> Result<address::Model, ServiceError> {
        Self::find_with(&*self.db_pool, address_id).await
    }

    pub async fn create_address(
        &self,
        user_id: Uuid,
        fields: NewAddress,
    ) -> Result<address::Model, ServiceError> {
        Self::create_with(&*self.db_pool, user_id, fields).await
    }

    pub(crate) async fn find_with<C: ConnectionTrait>(
        conn: &C,
        address_id: Uuid,
    ) -> Result<address::Model, ServiceError> {
        address::Entity::find_by_id(address_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))
    }

    pub(crate) async fn create_with<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        fields: NewAddress,
    ) -> Result<address::Model, ServiceError> {
        fields.validate()?;

        let model = address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            zip_code: Set(fields.zip_code),
            road_address: Set(fields.road_address),
            detail_address: Set(fields.detail_address),
            recipient_name: Set(fields.recipient_name),
            recipient_phone: Set(fields.recipient_phone),
            is_default: Set(false),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %user_id, "Failed to create address");
            ServiceError::db_error(e)
        })?;

        info!(address_id = %model.id, user_id = %user_id, "Address created");
        Ok(model)
    }
}
