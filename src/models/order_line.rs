use crate::entities::{item, order_item};
use crate::errors::ServiceError;
use sea_orm::Set;
use serde::Serialize;
use uuid::Uuid;

/// One line of an order: a quantity of one item at a price snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderLine {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    quantity: i32,
    original_price: i64,
    coupon_id: Option<Uuid>,
    coupon_discount: i64,
    final_price: i64,
    review_written: bool,
}

impl OrderLine {
    /// Snapshots the item's current base price.
    pub fn create(item: &item::Model, quantity: i32) -> Result<Self, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "quantity for item {} must be at least 1",
                item.id
            )));
        }
        let price = item.base_price();
        Ok(Self {
            id: Uuid::new_v4(),
            item_id: item.id,
            item_name: item.name.clone(),
            quantity,
            original_price: price,
            coupon_id: None,
            coupon_discount: 0,
            final_price: price,
            review_written: false,
        })
    }

    /// Records a coupon discount. The final price floors at zero.
    pub fn apply_coupon(&mut self, coupon_id: Uuid, discount: i64) {
        let discount = discount.max(0);
        self.coupon_id = Some(coupon_id);
        self.coupon_discount = discount;
        self.final_price = (self.original_price - discount).max(0);
    }

    pub fn quantity(&self) -> i32 {
        self.quantity
    }

    pub fn original_price(&self) -> i64 {
        self.original_price
    }

    pub fn coupon_id(&self) -> Option<Uuid> {
        self.coupon_id
    }

    pub fn coupon_discount(&self) -> i64 {
        self.coupon_discount
    }

    pub fn final_price(&self) -> i64 {
        self.final_price
    }

    pub fn review_written(&self) -> bool {
        self.review_written
    }

    pub fn total_price(&self) -> i64 {
        self.final_price * i64::from(self.quantity)
    }

    pub fn mark_review_written(&mut self) -> Result<(), ServiceError> {
        if self.review_written {
            return Err(ServiceError::ValidationError(format!(
                "a review was already written for order item {}",
                self.id
            )));
        }
        self.review_written = true;
        Ok(())
    }

    /// Called for each line when its order is cancelled. Prices are left untouched.
    pub(crate) fn on_order_cancelled(&self) {}

    pub fn into_active_model(&self, order_id: Uuid) -> order_item::ActiveModel {
        order_item::ActiveModel {
            id: Set(self.id),
            order_id: Set(order_id),
            item_id: Set(self.item_id),
            item_name: Set(self.item_name.clone()),
            quantity: Set(self.quantity),
            original_price: Set(self.original_price),
            coupon_id: Set(self.coupon_id),
            coupon_discount: Set(self.coupon_discount),
            final_price: Set(self.final_price),
            review_written: Set(self.review_written),
        }
    }
}

impl From<order_item::Model> for OrderLine {
    fn from(model: order_item::Model) -> Self {
        Self {
            id: model.id,
            item_id: model.item_id,
            item_name: model.item_name,
            quantity: model.quantity,
            original_price: model.original_price,
            coupon_id: model.coupon_id,
            coupon_discount: model.coupon_discount,
            final_price: model.final_price,
            review_written: model.review_written,
        }
    }
}
