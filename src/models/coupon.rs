use crate::entities::coupon::{self, CouponScope, DiscountType};
use crate::entities::item;
use crate::errors::ServiceError;
use chrono::{DateTime, Utc};

/// Discount for one unit at `original_price`. Pure; the result is always within `[0, original_price]`.
pub fn calculate_discount(discount_type: DiscountType, discount_value: i64, original_price: i64) -> i64 {
    let original_price = original_price.max(0);
    let discount = match discount_type {
        DiscountType::Fixed => discount_value.min(original_price),
        DiscountType::Percent => {
            // i128 keeps large prices from overflowing before the division
            let raw = i128::from(original_price) * i128::from(discount_value) / 100;
            i64::try_from(raw).unwrap_or(original_price)
        }
    };
    discount.clamp(0, original_price)
}

/// Checks performed under the coupon row lock before incrementing the issued counter.
pub fn ensure_issuable(coupon: &coupon::Model, now: DateTime<Utc>) -> Result<(), ServiceError> {
    if coupon.is_exhausted() {
        return Err(ServiceError::CouponExhausted(coupon.id));
    }
    if coupon.is_expired_at(now) {
        return Err(ServiceError::CouponExpired(coupon.id));
    }
    Ok(())
}

/// Whether the coupon's scope covers the given item.
pub fn ensure_applicable(coupon: &coupon::Model, item: &item::Model) -> Result<(), ServiceError> {
    let applies = match coupon.scope {
        CouponScope::All => true,
        CouponScope::Category => coupon.category.as_deref() == Some(item.category.as_str()),
        CouponScope::Target => coupon.target_item_id == Some(item.id),
    };
    if applies {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(format!(
            "coupon {} does not apply to item {}",
            coupon.id, item.id
        )))
    }
}
