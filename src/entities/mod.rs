pub mod address;
pub mod cart_item;
pub mod coupon;
pub mod item;
pub mod order;
pub mod order_item;
pub mod user;
pub mod user_coupon;
