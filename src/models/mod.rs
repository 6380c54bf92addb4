pub mod coupon;
pub mod order;
pub mod order_line;

pub use coupon::calculate_discount;
pub use order::{Order, OrderIdentifier};
pub use order_line::OrderLine;
