//! Application services. Each owns a handle to the pool; the `*_with` helpers
//! take an explicit connection so callers can compose them inside one transaction.

pub mod addresses;
pub mod cart;
pub mod catalog;
pub mod coupons;
pub mod inventory;
pub mod orders;
pub mod users;
