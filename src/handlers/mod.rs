pub mod coupons;
pub mod orders;

use crate::{
    db::DbPool,
    events::EventSender,
    payments::PaymentGatewayRegistry,
    services::{coupons::CouponService, orders::OrderService},
};
use std::sync::Arc;

/// Services shared by every handler.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub coupons: Arc<CouponService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateways: Arc<PaymentGatewayRegistry>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            orders: Arc::new(OrderService::new(
                db_pool.clone(),
                gateways,
                event_sender.clone(),
            )),
            coupons: Arc::new(CouponService::new(db_pool, event_sender)),
        }
    }
}
