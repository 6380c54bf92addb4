use crate::entities::order::{self, OrderStatus, PaymentMethod};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::models::order_line::OrderLine;
use chrono::{DateTime, Utc};
use sea_orm::Set;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix of the order token used by widget-style providers.
pub const MERCHANT_ORDER_PREFIX: &str = "ORDER_";

/// Order aggregate. Totals are always derived from the lines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub address_id: Uuid,
    pub ordered_at: DateTime<Utc>,
    status: OrderStatus,
    payment_method: PaymentMethod,
    tid: Option<String>,
    lines: Vec<OrderLine>,
}

impl Order {
    /// Assembles a new order in `PAYMENT_PENDING`.
    pub fn place(
        user_id: Uuid,
        address_id: Uuid,
        payment_method: PaymentMethod,
        lines: Vec<OrderLine>,
    ) -> Result<Self, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "an order needs at least one line".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            address_id,
            ordered_at: Utc::now(),
            status: OrderStatus::PaymentPending,
            payment_method,
            tid: None,
            lines,
        })
    }

    pub fn from_models(model: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            address_id: model.address_id,
            ordered_at: model.ordered_at,
            status: model.status,
            payment_method: model.payment_method,
            tid: model.tid,
            lines: items.into_iter().map(OrderLine::from).collect(),
        }
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn tid(&self) -> Option<&str> {
        self.tid.as_deref()
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn line_mut(&mut self, line_id: Uuid) -> Option<&mut OrderLine> {
        self.lines.iter_mut().find(|line| line.id == line_id)
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }

    pub fn total_amount(&self) -> i64 {
        self.lines.iter().map(OrderLine::total_price).sum()
    }

    pub fn total_quantity(&self) -> i32 {
        self.lines.iter().map(OrderLine::quantity).sum()
    }

    /// First line's name, plus "+N more" when the order has several lines.
    pub fn item_summary(&self) -> String {
        match self.lines.split_first() {
            None => "order items".to_string(),
            Some((first, [])) => first.item_name.clone(),
            Some((first, rest)) => format!("{} +{} more", first.item_name, rest.len()),
        }
    }

    /// Stores the provider reference returned by `ready`.
    pub fn assign_tid(&mut self, tid: impl Into<String>) {
        self.tid = Some(tid.into());
    }

    pub fn complete_payment(&mut self, tid: &str) -> Result<(), ServiceError> {
        if self.status != OrderStatus::PaymentPending {
            return Err(self.illegal("complete payment for"));
        }
        self.status = OrderStatus::Paid;
        if !tid.is_empty() {
            self.tid = Some(tid.to_string());
        }
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), ServiceError> {
        if self.status == OrderStatus::Delivered {
            return Err(self.illegal("cancel"));
        }
        self.status = OrderStatus::Cancelled;
        self.lines.iter().for_each(OrderLine::on_order_cancelled);
        Ok(())
    }

    pub fn start_shipping(&mut self) -> Result<(), ServiceError> {
        if self.status != OrderStatus::Paid {
            return Err(self.illegal("ship"));
        }
        self.status = OrderStatus::Shipping;
        Ok(())
    }

    pub fn mark_delivered(&mut self) -> Result<(), ServiceError> {
        if self.status != OrderStatus::Shipping {
            return Err(self.illegal("deliver"));
        }
        self.status = OrderStatus::Delivered;
        Ok(())
    }

    /// Reviews are only accepted once the buyer has paid.
    pub fn accepts_reviews(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Paid | OrderStatus::Shipping | OrderStatus::Delivered
        )
    }

    fn illegal(&self, action: &'static str) -> ServiceError {
        ServiceError::InvalidStateTransition {
            from: self.status.to_string(),
            action,
        }
    }

    /// Full row for the first insert.
    pub fn to_new_active_model(&self) -> order::ActiveModel {
        order::ActiveModel {
            id: Set(self.id),
            user_id: Set(self.user_id),
            address_id: Set(self.address_id),
            ordered_at: Set(self.ordered_at),
            status: Set(self.status),
            payment_method: Set(self.payment_method),
            tid: Set(self.tid.clone()),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
    }

    /// Mutable columns only; ordered_at and payment_method never change.
    pub fn to_update_active_model(&self) -> order::ActiveModel {
        order::ActiveModel {
            id: sea_orm::Unchanged(self.id),
            status: Set(self.status),
            tid: Set(self.tid.clone()),
            ..Default::default()
        }
    }
}

/// Path identifier for an order: the bare UUID or the `ORDER_<uuid>` merchant token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderIdentifier(pub Uuid);

impl FromStr for OrderIdentifier {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let candidate = trimmed
            .strip_prefix(MERCHANT_ORDER_PREFIX)
            .unwrap_or(trimmed);
        Uuid::parse_str(candidate)
            .map(OrderIdentifier)
            .map_err(|_| ServiceError::ValidationError(format!("invalid order id: {}", raw)))
    }
}

impl fmt::Display for OrderIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
