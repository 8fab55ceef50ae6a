//! Order aggregate: an order together with its lines.

use chrono::{DateTime, Utc};
use common::{OrderId, OrderLineId, UserId};
use serde::{Deserialize, Serialize};

use super::{
    Money, OrderStatus, PaymentMethod, PaymentStatus, PhoneNumber, ProductId, ShippingAddress,
};

/// Largest allowed gap between a declared total and the sum of line subtotals.
pub const TOTAL_TOLERANCE: Money = Money::from_cents(1);

/// One purchased product inside an order.
///
/// `unit_price` is the price at the moment of purchase and never follows later
/// catalog changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub subtotal: Money,
}

impl OrderLine {
    /// Creates a line, deriving the subtotal from price and quantity.
    pub fn new(
        order_id: OrderId,
        product_id: impl Into<ProductId>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            id: OrderLineId::new(),
            order_id,
            product_id: product_id.into(),
            quantity,
            unit_price,
            subtotal: unit_price.multiply(quantity),
        }
    }
}

/// Order aggregate root.
///
/// Created only inside a committed placement transaction and destroyed only by
/// compensation; the lines are always persisted and removed together with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    /// Opaque reference returned by the payment gateway, if any.
    pub payment_reference: Option<String>,
    pub shipping_address: ShippingAddress,
    pub phone_number: PhoneNumber,
    pub tracking_number: String,
    pub tracking_reference: String,
    pub estimated_delivery: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Sum of all line subtotals.
    pub fn lines_total(&self) -> Money {
        self.lines.iter().map(|line| line.subtotal).sum()
    }

    /// Returns true if `total_amount` matches the lines within [`TOTAL_TOLERANCE`].
    pub fn is_total_consistent(&self) -> bool {
        self.total_amount.abs_diff(self.lines_total()) <= TOTAL_TOLERANCE
    }

    /// Returns the line for a product, if present.
    pub fn line_for(&self, product_id: &ProductId) -> Option<&OrderLine> {
        self.lines.iter().find(|line| &line.product_id == product_id)
    }

    /// Total number of units across all lines.
    pub fn total_quantity(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }

    /// Returns true while a gateway capture for this order has not settled.
    ///
    /// Such an order must not change status until the capture outcome is
    /// recorded. Cash on delivery orders stay payment-pending by design and
    /// are never awaiting a capture.
    pub fn awaiting_capture(&self) -> bool {
        self.payment_status == PaymentStatus::Pending && !self.payment_method.settles_on_delivery()
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}
