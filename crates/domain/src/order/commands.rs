//! Order commands.

use common::{OrderId, UserId};

use super::{
    Cart, CartLine, Money, OrderStatus, PaymentMethod, PaymentStatus, PhoneNumber,
    ShippingAddress,
};
use crate::error::ValidationError;

/// Command to turn a cart into an order.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    /// The authenticated user placing the order.
    pub user_id: UserId,

    /// Lines as submitted by the client.
    pub lines: Vec<CartLine>,

    /// Total the client believes it will be charged.
    pub declared_total: Money,

    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub phone_number: PhoneNumber,
}

impl PlaceOrder {
    /// Creates a new PlaceOrder command.
    pub fn new(
        user_id: UserId,
        lines: Vec<CartLine>,
        declared_total: Money,
        shipping_address: ShippingAddress,
        payment_method: PaymentMethod,
        phone_number: PhoneNumber,
    ) -> Self {
        Self {
            user_id,
            lines,
            declared_total,
            shipping_address,
            payment_method,
            phone_number,
        }
    }

    /// Runs every structural check and returns the normalized cart.
    pub fn validate(&self) -> Result<Cart, ValidationError> {
        self.shipping_address.validate()?;
        if self.declared_total.is_negative() {
            return Err(ValidationError::new("total_amount", "must not be negative"));
        }
        Cart::new(self.lines.clone())
    }
}

/// Command to cancel a pending order on behalf of its owner.
#[derive(Debug, Clone, Copy)]
pub struct CancelOrder {
    pub user_id: UserId,
    pub order_id: OrderId,
}

impl CancelOrder {
    pub fn new(user_id: UserId, order_id: OrderId) -> Self {
        Self { user_id, order_id }
    }
}

/// Command to hard-delete an order aggregate (privileged).
#[derive(Debug, Clone, Copy)]
pub struct DeleteOrder {
    pub order_id: OrderId,
}

impl DeleteOrder {
    pub fn new(order_id: OrderId) -> Self {
        Self { order_id }
    }
}

/// Command to move an order along its shipment lifecycle (privileged).
#[derive(Debug, Clone, Copy)]
pub struct AdvanceStatus {
    pub order_id: OrderId,
    pub to: OrderStatus,
}

impl AdvanceStatus {
    pub fn new(order_id: OrderId, to: OrderStatus) -> Self {
        Self { order_id, to }
    }
}

/// Command to record a payment outcome reported by a collaborator.
#[derive(Debug, Clone)]
pub struct UpdatePaymentStatus {
    pub order_id: OrderId,
    pub to: PaymentStatus,
    pub reference: Option<String>,
}

impl UpdatePaymentStatus {
    pub fn new(order_id: OrderId, to: PaymentStatus, reference: Option<String>) -> Self {
        Self {
            order_id,
            to,
            reference,
        }
    }
}
