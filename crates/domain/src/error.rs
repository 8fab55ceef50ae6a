//! Domain error types.

use common::OrderId;
use serde::Serialize;
use thiserror::Error;

use crate::order::{Money, OrderStatus, PaymentStatus, ProductId};

/// Malformed input. Safe to report verbatim to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    /// Name of the offending field.
    pub field: String,
    /// Human readable explanation.
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// A required field was missing or blank.
    pub fn required(field: impl Into<String>) -> Self {
        Self::new(field, "is required")
    }
}

/// Business-rule violations detected while a transaction is open.
///
/// These are expected outcomes the user can act on, not bugs. Each variant
/// carries enough detail to render a message without re-reading state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "conflict", rename_all = "snake_case")]
pub enum Conflict {
    /// Requested quantity exceeds the stock observed under lock.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: i64,
    },

    /// Client-declared total differs from the authoritative total.
    #[error("Total mismatch: declared {declared}, computed {computed}")]
    TotalMismatch { declared: Money, computed: Money },

    /// Hard deletion is only allowed from pending or cancelled.
    #[error("Order {order_id} cannot be deleted in {status} status")]
    OrderNotDeletable {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// Cancellation is only allowed from pending.
    #[error("Order {order_id} cannot be cancelled in {status} status")]
    OrderNotCancellable {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// Shipment status change outside the forward-only chain.
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Payment status change not permitted from the current payment status.
    #[error("Order {order_id} payment cannot move from {from} to {to}")]
    InvalidPaymentTransition {
        order_id: OrderId,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    /// The payment gateway refused or failed the capture.
    #[error("Payment declined: {reason}")]
    PaymentDeclined { reason: String },

    /// A gateway capture for the order has not settled yet.
    #[error("Order {order_id} is awaiting payment capture")]
    PaymentInProgress { order_id: OrderId },

    /// The gateway captured funds after the order stopped accepting payment.
    /// The capture has to be refunded.
    #[error(
        "Payment {reference} was captured for order {order_id} in {status} status with payment {payment_status}"
    )]
    CaptureNotApplied {
        order_id: OrderId,
        status: OrderStatus,
        payment_status: PaymentStatus,
        reference: String,
    },
}
