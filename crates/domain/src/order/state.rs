//! Order and payment status state machines.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Shipment lifecycle of an order.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──► Shipped ──► Delivered
///    │  │          │            │           │
///    │  └──────────┴────────────┴───────────┴──► Refunded
///    └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Placed, inventory already decremented.
    #[default]
    Pending,

    /// Accepted by the back office.
    Processing,

    /// Handed to the carrier.
    Shipped,

    /// Received by the customer.
    Delivered,

    /// Withdrawn before processing; inventory restored (terminal state).
    Cancelled,

    /// Money returned after the goods left the shelf (terminal state).
    Refunded,
}

impl OrderStatus {
    /// Returns true if the order can be cancelled in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the aggregate may be hard-deleted in this state.
    pub fn can_delete(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Cancelled)
    }

    /// Returns true if deleting in this state must give stock back.
    ///
    /// Cancelled orders already restored their inventory when they were cancelled.
    pub fn holds_inventory(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// The next state in the forward-only fulfilment chain, if any.
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::Processing),
            OrderStatus::Processing => Some(OrderStatus::Shipped),
            OrderStatus::Shipped => Some(OrderStatus::Delivered),
            _ => None,
        }
    }

    /// Returns true for a step along the fulfilment chain.
    ///
    /// Cancellation and refunds are excluded: they go through compensation,
    /// which decides whether stock comes back.
    pub fn can_advance_to(&self, to: OrderStatus) -> bool {
        match to {
            OrderStatus::Cancelled | OrderStatus::Refunded | OrderStatus::Pending => false,
            _ => self.next() == Some(to),
        }
    }

    /// Returns true if the order may be marked refunded from this state.
    pub fn can_refund(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    /// Returns the state name as stored and rendered.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(ValidationError::new(
                "status",
                format!("unknown order status '{other}'"),
            )),
        }
    }
}

/// Payment lifecycle, orthogonal to shipment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn can_transition_to(&self, to: PaymentStatus) -> bool {
        matches!(
            (self, to),
            (PaymentStatus::Pending, PaymentStatus::Paid)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Failed, PaymentStatus::Paid)
                | (PaymentStatus::Paid, PaymentStatus::Refunded)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(ValidationError::new(
                "payment_status",
                format!("unknown payment status '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    #[test]
    fn test_default_state_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
        assert_eq!(PaymentStatus::default(), PaymentStatus::Pending);
    }

    #[test]
    fn test_only_pending_can_cancel() {
        for status in ALL {
            assert_eq!(status.can_cancel(), status == OrderStatus::Pending);
        }
    }

    #[test]
    fn test_delete_allowed_from_pending_and_cancelled() {
        assert!(OrderStatus::Pending.can_delete());
        assert!(OrderStatus::Cancelled.can_delete());
        assert!(!OrderStatus::Processing.can_delete());
        assert!(!OrderStatus::Shipped.can_delete());
        assert!(!OrderStatus::Delivered.can_delete());
        assert!(!OrderStatus::Refunded.can_delete());
    }

    #[test]
    fn test_only_pending_holds_inventory_on_delete() {
        assert!(OrderStatus::Pending.holds_inventory());
        assert!(!OrderStatus::Cancelled.holds_inventory());
    }

    #[test]
    fn test_forward_only_chain() {
        assert!(OrderStatus::Pending.can_advance_to(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_advance_to(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_advance_to(OrderStatus::Delivered));

        assert!(!OrderStatus::Pending.can_advance_to(OrderStatus::Shipped));
        assert!(!OrderStatus::Shipped.can_advance_to(OrderStatus::Processing));
        assert!(!OrderStatus::Delivered.can_advance_to(OrderStatus::Pending));
        assert!(!OrderStatus::Pending.can_advance_to(OrderStatus::Cancelled));
    }

    #[test]
    fn test_refund_from_any_non_terminal_state() {
        assert!(OrderStatus::Pending.can_refund());
        assert!(OrderStatus::Processing.can_refund());
        assert!(OrderStatus::Shipped.can_refund());
        assert!(OrderStatus::Delivered.can_refund());
        assert!(!OrderStatus::Cancelled.can_refund());
        assert!(!OrderStatus::Refunded.can_refund());
        assert!(!OrderStatus::Shipped.can_advance_to(OrderStatus::Refunded));
    }

    #[test]
    fn test_terminal_states() {
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Refunded.is_terminal());
        assert!(!OrderStatus::Delivered.is_terminal());
    }

    #[test]
    fn test_status_parses_from_display() {
        for status in ALL {
            assert_eq!(status.to_string().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("lost".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_payment_transitions() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Paid));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Failed));
        assert!(PaymentStatus::Paid.can_transition_to(PaymentStatus::Refunded));
        assert!(!PaymentStatus::Refunded.can_transition_to(PaymentStatus::Paid));
        assert!(!PaymentStatus::Paid.can_transition_to(PaymentStatus::Pending));
    }

    #[test]
    fn test_serialization_is_lowercase() {
        let json = serde_json::to_string(&OrderStatus::Shipped).unwrap();
        assert_eq!(json, "\"shipped\"");
        let json = serde_json::to_string(&PaymentStatus::Paid).unwrap();
        assert_eq!(json, "\"paid\"");
    }
}
