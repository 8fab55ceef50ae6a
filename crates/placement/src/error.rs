//! Placement error taxonomy.

use common::OrderId;
use domain::{Conflict, PricingError, ProductId, ValidationError};
use serde::Serialize;
use store::StoreError;
use thiserror::Error;

/// What could not be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "resource", rename_all = "snake_case")]
pub enum NotFound {
    /// Every requested product id absent from the catalog.
    Products { product_ids: Vec<ProductId> },
    Order { order_id: OrderId },
}

impl std::fmt::Display for NotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFound::Products { product_ids } => {
                let ids: Vec<&str> = product_ids.iter().map(ProductId::as_str).collect();
                write!(f, "Products not found: {}", ids.join(", "))
            }
            NotFound::Order { order_id } => write!(f, "Order not found: {order_id}"),
        }
    }
}

/// Errors surfaced by placement and compensation.
///
/// Exactly four kinds reach callers. `Validation` and `NotFound` are raised
/// before any inventory write; `Conflict` and `System` always imply the
/// enclosing transaction was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    /// Malformed input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A referenced product or order does not exist.
    #[error("{0}")]
    NotFound(NotFound),

    /// A business rule rejected the operation.
    #[error(transparent)]
    Conflict(#[from] Conflict),

    /// Storage or transaction infrastructure failure.
    #[error("System error: {0}")]
    System(String),
}

impl PlacementError {
    pub fn products_not_found(product_ids: Vec<ProductId>) -> Self {
        PlacementError::NotFound(NotFound::Products { product_ids })
    }

    pub fn order_not_found(order_id: OrderId) -> Self {
        PlacementError::NotFound(NotFound::Order { order_id })
    }

    /// Stable label of the error kind, used in metrics and response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            PlacementError::Validation(_) => "validation",
            PlacementError::NotFound(_) => "not_found",
            PlacementError::Conflict(_) => "conflict",
            PlacementError::System(_) => "system",
        }
    }
}

impl From<StoreError> for PlacementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StockUnderflow(underflow) => Conflict::InsufficientStock {
                product_id: underflow.product_id,
                requested: underflow.requested,
                available: underflow.available,
            }
            .into(),
            StoreError::OrderNotFound(order_id) => PlacementError::order_not_found(order_id),
            other => PlacementError::System(other.to_string()),
        }
    }
}

impl From<PricingError> for PlacementError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::Validation(e) => PlacementError::Validation(e),
            PricingError::Conflict(c) => PlacementError::Conflict(c),
            PricingError::UnknownProduct(id) => PlacementError::products_not_found(vec![id]),
        }
    }
}

/// Result type for placement operations.
pub type Result<T> = std::result::Result<T, PlacementError>;

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Money, StockUnderflow};

    #[test]
    fn stock_underflow_becomes_insufficient_stock() {
        let err: PlacementError = StoreError::StockUnderflow(StockUnderflow {
            product_id: ProductId::new("P"),
            requested: 2,
            available: 1,
        })
        .into();

        assert_eq!(err.kind(), "conflict");
        assert!(matches!(
            err,
            PlacementError::Conflict(Conflict::InsufficientStock {
                requested: 2,
                available: 1,
                ..
            })
        ));
    }

    #[test]
    fn infrastructure_failures_are_system() {
        let err: PlacementError = StoreError::Unavailable("lock wait timeout".into()).into();
        assert_eq!(err.kind(), "system");
        assert!(err.to_string().contains("lock wait timeout"));
    }

    #[test]
    fn unknown_product_is_not_found() {
        let err: PlacementError = PricingError::UnknownProduct(ProductId::new("GHOST")).into();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.to_string(), "Products not found: GHOST");
    }

    #[test]
    fn conflict_keeps_its_details() {
        let err: PlacementError = Conflict::TotalMismatch {
            declared: Money::from_cents(1000),
            computed: Money::from_cents(2598),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Total mismatch: declared $10.00, computed $25.98"
        );
    }
}
