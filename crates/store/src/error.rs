use common::OrderId;
use domain::StockUnderflow;
use thiserror::Error;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An inventory adjustment would have driven stock below zero.
    #[error(transparent)]
    StockUnderflow(#[from] StockUnderflow),

    /// The order row targeted by a write does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// A tracking number collided with an existing order.
    #[error("Duplicate tracking number: {0}")]
    DuplicateTrackingNumber(String),

    /// The store could not be reached or refused the transaction
    /// (lock wait timeout, injected failure, shut down).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A persisted row could not be mapped back to the domain model.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
