//! Order placement and inventory reconciliation.
//!
//! A placement runs as one store transaction:
//! 1. Read and lock the catalog rows the cart references
//! 2. Price the cart and check the declared total
//! 3. Reserve inventory
//! 4. Build and insert the order aggregate
//!
//! Any failure rolls every step back. Cancellation and deletion reverse the
//! inventory effects under the same discipline.

pub mod catalog;
pub mod compensation;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod inventory;
pub mod service;
pub mod services;

pub use compensation::CompensationHandler;
pub use config::PlacementConfig;
pub use coordinator::{PaymentTerms, TransactionCoordinator};
pub use error::{NotFound, PlacementError, Result};
pub use service::{OrderPlacementService, PaymentFlow};
pub use services::{InMemoryPaymentGateway, PaymentCapture, PaymentError, PaymentGateway};
