//! External collaborators consumed by the placement service.

pub mod payment;

pub use payment::{InMemoryPaymentGateway, PaymentCapture, PaymentError, PaymentGateway};
