//! Payment gateway port and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::OrderId;
use domain::Money;
use thiserror::Error;

/// A successful capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCapture {
    /// Opaque reference assigned by the gateway.
    pub reference: String,
}

/// Why a capture did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("Payment declined: {0}")]
    Declined(String),

    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
}

/// Captures funds for placed orders.
///
/// Never called while store locks are held.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Captures `amount` for an order that is already committed.
    async fn capture(&self, order_id: OrderId, amount: Money) -> Result<PaymentCapture, PaymentError>;

    /// Checks that a payment the customer completed before placement, known
    /// to the gateway as `reference`, covers `amount`. A confirmed reference
    /// is consumed and cannot back another order.
    async fn confirm(&self, reference: &str, amount: Money) -> Result<PaymentCapture, PaymentError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    captures: HashMap<String, (OrderId, Money)>,
    /// Payments completed at checkout and not yet used by an order.
    authorized: HashMap<String, Money>,
    next_id: u32,
    fail_on_capture: bool,
}

impl InMemoryGatewayState {
    fn next_reference(&mut self) -> String {
        self.next_id += 1;
        format!("PAY-{:04}", self.next_id)
    }
}

/// In-memory payment gateway for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory payment gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryGatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the gateway to decline every capture while set.
    pub fn set_fail_on_capture(&self, fail: bool) {
        self.state().fail_on_capture = fail;
    }

    /// Returns the number of successful captures.
    pub fn capture_count(&self) -> usize {
        self.state().captures.len()
    }

    /// Returns the order and amount captured under `reference`.
    pub fn captured(&self, reference: &str) -> Option<(OrderId, Money)> {
        self.state().captures.get(reference).copied()
    }

    /// Records a payment the customer completed at checkout and returns its
    /// reference for a later [`confirm`](PaymentGateway::confirm).
    pub fn authorize(&self, amount: Money) -> String {
        let mut state = self.state();
        let reference = state.next_reference();
        state.authorized.insert(reference.clone(), amount);
        reference
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn capture(&self, order_id: OrderId, amount: Money) -> Result<PaymentCapture, PaymentError> {
        let mut state = self.state();

        if state.fail_on_capture {
            return Err(PaymentError::Declined("card declined".to_string()));
        }

        let reference = state.next_reference();
        state.captures.insert(reference.clone(), (order_id, amount));

        Ok(PaymentCapture { reference })
    }

    async fn confirm(&self, reference: &str, amount: Money) -> Result<PaymentCapture, PaymentError> {
        let mut state = self.state();

        match state.authorized.get(reference) {
            None => Err(PaymentError::Declined(format!(
                "no unused payment under reference {reference}"
            ))),
            Some(paid) if *paid != amount => Err(PaymentError::Declined(format!(
                "payment {reference} covers {paid}, order requires {amount}"
            ))),
            Some(_) => {
                state.authorized.remove(reference);
                Ok(PaymentCapture {
                    reference: reference.to_string(),
                })
            }
        }
    }
}
