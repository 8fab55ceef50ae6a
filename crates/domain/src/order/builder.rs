//! Construction of new order aggregates.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use common::{OrderId, UserId};
use uuid::Uuid;

use super::{
    Order, OrderLine, OrderStatus, PaymentMethod, PaymentStatus, PhoneNumber, PricedCart,
    ShippingAddress,
};

/// Days between placement and the estimated delivery date.
pub const DEFAULT_DELIVERY_DAYS: i64 = 5;

/// Source of tracking numbers.
///
/// Production uses [`RandomTrackingIds`]; tests inject a deterministic source.
pub trait TrackingIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Tracking numbers drawn from the OS random source (122 random bits per id).
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTrackingIds;

impl TrackingIdGenerator for RandomTrackingIds {
    fn generate(&self) -> String {
        format!("TRK{}", Uuid::new_v4().simple()).to_uppercase()
    }
}

/// Deterministic tracking numbers: `{prefix}-000001`, `{prefix}-000002`, ...
#[derive(Debug)]
pub struct SequentialTrackingIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialTrackingIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl TrackingIdGenerator for SequentialTrackingIds {
    fn generate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n:06}", self.prefix)
    }
}

/// Caller-supplied fields of a new order.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub user_id: UserId,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub phone_number: PhoneNumber,
    /// Decided by the payment flow: `Paid` for pre-authorized flows, else `Pending`.
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
}

/// Assembles an [`Order`] and its lines from a priced cart.
#[derive(Clone)]
pub struct OrderAggregateBuilder {
    tracking_ids: Arc<dyn TrackingIdGenerator>,
    tracking_base_url: String,
    delivery_offset: Duration,
}

impl OrderAggregateBuilder {
    pub fn new(tracking_ids: Arc<dyn TrackingIdGenerator>, tracking_base_url: impl Into<String>) -> Self {
        Self {
            tracking_ids,
            tracking_base_url: tracking_base_url.into().trim_end_matches('/').to_string(),
            delivery_offset: Duration::days(DEFAULT_DELIVERY_DAYS),
        }
    }

    pub fn with_delivery_offset(mut self, offset: Duration) -> Self {
        self.delivery_offset = offset;
        self
    }

    /// Draws a fresh tracking number candidate. Uniqueness is checked by the caller.
    pub fn next_tracking_number(&self) -> String {
        self.tracking_ids.generate()
    }

    /// Public locator derived from a tracking number.
    pub fn tracking_reference(&self, tracking_number: &str) -> String {
        format!("{}/{}", self.tracking_base_url, tracking_number)
    }

    /// Builds a pending order whose lines snapshot the resolved prices.
    pub fn build(
        &self,
        draft: OrderDraft,
        priced: PricedCart,
        tracking_number: String,
        now: DateTime<Utc>,
    ) -> Order {
        let order_id = OrderId::new();
        let lines = priced
            .lines
            .into_iter()
            .map(|line| OrderLine::new(order_id, line.product_id, line.quantity, line.unit_price))
            .collect();

        Order {
            id: order_id,
            user_id: draft.user_id,
            total_amount: priced.total,
            status: OrderStatus::Pending,
            payment_status: draft.payment_status,
            payment_method: draft.payment_method,
            payment_reference: draft.payment_reference,
            shipping_address: draft.shipping_address,
            phone_number: draft.phone_number,
            tracking_reference: self.tracking_reference(&tracking_number),
            tracking_number,
            estimated_delivery: now + self.delivery_offset,
            created_at: now,
            lines,
        }
    }
}

impl std::fmt::Debug for OrderAggregateBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderAggregateBuilder")
            .field("tracking_base_url", &self.tracking_base_url)
            .field("delivery_offset", &self.delivery_offset)
            .finish_non_exhaustive()
    }
}
