//! Transaction coordinator for order placement.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use domain::{
    Cart, Order, OrderAggregateBuilder, OrderDraft, PaymentStatus, PlaceOrder, TrackingIdGenerator,
    resolve_pricing,
};
use store::{OrderStore, StoreTransaction};

use crate::catalog;
use crate::config::PlacementConfig;
use crate::error::{PlacementError, Result};
use crate::inventory;

/// Payment fields an order is created with, decided by the payment flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTerms {
    pub status: PaymentStatus,
    pub reference: Option<String>,
}

impl PaymentTerms {
    /// Paid before or without an external capture.
    pub fn paid(reference: Option<String>) -> Self {
        Self {
            status: PaymentStatus::Paid,
            reference,
        }
    }

    /// Awaiting capture or collection.
    pub fn pending() -> Self {
        Self {
            status: PaymentStatus::Pending,
            reference: None,
        }
    }
}

/// Runs `fut` to completion or fails with a system error once `timeout`
/// elapses. A transaction owned by `fut` is dropped, and so rolled back, on timeout.
pub(crate) async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut).await.map_err(|_| {
        tracing::warn!(timeout_ms = timeout.as_millis() as u64, "transaction timed out");
        PlacementError::System(format!(
            "transaction did not complete within {}ms",
            timeout.as_millis()
        ))
    })?
}

/// Places orders atomically.
///
/// One placement is one store transaction: snapshot read under lock,
/// pricing, inventory reservation, aggregate construction, insert, commit.
/// Any failure drops the transaction so none of its writes survive. The
/// coordinator never retries.
pub struct TransactionCoordinator<S: OrderStore> {
    store: S,
    builder: OrderAggregateBuilder,
    config: PlacementConfig,
}

impl<S: OrderStore> TransactionCoordinator<S> {
    pub fn new(store: S, tracking_ids: Arc<dyn TrackingIdGenerator>, config: PlacementConfig) -> Self {
        let builder = OrderAggregateBuilder::new(tracking_ids, config.tracking_base_url.clone())
            .with_delivery_offset(config.delivery_offset);
        Self {
            store,
            builder,
            config,
        }
    }

    /// Places an order and returns the committed aggregate.
    #[tracing::instrument(skip_all, fields(user_id = %command.user_id, lines = command.lines.len()))]
    pub async fn place(&self, command: &PlaceOrder, payment: PaymentTerms) -> Result<Order> {
        let started = Instant::now();

        let result = match command.validate() {
            Ok(cart) => {
                bounded(
                    self.config.transaction_timeout,
                    self.place_in_transaction(command, cart, payment),
                )
                .await
            }
            Err(e) => Err(e.into()),
        };

        metrics::histogram!("order_placement_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                metrics::counter!("orders_placed_total").increment(1);
                tracing::info!(
                    order_id = %order.id,
                    total = %order.total_amount,
                    units = order.total_quantity(),
                    tracking_number = %order.tracking_number,
                    "order placed"
                );
            }
            Err(e) => {
                metrics::counter!("order_placement_failures_total", "kind" => e.kind())
                    .increment(1);
                tracing::warn!(kind = e.kind(), error = %e, "order placement failed");
            }
        }

        result
    }

    async fn place_in_transaction(
        &self,
        command: &PlaceOrder,
        cart: Cart,
        payment: PaymentTerms,
    ) -> Result<Order> {
        let mut tx = self.store.begin().await?;

        let snapshot = catalog::read_snapshot(&mut tx, &cart.product_ids()).await?;
        let priced = resolve_pricing(&cart, &snapshot, command.declared_total)?;
        inventory::reserve(&mut tx, &priced.lines).await?;

        let tracking_number = self.allocate_tracking_number(&mut tx).await?;
        let draft = OrderDraft {
            user_id: command.user_id,
            shipping_address: command.shipping_address.clone(),
            payment_method: command.payment_method,
            phone_number: command.phone_number.clone(),
            payment_status: payment.status,
            payment_reference: payment.reference,
        };
        let order = self.builder.build(draft, priced, tracking_number, Utc::now());

        tx.insert_order(&order).await?;
        tx.commit().await?;

        Ok(order)
    }

    /// Draws tracking numbers until one is unused in the store.
    async fn allocate_tracking_number(&self, tx: &mut S::Transaction) -> Result<String> {
        for attempt in 1..=self.config.max_tracking_attempts {
            let candidate = self.builder.next_tracking_number();
            if !tx.tracking_number_exists(&candidate).await? {
                return Ok(candidate);
            }
            tracing::warn!(attempt, "tracking number collision");
        }
        Err(PlacementError::System(format!(
            "no unique tracking number after {} attempts",
            self.config.max_tracking_attempts
        )))
    }
}
