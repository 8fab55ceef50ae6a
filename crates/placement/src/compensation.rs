//! Compensation handler: cancellation, refunds, failed captures, and
//! deletion of placed orders.
//!
//! Every path runs in one transaction that locks the order row, restores the
//! stock its lines took when the order still holds it, and then updates or
//! removes the order. An ineligible order is rejected before anything is
//! written. Orders whose gateway capture has not settled are left alone.

use std::time::Duration;

use common::{OrderId, UserId};
use domain::{Conflict, Order, OrderStatus, PaymentStatus};
use store::{OrderStore, StoreTransaction};

use crate::coordinator::bounded;
use crate::error::{PlacementError, Result};
use crate::inventory;

/// Reverses the inventory effects of placed orders.
pub struct CompensationHandler<S: OrderStore> {
    store: S,
    timeout: Duration,
}

impl<S: OrderStore> CompensationHandler<S> {
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Cancels a pending order and restores its stock.
    ///
    /// With `requested_by` set, an order owned by someone else is reported as
    /// not found.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId, requested_by: Option<UserId>) -> Result<Order> {
        let order = bounded(self.timeout, self.cancel_in_transaction(order_id, requested_by))
            .await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(%order_id, "order cancelled");
        Ok(order)
    }

    /// Marks an order refunded. A pending order still holds its stock, which
    /// is given back in the same transaction.
    #[tracing::instrument(skip(self))]
    pub async fn refund(&self, order_id: OrderId) -> Result<Order> {
        let (order, restored) = bounded(self.timeout, self.refund_in_transaction(order_id)).await?;

        metrics::counter!("orders_refunded_total").increment(1);
        tracing::info!(%order_id, restored, "order refunded");
        Ok(order)
    }

    /// Records a failed gateway capture: the order is cancelled, its stock
    /// restored, and its payment marked failed.
    ///
    /// Runs whatever status the order reached in the meantime. An order that
    /// already gave its stock back is not restored twice.
    #[tracing::instrument(skip(self))]
    pub async fn fail_capture(&self, order_id: OrderId) -> Result<Order> {
        let (order, restored) =
            bounded(self.timeout, self.fail_capture_in_transaction(order_id)).await?;

        if restored {
            metrics::counter!("orders_cancelled_total").increment(1);
        }
        tracing::info!(%order_id, restored, "unpaid order closed");
        Ok(order)
    }

    /// Removes an order and its lines.
    ///
    /// Only pending and cancelled orders may be deleted. A pending order's
    /// stock is restored; a cancelled order already gave its stock back.
    /// Deleting an order that no longer exists is `NotFound`.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, order_id: OrderId) -> Result<()> {
        let restored = bounded(self.timeout, self.delete_in_transaction(order_id)).await?;

        metrics::counter!("orders_deleted_total").increment(1);
        tracing::info!(%order_id, restored, "order deleted");
        Ok(())
    }

    async fn cancel_in_transaction(
        &self,
        order_id: OrderId,
        requested_by: Option<UserId>,
    ) -> Result<Order> {
        let mut tx = self.store.begin().await?;

        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| PlacementError::order_not_found(order_id))?;

        if let Some(user_id) = requested_by
            && !order.is_owned_by(user_id)
        {
            return Err(PlacementError::order_not_found(order_id));
        }

        ensure_settled(&order)?;
        if !order.status.can_cancel() {
            return Err(Conflict::OrderNotCancellable {
                order_id,
                status: order.status,
            }
            .into());
        }

        inventory::restore(&mut tx, &order.lines).await?;
        tx.update_order_status(order_id, OrderStatus::Cancelled)
            .await?;
        tx.commit().await?;

        order.status = OrderStatus::Cancelled;
        Ok(order)
    }

    async fn refund_in_transaction(&self, order_id: OrderId) -> Result<(Order, bool)> {
        let mut tx = self.store.begin().await?;

        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| PlacementError::order_not_found(order_id))?;

        ensure_settled(&order)?;
        if !order.status.can_refund() {
            return Err(Conflict::InvalidStatusTransition {
                order_id,
                from: order.status,
                to: OrderStatus::Refunded,
            }
            .into());
        }

        let restore = order.status.holds_inventory();
        if restore {
            inventory::restore(&mut tx, &order.lines).await?;
        }
        tx.update_order_status(order_id, OrderStatus::Refunded)
            .await?;
        tx.commit().await?;

        order.status = OrderStatus::Refunded;
        Ok((order, restore))
    }

    async fn fail_capture_in_transaction(&self, order_id: OrderId) -> Result<(Order, bool)> {
        let mut tx = self.store.begin().await?;

        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| PlacementError::order_not_found(order_id))?;

        // Cancelled and refunded orders have already left the stock ledger.
        let restore = !order.status.is_terminal();
        if restore {
            inventory::restore(&mut tx, &order.lines).await?;
            tx.update_order_status(order_id, OrderStatus::Cancelled)
                .await?;
            order.status = OrderStatus::Cancelled;
        }
        if matches!(
            order.payment_status,
            PaymentStatus::Pending | PaymentStatus::Failed
        ) {
            tx.update_payment(order_id, PaymentStatus::Failed, None)
                .await?;
            order.payment_status = PaymentStatus::Failed;
        } else {
            tracing::warn!(
                %order_id,
                payment_status = %order.payment_status,
                "capture failed for an order already settled otherwise"
            );
        }
        tx.commit().await?;

        Ok((order, restore))
    }

    /// Returns whether stock was restored.
    async fn delete_in_transaction(&self, order_id: OrderId) -> Result<bool> {
        let mut tx = self.store.begin().await?;

        let order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| PlacementError::order_not_found(order_id))?;

        ensure_settled(&order)?;
        if !order.status.can_delete() {
            return Err(Conflict::OrderNotDeletable {
                order_id,
                status: order.status,
            }
            .into());
        }

        let restore = order.status.holds_inventory();
        if restore {
            inventory::restore(&mut tx, &order.lines).await?;
        }
        tx.delete_order(order_id).await?;
        tx.commit().await?;

        Ok(restore)
    }
}

/// Rejects changes to an order whose gateway capture is still outstanding.
pub(crate) fn ensure_settled(order: &Order) -> Result<()> {
    if order.awaiting_capture() {
        return Err(Conflict::PaymentInProgress { order_id: order.id }.into());
    }
    Ok(())
}
