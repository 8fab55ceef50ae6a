//! Order placement service: payment flows around the coordinator, plus the
//! order-management operations that share its transaction discipline.

use std::sync::Arc;

use common::{OrderId, UserId};
use domain::{
    AdvanceStatus, CancelOrder, Conflict, DeleteOrder, Money, Order, OrderStatus, PaymentStatus,
    PlaceOrder, TrackingIdGenerator, UpdatePaymentStatus, ValidationError,
};
use store::{OrderStore, StoreTransaction};

use crate::compensation::{CompensationHandler, ensure_settled};
use crate::config::PlacementConfig;
use crate::coordinator::{PaymentTerms, TransactionCoordinator, bounded};
use crate::error::{PlacementError, Result};
use crate::services::{PaymentCapture, PaymentGateway};

/// How the order's payment is settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentFlow {
    /// Pre-authorized; the order is created paid.
    Immediate,
    /// Collected by the carrier; the order is created with payment pending.
    /// Only valid for cash on delivery.
    OnDelivery,
    /// Paid at checkout before placement. The gateway confirms `reference`
    /// against the declared total before any transaction opens.
    Confirmed { reference: String },
    /// Captured through the gateway after the order commits. A failed capture
    /// cancels the order and restores its stock.
    CaptureAfterPlacement,
}

/// Entry point for placing, cancelling, deleting, and progressing orders.
pub struct OrderPlacementService<S: OrderStore + Clone> {
    store: S,
    coordinator: TransactionCoordinator<S>,
    compensation: CompensationHandler<S>,
    payments: Arc<dyn PaymentGateway>,
    config: PlacementConfig,
}

impl<S: OrderStore + Clone> OrderPlacementService<S> {
    pub fn new(
        store: S,
        tracking_ids: Arc<dyn TrackingIdGenerator>,
        payments: Arc<dyn PaymentGateway>,
        config: PlacementConfig,
    ) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(store.clone(), tracking_ids, config.clone()),
            compensation: CompensationHandler::new(store.clone(), config.transaction_timeout),
            store,
            payments,
            config,
        }
    }

    /// Places an order, settling payment according to `flow`.
    #[tracing::instrument(skip(self, command), fields(user_id = %command.user_id))]
    pub async fn place_order(&self, command: PlaceOrder, flow: PaymentFlow) -> Result<Order> {
        let on_delivery = command.payment_method.settles_on_delivery();
        let terms = match flow {
            PaymentFlow::Immediate => PaymentTerms::paid(None),
            PaymentFlow::OnDelivery if on_delivery => PaymentTerms::pending(),
            PaymentFlow::OnDelivery => {
                return Err(ValidationError::new(
                    "payment_method",
                    "payment on delivery requires cash_on_delivery",
                )
                .into());
            }
            PaymentFlow::Confirmed { reference } => {
                let confirmation = self.confirm(&reference, command.declared_total).await?;
                let result = self
                    .coordinator
                    .place(&command, PaymentTerms::paid(Some(confirmation.reference.clone())))
                    .await;
                if let Err(e) = &result {
                    tracing::warn!(
                        reference = %confirmation.reference,
                        error = %e,
                        "placement failed after payment was confirmed, refund required"
                    );
                }
                return result;
            }
            PaymentFlow::CaptureAfterPlacement if on_delivery => {
                return Err(ValidationError::new(
                    "payment_method",
                    "cash_on_delivery cannot be captured through the gateway",
                )
                .into());
            }
            PaymentFlow::CaptureAfterPlacement => {
                let order = self
                    .coordinator
                    .place(&command, PaymentTerms::pending())
                    .await?;
                return self.capture(order).await;
            }
        };

        self.coordinator.place(&command, terms).await
    }

    /// Asks the gateway to vouch for a payment made before placement.
    async fn confirm(&self, reference: &str, amount: Money) -> Result<PaymentCapture> {
        match self.payments.confirm(reference, amount).await {
            Ok(confirmation) => {
                metrics::counter!("payment_captures_total", "outcome" => "confirmed").increment(1);
                Ok(confirmation)
            }
            Err(e) => {
                metrics::counter!("payment_captures_total", "outcome" => "declined").increment(1);
                tracing::warn!(%reference, error = %e, "payment confirmation rejected");
                Err(Conflict::PaymentDeclined {
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    /// Captures payment for a freshly committed order, compensating on failure.
    async fn capture(&self, order: Order) -> Result<Order> {
        match self.payments.capture(order.id, order.total_amount).await {
            Ok(capture) => {
                metrics::counter!("payment_captures_total", "outcome" => "captured").increment(1);
                tracing::info!(order_id = %order.id, reference = %capture.reference, "payment captured");
                let settled = bounded(
                    self.config.transaction_timeout,
                    self.settle_capture_in_transaction(order.id, capture.reference.clone()),
                )
                .await;
                if let Err(e) = &settled {
                    tracing::error!(
                        order_id = %order.id,
                        reference = %capture.reference,
                        error = %e,
                        "captured payment could not be applied, refund required"
                    );
                }
                settled
            }
            Err(e) => {
                metrics::counter!("payment_captures_total", "outcome" => "declined").increment(1);
                tracing::warn!(order_id = %order.id, error = %e, "payment capture failed, cancelling order");
                if let Err(compensation_err) = self.compensation.fail_capture(order.id).await {
                    tracing::error!(
                        order_id = %order.id,
                        error = %compensation_err,
                        "compensating cancellation failed"
                    );
                    return Err(compensation_err);
                }
                Err(Conflict::PaymentDeclined {
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    /// Marks the order paid if it is still pending and awaiting this capture.
    async fn settle_capture_in_transaction(&self, order_id: OrderId, reference: String) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| PlacementError::order_not_found(order_id))?;

        if order.status != OrderStatus::Pending || !order.awaiting_capture() {
            return Err(Conflict::CaptureNotApplied {
                order_id,
                status: order.status,
                payment_status: order.payment_status,
                reference,
            }
            .into());
        }

        tx.update_payment(order_id, PaymentStatus::Paid, Some(&reference))
            .await?;
        tx.commit().await?;

        order.payment_status = PaymentStatus::Paid;
        order.payment_reference = Some(reference);
        Ok(order)
    }

    /// Cancels a pending order on behalf of its owner.
    pub async fn cancel_order(&self, command: CancelOrder) -> Result<Order> {
        self.compensation
            .cancel(command.order_id, Some(command.user_id))
            .await
    }

    /// Hard-deletes a pending or cancelled order. Privileged path.
    pub async fn delete_order(&self, command: DeleteOrder) -> Result<()> {
        self.compensation.delete(command.order_id).await
    }

    /// Moves an order along pending, processing, shipped, delivered. Cancelling
    /// and refunding go through compensation so held stock is restored.
    #[tracing::instrument(skip(self))]
    pub async fn advance_status(&self, command: AdvanceStatus) -> Result<Order> {
        match command.to {
            OrderStatus::Cancelled => self.compensation.cancel(command.order_id, None).await,
            OrderStatus::Refunded => self.compensation.refund(command.order_id).await,
            _ => bounded(self.config.transaction_timeout, self.advance_in_transaction(&command)).await,
        }
    }

    /// Records a payment status change reported by a collaborator.
    ///
    /// While a gateway capture is outstanding the only accepted report is
    /// `failed`, which closes the order the same way a declined capture does.
    #[tracing::instrument(skip(self))]
    pub async fn update_payment_status(&self, command: UpdatePaymentStatus) -> Result<Order> {
        bounded(self.config.transaction_timeout, self.update_payment_in_transaction(command)).await
    }

    async fn advance_in_transaction(&self, command: &AdvanceStatus) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(command.order_id)
            .await?
            .ok_or_else(|| PlacementError::order_not_found(command.order_id))?;

        ensure_settled(&order)?;
        if !order.status.can_advance_to(command.to) {
            return Err(Conflict::InvalidStatusTransition {
                order_id: order.id,
                from: order.status,
                to: command.to,
            }
            .into());
        }

        tx.update_order_status(order.id, command.to).await?;
        tx.commit().await?;

        tracing::info!(order_id = %order.id, from = %order.status, to = %command.to, "order status advanced");
        order.status = command.to;
        Ok(order)
    }

    async fn update_payment_in_transaction(&self, command: UpdatePaymentStatus) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(command.order_id)
            .await?
            .ok_or_else(|| PlacementError::order_not_found(command.order_id))?;

        if order.awaiting_capture() {
            if command.to != PaymentStatus::Failed {
                return Err(Conflict::PaymentInProgress { order_id: order.id }.into());
            }
            drop(tx);
            return self.compensation.fail_capture(order.id).await;
        }
        if !order.payment_status.can_transition_to(command.to) {
            return Err(Conflict::InvalidPaymentTransition {
                order_id: order.id,
                from: order.payment_status,
                to: command.to,
            }
            .into());
        }

        tx.update_payment(order.id, command.to, command.reference.as_deref())
            .await?;
        tx.commit().await?;

        order.payment_status = command.to;
        if command.reference.is_some() {
            order.payment_reference = command.reference;
        }
        Ok(order)
    }

    /// Reads one order. Absence is `NotFound`.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| PlacementError::order_not_found(order_id))
    }

    /// Orders placed by `user_id`, newest first.
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.orders_for_user(user_id).await?)
    }
}
