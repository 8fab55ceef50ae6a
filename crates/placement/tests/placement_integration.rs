//! Integration tests for order placement and compensation against the
//! in-memory store.

use std::sync::Arc;

use common::UserId;
use domain::{
    AdvanceStatus, CancelOrder, CartLine, Conflict, DeleteOrder, Money, Order, OrderStatus,
    PaymentMethod, PaymentStatus, PhoneNumber, PlaceOrder, Product, ProductId,
    SequentialTrackingIds, ShippingAddress, UpdatePaymentStatus,
};
use placement::{
    InMemoryPaymentGateway, NotFound, OrderPlacementService, PaymentFlow, PlacementConfig,
    PlacementError,
};
use store::{InMemoryStore, OrderStore};

struct TestHarness {
    service: Arc<OrderPlacementService<InMemoryStore>>,
    store: InMemoryStore,
    payments: InMemoryPaymentGateway,
}

impl TestHarness {
    async fn new(products: &[(&str, i64, i64)]) -> Self {
        let store = InMemoryStore::new();
        for (id, cents, stock) in products {
            store
                .upsert_product(Product::new(*id, Money::from_cents(*cents), *stock))
                .await;
        }
        let payments = InMemoryPaymentGateway::new();
        let service = OrderPlacementService::new(
            store.clone(),
            Arc::new(SequentialTrackingIds::new("TRK")),
            Arc::new(payments.clone()),
            PlacementConfig::default(),
        );

        Self {
            service: Arc::new(service),
            store,
            payments,
        }
    }

    async fn product(&self, id: &str) -> Product {
        self.store
            .get_product(&ProductId::new(id))
            .await
            .unwrap()
            .unwrap()
    }

    async fn stock(&self, id: &str) -> (i64, i64) {
        let p = self.product(id).await;
        (p.stock, p.sales_count)
    }

    async fn place(&self, user_id: UserId, lines: &[(&str, u32)], total_cents: i64) -> Result<Order, PlacementError> {
        self.service
            .place_order(command(user_id, lines, total_cents), PaymentFlow::Immediate)
            .await
    }
}

fn command(user_id: UserId, lines: &[(&str, u32)], total_cents: i64) -> PlaceOrder {
    command_paying_with(user_id, lines, total_cents, PaymentMethod::CreditCard)
}

fn command_paying_with(
    user_id: UserId,
    lines: &[(&str, u32)],
    total_cents: i64,
    payment_method: PaymentMethod,
) -> PlaceOrder {
    PlaceOrder::new(
        user_id,
        lines
            .iter()
            .map(|(id, qty)| CartLine::new(*id, *qty, Money::zero()))
            .collect(),
        Money::from_cents(total_cents),
        ShippingAddress::new("221B Baker Street", "London", "LDN", "NW1 6XE", "UK").unwrap(),
        payment_method,
        PhoneNumber::new("+44 20 7946 0000").unwrap(),
    )
}

mod placement_properties {
    use super::*;

    #[tokio::test]
    async fn round_trip_decrements_stock_and_records_line() {
        let h = TestHarness::new(&[("P", 1299, 10)]).await;

        let order = h.place(UserId::new(), &[("P", 2)], 2598).await.unwrap();

        assert_eq!(order.lines.len(), 1);
        assert_eq!(order.lines[0].unit_price, Money::from_cents(1299));
        assert_eq!(order.lines[0].subtotal, Money::from_cents(2598));
        assert_eq!(order.total_amount, Money::from_cents(2598));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(
            order.estimated_delivery - order.created_at,
            chrono::Duration::days(5)
        );
        assert_eq!(h.stock("P").await, (8, 2));

        let stored = h.service.get_order(order.id).await.unwrap();
        assert_eq!(stored, order);
    }

    #[tokio::test]
    async fn committed_totals_equal_sum_of_lines() {
        let h = TestHarness::new(&[("A", 1299, 500), ("B", 450, 500), ("C", 9999, 500)]).await;
        let user = UserId::new();

        for n in 1..=12u32 {
            let lines = [("A", n % 3 + 1), ("B", n % 4 + 1), ("C", n % 2 + 1)];
            let total: i64 = 1299 * i64::from(lines[0].1)
                + 450 * i64::from(lines[1].1)
                + 9999 * i64::from(lines[2].1);
            h.place(user, &lines, total).await.unwrap();
        }

        let orders = h.service.orders_for_user(user).await.unwrap();
        assert_eq!(orders.len(), 12);
        for order in &orders {
            assert!(order.is_total_consistent());
            assert_eq!(order.total_amount, order.lines_total());
        }
    }

    #[tokio::test]
    async fn sale_price_is_authoritative() {
        let h = TestHarness::new(&[]).await;
        h.store
            .upsert_product(
                Product::new("S", Money::from_cents(2000), 5)
                    .with_sale_price(Some(Money::from_cents(1500))),
            )
            .await;

        let order = h.place(UserId::new(), &[("S", 2)], 3000).await.unwrap();
        assert_eq!(order.lines[0].unit_price, Money::from_cents(1500));
    }

    #[tokio::test]
    async fn one_cent_drift_is_tolerated() {
        let h = TestHarness::new(&[("P", 1299, 10)]).await;

        let order = h.place(UserId::new(), &[("P", 2)], 2599).await.unwrap();
        assert_eq!(order.total_amount, Money::from_cents(2598));
    }

    #[tokio::test]
    async fn mismatch_is_rejected_and_stock_is_untouched() {
        let h = TestHarness::new(&[("P", 1299, 10)]).await;

        let err = h.place(UserId::new(), &[("P", 2)], 1000).await.unwrap_err();

        assert_eq!(
            err,
            PlacementError::Conflict(Conflict::TotalMismatch {
                declared: Money::from_cents(1000),
                computed: Money::from_cents(2598),
            })
        );
        assert_eq!(h.stock("P").await, (10, 0));
        assert_eq!(h.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn insufficient_stock_names_the_product() {
        let h = TestHarness::new(&[("A", 100, 10), ("B", 100, 1)]).await;

        let err = h
            .place(UserId::new(), &[("A", 2), ("B", 2)], 400)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlacementError::Conflict(Conflict::InsufficientStock { ref product_id, requested: 2, available: 1 })
                if product_id.as_str() == "B"
        ));
        assert_eq!(h.stock("A").await, (10, 0));
    }

    #[tokio::test]
    async fn unknown_products_are_listed() {
        let h = TestHarness::new(&[("A", 100, 10)]).await;

        let err = h
            .place(UserId::new(), &[("A", 1), ("X", 1), ("Y", 1)], 300)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PlacementError::NotFound(NotFound::Products {
                product_ids: vec![ProductId::new("X"), ProductId::new("Y")],
            })
        );
        assert_eq!(h.stock("A").await, (10, 0));
    }

    #[tokio::test]
    async fn duplicate_lines_are_merged() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;

        let order = h
            .place(UserId::new(), &[("P", 2), ("P", 3)], 500)
            .await
            .unwrap();

        assert_eq!(order.lines.len(), 1);
        assert_eq!(order.lines[0].quantity, 5);
        assert_eq!(h.stock("P").await, (5, 5));
    }

    #[tokio::test]
    async fn failed_insert_rolls_back_inventory() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        h.store.set_fail_on_insert_order(true);

        let err = h.place(UserId::new(), &[("P", 3)], 300).await.unwrap_err();

        assert_eq!(err.kind(), "system");
        assert_eq!(h.stock("P").await, (10, 0));
        assert_eq!(h.store.order_count().await, 0);
        assert_eq!(h.store.line_count().await, 0);
    }

    #[tokio::test]
    async fn failed_commit_leaves_no_partial_aggregate() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        h.store.set_fail_on_commit(true);

        let err = h.place(UserId::new(), &[("P", 3)], 300).await.unwrap_err();
        h.store.set_fail_on_commit(false);

        assert_eq!(err.kind(), "system");
        assert_eq!(h.stock("P").await, (10, 0));
        assert_eq!(h.store.order_count().await, 0);
        assert_eq!(h.store.line_count().await, 0);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn last_unit_is_sold_exactly_once() {
        let h = TestHarness::new(&[("LAST", 1299, 1)]).await;

        let first = {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .place_order(command(UserId::new(), &[("LAST", 1)], 1299), PaymentFlow::Immediate)
                    .await
            })
        };
        let second = {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .place_order(command(UserId::new(), &[("LAST", 1)], 1299), PaymentFlow::Immediate)
                    .await
            })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);

        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(
            loser,
            PlacementError::Conflict(Conflict::InsufficientStock {
                requested: 1,
                available: 0,
                ..
            })
        ));
        assert_eq!(h.stock("LAST").await, (0, 1));
        assert_eq!(h.store.order_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_buyers_never_oversell() {
        let h = TestHarness::new(&[("HOT", 500, 7), ("SIDE", 100, 1_000)]).await;

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let service = h.service.clone();
                tokio::spawn(async move {
                    service
                        .place_order(
                            command(UserId::new(), &[("SIDE", 1), ("HOT", 1)], 600),
                            PaymentFlow::Immediate,
                        )
                        .await
                })
            })
            .collect();

        let mut placed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => placed += 1,
                Err(e) => assert_eq!(e.kind(), "conflict"),
            }
        }

        assert_eq!(placed, 7);
        assert_eq!(h.stock("HOT").await, (0, 7));
        assert_eq!(h.stock("SIDE").await, (993, 7));
    }
}

mod compensation {
    use super::*;

    #[tokio::test]
    async fn delete_restores_stock_exactly_once() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        let order = h.place(UserId::new(), &[("P", 3)], 300).await.unwrap();
        assert_eq!(h.stock("P").await, (7, 3));

        h.service
            .delete_order(DeleteOrder::new(order.id))
            .await
            .unwrap();
        assert_eq!(h.stock("P").await, (10, 0));
        assert_eq!(h.store.line_count().await, 0);

        let err = h
            .service
            .delete_order(DeleteOrder::new(order.id))
            .await
            .unwrap_err();
        assert_eq!(err, PlacementError::order_not_found(order.id));
        assert_eq!(h.stock("P").await, (10, 0));
    }

    #[tokio::test]
    async fn restore_floors_sales_count_at_zero() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        let order = h.place(UserId::new(), &[("P", 3)], 300).await.unwrap();
        // Catalog management resets the counter behind the order's back.
        h.store
            .upsert_product(Product::new("P", Money::from_cents(100), 7).with_sales_count(1))
            .await;

        h.service
            .delete_order(DeleteOrder::new(order.id))
            .await
            .unwrap();

        assert_eq!(h.stock("P").await, (10, 0));
    }

    #[tokio::test]
    async fn shipped_order_cannot_be_deleted() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        let order = h.place(UserId::new(), &[("P", 2)], 200).await.unwrap();
        for to in [OrderStatus::Processing, OrderStatus::Shipped] {
            h.service
                .advance_status(AdvanceStatus::new(order.id, to))
                .await
                .unwrap();
        }

        let err = h
            .service
            .delete_order(DeleteOrder::new(order.id))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PlacementError::Conflict(Conflict::OrderNotDeletable {
                order_id: order.id,
                status: OrderStatus::Shipped,
            })
        );
        assert_eq!(h.stock("P").await, (8, 2));
        assert_eq!(
            h.service.get_order(order.id).await.unwrap().status,
            OrderStatus::Shipped
        );
    }

    #[tokio::test]
    async fn owner_cancels_and_stock_returns() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        let user = UserId::new();
        let order = h.place(user, &[("P", 4)], 400).await.unwrap();

        let cancelled = h
            .service
            .cancel_order(CancelOrder::new(user, order.id))
            .await
            .unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(h.stock("P").await, (10, 0));

        // Deleting the cancelled order does not give the stock back twice.
        h.service
            .delete_order(DeleteOrder::new(order.id))
            .await
            .unwrap();
        assert_eq!(h.stock("P").await, (10, 0));
    }

    #[tokio::test]
    async fn processing_order_cannot_be_cancelled() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        let user = UserId::new();
        let order = h.place(user, &[("P", 1)], 100).await.unwrap();
        h.service
            .advance_status(AdvanceStatus::new(order.id, OrderStatus::Processing))
            .await
            .unwrap();

        let err = h
            .service
            .cancel_order(CancelOrder::new(user, order.id))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlacementError::Conflict(Conflict::OrderNotCancellable {
                status: OrderStatus::Processing,
                ..
            })
        ));
        assert_eq!(h.stock("P").await, (9, 1));
    }

    #[tokio::test]
    async fn admin_cancellation_goes_through_compensation() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        let order = h.place(UserId::new(), &[("P", 2)], 200).await.unwrap();

        let cancelled = h
            .service
            .advance_status(AdvanceStatus::new(order.id, OrderStatus::Cancelled))
            .await
            .unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(h.stock("P").await, (10, 0));
    }
}

mod order_management {
    use super::*;

    #[tokio::test]
    async fn status_moves_forward_only() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        let order = h.place(UserId::new(), &[("P", 1)], 100).await.unwrap();

        let err = h
            .service
            .advance_status(AdvanceStatus::new(order.id, OrderStatus::Shipped))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlacementError::Conflict(Conflict::InvalidStatusTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Shipped,
                ..
            })
        ));

        for to in [
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            let updated = h
                .service
                .advance_status(AdvanceStatus::new(order.id, to))
                .await
                .unwrap();
            assert_eq!(updated.status, to);
        }

        let err = h
            .service
            .advance_status(AdvanceStatus::new(order.id, OrderStatus::Processing))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn payment_status_changes_are_recorded() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        let order = h.place(UserId::new(), &[("P", 1)], 100).await.unwrap();

        let refunded = h
            .service
            .update_payment_status(UpdatePaymentStatus::new(
                order.id,
                PaymentStatus::Refunded,
                Some("RFD-1".to_string()),
            ))
            .await
            .unwrap();
        assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
        assert_eq!(refunded.payment_reference.as_deref(), Some("RFD-1"));

        let err = h
            .service
            .update_payment_status(UpdatePaymentStatus::new(order.id, PaymentStatus::Paid, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlacementError::Conflict(Conflict::InvalidPaymentTransition { .. })
        ));
    }

    #[tokio::test]
    async fn refunding_pending_order_returns_its_stock() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        let order = h.place(UserId::new(), &[("P", 3)], 300).await.unwrap();
        assert_eq!(h.stock("P").await, (7, 3));

        let refunded = h
            .service
            .advance_status(AdvanceStatus::new(order.id, OrderStatus::Refunded))
            .await
            .unwrap();

        assert_eq!(refunded.status, OrderStatus::Refunded);
        assert_eq!(h.stock("P").await, (10, 0));
    }

    #[tokio::test]
    async fn refunding_shipped_order_keeps_sale() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        let order = h.place(UserId::new(), &[("P", 2)], 200).await.unwrap();
        for to in [OrderStatus::Processing, OrderStatus::Shipped] {
            h.service
                .advance_status(AdvanceStatus::new(order.id, to))
                .await
                .unwrap();
        }

        let refunded = h
            .service
            .advance_status(AdvanceStatus::new(order.id, OrderStatus::Refunded))
            .await
            .unwrap();

        assert_eq!(refunded.status, OrderStatus::Refunded);
        assert_eq!(h.stock("P").await, (8, 2));
    }

    #[tokio::test]
    async fn cancelled_order_cannot_be_refunded() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        let user = UserId::new();
        let order = h.place(user, &[("P", 1)], 100).await.unwrap();
        h.service
            .cancel_order(CancelOrder::new(user, order.id))
            .await
            .unwrap();

        let err = h
            .service
            .advance_status(AdvanceStatus::new(order.id, OrderStatus::Refunded))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlacementError::Conflict(Conflict::InvalidStatusTransition {
                from: OrderStatus::Cancelled,
                to: OrderStatus::Refunded,
                ..
            })
        ));
        assert_eq!(h.stock("P").await, (10, 0));
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let h = TestHarness::new(&[]).await;
        let missing = common::OrderId::new();

        assert_eq!(
            h.service.get_order(missing).await.unwrap_err(),
            PlacementError::order_not_found(missing)
        );
        assert_eq!(
            h.service
                .advance_status(AdvanceStatus::new(missing, OrderStatus::Processing))
                .await
                .unwrap_err()
                .kind(),
            "not_found"
        );
    }
}

mod payment_flows {
    use super::*;

    #[tokio::test]
    async fn on_delivery_leaves_payment_pending() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;

        let order = h
            .service
            .place_order(
                command_paying_with(UserId::new(), &[("P", 1)], 100, PaymentMethod::CashOnDelivery),
                PaymentFlow::OnDelivery,
            )
            .await
            .unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert!(!order.awaiting_capture());

        let processing = h
            .service
            .advance_status(AdvanceStatus::new(order.id, OrderStatus::Processing))
            .await
            .unwrap();
        assert_eq!(processing.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn on_delivery_requires_cash_on_delivery() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;

        let err = h
            .service
            .place_order(command(UserId::new(), &[("P", 1)], 100), PaymentFlow::OnDelivery)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "validation");
        assert_eq!(h.stock("P").await, (10, 0));
    }

    #[tokio::test]
    async fn confirmed_payment_is_recorded() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        let reference = h.payments.authorize(Money::from_cents(100));

        let order = h
            .service
            .place_order(
                command(UserId::new(), &[("P", 1)], 100),
                PaymentFlow::Confirmed {
                    reference: reference.clone(),
                },
            )
            .await
            .unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.payment_reference.as_deref(), Some(reference.as_str()));
    }

    #[tokio::test]
    async fn unknown_reference_never_touches_inventory() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;

        let err = h
            .service
            .place_order(
                command(UserId::new(), &[("P", 1)], 100),
                PaymentFlow::Confirmed {
                    reference: "PAY-FORGED".to_string(),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlacementError::Conflict(Conflict::PaymentDeclined { .. })
        ));
        assert_eq!(h.stock("P").await, (10, 0));
        assert_eq!(h.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn one_payment_backs_one_order() {
        let h = TestHarness::new(&[("P", 100, 10)]).await;
        let reference = h.payments.authorize(Money::from_cents(100));
        let flow = PaymentFlow::Confirmed { reference };

        h.service
            .place_order(command(UserId::new(), &[("P", 1)], 100), flow.clone())
            .await
            .unwrap();
        let err = h
            .service
            .place_order(command(UserId::new(), &[("P", 1)], 100), flow)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlacementError::Conflict(Conflict::PaymentDeclined { .. })
        ));
        assert_eq!(h.stock("P").await, (9, 1));
        assert_eq!(h.store.order_count().await, 1);
    }

    #[tokio::test]
    async fn capture_after_placement_marks_order_paid() {
        let h = TestHarness::new(&[("P", 1299, 10)]).await;

        let order = h
            .service
            .place_order(
                command(UserId::new(), &[("P", 2)], 2598),
                PaymentFlow::CaptureAfterPlacement,
            )
            .await
            .unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Paid);
        let reference = order.payment_reference.clone().unwrap();
        assert_eq!(
            h.payments.captured(&reference),
            Some((order.id, Money::from_cents(2598)))
        );
        assert_eq!(h.stock("P").await, (8, 2));
    }

    #[tokio::test]
    async fn failed_capture_cancels_and_restores_stock() {
        let h = TestHarness::new(&[("P", 1299, 10)]).await;
        h.payments.set_fail_on_capture(true);
        let user = UserId::new();

        let err = h
            .service
            .place_order(command(user, &[("P", 2)], 2598), PaymentFlow::CaptureAfterPlacement)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlacementError::Conflict(Conflict::PaymentDeclined { .. })
        ));
        assert_eq!(h.stock("P").await, (10, 0));

        let orders = h.service.orders_for_user(user).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Cancelled);
        assert_eq!(orders[0].payment_status, PaymentStatus::Failed);
        assert_eq!(h.payments.capture_count(), 0);
    }
}

/// Other actors touching an order while its gateway capture is in flight.
mod capture_interleavings {
    use super::*;
    use std::sync::{Mutex, OnceLock, Weak};

    use async_trait::async_trait;
    use common::OrderId;
    use placement::{PaymentCapture, PaymentError, PaymentGateway};

    type Service = OrderPlacementService<InMemoryStore>;

    #[derive(Clone, Copy)]
    enum Interference {
        AdminAdvances,
        OwnerCancels(UserId),
        AdminDeletes,
        AdminReportsFailure,
    }

    /// Gateway that lets another caller act on the order before answering.
    struct InterferingGateway {
        service: OnceLock<Weak<Service>>,
        interference: Interference,
        approve: bool,
        observed: Mutex<Vec<Result<(), PlacementError>>>,
    }

    impl InterferingGateway {
        fn observed(&self) -> Vec<Result<(), PlacementError>> {
            self.observed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PaymentGateway for InterferingGateway {
        async fn capture(&self, order_id: OrderId, _amount: Money) -> Result<PaymentCapture, PaymentError> {
            let service = self.service.get().and_then(Weak::upgrade).unwrap();
            let outcome = match self.interference {
                Interference::AdminAdvances => service
                    .advance_status(AdvanceStatus::new(order_id, OrderStatus::Processing))
                    .await
                    .map(|_| ()),
                Interference::OwnerCancels(owner) => service
                    .cancel_order(CancelOrder::new(owner, order_id))
                    .await
                    .map(|_| ()),
                Interference::AdminDeletes => service
                    .delete_order(DeleteOrder::new(order_id))
                    .await,
                Interference::AdminReportsFailure => service
                    .update_payment_status(UpdatePaymentStatus::new(
                        order_id,
                        PaymentStatus::Failed,
                        None,
                    ))
                    .await
                    .map(|_| ()),
            };
            self.observed.lock().unwrap().push(outcome);

            if self.approve {
                Ok(PaymentCapture {
                    reference: "PAY-LATE".to_string(),
                })
            } else {
                Err(PaymentError::Declined("card declined".to_string()))
            }
        }

        async fn confirm(&self, reference: &str, _amount: Money) -> Result<PaymentCapture, PaymentError> {
            Err(PaymentError::Declined(format!("unknown reference {reference}")))
        }
    }

    async fn setup(
        interference: Interference,
        approve: bool,
    ) -> (Arc<Service>, InMemoryStore, Arc<InterferingGateway>) {
        let store = InMemoryStore::new();
        store
            .upsert_product(Product::new("P", Money::from_cents(500), 10))
            .await;
        let gateway = Arc::new(InterferingGateway {
            service: OnceLock::new(),
            interference,
            approve,
            observed: Mutex::new(Vec::new()),
        });
        let service = Arc::new(OrderPlacementService::new(
            store.clone(),
            Arc::new(SequentialTrackingIds::new("TRK")),
            gateway.clone(),
            PlacementConfig::default(),
        ));
        gateway.service.set(Arc::downgrade(&service)).ok();
        (service, store, gateway)
    }

    async fn stock(store: &InMemoryStore) -> (i64, i64) {
        let p = store.get_product(&ProductId::new("P")).await.unwrap().unwrap();
        (p.stock, p.sales_count)
    }

    fn in_progress(order_id: OrderId) -> PlacementError {
        PlacementError::Conflict(Conflict::PaymentInProgress { order_id })
    }

    #[tokio::test]
    async fn advancing_during_capture_is_refused_and_decline_restores_stock() {
        let (service, store, gateway) = setup(Interference::AdminAdvances, false).await;
        let user = UserId::new();

        let err = service
            .place_order(command(user, &[("P", 3)], 1500), PaymentFlow::CaptureAfterPlacement)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlacementError::Conflict(Conflict::PaymentDeclined { .. })
        ));
        let order = &service.orders_for_user(user).await.unwrap()[0];
        assert_eq!(gateway.observed(), vec![Err(in_progress(order.id))]);
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.payment_status, PaymentStatus::Failed);
        assert_eq!(stock(&store).await, (10, 0));
    }

    #[tokio::test]
    async fn owner_cannot_cancel_during_capture() {
        let owner = UserId::new();
        let (service, store, gateway) = setup(Interference::OwnerCancels(owner), true).await;

        let order = service
            .place_order(command(owner, &[("P", 2)], 1000), PaymentFlow::CaptureAfterPlacement)
            .await
            .unwrap();

        assert_eq!(gateway.observed(), vec![Err(in_progress(order.id))]);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.payment_reference.as_deref(), Some("PAY-LATE"));
        let stored = service.get_order(order.id).await.unwrap();
        assert_eq!(stored, order);
        assert_eq!(stock(&store).await, (8, 2));
    }

    #[tokio::test]
    async fn delete_during_capture_is_refused() {
        let (service, store, gateway) = setup(Interference::AdminDeletes, true).await;

        let order = service
            .place_order(
                command(UserId::new(), &[("P", 1)], 500),
                PaymentFlow::CaptureAfterPlacement,
            )
            .await
            .unwrap();

        assert_eq!(gateway.observed(), vec![Err(in_progress(order.id))]);
        assert_eq!(store.order_count().await, 1);
        assert_eq!(stock(&store).await, (9, 1));
    }

    #[tokio::test]
    async fn late_capture_for_closed_order_is_not_applied() {
        let user = UserId::new();
        let (service, store, gateway) = setup(Interference::AdminReportsFailure, true).await;

        let err = service
            .place_order(command(user, &[("P", 2)], 1000), PaymentFlow::CaptureAfterPlacement)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlacementError::Conflict(Conflict::CaptureNotApplied {
                status: OrderStatus::Cancelled,
                payment_status: PaymentStatus::Failed,
                ..
            })
        ));
        assert_eq!(gateway.observed(), vec![Ok(())]);
        let order = &service.orders_for_user(user).await.unwrap()[0];
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.payment_status, PaymentStatus::Failed);
        assert_eq!(order.payment_reference, None);
        assert_eq!(stock(&store).await, (10, 0));
    }
}
