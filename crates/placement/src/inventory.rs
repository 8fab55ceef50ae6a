//! Inventory adjuster.
//!
//! Applies stock and sales-count deltas through the active transaction only;
//! nothing here commits.

use domain::{InventoryAdjustment, OrderLine, PricedLine, ProductId};
use store::StoreTransaction;

use crate::error::Result;

/// Takes each purchased quantity out of stock and adds it to the sales count.
///
/// A line that would drive stock negative fails with `InsufficientStock`.
pub async fn reserve<T: StoreTransaction>(tx: &mut T, lines: &[PricedLine]) -> Result<()> {
    for line in lines {
        tx.adjust_inventory(&line.product_id, InventoryAdjustment::Sale(line.quantity))
            .await?;
    }
    Ok(())
}

/// Puts the quantities of an order's lines back into stock. Sales counts are
/// decremented and floored at zero.
pub async fn restore<T: StoreTransaction>(tx: &mut T, lines: &[OrderLine]) -> Result<()> {
    // Same ascending order as placement locks, so compensations never deadlock.
    let mut by_product: Vec<(&ProductId, u32)> =
        lines.iter().map(|l| (&l.product_id, l.quantity)).collect();
    by_product.sort_by(|a, b| a.0.cmp(b.0));

    for (product_id, quantity) in by_product {
        let product = tx
            .adjust_inventory(product_id, InventoryAdjustment::Restock(quantity))
            .await?;
        tracing::debug!(
            product_id = %product_id,
            quantity,
            stock = product.stock,
            "stock restored"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;
    use domain::{Money, Product};
    use store::{InMemoryStore, OrderStore};

    fn priced(product: &str, quantity: u32) -> PricedLine {
        PricedLine {
            product_id: ProductId::new(product),
            quantity,
            unit_price: Money::from_cents(100),
            subtotal: Money::from_cents(100).multiply(quantity),
        }
    }

    #[tokio::test]
    async fn reserve_moves_stock_into_sales() {
        let store = InMemoryStore::new();
        store
            .upsert_product(Product::new("A", Money::from_cents(100), 5))
            .await;

        let mut tx = store.begin().await.unwrap();
        reserve(&mut tx, &[priced("A", 2)]).await.unwrap();
        tx.commit().await.unwrap();

        let a = store.get_product(&ProductId::new("A")).await.unwrap().unwrap();
        assert_eq!((a.stock, a.sales_count), (3, 2));
    }

    #[tokio::test]
    async fn reserve_past_stock_is_insufficient_stock() {
        let store = InMemoryStore::new();
        store
            .upsert_product(Product::new("A", Money::from_cents(100), 1))
            .await;

        let mut tx = store.begin().await.unwrap();
        let err = reserve(&mut tx, &[priced("A", 2)]).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn restore_floors_sales_count() {
        let store = InMemoryStore::new();
        store
            .upsert_product(Product::new("A", Money::from_cents(100), 0).with_sales_count(1))
            .await;
        let line = OrderLine::new(OrderId::new(), "A", 3, Money::from_cents(100));

        let mut tx = store.begin().await.unwrap();
        restore(&mut tx, &[line]).await.unwrap();
        tx.commit().await.unwrap();

        let a = store.get_product(&ProductId::new("A")).await.unwrap().unwrap();
        assert_eq!((a.stock, a.sales_count), (3, 0));
    }

    #[tokio::test]
    async fn restore_of_missing_product_fails() {
        let store = InMemoryStore::new();
        let line = OrderLine::new(OrderId::new(), "GONE", 1, Money::from_cents(100));

        let mut tx = store.begin().await.unwrap();
        let err = restore(&mut tx, &[line]).await.unwrap_err();
        assert_eq!(err.kind(), "system");
    }
}
