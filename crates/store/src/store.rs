use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{InventoryAdjustment, Order, OrderStatus, PaymentStatus, Product, ProductId};

use crate::Result;

/// Entry point to the transactional store.
///
/// Every write goes through a [`StoreTransaction`]; the read methods here are
/// for callers that only display state. All implementations must be
/// thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// The transaction handle type.
    type Transaction: StoreTransaction;

    /// Opens a new unit of work.
    ///
    /// May wait until a conflicting transaction completes.
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Reads a product outside of any transaction.
    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>>;

    /// Reads an order with its lines outside of any transaction.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Orders of one user, newest first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;
}

/// One atomic unit of work against the store.
///
/// Nothing written through a transaction is visible to others until
/// [`commit`](StoreTransaction::commit). Dropping a transaction without
/// committing discards every write.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Reads the given products and holds them exclusively until the
    /// transaction ends. Missing ids are simply absent from the result.
    ///
    /// Callers pass ids in ascending order so concurrent transactions
    /// acquire rows in the same order.
    async fn lock_products(&mut self, product_ids: &[ProductId]) -> Result<Vec<Product>>;

    /// Applies a stock/sales delta to one product and returns the new row.
    ///
    /// Fails with [`StoreError::StockUnderflow`](crate::StoreError::StockUnderflow)
    /// rather than letting stock go negative.
    async fn adjust_inventory(
        &mut self,
        product_id: &ProductId,
        adjustment: InventoryAdjustment,
    ) -> Result<Product>;

    /// Returns true if any order already uses this tracking number.
    async fn tracking_number_exists(&mut self, tracking_number: &str) -> Result<bool>;

    /// Writes the order row and every line row.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Reads an order with its lines and holds the order row exclusively.
    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<Order>>;

    /// Sets the shipment status of an order.
    async fn update_order_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<()>;

    /// Sets the payment status (and reference, when given) of an order.
    async fn update_payment(
        &mut self,
        order_id: OrderId,
        status: PaymentStatus,
        reference: Option<&str>,
    ) -> Result<()>;

    /// Deletes the order's lines and then the order row.
    async fn delete_order(&mut self, order_id: OrderId) -> Result<()>;

    /// Makes every write of this transaction durable and visible.
    async fn commit(self) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self) -> Result<()>;
}
