use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{
    InventoryAdjustment, Order, OrderLine, OrderStatus, PaymentStatus, Product, ProductId,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    Result, StoreError,
    store::{OrderStore, StoreTransaction},
};

/// Committed contents of the store: the three logical tables.
#[derive(Debug, Default)]
struct StoreState {
    products: HashMap<ProductId, Product>,
    /// Order rows; `lines` is always empty here.
    orders: HashMap<OrderId, Order>,
    lines: HashMap<OrderId, Vec<OrderLine>>,
    /// Unique index over `orders.tracking_number`.
    tracking_numbers: HashMap<String, OrderId>,
}

impl StoreState {
    fn assemble(&self, order_id: OrderId) -> Option<Order> {
        let mut order = self.orders.get(&order_id)?.clone();
        order.lines = self.lines.get(&order_id).cloned().unwrap_or_default();
        Some(order)
    }

    fn apply(&mut self, writes: WriteSet) {
        self.products.extend(writes.products);
        for (order_id, order) in writes.orders {
            match order {
                Some(mut order) => {
                    let lines = std::mem::take(&mut order.lines);
                    self.tracking_numbers
                        .insert(order.tracking_number.clone(), order_id);
                    self.lines.insert(order_id, lines);
                    self.orders.insert(order_id, order);
                }
                None => {
                    if let Some(removed) = self.orders.remove(&order_id) {
                        self.tracking_numbers.remove(&removed.tracking_number);
                    }
                    self.lines.remove(&order_id);
                }
            }
        }
    }
}

/// Rows a transaction has touched. `None` marks a deleted order.
#[derive(Debug, Default)]
struct WriteSet {
    products: HashMap<ProductId, Product>,
    orders: HashMap<OrderId, Option<Order>>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_on_commit: AtomicBool,
    fail_on_insert_order: AtomicBool,
}

/// In-memory order store for testing and single-process deployments.
///
/// A transaction holds the store-wide lock from `begin` until it ends, so
/// transactions are fully serialized. Writes are buffered per row and only
/// applied to the committed state on commit.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    faults: Arc<Faults>,
    lock_timeout: Option<Duration>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds how long `begin` waits for the store lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Inserts or replaces a catalog product.
    pub async fn upsert_product(&self, product: Product) {
        self.state
            .lock()
            .await
            .products
            .insert(product.id.clone(), product);
    }

    /// Returns the number of order rows.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Returns the number of order line rows across all orders.
    pub async fn line_count(&self) -> usize {
        self.state.lock().await.lines.values().map(Vec::len).sum()
    }

    /// Makes the next commits fail as if the store went away.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.faults.fail_on_commit.store(fail, Ordering::SeqCst);
    }

    /// Makes order inserts fail, after inventory has already been adjusted.
    pub fn set_fail_on_insert_order(&self, fail: bool) {
        self.faults.fail_on_insert_order.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        let guard = match self.lock_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.state.clone().lock_owned())
                .await
                .map_err(|_| StoreError::Unavailable("lock wait timeout".to_string()))?,
            None => self.state.clone().lock_owned().await,
        };
        Ok(InMemoryTransaction {
            guard,
            writes: WriteSet::default(),
            faults: self.faults.clone(),
        })
    }

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        Ok(self.state.lock().await.products.get(product_id).cloned())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.lock().await.assemble(order_id))
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .filter_map(|o| state.assemble(o.id))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}

/// Transaction over an [`InMemoryStore`].
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<StoreState>,
    writes: WriteSet,
    faults: Arc<Faults>,
}

impl InMemoryTransaction {
    fn product(&self, product_id: &ProductId) -> Option<&Product> {
        self.writes
            .products
            .get(product_id)
            .or_else(|| self.guard.products.get(product_id))
    }

    fn order(&self, order_id: OrderId) -> Option<Order> {
        match self.writes.orders.get(&order_id) {
            Some(written) => written.clone(),
            None => self.guard.assemble(order_id),
        }
    }

    fn order_exists(&self, order_id: OrderId) -> bool {
        match self.writes.orders.get(&order_id) {
            Some(written) => written.is_some(),
            None => self.guard.orders.contains_key(&order_id),
        }
    }

    fn order_mut(&mut self, order_id: OrderId) -> Result<&mut Order> {
        let committed = &self.guard;
        self.writes
            .orders
            .entry(order_id)
            .or_insert_with(|| committed.assemble(order_id))
            .as_mut()
            .ok_or(StoreError::OrderNotFound(order_id))
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_products(&mut self, product_ids: &[ProductId]) -> Result<Vec<Product>> {
        Ok(product_ids
            .iter()
            .filter_map(|id| self.product(id).cloned())
            .collect())
    }

    async fn adjust_inventory(
        &mut self,
        product_id: &ProductId,
        adjustment: InventoryAdjustment,
    ) -> Result<Product> {
        let product = match self.writes.products.entry(product_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let committed = self.guard.products.get(product_id).cloned().ok_or_else(|| {
                    StoreError::Corrupt(format!("product {product_id} does not exist"))
                })?;
                entry.insert(committed)
            }
        };

        *product = product.adjusted(adjustment)?;
        Ok(product.clone())
    }

    async fn tracking_number_exists(&mut self, tracking_number: &str) -> Result<bool> {
        let written = self
            .writes
            .orders
            .values()
            .flatten()
            .any(|o| o.tracking_number == tracking_number);
        let committed = self
            .guard
            .tracking_numbers
            .get(tracking_number)
            .is_some_and(|id| !self.writes.orders.contains_key(id));
        Ok(written || committed)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        if self.faults.fail_on_insert_order.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected insert failure".to_string()));
        }
        if self.tracking_number_exists(&order.tracking_number).await? {
            return Err(StoreError::DuplicateTrackingNumber(
                order.tracking_number.clone(),
            ));
        }
        if let Some(line) = order
            .lines
            .iter()
            .find(|l| self.product(&l.product_id).is_none())
        {
            return Err(StoreError::Corrupt(format!(
                "order line references unknown product {}",
                line.product_id
            )));
        }

        self.writes.orders.insert(order.id, Some(order.clone()));
        Ok(())
    }

    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.order(order_id))
    }

    async fn update_order_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        self.order_mut(order_id)?.status = status;
        Ok(())
    }

    async fn update_payment(
        &mut self,
        order_id: OrderId,
        status: PaymentStatus,
        reference: Option<&str>,
    ) -> Result<()> {
        let row = self.order_mut(order_id)?;
        row.payment_status = status;
        if let Some(reference) = reference {
            row.payment_reference = Some(reference.to_string());
        }
        Ok(())
    }

    async fn delete_order(&mut self, order_id: OrderId) -> Result<()> {
        if !self.order_exists(order_id) {
            return Err(StoreError::OrderNotFound(order_id));
        }
        self.writes.orders.insert(order_id, None);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        if self.faults.fail_on_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }
        let InMemoryTransaction {
            mut guard, writes, ..
        } = self;
        guard.apply(writes);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
