use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, OrderLineId, UserId};
use domain::{
    InventoryAdjustment, Money, Order, OrderLine, OrderStatus, PaymentStatus, PhoneNumber,
    Product, ProductId, ShippingAddress, StockUnderflow, normalize_sale_price,
};
use sqlx::{PgConnection, PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{OrderStore, StoreTransaction},
};

/// Default bound on how long a statement waits for a row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

const PRODUCT_COLUMNS: &str = "id, list_price_cents, sale_price_cents, stock, sales_count";

const ORDER_COLUMNS: &str = r#"
    id, user_id, total_amount_cents, status, payment_status, payment_method,
    payment_reference, street, city, state, zip_code, country, phone_number,
    tracking_number, tracking_reference, estimated_delivery, created_at
"#;

const LINE_COLUMNS: &str = "id, order_id, product_id, quantity, unit_price_cents, subtotal_cents";

/// PostgreSQL-backed order store.
///
/// Product and order rows are locked with `SELECT ... FOR UPDATE`; the lock
/// wait of every transaction is bounded by `lock_timeout`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Inserts or replaces a catalog product. Used by seeding and tests; the
    /// order core itself only adjusts inventory.
    pub async fn upsert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, list_price_cents, sale_price_cents, stock, sales_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                list_price_cents = EXCLUDED.list_price_cents,
                sale_price_cents = EXCLUDED.sale_price_cents,
                stock = EXCLUDED.stock,
                sales_count = EXCLUDED.sales_count
            "#,
        )
        .bind(product.id.as_str())
        .bind(product.list_price.cents())
        .bind(product.sale_price.map(|p| p.cents()))
        .bind(product.stock)
        .bind(product.sales_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        // SET LOCAL does not accept bind parameters; the value is an integer we format.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        Ok(PostgresTransaction { tx })
    }

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_product).transpose()
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut *conn, order_id, false).await
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;

        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&mut *conn)
        .await?;

        let mut orders = rows
            .into_iter()
            .map(row_to_order)
            .collect::<Result<Vec<Order>>>()?;
        if orders.is_empty() {
            return Ok(orders);
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let line_rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = ANY($1) ORDER BY order_id, line_no"
        ))
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut lines_by_order: HashMap<OrderId, Vec<OrderLine>> = HashMap::new();
        for row in line_rows {
            let line = row_to_line(row)?;
            lines_by_order.entry(line.order_id).or_default().push(line);
        }
        for order in &mut orders {
            order.lines = lines_by_order.remove(&order.id).unwrap_or_default();
        }

        Ok(orders)
    }
}

/// Transaction over a [`PostgresStore`]. Rolled back by sqlx when dropped uncommitted.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn lock_products(&mut self, product_ids: &[ProductId]) -> Result<Vec<Product>> {
        let ids: Vec<&str> = product_ids.iter().map(ProductId::as_str).collect();

        // ORDER BY id keeps the lock acquisition order identical across transactions.
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        ))
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        rows.into_iter().map(row_to_product).collect()
    }

    async fn adjust_inventory(
        &mut self,
        product_id: &ProductId,
        adjustment: InventoryAdjustment,
    ) -> Result<Product> {
        let quantity = i64::from(adjustment.quantity());

        let sql = match adjustment {
            InventoryAdjustment::Sale(_) => format!(
                r#"
                UPDATE products
                SET stock = stock - $2, sales_count = sales_count + $2
                WHERE id = $1 AND stock >= $2
                RETURNING {PRODUCT_COLUMNS}
                "#
            ),
            InventoryAdjustment::Restock(_) => format!(
                r#"
                UPDATE products
                SET stock = stock + $2, sales_count = GREATEST(sales_count - $2, 0)
                WHERE id = $1
                RETURNING {PRODUCT_COLUMNS}
                "#
            ),
        };

        let row = sqlx::query(&sql)
            .bind(product_id.as_str())
            .bind(quantity)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        if let Some(row) = row {
            return row_to_product(row);
        }

        let available: Option<i64> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(product_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        match available {
            Some(available) => Err(StockUnderflow {
                product_id: product_id.clone(),
                requested: adjustment.quantity(),
                available,
            }
            .into()),
            None => Err(StoreError::Corrupt(format!(
                "product {product_id} does not exist"
            ))),
        }
    }

    async fn tracking_number_exists(&mut self, tracking_number: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE tracking_number = $1)")
                .bind(tracking_number)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(map_db_error)?;

        Ok(exists)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let address = &order.shipping_address;

        sqlx::query(&format!(
            r#"
            INSERT INTO orders ({ORDER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#
        ))
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.total_amount.cents())
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.payment_method.as_str())
        .bind(order.payment_reference.as_deref())
        .bind(&address.street)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.zip_code)
        .bind(&address.country)
        .bind(order.phone_number.as_str())
        .bind(&order.tracking_number)
        .bind(&order.tracking_reference)
        .bind(order.estimated_delivery)
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("orders_tracking_number_key")
            {
                return StoreError::DuplicateTrackingNumber(order.tracking_number.clone());
            }
            map_db_error(e)
        })?;

        let line_ids: Vec<Uuid> = order.lines.iter().map(|l| l.id.as_uuid()).collect();
        let line_nos: Vec<i32> = (1..).take(order.lines.len()).collect();
        let product_ids: Vec<&str> = order.lines.iter().map(|l| l.product_id.as_str()).collect();
        let quantities: Vec<i64> = order.lines.iter().map(|l| i64::from(l.quantity)).collect();
        let unit_prices: Vec<i64> = order.lines.iter().map(|l| l.unit_price.cents()).collect();
        let subtotals: Vec<i64> = order.lines.iter().map(|l| l.subtotal.cents()).collect();

        sqlx::query(
            r#"
            INSERT INTO order_lines (
                id, order_id, line_no, product_id, quantity, unit_price_cents, subtotal_cents
            )
            SELECT l.id, $2, l.line_no, l.product_id, l.quantity, l.unit_price, l.subtotal
            FROM UNNEST($1::uuid[], $3::integer[], $4::text[], $5::bigint[], $6::bigint[], $7::bigint[])
                AS l(id, line_no, product_id, quantity, unit_price, subtotal)
            "#,
        )
        .bind(&line_ids)
        .bind(order.id.as_uuid())
        .bind(&line_nos)
        .bind(&product_ids)
        .bind(&quantities)
        .bind(&unit_prices)
        .bind(&subtotals)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        fetch_order(&mut *self.tx, order_id, true).await
    }

    async fn update_order_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(order_id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    async fn update_payment(
        &mut self,
        order_id: OrderId,
        status: PaymentStatus,
        reference: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET payment_status = $2, payment_reference = COALESCE($3, payment_reference)
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(status.as_str())
        .bind(reference)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    async fn delete_order(&mut self, order_id: OrderId) -> Result<()> {
        sqlx::query("DELETE FROM order_lines WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(map_db_error)
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(map_db_error)
    }
}

/// Reads an order and its lines over one connection, optionally locking the order row.
async fn fetch_order(
    conn: &mut PgConnection,
    order_id: OrderId,
    for_update: bool,
) -> Result<Option<Order>> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let row = sqlx::query(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1{lock}"
    ))
    .bind(order_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut order = row_to_order(row)?;

    let line_rows = sqlx::query(&format!(
        "SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = $1 ORDER BY line_no"
    ))
    .bind(order_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_error)?;

    order.lines = line_rows
        .into_iter()
        .map(row_to_line)
        .collect::<Result<Vec<OrderLine>>>()?;

    Ok(Some(order))
}

/// Lock waits and deadlocks become `Unavailable`; everything else stays a database error.
fn map_db_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        match db_err.code().as_deref() {
            // lock_not_available, deadlock_detected, serialization_failure
            Some("55P03") | Some("40P01") | Some("40001") => {
                metrics::counter!("store_lock_failures_total").increment(1);
                tracing::warn!(error = %db_err, "transaction lost a lock wait");
                return StoreError::Unavailable(db_err.message().to_string());
            }
            _ => {}
        }
    }
    if matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed) {
        return StoreError::Unavailable(e.to_string());
    }
    StoreError::Database(e)
}

fn row_to_product(row: PgRow) -> Result<Product> {
    let sale_price: Option<i64> = row.try_get("sale_price_cents")?;

    Ok(Product {
        id: ProductId::new(row.try_get::<String, _>("id")?),
        list_price: Money::from_cents(row.try_get("list_price_cents")?),
        sale_price: normalize_sale_price(sale_price.map(Money::from_cents)),
        stock: row.try_get("stock")?,
        sales_count: row.try_get("sales_count")?,
    })
}

fn row_to_order(row: PgRow) -> Result<Order> {
    let corrupt = |e: domain::ValidationError| StoreError::Corrupt(e.to_string());

    let status: String = row.try_get("status")?;
    let payment_status: String = row.try_get("payment_status")?;
    let payment_method: String = row.try_get("payment_method")?;
    let phone: String = row.try_get("phone_number")?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
        status: status.parse::<OrderStatus>().map_err(corrupt)?,
        payment_status: payment_status.parse::<PaymentStatus>().map_err(corrupt)?,
        payment_method: payment_method.parse().map_err(corrupt)?,
        payment_reference: row.try_get("payment_reference")?,
        shipping_address: ShippingAddress {
            street: row.try_get("street")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            zip_code: row.try_get("zip_code")?,
            country: row.try_get("country")?,
        },
        phone_number: PhoneNumber::new(phone).map_err(corrupt)?,
        tracking_number: row.try_get("tracking_number")?,
        tracking_reference: row.try_get("tracking_reference")?,
        estimated_delivery: row.try_get::<DateTime<Utc>, _>("estimated_delivery")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        lines: Vec::new(),
    })
}

fn row_to_line(row: PgRow) -> Result<OrderLine> {
    let quantity: i64 = row.try_get("quantity")?;

    Ok(OrderLine {
        id: OrderLineId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
        quantity: u32::try_from(quantity)
            .map_err(|_| StoreError::Corrupt(format!("line quantity {quantity} out of range")))?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
    })
}
