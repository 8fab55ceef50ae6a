//! Catalog products as seen by the order core.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::{Money, ProductId};

/// Collapses every "no sale" encoding (absent, zero, negative) into `None`.
pub fn normalize_sale_price(raw: Option<Money>) -> Option<Money> {
    raw.filter(Money::is_positive)
}

/// Price and inventory state of one catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub list_price: Money,
    /// Always normalized: `Some` only for a strictly positive price.
    pub sale_price: Option<Money>,
    pub stock: i64,
    pub sales_count: i64,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, list_price: Money, stock: i64) -> Self {
        Self {
            id: id.into(),
            list_price,
            sale_price: None,
            stock,
            sales_count: 0,
        }
    }

    pub fn with_sale_price(mut self, sale_price: Option<Money>) -> Self {
        self.sale_price = normalize_sale_price(sale_price);
        self
    }

    pub fn with_sales_count(mut self, sales_count: i64) -> Self {
        self.sales_count = sales_count;
        self
    }

    /// The price a customer pays right now: the sale price when set, else list price.
    pub fn effective_price(&self) -> Money {
        self.sale_price.unwrap_or(self.list_price)
    }

    /// Returns the product after applying `adjustment`, or an error if stock would go negative.
    pub fn adjusted(&self, adjustment: InventoryAdjustment) -> Result<Product, StockUnderflow> {
        let mut next = self.clone();
        match adjustment {
            InventoryAdjustment::Sale(quantity) => {
                let quantity = i64::from(quantity);
                if self.stock < quantity {
                    return Err(StockUnderflow {
                        product_id: self.id.clone(),
                        requested: adjustment.quantity(),
                        available: self.stock,
                    });
                }
                next.stock -= quantity;
                next.sales_count = next.sales_count.saturating_add(quantity);
            }
            InventoryAdjustment::Restock(quantity) => {
                let quantity = i64::from(quantity);
                next.stock = next.stock.saturating_add(quantity);
                next.sales_count = (self.sales_count - quantity).max(0);
            }
        }
        Ok(next)
    }
}

/// A signed change to a product's stock and sales counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "quantity", rename_all = "snake_case")]
pub enum InventoryAdjustment {
    /// `stock -= q`, `sales_count += q`. Rejected if stock would go negative.
    Sale(u32),
    /// `stock += q`, `sales_count = max(0, sales_count - q)`.
    Restock(u32),
}

impl InventoryAdjustment {
    pub fn quantity(&self) -> u32 {
        match self {
            InventoryAdjustment::Sale(q) | InventoryAdjustment::Restock(q) => *q,
        }
    }
}

/// Applying a sale would have driven stock below zero.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stock underflow for product {product_id}: requested {requested}, available {available}")]
pub struct StockUnderflow {
    pub product_id: ProductId,
    pub requested: u32,
    pub available: i64,
}

/// Products read under lock for the duration of one transaction.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    products: HashMap<ProductId, Product>,
}

impl CatalogSnapshot {
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn get(&self, product_id: &ProductId) -> Option<&Product> {
        self.products.get(product_id)
    }

    pub fn contains(&self, product_id: &ProductId) -> bool {
        self.products.contains_key(product_id)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}
