//! Client-submitted cart lines and their normalization.

use serde::{Deserialize, Serialize};

use super::{Money, ProductId};
use crate::error::ValidationError;

/// A line as submitted by the client.
///
/// `client_unit_price` is advisory only; it is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub client_unit_price: Money,
}

impl CartLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, client_unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            client_unit_price,
        }
    }
}

/// A structurally valid cart: non-empty, positive quantities, one line per product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// Validates the raw lines and merges repeated products.
    ///
    /// Merged lines sum their quantities and keep the first advisory price, so
    /// stock checks see the full demand per product.
    pub fn new(lines: Vec<CartLine>) -> Result<Self, ValidationError> {
        if lines.is_empty() {
            return Err(ValidationError::new("lines", "order must contain at least one line"));
        }

        let mut merged: Vec<CartLine> = Vec::with_capacity(lines.len());
        for (index, line) in lines.into_iter().enumerate() {
            if line.product_id.as_str().trim().is_empty() {
                return Err(ValidationError::required(format!("lines[{index}].product_id")));
            }
            if line.quantity == 0 {
                return Err(ValidationError::new(
                    format!("lines[{index}].quantity"),
                    "must be at least 1",
                ));
            }

            match merged.iter_mut().find(|l| l.product_id == line.product_id) {
                Some(existing) => {
                    existing.quantity = existing.quantity.checked_add(line.quantity).ok_or_else(
                        || ValidationError::new(format!("lines[{index}].quantity"), "is too large"),
                    )?;
                }
                None => merged.push(line),
            }
        }

        Ok(Self { lines: merged })
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Distinct product ids in ascending order, the order rows are locked in.
    pub fn product_ids(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = self.lines.iter().map(|l| l.product_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
