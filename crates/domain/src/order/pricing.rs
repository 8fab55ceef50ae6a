//! Authoritative pricing of a cart against a locked catalog snapshot.

use thiserror::Error;

use super::{Cart, Money, ProductId, TOTAL_TOLERANCE};
use crate::error::{Conflict, ValidationError};
use crate::product::CatalogSnapshot;

/// A cart line with its server-computed price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub subtotal: Money,
}

/// Output of the resolver: every line priced plus the authoritative total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub total: Money,
}

/// Errors raised while pricing a cart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] Conflict),

    /// The snapshot does not contain a product the cart references.
    #[error("Product {0} missing from catalog snapshot")]
    UnknownProduct(ProductId),
}

/// Computes unit prices and totals from catalog data only.
///
/// Client-supplied unit prices are ignored; only the declared total is
/// compared against the computed one.
pub fn resolve(
    cart: &Cart,
    snapshot: &CatalogSnapshot,
    declared_total: Money,
) -> Result<PricedCart, PricingError> {
    let mut lines = Vec::with_capacity(cart.lines().len());

    for (index, line) in cart.lines().iter().enumerate() {
        if line.quantity < 1 {
            return Err(ValidationError::new(
                format!("lines[{index}].quantity"),
                "must be at least 1",
            )
            .into());
        }

        let product = snapshot
            .get(&line.product_id)
            .ok_or_else(|| PricingError::UnknownProduct(line.product_id.clone()))?;

        if i64::from(line.quantity) > product.stock {
            return Err(Conflict::InsufficientStock {
                product_id: product.id.clone(),
                requested: line.quantity,
                available: product.stock,
            }
            .into());
        }

        let unit_price = product.effective_price();
        let subtotal = unit_price.checked_multiply(line.quantity).ok_or_else(|| {
            ValidationError::new(
                format!("lines[{index}].quantity"),
                "subtotal exceeds the largest supported amount",
            )
        })?;
        lines.push(PricedLine {
            product_id: product.id.clone(),
            quantity: line.quantity,
            unit_price,
            subtotal,
        });
    }

    let total = lines
        .iter()
        .try_fold(Money::zero(), |acc, l| acc.checked_add(l.subtotal))
        .ok_or_else(|| {
            ValidationError::new("lines", "order total exceeds the largest supported amount")
        })?;
    if total.abs_diff(declared_total) > TOTAL_TOLERANCE {
        return Err(Conflict::TotalMismatch {
            declared: declared_total,
            computed: total,
        }
        .into());
    }

    Ok(PricedCart { lines, total })
}
