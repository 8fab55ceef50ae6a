//! Catalog snapshot reader.

use std::collections::BTreeSet;

use domain::{CatalogSnapshot, ProductId};
use store::StoreTransaction;

use crate::error::{PlacementError, Result};

/// Reads and locks the given products inside the active transaction.
///
/// Ids are deduplicated and locked in ascending order. If any id is unknown
/// the whole read fails with `NotFound` listing every missing id, and the
/// caller abandons the transaction.
#[tracing::instrument(skip_all, fields(products = product_ids.len()))]
pub async fn read_snapshot<T: StoreTransaction>(
    tx: &mut T,
    product_ids: &[ProductId],
) -> Result<CatalogSnapshot> {
    let ids: Vec<ProductId> = product_ids
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let products = tx.lock_products(&ids).await?;
    let snapshot = CatalogSnapshot::new(products);

    let missing: Vec<ProductId> = ids
        .into_iter()
        .filter(|id| !snapshot.contains(id))
        .collect();
    if !missing.is_empty() {
        tracing::info!(missing = ?missing, "cart references unknown products");
        return Err(PlacementError::products_not_found(missing));
    }

    Ok(snapshot)
}
