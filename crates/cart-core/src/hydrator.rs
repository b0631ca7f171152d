//! # Cart Hydrator
//!
//! Resolves bare cart entries into priced line items. Lookups run
//! concurrently and the result is all-or-nothing: one failed or slow lookup
//! fails the whole checkout attempt, so a subset of the cart is never charged.

use crate::cart::CartEntry;
use crate::error::{CheckoutError, CheckoutResult};
use crate::order::HydratedLineItem;
use crate::product::{CatalogItem, Currency, ItemId};
use crate::services::BoxedCatalogService;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Resolves cart snapshots against the catalog
#[derive(Clone)]
pub struct CartHydrator {
    catalog: BoxedCatalogService,
    currency: Currency,
    lookup_timeout: Duration,
}

impl CartHydrator {
    /// Default per-lookup deadline
    pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(catalog: BoxedCatalogService, currency: Currency) -> Self {
        Self {
            catalog,
            currency,
            lookup_timeout: Self::DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Builder: set the per-lookup deadline
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Currency every line item must be priced in
    pub fn currency(&self) -> Currency {
        self.currency
    }

    async fn lookup(&self, item_id: ItemId) -> CheckoutResult<(ItemId, CatalogItem)> {
        let unavailable = |reason: String| CheckoutError::CatalogUnavailable {
            item_id: item_id.to_string(),
            reason,
        };

        let item = match tokio::time::timeout(self.lookup_timeout, self.catalog.lookup(&item_id))
            .await
        {
            Ok(Ok(item)) => item,
            Ok(Err(e)) => {
                warn!("Catalog lookup failed for item {}: {}", item_id, e);
                return Err(unavailable(e.to_string()));
            }
            Err(_) => {
                warn!("Catalog lookup timed out for item {}", item_id);
                return Err(unavailable(format!(
                    "lookup timed out after {:?}",
                    self.lookup_timeout
                )));
            }
        };

        if item.unit_price.currency != self.currency {
            return Err(unavailable(format!(
                "priced in {}, checkout is in {}",
                item.unit_price.currency, self.currency
            )));
        }
        if item.unit_price.amount < 0 {
            return Err(unavailable("negative unit price".to_string()));
        }

        Ok((item_id, item))
    }

    /// Hydrate `snapshot`, one line item per entry in the same order.
    ///
    /// Fails with `EmptyCart` for an empty snapshot and `CatalogUnavailable`
    /// if any lookup fails.
    #[instrument(skip_all, fields(entries = snapshot.len()))]
    pub async fn hydrate(&self, snapshot: &[CartEntry]) -> CheckoutResult<Vec<HydratedLineItem>> {
        if snapshot.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let mut distinct: Vec<ItemId> = snapshot.iter().map(|e| e.item_id.clone()).collect();
        distinct.sort();
        distinct.dedup();

        debug!("Hydrating {} distinct items", distinct.len());

        let resolved: HashMap<ItemId, CatalogItem> =
            try_join_all(distinct.into_iter().map(|id| self.lookup(id)))
                .await?
                .into_iter()
                .collect();

        snapshot
            .iter()
            .map(|entry| {
                resolved
                    .get(&entry.item_id)
                    .cloned()
                    .map(|item| HydratedLineItem::from_catalog(entry, item))
                    .ok_or_else(|| CheckoutError::CatalogUnavailable {
                        item_id: entry.item_id.to_string(),
                        reason: "missing from lookup results".to_string(),
                    })
            })
            .collect()
    }
}
