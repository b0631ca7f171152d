//! # Checkout Types
//!
//! Hydrated line items, the transient checkout session, and the sale
//! request/record exchanged with the sale ledger.

use crate::cart::CartEntry;
use crate::error::{CheckoutError, CheckoutResult};
use crate::product::{CatalogItem, Currency, ItemId, Price};
use crate::services::BearerToken;
use crate::strategy::{PaymentConfirmation, PaymentMethod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cart entry resolved against the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydratedLineItem {
    /// Mystery box id
    pub item_id: ItemId,

    /// Product name (denormalized for display)
    pub name: String,

    /// Unit price
    pub unit_price: Price,

    /// Selling shop
    pub shop_id: String,

    /// Quantity at hydration time
    pub quantity: u32,
}

impl HydratedLineItem {
    /// Combine a cart entry with its catalog data
    pub fn from_catalog(entry: &CartEntry, item: CatalogItem) -> Self {
        Self {
            item_id: entry.item_id.clone(),
            name: item.name,
            unit_price: item.unit_price,
            shop_id: item.shop_id,
            quantity: entry.quantity,
        }
    }

    /// Calculate the total price for this line item
    pub fn total(&self) -> CheckoutResult<Price> {
        self.unit_price
            .checked_times(self.quantity)
            .ok_or_else(|| self.out_of_range())
    }

    fn out_of_range(&self) -> CheckoutError {
        CheckoutError::CatalogUnavailable {
            item_id: self.item_id.to_string(),
            reason: "price out of range".to_string(),
        }
    }
}

/// Sum of unit price × quantity over `items`.
///
/// Fails with `CatalogUnavailable` naming the first line that does not fit.
pub fn line_items_total(items: &[HydratedLineItem], currency: Currency) -> CheckoutResult<Price> {
    items.iter().try_fold(Price::zero(currency), |sum, item| {
        sum.checked_add(&item.total()?)
            .ok_or_else(|| item.out_of_range())
    })
}

/// Shipping and contact data of the paying user
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PayerProfile {
    pub name: String,
    pub surname: String,
    pub address: String,
    pub postal_code: String,
    pub email: String,
}

/// One checkout attempt, from entering checkout until the sale is recorded
/// or the user leaves. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    /// Hydrated cart, in cart order
    pub line_items: Vec<HydratedLineItem>,

    /// Σ unit price × quantity over `line_items`
    pub total: Price,

    /// Fetched payer profile
    pub payer: PayerProfile,

    /// Method of the current or last payment attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_method: Option<PaymentMethod>,

    /// Cart snapshot the line items were hydrated from
    #[serde(skip)]
    pub hydrated_from: Vec<CartEntry>,

    #[serde(skip)]
    pub(crate) credential: BearerToken,

    /// When checkout was entered
    pub started_at: DateTime<Utc>,
}

impl CheckoutSession {
    pub fn new(
        line_items: Vec<HydratedLineItem>,
        payer: PayerProfile,
        hydrated_from: Vec<CartEntry>,
        credential: BearerToken,
        currency: Currency,
    ) -> CheckoutResult<Self> {
        // always recomputed from the line items themselves
        let total = line_items_total(&line_items, currency)?;
        Ok(Self {
            line_items,
            total,
            payer,
            chosen_method: None,
            hydrated_from,
            credential,
            started_at: Utc::now(),
        })
    }

    /// Units across all line items
    pub fn item_count(&self) -> u32 {
        self.line_items
            .iter()
            .fold(0u32, |count, i| count.saturating_add(i.quantity))
    }

    /// Build the sale request for a confirmed payment
    pub fn sale_request(&self, confirmation: &PaymentConfirmation) -> SaleRequest {
        SaleRequest {
            total_amount: self.total,
            lines: self
                .line_items
                .iter()
                .map(|item| SaleLine {
                    item_id: item.item_id.clone(),
                    quantity: item.quantity,
                })
                .collect(),
            payment: PaymentReference {
                method: confirmation.method,
                reference: confirmation.reference.clone(),
            },
            payer: self.payer.clone(),
        }
    }
}

/// Line of a sale request: only id and quantity travel to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub item_id: ItemId,
    pub quantity: u32,
}

/// Provider proof attached to a sale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReference {
    pub method: PaymentMethod,
    /// PaymentIntent id (card) or captured order id (wallet)
    pub reference: String,
}

/// Everything the sale ledger needs to commit a purchase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRequest {
    pub total_amount: Price,
    pub lines: Vec<SaleLine>,
    pub payment: PaymentReference,
    pub payer: PayerProfile,
}

/// A sale the ledger has recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub sale_id: String,
    pub total_amount: Price,
    pub payment_reference: String,
    pub created_at: DateTime<Utc>,
}

impl SaleRecord {
    pub fn new(sale_id: impl Into<String>, request: &SaleRequest) -> Self {
        Self {
            sale_id: sale_id.into(),
            total_amount: request.total_amount,
            payment_reference: request.payment.reference.clone(),
            created_at: Utc::now(),
        }
    }
}
