//! # cart-core
//!
//! Core types and traits for the mystery-cart storefront checkout.
//!
//! This crate provides:
//! - `CartStore` / `SharedCart`, the durable shopping cart
//! - `CartHydrator`, which prices a cart snapshot against the catalog
//! - `PaymentConfirmer` trait for card and wallet payment adapters
//! - `CheckoutOrchestrator`, the checkout state machine
//! - `CheckoutError` and `ServiceError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use cart_core::{CartHydrator, CheckoutOrchestrator, Currency, PaymentMethod, SharedCart};
//!
//! let cart = SharedCart::open(Arc::new(JsonFileStorage::new("cart.json")))?;
//! cart.add("42")?;
//!
//! let checkout = CheckoutOrchestrator::new(
//!     cart,
//!     CartHydrator::new(backend.clone(), Currency::EUR),
//!     backend.clone(),
//!     backend,
//!     confirmers,
//! );
//!
//! let session = checkout.begin(Some(token)).await?;
//! let sale = checkout.pay(PaymentMethod::Card).await?;
//! ```

pub mod cart;
pub mod checkout;
pub mod error;
pub mod hydrator;
pub mod order;
pub mod product;
pub mod services;
pub mod strategy;
pub mod support;

// Re-exports for convenience
pub use cart::{CartEntry, CartStorage, CartStore, JsonFileStorage, MemoryStorage, SharedCart};
pub use checkout::{CheckoutOrchestrator, CheckoutState};
pub use error::{CheckoutError, CheckoutResult, ServiceError};
pub use hydrator::CartHydrator;
pub use order::{
    line_items_total, CheckoutSession, HydratedLineItem, PayerProfile, PaymentReference,
    SaleLine, SaleRecord, SaleRequest,
};
pub use product::{CatalogItem, Currency, ItemId, Price};
pub use services::{
    BearerToken, BoxedCatalogService, BoxedProfileService, BoxedSaleService, CatalogService,
    ProfileService, SaleService,
};
pub use strategy::{
    BoxedPaymentConfirmer, ConfirmationOutcome, PaymentConfirmation, PaymentConfirmer,
    PaymentConfirmerSelector, PaymentMethod,
};
pub use support::{
    BoxedContactService, ContactRequest, ContactService, ShopMessage, SupportTicket, UserMessage,
};
