//! # cart-providers
//!
//! Remote collaborators for mystery-cart-rs.
//!
//! This crate provides:
//!
//! 1. **BackendClient** - the storefront backend over HTTP
//!    - Catalog lookup (`/shops/mystery-box/{id}`)
//!    - Profile fetch (`/users/profile`)
//!    - Sale creation (`/sales/create`)
//!    - Contact requests (`/notifications/create`)
//!
//! 2. **StripeCardConfirmer** - card payments
//!    - Hosted card form via the `CardForm` trait
//!    - PaymentIntent created and confirmed in one call
//!
//! 3. **PayPalWalletConfirmer** - wallet payments
//!    - Payer approval via the `WalletApproval` trait
//!    - Order captured after approval
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cart_providers::{BackendClient, StripeCardConfirmer, PayPalWalletConfirmer};
//! use cart_core::PaymentConfirmerSelector;
//!
//! let backend = Arc::new(BackendClient::from_env()?);
//!
//! let confirmers = PaymentConfirmerSelector::new()
//!     .with_confirmer(Arc::new(StripeCardConfirmer::from_env(card_form)?))
//!     .with_confirmer(Arc::new(PayPalWalletConfirmer::from_env(wallet_button)?));
//! ```

pub mod backend;
pub mod card;
pub mod config;
pub mod wallet;

// Re-exports
pub use backend::BackendClient;
pub use card::{CardForm, CardFormOutcome, StripeCardConfirmer};
pub use config::{BackendConfig, PayPalConfig, StripeConfig};
pub use wallet::{ApprovalOutcome, PayPalWalletConfirmer, WalletApproval, WalletOrder};
