//! # cart-api
//!
//! HTTP layer for mystery-cart-rs: the local backend-for-frontend the
//! storefront UI talks to.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - REST endpoints for the cart and checkout
//! - A broker that relays card form and wallet approval results to the
//!   payment adapters
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/api/v1/cart` | Cart snapshot |
//! | POST | `/api/v1/cart/items/{item_id}` | Add one |
//! | POST | `/api/v1/cart/items/{item_id}/decrease` | Remove one |
//! | DELETE | `/api/v1/cart/items/{item_id}` | Remove all |
//! | POST | `/api/v1/checkout` | Begin checkout |
//! | GET | `/api/v1/checkout` | Checkout state |
//! | DELETE | `/api/v1/checkout` | Leave checkout |
//! | POST | `/api/v1/checkout/pay` | Start a payment |
//! | POST | `/api/v1/checkout/card` | Card form result |
//! | POST | `/api/v1/checkout/wallet` | Wallet approval result |
//! | POST | `/api/v1/checkout/settlement/ack` | Acknowledge a pending settlement |
//! | POST | `/api/v1/checkout/settlement/support` | Contact support |

pub mod handlers;
pub mod interaction;
pub mod routes;
pub mod state;

pub use interaction::{InteractionBroker, PendingInteraction};
pub use routes::create_router;
pub use state::{AppConfig, AppState};
