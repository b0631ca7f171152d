//! # Routes
//!
//! Axum router configuration for the storefront cart and checkout API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - Cart:
///   - GET    /api/v1/cart
///   - POST   /api/v1/cart/items/{item_id} - add one
///   - POST   /api/v1/cart/items/{item_id}/decrease - remove one
///   - DELETE /api/v1/cart/items/{item_id} - remove all
///
/// - Checkout:
///   - POST   /api/v1/checkout - begin (bearer credential required)
///   - GET    /api/v1/checkout - state, session, pending interaction
///   - DELETE /api/v1/checkout - leave
///   - POST   /api/v1/checkout/pay - start a payment (202)
///   - POST   /api/v1/checkout/card - hosted card form result
///   - POST   /api/v1/checkout/wallet - wallet approval result
///   - POST   /api/v1/checkout/settlement/ack
///   - POST   /api/v1/checkout/settlement/support
pub fn create_router(state: AppState) -> Router {
    // the storefront UI is served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    let cart_routes = Router::new()
        .route("/cart", get(handlers::get_cart))
        .route(
            "/cart/items/{item_id}",
            post(handlers::add_item).delete(handlers::remove_item),
        )
        .route(
            "/cart/items/{item_id}/decrease",
            post(handlers::decrease_item),
        );

    let checkout_routes = Router::new()
        .route(
            "/checkout",
            post(handlers::begin_checkout)
                .get(handlers::get_checkout)
                .delete(handlers::leave_checkout),
        )
        .route("/checkout/pay", post(handlers::pay))
        .route("/checkout/card", post(handlers::submit_card))
        .route("/checkout/wallet", post(handlers::submit_wallet))
        .route(
            "/checkout/settlement/ack",
            post(handlers::acknowledge_settlement),
        )
        .route(
            "/checkout/settlement/support",
            post(handlers::contact_support),
        );

    Router::new().merge(cart_routes).merge(checkout_routes)
}
