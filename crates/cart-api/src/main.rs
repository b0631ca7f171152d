//! # Mystery-Cart RS
//!
//! Storefront cart and checkout service.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables
//! export BACKEND_URL=https://storefront.example.com/api
//! export STRIPE_SECRET_KEY=sk_test_...
//! export PAYPAL_CLIENT_ID=...
//! export PAYPAL_CLIENT_SECRET=...
//!
//! # Run the server
//! mystery-cart
//! ```

use cart_api::{routes, state::AppConfig, state::AppState};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    print_banner();

    let config = AppConfig::load()?;
    let addr = config.socket_addr()?;
    let is_prod = config.is_production();

    let state = AppState::new(config)?;

    info!("Environment: {}", state.config.environment);
    info!(
        "Cart: {} ({} items)",
        state.config.cart_path.display(),
        state.cart.item_count()?
    );
    info!("Payment methods: {:?}", state.checkout.methods());

    let app = routes::create_router(state);

    info!("Mystery-Cart starting on http://{}", addr);

    if !is_prod {
        info!("Health: http://{}/health", addr);
        info!("Cart: GET http://{}/api/v1/cart", addr);
        info!("Checkout: POST http://{}/api/v1/checkout", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
  Mystery-Cart RS
  ━━━━━━━━━━━━━━━━━━━━━━━
  Storefront cart & checkout
  Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
