//! # Application State
//!
//! Shared state for the Axum application.
//! Contains the cart, the checkout orchestrator, and the provider interaction
//! broker the payment adapters wait on.

use crate::interaction::InteractionBroker;
use anyhow::Context;
use cart_core::{
    CartHydrator, CheckoutOrchestrator, Currency, JsonFileStorage, PaymentConfirmerSelector,
    SharedCart,
};
use cart_providers::{
    BackendClient, BackendConfig, PayPalConfig, PayPalWalletConfirmer, StripeCardConfirmer,
    StripeConfig,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Non-secret defaults read from `config/storefront.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StorefrontFile {
    host: Option<String>,
    port: Option<u16>,
    cart_path: Option<String>,
    currency: Option<String>,
    lookup_timeout_secs: Option<u64>,
    interaction_timeout_secs: Option<u64>,
    environment: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Durable cart file
    pub cart_path: PathBuf,
    /// Store currency
    pub currency: Currency,
    /// Per-item catalog lookup deadline
    pub lookup_timeout: Duration,
    /// How long a card form or wallet approval may stay open
    pub interaction_timeout: Duration,
    /// Environment (development, staging, production)
    pub environment: String,
}

impl AppConfig {
    /// Load from `config/storefront.toml` (if present), then environment
    /// variables, which win.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let file = load_storefront_file()?;
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let port = match env("PORT") {
            Some(p) => p.parse().context("PORT must be a port number")?,
            None => file.port.unwrap_or(8080),
        };

        let currency_code = env("STORE_CURRENCY")
            .or(file.currency)
            .unwrap_or_else(|| Currency::default().as_str().to_string());
        let currency = Currency::parse(&currency_code)
            .with_context(|| format!("Unsupported store currency: {}", currency_code))?;

        let lookup_timeout_secs = match env("LOOKUP_TIMEOUT_SECS") {
            Some(s) => s.parse().context("LOOKUP_TIMEOUT_SECS must be a number")?,
            None => file.lookup_timeout_secs.unwrap_or(10),
        };

        let interaction_timeout_secs = match env("INTERACTION_TIMEOUT_SECS") {
            Some(s) => s.parse().context("INTERACTION_TIMEOUT_SECS must be a number")?,
            None => file
                .interaction_timeout_secs
                .unwrap_or(InteractionBroker::DEFAULT_TIMEOUT.as_secs()),
        };

        Ok(Self {
            host: env("HOST")
                .or(file.host)
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            cart_path: env("CART_PATH")
                .or(file.cart_path)
                .unwrap_or_else(|| JsonFileStorage::DEFAULT_PATH.to_string())
                .into(),
            currency,
            lookup_timeout: Duration::from_secs(lookup_timeout_secs),
            interaction_timeout: Duration::from_secs(interaction_timeout_secs),
            environment: env("ENVIRONMENT")
                .or(file.environment)
                .unwrap_or_else(|| "development".to_string()),
        })
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid socket address {}:{}", self.host, self.port))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Load `config/storefront.toml` from the usual locations, if any
fn load_storefront_file() -> anyhow::Result<StorefrontFile> {
    let config_paths = [
        "config/storefront.toml",
        "../config/storefront.toml",
        "../../config/storefront.toml",
    ];

    for path in config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            let file: StorefrontFile =
                toml::from_str(&content).with_context(|| format!("Failed to parse {}", path))?;
            info!("Loaded storefront config from {}", path);
            return Ok(file);
        }
    }

    Ok(StorefrontFile::default())
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Durable cart
    pub cart: SharedCart,
    /// Checkout state machine
    pub checkout: CheckoutOrchestrator,
    /// Pending card form / wallet approval
    pub interactions: Arc<InteractionBroker>,
    /// Application config
    pub config: AppConfig,
}

impl AppState {
    /// Wire the cart, backend client and payment adapters from configuration
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let storage = Arc::new(JsonFileStorage::new(&config.cart_path));
        let cart = SharedCart::open(storage)
            .with_context(|| format!("Failed to open cart at {}", config.cart_path.display()))?;

        let backend_config = BackendConfig::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to configure backend: {}", e))?
            .with_currency(config.currency);
        let backend = Arc::new(
            BackendClient::new(backend_config)
                .map_err(|e| anyhow::anyhow!("Failed to initialize backend client: {}", e))?,
        );

        let interactions = Arc::new(InteractionBroker::new(config.interaction_timeout));
        let mut confirmers = PaymentConfirmerSelector::new();

        match StripeConfig::from_env() {
            Ok(stripe) => confirmers.register(Arc::new(
                StripeCardConfirmer::new(stripe, interactions.clone())
                    .map_err(|e| anyhow::anyhow!("Failed to initialize Stripe: {}", e))?,
            )),
            Err(e) => warn!("Card payments disabled: {}", e),
        }

        match PayPalConfig::from_env() {
            Ok(paypal) => confirmers.register(Arc::new(
                PayPalWalletConfirmer::new(paypal, interactions.clone())
                    .map_err(|e| anyhow::anyhow!("Failed to initialize PayPal: {}", e))?,
            )),
            Err(e) => warn!("Wallet payments disabled: {}", e),
        }

        if confirmers.methods().is_empty() {
            anyhow::bail!("No payment provider configured (set Stripe and/or PayPal credentials)");
        }

        let hydrator = CartHydrator::new(backend.clone(), config.currency)
            .with_lookup_timeout(config.lookup_timeout);

        let checkout = CheckoutOrchestrator::new(
            cart.clone(),
            hydrator,
            backend.clone(),
            backend.clone(),
            confirmers,
        )
        .with_contact_service(backend);

        Ok(Self {
            cart,
            checkout,
            interactions,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storefront_file_parsing() {
        let file: StorefrontFile = toml::from_str(
            r#"
            port = 9090
            currency = "usd"
            lookup_timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(file.port, Some(9090));
        assert_eq!(file.currency.as_deref(), Some("usd"));
        assert!(file.host.is_none());
    }

    #[test]
    fn test_socket_addr() {
        let config = AppConfig {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cart_path: "cart.json".into(),
            currency: Currency::EUR,
            lookup_timeout: Duration::from_secs(10),
            interaction_timeout: Duration::from_secs(60),
            environment: "test".to_string(),
        };

        assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:3000");
        assert!(!config.is_production());

        let bad = AppConfig {
            host: "not a host".to_string(),
            ..config
        };
        assert!(bad.socket_addr().is_err());
    }
}
