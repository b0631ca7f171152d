//! # Provider Configuration
//!
//! Configuration for the storefront backend and the two payment providers.
//! All secrets are loaded from environment variables.

use cart_core::{CheckoutError, CheckoutResult, Currency};
use std::env;
use std::time::Duration;

fn required(key: &str) -> CheckoutResult<String> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CheckoutError::Configuration(format!("{} not set", key)))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Storefront backend (catalog, profile, sale ledger, notifications)
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL, without trailing slash
    pub base_url: String,

    /// Per-request deadline
    pub timeout: Duration,

    /// Currency catalog prices are quoted in
    pub currency: Currency,
}

impl BackendConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `BACKEND_URL`
    ///
    /// Optional: `BACKEND_TIMEOUT_SECS`, `STORE_CURRENCY`
    pub fn from_env() -> CheckoutResult<Self> {
        dotenvy::dotenv().ok();

        let base_url = required("BACKEND_URL")?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(CheckoutError::Configuration(
                "BACKEND_URL must be an http(s) URL".to_string(),
            ));
        }

        let mut config = Self::new(base_url);

        if let Some(secs) = optional("BACKEND_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                CheckoutError::Configuration("BACKEND_TIMEOUT_SECS must be a number".to_string())
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        if let Some(code) = optional("STORE_CURRENCY") {
            config.currency = Currency::parse(&code).ok_or_else(|| {
                CheckoutError::Configuration(format!("Unsupported STORE_CURRENCY: {}", code))
            })?;
        }

        Ok(config)
    }

    /// Create config with explicit values (for testing)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Self::DEFAULT_TIMEOUT,
            currency: Currency::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Stripe API configuration (card payments)
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_test_... or sk_live_...)
    pub secret_key: String,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,

    /// API version
    pub api_version: String,
}

impl StripeConfig {
    pub const DEFAULT_API_BASE_URL: &'static str = "https://api.stripe.com";

    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `STRIPE_SECRET_KEY`
    pub fn from_env() -> CheckoutResult<Self> {
        dotenvy::dotenv().ok();

        let secret_key = required("STRIPE_SECRET_KEY")?;
        if !secret_key.starts_with("sk_test_") && !secret_key.starts_with("sk_live_") {
            return Err(CheckoutError::Configuration(
                "STRIPE_SECRET_KEY must start with sk_test_ or sk_live_".to_string(),
            ));
        }

        let mut config = Self::new(secret_key);
        if let Some(url) = optional("STRIPE_API_BASE_URL") {
            config = config.with_api_base_url(url);
        }
        Ok(config)
    }

    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            api_base_url: Self::DEFAULT_API_BASE_URL.to_string(),
            api_version: "2024-12-18.acacia".to_string(),
        }
    }

    pub fn is_test_mode(&self) -> bool {
        self.secret_key.starts_with("sk_test_")
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret_key)
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

/// PayPal REST configuration (wallet payments)
#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,

    /// Sandbox by default
    pub api_base_url: String,
}

impl PayPalConfig {
    pub const SANDBOX_API_BASE_URL: &'static str = "https://api-m.sandbox.paypal.com";

    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `PAYPAL_CLIENT_ID`
    /// - `PAYPAL_CLIENT_SECRET`
    pub fn from_env() -> CheckoutResult<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::new(
            required("PAYPAL_CLIENT_ID")?,
            required("PAYPAL_CLIENT_SECRET")?,
        );
        if let Some(url) = optional("PAYPAL_API_BASE_URL") {
            config = config.with_api_base_url(url);
        }
        Ok(config)
    }

    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_base_url: Self::SANDBOX_API_BASE_URL.to_string(),
        }
    }

    pub fn is_sandbox(&self) -> bool {
        self.api_base_url.contains("sandbox")
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}
