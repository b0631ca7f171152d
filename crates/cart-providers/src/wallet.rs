//! # PayPal Wallet Payments
//!
//! Wallet adapter over the PayPal Orders v2 API:
//!
//! 1. OAuth token (client credentials)
//! 2. Create an order with intent `CAPTURE`
//! 3. Hand the approval link to the payer and wait for approve / cancel
//! 4. Capture the approved order
//!
//! Only step 4 moves money. A capture whose outcome we never observed is
//! reported as settlement-ambiguous rather than a decline.

use crate::config::PayPalConfig;
use async_trait::async_trait;
use cart_core::{
    CheckoutError, CheckoutResult, ConfirmationOutcome, Currency, PaymentConfirmation,
    PaymentConfirmer, PaymentMethod, Price,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Order awaiting payer approval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletOrder {
    pub order_id: String,
    pub approval_url: String,
    pub amount: Price,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Canceled,
}

/// The embedded wallet button. Resolves once the payer approves or cancels.
#[async_trait]
pub trait WalletApproval: Send + Sync {
    async fn approve(&self, order: &WalletOrder) -> CheckoutResult<ApprovalOutcome>;
}

/// Wallet payments via PayPal
pub struct PayPalWalletConfirmer {
    config: PayPalConfig,
    client: Client,
    approval: Arc<dyn WalletApproval>,
}

impl PayPalWalletConfirmer {
    pub fn new(config: PayPalConfig, approval: Arc<dyn WalletApproval>) -> CheckoutResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CheckoutError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            approval,
        })
    }

    /// Create from environment variables
    pub fn from_env(approval: Arc<dyn WalletApproval>) -> CheckoutResult<Self> {
        Self::new(PayPalConfig::from_env()?, approval)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    async fn access_token(&self) -> Result<String, String> {
        let response = self
            .client
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("token request failed with HTTP {}", status));
        }

        response
            .json::<TokenResponse>()
            .await
            .map(|t| t.access_token)
            .map_err(|e| e.to_string())
    }

    async fn create_order(&self, token: &str, amount: &Price) -> Result<WalletOrder, String> {
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": amount.currency.to_string(),
                    "value": format_value(amount),
                }
            }]
        });

        let response = self
            .client
            .post(self.url("/v2/checkout/orders"))
            .bearer_auth(token)
            .header("PayPal-Request-Id", Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("PayPal order creation failed: status={}, body={}", status, body);
            return Err(format!("order creation failed with HTTP {}", status));
        }

        let order: OrderResponse = response.json().await.map_err(|e| e.to_string())?;
        let approval_url = order
            .links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.clone())
            .ok_or_else(|| format!("order {} has no approval link", order.id))?;

        Ok(WalletOrder {
            order_id: order.id,
            approval_url,
            amount: *amount,
        })
    }

    /// Capture an approved order. Money moves here.
    async fn capture(&self, token: &str, order: &WalletOrder) -> CheckoutResult<ConfirmationOutcome> {
        let ambiguous = |reason: String| CheckoutError::SettlementAmbiguous {
            payment_reference: order.order_id.clone(),
            reason,
        };

        let response = self
            .client
            .post(self.url(&format!("/v2/checkout/orders/{}/capture", order.order_id)))
            .bearer_auth(token)
            .header("PayPal-Request-Id", format!("capture-{}", order.order_id))
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| {
                error!("PayPal capture did not complete: {}", e);
                ambiguous(format!("capture request failed: {}", e))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ambiguous(format!("capture response unreadable: {}", e)))?;

        if status.is_server_error() {
            error!("PayPal capture failed: status={}, body={}", status, body);
            return Err(ambiguous(format!("capture failed with HTTP {}", status)));
        }

        if !status.is_success() {
            let reason = serde_json::from_str::<PayPalErrorResponse>(&body)
                .ok()
                .and_then(|e| {
                    e.details
                        .into_iter()
                        .next()
                        .and_then(|d| d.description)
                        .or(e.message)
                })
                .unwrap_or_else(|| format!("capture rejected with HTTP {}", status));
            if status == StatusCode::UNPROCESSABLE_ENTITY {
                warn!("PayPal capture declined: {}", reason);
            } else {
                error!("PayPal capture rejected: status={}, body={}", status, body);
            }
            return Ok(ConfirmationOutcome::Declined { reason });
        }

        let capture: CaptureResponse = serde_json::from_str(&body)
            .map_err(|e| ambiguous(format!("capture response unparseable: {}", e)))?;

        if capture.status != "COMPLETED" {
            error!("PayPal capture {} returned status {}", capture.id, capture.status);
            return Err(ambiguous(format!("capture status {}", capture.status)));
        }

        let captured = capture.captured_amount().unwrap_or(order.amount);
        let confirmation =
            PaymentConfirmation::captured(PaymentMethod::Wallet, capture.id, captured);

        info!(
            "PayPal order {} captured for {}",
            confirmation.reference,
            captured.display()
        );

        Ok(ConfirmationOutcome::Confirmed(
            match capture.payer.and_then(|p| p.name).and_then(|n| n.given_name) {
                Some(name) => confirmation.with_payer_name(name),
                None => confirmation,
            },
        ))
    }
}

/// PayPal amount value: decimal string in major units
fn format_value(amount: &Price) -> String {
    format!(
        "{:.*}",
        amount.currency.decimal_places() as usize,
        amount.as_decimal()
    )
}

#[async_trait]
impl PaymentConfirmer for PayPalWalletConfirmer {
    #[instrument(skip(self), fields(amount = %amount.display()))]
    async fn confirm(&self, amount: &Price) -> CheckoutResult<ConfirmationOutcome> {
        // nothing is charged before approval, so setup failures are declines
        let token = match self.access_token().await {
            Ok(token) => token,
            Err(e) => {
                error!("PayPal authentication failed: {}", e);
                return Ok(ConfirmationOutcome::Declined {
                    reason: "wallet provider unavailable".to_string(),
                });
            }
        };

        let order = match self.create_order(&token, amount).await {
            Ok(order) => order,
            Err(e) => {
                error!("{}", e);
                return Ok(ConfirmationOutcome::Declined {
                    reason: "wallet provider unavailable".to_string(),
                });
            }
        };

        debug!("PayPal order {} awaiting approval", order.order_id);

        match self.approval.approve(&order).await? {
            ApprovalOutcome::Canceled => {
                info!("PayPal order {} canceled by payer", order.order_id);
                Ok(ConfirmationOutcome::Canceled)
            }
            ApprovalOutcome::Approved => self.capture(&token, &order).await,
        }
    }

    fn method(&self) -> PaymentMethod {
        PaymentMethod::Wallet
    }

    fn provider_name(&self) -> &'static str {
        "paypal"
    }
}

// =============================================================================
// PayPal API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    id: String,
    status: String,
    #[serde(default)]
    payer: Option<Payer>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

impl CaptureResponse {
    fn captured_amount(&self) -> Option<Price> {
        let amount = self
            .purchase_units
            .first()?
            .payments
            .as_ref()?
            .captures
            .first()?
            .amount
            .as_ref()?;
        let currency = Currency::parse(&amount.currency_code)?;
        Price::from_decimal(amount.value.parse().ok()?, currency)
    }
}

#[derive(Debug, Deserialize)]
struct Payer {
    #[serde(default)]
    name: Option<PayerName>,
}

#[derive(Debug, Deserialize)]
struct PayerName {
    #[serde(default)]
    given_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    #[serde(default)]
    amount: Option<Money>,
}

#[derive(Debug, Deserialize)]
struct Money {
    currency_code: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PayPalErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<PayPalErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct PayPalErrorDetail {
    #[serde(default)]
    description: Option<String>,
}
