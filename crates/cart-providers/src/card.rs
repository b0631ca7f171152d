//! # Stripe Card Payments
//!
//! Card adapter: the payer fills the hosted card form, which tokenizes the
//! card into a PaymentMethod; this adapter then creates and confirms a
//! PaymentIntent for the checkout total in a single call.

use crate::config::StripeConfig;
use async_trait::async_trait;
use cart_core::{
    CheckoutError, CheckoutResult, ConfirmationOutcome, Currency, PaymentConfirmation,
    PaymentConfirmer, PaymentMethod, Price,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// What the hosted card form produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardFormOutcome {
    /// Card tokenized by Stripe.js (`pm_...`)
    Tokenized { payment_method_id: String },
    /// Payer closed the form
    Canceled,
}

/// The embedded card form. Resolves once the payer submits or closes it.
#[async_trait]
pub trait CardForm: Send + Sync {
    async fn collect(&self, amount: &Price) -> CheckoutResult<CardFormOutcome>;
}

/// Card payments via Stripe PaymentIntents
pub struct StripeCardConfirmer {
    config: StripeConfig,
    client: Client,
    form: Arc<dyn CardForm>,
}

impl StripeCardConfirmer {
    /// Per-request deadline for Stripe calls
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(config: StripeConfig, form: Arc<dyn CardForm>) -> CheckoutResult<Self> {
        Ok(Self {
            config,
            client: http_client(Self::DEFAULT_TIMEOUT)?,
            form,
        })
    }

    /// Builder: override the request deadline
    pub fn with_timeout(mut self, timeout: Duration) -> CheckoutResult<Self> {
        self.client = http_client(timeout)?;
        Ok(self)
    }

    /// Create from environment variables
    pub fn from_env(form: Arc<dyn CardForm>) -> CheckoutResult<Self> {
        Self::new(StripeConfig::from_env()?, form)
    }

    fn intent_params(amount: &Price, payment_method_id: &str) -> Vec<(&'static str, String)> {
        vec![
            ("amount", amount.amount.to_string()),
            ("currency", amount.currency.as_str().to_string()),
            ("payment_method", payment_method_id.to_string()),
            ("payment_method_types[]", "card".to_string()),
            ("confirm", "true".to_string()),
        ]
    }

    /// Create and confirm a PaymentIntent for the tokenized card.
    ///
    /// Once the request may have reached Stripe, a missing or unclear answer
    /// is `SettlementAmbiguous`: the intent was created with `confirm=true`
    /// and may have been captured.
    async fn charge(
        &self,
        amount: &Price,
        payment_method_id: &str,
    ) -> CheckoutResult<ConfirmationOutcome> {
        let url = format!("{}/v1/payment_intents", self.config.api_base_url);
        let idempotency_key = Uuid::new_v4().to_string();

        debug!(
            "Confirming PaymentIntent for {} (idempotency key {})",
            amount.display(),
            idempotency_key
        );

        let ambiguous = |reason: String| -> CheckoutResult<ConfirmationOutcome> {
            error!("Card payment outcome unknown: {}", reason);
            Err(CheckoutError::SettlementAmbiguous {
                payment_reference: format!("stripe idempotency key {}", idempotency_key),
                reason,
            })
        };

        let response = match self
            .client
            .post(&url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .header("Idempotency-Key", &idempotency_key)
            .form(&Self::intent_params(amount, payment_method_id))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_connect() => {
                error!("Stripe unreachable: {}", e);
                return Ok(declined("card provider unreachable"));
            }
            Err(e) => return ambiguous(format!("no response from card provider: {}", e)),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return ambiguous(format!("card provider response unreadable: {}", e)),
        };

        if status.is_server_error() {
            return ambiguous(format!("card provider failed with HTTP {}", status));
        }

        if !status.is_success() {
            let message = serde_json::from_str::<StripeErrorResponse>(&body)
                .map(|r| r.error.message)
                .unwrap_or_else(|_| format!("HTTP {}", status));

            if status == StatusCode::PAYMENT_REQUIRED {
                warn!("Card declined: {}", message);
            } else {
                error!("Stripe API error: status={}, body={}", status, body);
            }
            return Ok(ConfirmationOutcome::Declined { reason: message });
        }

        let intent: PaymentIntentResponse = match serde_json::from_str(&body) {
            Ok(intent) => intent,
            Err(e) => return ambiguous(format!("unexpected card provider response: {}", e)),
        };

        match intent.status.as_str() {
            "succeeded" => {}
            "processing" => {
                error!("PaymentIntent {} still processing", intent.id);
                return Err(CheckoutError::SettlementAmbiguous {
                    payment_reference: intent.id,
                    reason: "card payment still processing".to_string(),
                });
            }
            other => {
                let reason = intent
                    .last_payment_error
                    .map(|e| e.message)
                    .unwrap_or_else(|| format!("payment {}", other.replace('_', " ")));
                warn!("PaymentIntent {} not completed: {}", intent.id, reason);
                return Ok(ConfirmationOutcome::Declined { reason });
            }
        }

        let charged = Currency::parse(&intent.currency)
            .map(|currency| Price::from_cents(intent.amount, currency))
            .unwrap_or(*amount);

        info!(
            "PaymentIntent {} succeeded for {}",
            intent.id,
            charged.display()
        );

        Ok(ConfirmationOutcome::Confirmed(PaymentConfirmation::captured(
            PaymentMethod::Card,
            intent.id,
            charged,
        )))
    }
}

fn http_client(timeout: Duration) -> CheckoutResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CheckoutError::Configuration(format!("HTTP client: {}", e)))
}

fn declined(reason: &str) -> ConfirmationOutcome {
    ConfirmationOutcome::Declined {
        reason: reason.to_string(),
    }
}

#[async_trait]
impl PaymentConfirmer for StripeCardConfirmer {
    #[instrument(skip(self), fields(amount = %amount.display()))]
    async fn confirm(&self, amount: &Price) -> CheckoutResult<ConfirmationOutcome> {
        match self.form.collect(amount).await? {
            CardFormOutcome::Canceled => {
                info!("Card form closed by payer");
                Ok(ConfirmationOutcome::Canceled)
            }
            CardFormOutcome::Tokenized { payment_method_id } => {
                self.charge(amount, &payment_method_id).await
            }
        }
    }

    fn method(&self) -> PaymentMethod {
        PaymentMethod::Card
    }

    fn provider_name(&self) -> &'static str {
        "stripe"
    }
}

// =============================================================================
// Stripe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    last_payment_error: Option<StripeError>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: String,
}
