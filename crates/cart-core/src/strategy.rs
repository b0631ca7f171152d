//! # Payment Confirmation Strategy
//!
//! Strategy trait for the payment confirmation step of checkout.
//!
//! ## Design Pattern
//!
//! Each payment provider negotiates differently (a hosted card form that
//! tokenizes and charges in one go, a wallet that needs create → approve →
//! capture), but the orchestrator only ever sees one capability:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                PaymentConfirmer (trait)                     │
//! │  └── confirm(amount) → Confirmed | Declined | Canceled      │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                 ┌──────────┴──────────┐
//!         ┌───────┴───────┐     ┌───────┴───────┐
//!         │ Card adapter  │     │ Wallet adapter│
//!         │   (Stripe)    │     │   (PayPal)    │
//!         └───────────────┘     └───────────────┘
//! ```

use crate::error::CheckoutResult;
use crate::product::Price;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Payment methods offered at checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card network via a provider-hosted form
    Card,
    /// Wallet with out-of-band approval
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Wallet => "wallet",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider proof that a charge was authorized or captured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    /// Method that produced it
    pub method: PaymentMethod,

    /// Opaque provider reference (PaymentIntent id, wallet order id)
    pub reference: String,

    /// Amount confirmed
    pub amount: Price,

    /// Whether funds are already captured (a failed sale afterwards is then
    /// settlement-ambiguous)
    pub captured: bool,

    /// Payer display name, when the provider reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer_name: Option<String>,
}

impl PaymentConfirmation {
    /// Confirmation for funds already captured
    pub fn captured(method: PaymentMethod, reference: impl Into<String>, amount: Price) -> Self {
        Self {
            method,
            reference: reference.into(),
            amount,
            captured: true,
            payer_name: None,
        }
    }

    /// Confirmation for an authorization that has not been captured yet
    pub fn authorized(method: PaymentMethod, reference: impl Into<String>, amount: Price) -> Self {
        Self {
            captured: false,
            ..Self::captured(method, reference, amount)
        }
    }

    /// Builder: set payer display name
    pub fn with_payer_name(mut self, name: impl Into<String>) -> Self {
        self.payer_name = Some(name.into());
        self
    }
}

/// The three outcomes every adapter reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed(PaymentConfirmation),
    Declined { reason: String },
    Canceled,
}

/// Core trait for payment confirmation adapters.
///
/// `Err` is reserved for failures that are not a plain decline, most notably
/// `CheckoutError::SettlementAmbiguous` when the provider may have captured
/// funds without telling us.
#[async_trait]
pub trait PaymentConfirmer: Send + Sync {
    /// Produce a payment confirmation for `amount`
    async fn confirm(&self, amount: &Price) -> CheckoutResult<ConfirmationOutcome>;

    /// Method this adapter implements
    fn method(&self) -> PaymentMethod;

    /// Provider name (for logging)
    fn provider_name(&self) -> &'static str;
}

/// Type alias for a boxed payment confirmer (dynamic dispatch)
pub type BoxedPaymentConfirmer = Arc<dyn PaymentConfirmer>;

/// Adapter registry, keyed by payment method
#[derive(Clone, Default)]
pub struct PaymentConfirmerSelector {
    confirmers: HashMap<PaymentMethod, BoxedPaymentConfirmer>,
}

impl PaymentConfirmerSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own method, replacing any previous one
    pub fn register(&mut self, confirmer: BoxedPaymentConfirmer) {
        self.confirmers.insert(confirmer.method(), confirmer);
    }

    /// Register with builder pattern
    pub fn with_confirmer(mut self, confirmer: BoxedPaymentConfirmer) -> Self {
        self.register(confirmer);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Option<&BoxedPaymentConfirmer> {
        self.confirmers.get(&method)
    }

    /// Methods that can currently be offered
    pub fn methods(&self) -> Vec<PaymentMethod> {
        let mut methods: Vec<_> = self.confirmers.keys().copied().collect();
        methods.sort_by_key(|m| m.as_str());
        methods
    }
}
