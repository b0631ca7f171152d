//! # Provider Interactions
//!
//! Bridges the payment adapters, which wait on the payer, and the HTTP
//! surface, where the storefront UI reports what the payer did. At most one
//! interaction is pending at a time; it resolves as canceled if the UI never
//! answers.

use async_trait::async_trait;
use cart_core::{CheckoutResult, Price};
use cart_providers::{ApprovalOutcome, CardForm, CardFormOutcome, WalletApproval, WalletOrder};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// What the UI should currently show
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingInteraction {
    /// Render the hosted card form for `amount`
    CardForm { amount: Price },
    /// Send the payer to `approval_url`
    WalletApproval {
        order_id: String,
        approval_url: String,
        amount: Price,
    },
}

enum Waiter {
    Card(oneshot::Sender<CardFormOutcome>),
    Wallet(oneshot::Sender<ApprovalOutcome>),
}

struct Pending {
    view: PendingInteraction,
    waiter: Waiter,
}

/// Reply from the UI did not match anything pending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NothingPending;

pub struct InteractionBroker {
    pending: Mutex<Option<Pending>>,
    timeout: Duration,
}

impl InteractionBroker {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(None),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending(&self) -> Option<PendingInteraction> {
        self.lock().as_ref().map(|p| p.view.clone())
    }

    fn open(&self, view: PendingInteraction, waiter: Waiter) {
        debug!("Waiting on payer: {:?}", view);
        // a stale waiter is dropped here and resolves as canceled
        *self.lock() = Some(Pending { view, waiter });
    }

    /// Wait for the UI; a dropped sender or an expired wait counts as canceled
    async fn wait<T>(&self, rx: oneshot::Receiver<T>, canceled: T) -> T {
        let outcome = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => canceled,
            Err(_) => {
                warn!("Payer did not respond within {:?}", self.timeout);
                canceled
            }
        };
        self.clear_closed();
        outcome
    }

    fn clear_closed(&self) {
        let mut pending = self.lock();
        let closed = match pending.as_ref().map(|p| &p.waiter) {
            Some(Waiter::Card(tx)) => tx.is_closed(),
            Some(Waiter::Wallet(tx)) => tx.is_closed(),
            None => false,
        };
        if closed {
            *pending = None;
        }
    }

    /// Deliver the card form result
    pub fn submit_card(&self, outcome: CardFormOutcome) -> Result<(), NothingPending> {
        let mut pending = self.lock();
        match pending.take() {
            Some(Pending {
                waiter: Waiter::Card(tx),
                ..
            }) => tx.send(outcome).map_err(|_| NothingPending),
            other => {
                *pending = other;
                Err(NothingPending)
            }
        }
    }

    /// Deliver the wallet approval result
    pub fn submit_wallet(&self, outcome: ApprovalOutcome) -> Result<(), NothingPending> {
        let mut pending = self.lock();
        match pending.take() {
            Some(Pending {
                waiter: Waiter::Wallet(tx),
                ..
            }) => tx.send(outcome).map_err(|_| NothingPending),
            other => {
                *pending = other;
                Err(NothingPending)
            }
        }
    }
}

impl Default for InteractionBroker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl CardForm for InteractionBroker {
    async fn collect(&self, amount: &Price) -> CheckoutResult<CardFormOutcome> {
        let (tx, rx) = oneshot::channel();
        self.open(
            PendingInteraction::CardForm { amount: *amount },
            Waiter::Card(tx),
        );
        Ok(self.wait(rx, CardFormOutcome::Canceled).await)
    }
}

#[async_trait]
impl WalletApproval for InteractionBroker {
    async fn approve(&self, order: &WalletOrder) -> CheckoutResult<ApprovalOutcome> {
        let (tx, rx) = oneshot::channel();
        self.open(
            PendingInteraction::WalletApproval {
                order_id: order.order_id.clone(),
                approval_url: order.approval_url.clone(),
                amount: order.amount,
            },
            Waiter::Wallet(tx),
        );
        Ok(self.wait(rx, ApprovalOutcome::Canceled).await)
    }
}
