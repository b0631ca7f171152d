//! # Checkout Orchestrator
//!
//! Drives one checkout from the hydrated cart to a recorded sale.
//!
//! ```text
//!  Idle ──begin──▶ Loading ──▶ Ready ──pay──▶ AwaitingPayment ──▶ Submitting ──▶ Completed
//!                    │           ▲                │      │             │
//!                    ▼           └──── canceled ──┘      ▼             ▼
//!                  Failed ◀───────────── declined ─── Failed ◀──── Failed
//! ```
//!
//! The state lock is never held across an await. The payment step and the
//! sale call run on a detached task: a caller that stops waiting (the view
//! navigated away) does not cancel a sale that is already underway, and a sale
//! that succeeds later still clears the cart.
//!
//! A payment the provider captured is never taken twice. If the sale ledger
//! refuses the sale, the confirmation is kept and the next `pay` only issues a
//! fresh sale call for it.

use crate::cart::{CartEntry, SharedCart};
use crate::error::{CheckoutError, CheckoutResult, ServiceError};
use crate::hydrator::CartHydrator;
use crate::order::{CheckoutSession, SaleRecord};
use crate::services::{BearerToken, BoxedProfileService, BoxedSaleService};
use crate::strategy::{
    BoxedPaymentConfirmer, ConfirmationOutcome, PaymentConfirmation, PaymentConfirmerSelector,
    PaymentMethod,
};
use crate::support::{BoxedContactService, ContactRequest};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn, Instrument};

/// Where a checkout currently stands
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutState {
    Idle,
    Loading,
    Ready,
    AwaitingPayment { method: PaymentMethod },
    Submitting { method: PaymentMethod },
    Completed { sale: SaleRecord },
    Failed { error: CheckoutError },
}

impl CheckoutState {
    pub fn name(&self) -> &'static str {
        match self {
            CheckoutState::Idle => "idle",
            CheckoutState::Loading => "loading",
            CheckoutState::Ready => "ready",
            CheckoutState::AwaitingPayment { .. } => "awaiting_payment",
            CheckoutState::Submitting { .. } => "submitting",
            CheckoutState::Completed { .. } => "completed",
            CheckoutState::Failed { .. } => "failed",
        }
    }

    /// A payment or sale call is in flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            CheckoutState::AwaitingPayment { .. } | CheckoutState::Submitting { .. }
        )
    }

    fn is_settlement_locked(&self) -> bool {
        matches!(self, CheckoutState::Failed { error } if error.requires_support())
    }
}

struct Inner {
    state: CheckoutState,
    session: Option<CheckoutSession>,
    last_error: Option<CheckoutError>,
    /// Bumped whenever a session is started or discarded
    generation: u64,
    /// A payment task is running, whether or not the view still shows it
    in_flight: bool,
    /// Captured payment whose sale the ledger refused
    unrecorded: Option<PaymentConfirmation>,
}

impl Inner {
    fn fail(&mut self, error: CheckoutError) {
        self.last_error = Some(error.clone());
        self.state = CheckoutState::Failed { error };
    }

    /// Money was (or may have been) taken without a recorded sale
    fn holds_payment(&self) -> bool {
        self.state.is_settlement_locked() || (self.unrecorded.is_some() && !self.state.is_busy())
    }
}

/// Clears `in_flight` when the payment task ends, however it ends
struct InFlight(Arc<Mutex<Inner>>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight = false;
    }
}

enum PaymentStep {
    Confirm(BoxedPaymentConfirmer),
    Resubmit(PaymentConfirmation),
}

/// Owns the checkout state machine for one storefront installation.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct CheckoutOrchestrator {
    cart: SharedCart,
    hydrator: CartHydrator,
    profiles: BoxedProfileService,
    sales: BoxedSaleService,
    confirmers: PaymentConfirmerSelector,
    contacts: Option<BoxedContactService>,
    inner: Arc<Mutex<Inner>>,
}

impl CheckoutOrchestrator {
    pub fn new(
        cart: SharedCart,
        hydrator: CartHydrator,
        profiles: BoxedProfileService,
        sales: BoxedSaleService,
        confirmers: PaymentConfirmerSelector,
    ) -> Self {
        Self {
            cart,
            hydrator,
            profiles,
            sales,
            confirmers,
            contacts: None,
            inner: Arc::new(Mutex::new(Inner {
                state: CheckoutState::Idle,
                session: None,
                last_error: None,
                generation: 0,
                in_flight: false,
                unrecorded: None,
            })),
        }
    }

    /// Builder: enable support contact requests
    pub fn with_contact_service(mut self, contacts: BoxedContactService) -> Self {
        self.contacts = Some(contacts);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CheckoutState {
        self.lock().state.clone()
    }

    /// The live session, if checkout has been entered
    pub fn session(&self) -> Option<CheckoutSession> {
        self.lock().session.clone()
    }

    /// Most recent failure or cancellation of this checkout
    pub fn last_error(&self) -> Option<CheckoutError> {
        self.lock().last_error.clone()
    }

    /// Payment methods with a registered adapter
    pub fn methods(&self) -> Vec<PaymentMethod> {
        self.confirmers.methods()
    }

    pub fn cart(&self) -> &SharedCart {
        &self.cart
    }

    /// Enter checkout: hydrate the cart and fetch the payer profile
    /// concurrently, ending in `Ready` or `Failed`.
    #[instrument(skip_all)]
    pub async fn begin(&self, credential: Option<BearerToken>) -> CheckoutResult<CheckoutSession> {
        let generation = {
            let mut inner = self.lock();
            if inner.in_flight {
                return Err(CheckoutError::SubmissionInProgress);
            }
            if inner.holds_payment() {
                return Err(CheckoutError::SettlementLocked);
            }
            if inner.state == CheckoutState::Loading {
                return Err(CheckoutError::InvalidTransition {
                    state: "loading",
                    action: "begin checkout",
                });
            }
            inner.state = CheckoutState::Loading;
            inner.session = None;
            inner.last_error = None;
            inner.generation += 1;
            inner.generation
        };

        let result = self.load(credential).await;

        let mut inner = self.lock();
        if inner.generation != generation {
            // left checkout while loading
            return Err(CheckoutError::InvalidTransition {
                state: inner.state.name(),
                action: "finish loading",
            });
        }

        match result {
            Ok(session) => {
                info!(
                    "Checkout ready: {} items, total={}",
                    session.item_count(),
                    session.total.display()
                );
                inner.state = CheckoutState::Ready;
                inner.session = Some(session.clone());
                Ok(session)
            }
            Err(e) => {
                warn!("Checkout could not start: {}", e);
                inner.fail(e.clone());
                Err(e)
            }
        }
    }

    async fn load(&self, credential: Option<BearerToken>) -> CheckoutResult<CheckoutSession> {
        let credential = credential.ok_or(CheckoutError::Unauthenticated)?;
        let snapshot = self.cart.snapshot()?;

        let profile = async {
            self.profiles
                .fetch_profile(&credential)
                .await
                .map_err(|e| match e {
                    ServiceError::Unauthenticated => CheckoutError::Unauthenticated,
                    other => CheckoutError::ProfileUnavailable(other.to_string()),
                })
        };

        let (line_items, payer) = futures::try_join!(self.hydrator.hydrate(&snapshot), profile)?;

        CheckoutSession::new(
            line_items,
            payer,
            snapshot,
            credential,
            self.hydrator.currency(),
        )
    }

    /// Pay for the current session with `method` and record the sale.
    ///
    /// Allowed from `Ready`, or from `Failed` after a decline or a rejected
    /// sale. Rejected with `SubmissionInProgress` while another payment is in
    /// flight, so at most one sale call is ever issued at a time.
    #[instrument(skip(self))]
    pub async fn pay(&self, method: PaymentMethod) -> CheckoutResult<SaleRecord> {
        self.start_payment(method)?
            .await
            .map_err(|e| CheckoutError::Internal(format!("payment task failed: {}", e)))?
    }

    /// Validate and move to `AwaitingPayment`, then run the payment on a
    /// detached task. Dropping the handle does not cancel it.
    ///
    /// After a refused sale for a captured payment, `method` is ignored and
    /// only the sale call is repeated.
    pub fn start_payment(
        &self,
        method: PaymentMethod,
    ) -> CheckoutResult<JoinHandle<CheckoutResult<SaleRecord>>> {
        // read before taking the state lock; the cart has its own lock
        let live = self.cart.snapshot()?;

        let (generation, session, step) = {
            let mut inner = self.lock();
            if inner.in_flight {
                return Err(CheckoutError::SubmissionInProgress);
            }
            match &inner.state {
                CheckoutState::Ready => {}
                CheckoutState::Failed { error } if error.requires_support() => {
                    return Err(CheckoutError::SettlementLocked)
                }
                CheckoutState::Failed { error } if error.is_retryable() && inner.session.is_some() => {}
                state => {
                    return Err(CheckoutError::InvalidTransition {
                        state: state.name(),
                        action: "pay",
                    })
                }
            }

            let Some(mut session) = inner.session.clone() else {
                return Err(CheckoutError::InvalidTransition {
                    state: "idle",
                    action: "pay",
                });
            };

            let step = match inner.unrecorded.clone() {
                // the captured payment covers the session as hydrated
                Some(confirmation) => {
                    info!(
                        "Resubmitting sale for captured payment {}",
                        confirmation.reference
                    );
                    inner.state = CheckoutState::Submitting {
                        method: confirmation.method,
                    };
                    PaymentStep::Resubmit(confirmation)
                }
                None => {
                    let confirmer = self
                        .confirmers
                        .get(method)
                        .cloned()
                        .ok_or_else(|| CheckoutError::MethodUnavailable(method.to_string()))?;

                    if !same_entries(&session.hydrated_from, &live) {
                        warn!("Cart changed after checkout started, discarding session");
                        inner.session = None;
                        inner.state = CheckoutState::Idle;
                        inner.last_error = Some(CheckoutError::CartChanged);
                        inner.generation += 1;
                        return Err(CheckoutError::CartChanged);
                    }

                    session.chosen_method = Some(method);
                    inner.session = Some(session.clone());
                    inner.state = CheckoutState::AwaitingPayment { method };
                    PaymentStep::Confirm(confirmer)
                }
            };

            inner.in_flight = true;
            (inner.generation, session, step)
        };

        let this = self.clone();
        let in_flight = InFlight(self.inner.clone());
        Ok(tokio::spawn(
            async move {
                let _in_flight = in_flight;
                match step {
                    PaymentStep::Confirm(confirmer) => {
                        this.run_payment(generation, session, confirmer).await
                    }
                    PaymentStep::Resubmit(confirmation) => {
                        this.submit(generation, &session, &confirmation).await
                    }
                }
            }
            .in_current_span(),
        ))
    }

    async fn run_payment(
        &self,
        generation: u64,
        session: CheckoutSession,
        confirmer: BoxedPaymentConfirmer,
    ) -> CheckoutResult<SaleRecord> {
        info!(
            "Awaiting {} confirmation for {}",
            confirmer.provider_name(),
            session.total.display()
        );

        let confirmation = match confirmer.confirm(&session.total).await {
            Ok(ConfirmationOutcome::Confirmed(confirmation)) => confirmation,
            Ok(ConfirmationOutcome::Canceled) => {
                info!("Payment canceled by payer");
                self.update(generation, |inner| {
                    inner.state = CheckoutState::Ready;
                    inner.last_error = Some(CheckoutError::Canceled);
                });
                return Err(CheckoutError::Canceled);
            }
            Ok(ConfirmationOutcome::Declined { reason }) => {
                warn!("Payment declined: {}", reason);
                let err = CheckoutError::Declined { reason };
                return Err(self.fail(generation, &session, err, None));
            }
            Err(e) => {
                error!("Payment confirmation failed: {}", e);
                return Err(self.fail(generation, &session, e, None));
            }
        };

        if confirmation.amount != session.total {
            let reason = format!(
                "provider confirmed {} for a total of {}",
                confirmation.amount.display(),
                session.total.display()
            );
            error!("{}", reason);
            let err = if confirmation.captured {
                CheckoutError::SettlementAmbiguous {
                    payment_reference: confirmation.reference.clone(),
                    reason,
                }
            } else {
                CheckoutError::Declined { reason }
            };
            return Err(self.fail(generation, &session, err, None));
        }

        self.update(generation, |inner| {
            inner.state = CheckoutState::Submitting {
                method: confirmation.method,
            };
        });

        self.submit(generation, &session, &confirmation).await
    }

    /// The one sale call for this confirmation. Never retried here.
    async fn submit(
        &self,
        generation: u64,
        session: &CheckoutSession,
        confirmation: &PaymentConfirmation,
    ) -> CheckoutResult<SaleRecord> {
        let request = session.sale_request(confirmation);

        match self.sales.create_sale(&session.credential, &request).await {
            Ok(sale_id) => {
                let sale = SaleRecord::new(sale_id, &request);
                info!(
                    "Sale {} recorded for {}",
                    sale.sale_id,
                    sale.total_amount.display()
                );

                if let Err(e) = self.cart.clear() {
                    error!("Sale {} recorded but cart not cleared: {}", sale.sale_id, e);
                }

                let mut inner = self.lock();
                inner.unrecorded = None;
                if inner.generation == generation {
                    inner.session = None;
                    inner.state = CheckoutState::Completed { sale: sale.clone() };
                }
                Ok(sale)
            }
            Err(e) => {
                let err = if confirmation.captured && e.outcome_unknown() {
                    CheckoutError::SettlementAmbiguous {
                        payment_reference: confirmation.reference.clone(),
                        reason: e.to_string(),
                    }
                } else {
                    CheckoutError::SaleCreationRejected {
                        reason: e.to_string(),
                    }
                };
                error!("Sale not recorded: {}", err);

                let unrecorded = (confirmation.captured
                    && matches!(err, CheckoutError::SaleCreationRejected { .. }))
                .then(|| confirmation.clone());
                Err(self.fail(generation, session, err, unrecorded))
            }
        }
    }

    fn update(&self, generation: u64, f: impl FnOnce(&mut Inner)) {
        let mut inner = self.lock();
        if inner.generation == generation {
            f(&mut inner);
        }
    }

    /// Record a payment failure. Failures that leave money without a sale
    /// are reinstated even when the view already left the checkout.
    fn fail(
        &self,
        generation: u64,
        session: &CheckoutSession,
        error: CheckoutError,
        unrecorded: Option<PaymentConfirmation>,
    ) -> CheckoutError {
        let mut inner = self.lock();
        let current = inner.generation == generation;
        if !current && !error.requires_support() && unrecorded.is_none() {
            return error;
        }
        if !current {
            warn!("Checkout was left while paying, reinstating it: {}", error);
            inner.session = Some(session.clone());
        }
        inner.unrecorded = unrecorded;
        inner.fail(error.clone());
        error
    }

    /// Navigate away: discard the session.
    ///
    /// A payment already in flight keeps running in the background and
    /// still blocks `begin` and `pay` until it ends. Refused while a captured
    /// payment has no recorded sale.
    pub fn leave(&self) -> CheckoutResult<()> {
        let mut inner = self.lock();
        if inner.holds_payment() {
            return Err(CheckoutError::SettlementLocked);
        }
        if inner.in_flight {
            info!("Left checkout while a payment is in flight");
        }
        inner.state = CheckoutState::Idle;
        inner.session = None;
        inner.last_error = None;
        inner.generation += 1;
        Ok(())
    }

    /// Support ticket for a payment taken without a recorded sale
    pub fn support_request(&self) -> Option<ContactRequest> {
        let inner = self.lock();
        let (payment_reference, reason) = match (&inner.state, &inner.unrecorded) {
            (
                CheckoutState::Failed {
                    error:
                        CheckoutError::SettlementAmbiguous {
                            payment_reference,
                            reason,
                        },
                },
                _,
            ) => (payment_reference, reason),
            (
                CheckoutState::Failed {
                    error: CheckoutError::SaleCreationRejected { reason },
                },
                Some(confirmation),
            ) => (&confirmation.reference, reason),
            _ => return None,
        };
        let total = inner.session.as_ref()?.total;
        Some(ContactRequest::settlement_ambiguous(
            payment_reference,
            total,
            reason,
        ))
    }

    /// Send the support ticket for the pending settlement
    #[instrument(skip(self))]
    pub async fn contact_support(&self) -> CheckoutResult<ContactRequest> {
        let contacts = self.contacts.clone().ok_or_else(|| {
            CheckoutError::Configuration("no contact service configured".to_string())
        })?;
        let request = self.support_request().ok_or(CheckoutError::InvalidTransition {
            state: self.state().name(),
            action: "contact support",
        })?;
        let credential = self
            .session()
            .map(|s| s.credential)
            .ok_or(CheckoutError::Unauthenticated)?;

        contacts
            .send(&credential, &request)
            .await
            .map_err(|e| CheckoutError::SupportUnavailable(e.to_string()))?;

        info!("Support ticket sent for pending settlement");
        Ok(request)
    }

    /// Clear a settlement-ambiguous failure, or drop a captured payment whose
    /// sale was refused, after support took over. The cart is left as it is.
    pub fn acknowledge_settlement(&self) -> CheckoutResult<()> {
        let mut inner = self.lock();
        if !inner.holds_payment() {
            return Err(CheckoutError::InvalidTransition {
                state: inner.state.name(),
                action: "acknowledge settlement",
            });
        }
        warn!("Settlement acknowledged, checkout unlocked");
        inner.state = CheckoutState::Idle;
        inner.session = None;
        inner.unrecorded = None;
        inner.generation += 1;
        Ok(())
    }
}

/// Same multiset of (id, quantity), ignoring order
fn same_entries(a: &[CartEntry], b: &[CartEntry]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a: Vec<_> = a.iter().map(|e| (&e.item_id, e.quantity)).collect();
    let mut b: Vec<_> = b.iter().map(|e| (&e.item_id, e.quantity)).collect();
    a.sort();
    b.sort();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::MemoryStorage;
    use crate::order::{PayerProfile, SaleRequest};
    use crate::product::{CatalogItem, Currency, ItemId, Price};
    use crate::services::{CatalogService, ProfileService, SaleService};
    use crate::support::ContactService;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct Catalog(HashMap<String, CatalogItem>);

    #[async_trait]
    impl CatalogService for Catalog {
        async fn lookup(&self, item_id: &ItemId) -> Result<CatalogItem, ServiceError> {
            self.0
                .get(item_id.as_str())
                .cloned()
                .ok_or_else(|| ServiceError::NotFound {
                    resource: item_id.to_string(),
                })
        }
    }

    #[derive(Default)]
    struct Profiles {
        failure: Mutex<Option<ServiceError>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProfileService for Profiles {
        async fn fetch_profile(&self, _: &BearerToken) -> Result<PayerProfile, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.failure.lock().unwrap().clone() {
                return Err(e);
            }
            Ok(PayerProfile {
                name: "Ana".into(),
                surname: "García".into(),
                address: "Calle Mayor 1".into(),
                postal_code: "28013".into(),
                email: "ana@example.com".into(),
            })
        }
    }

    #[derive(Default)]
    struct Sales {
        responses: Mutex<Vec<Result<String, ServiceError>>>,
        requests: Mutex<Vec<SaleRequest>>,
        gated: bool,
        entered: Notify,
        release: Notify,
    }

    impl Sales {
        fn respond(&self, response: Result<String, ServiceError>) {
            self.responses.lock().unwrap().push(response);
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SaleService for Sales {
        async fn create_sale(
            &self,
            _: &BearerToken,
            request: &SaleRequest,
        ) -> Result<String, ServiceError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.gated {
                self.entered.notify_one();
                self.release.notified().await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok("S100".to_string())
            } else {
                responses.remove(0)
            }
        }
    }

    struct Scripted {
        method: PaymentMethod,
        outcomes: Mutex<Vec<CheckoutResult<ConfirmationOutcome>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(method: PaymentMethod) -> Self {
            Self {
                method,
                outcomes: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn then(&self, outcome: CheckoutResult<ConfirmationOutcome>) {
            self.outcomes.lock().unwrap().push(outcome);
        }
    }

    #[async_trait]
    impl crate::strategy::PaymentConfirmer for Scripted {
        async fn confirm(&self, amount: &Price) -> CheckoutResult<ConfirmationOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                let reference = match self.method {
                    PaymentMethod::Card => "tok_1",
                    PaymentMethod::Wallet => "ORDER-1",
                };
                return Ok(ConfirmationOutcome::Confirmed(PaymentConfirmation::captured(
                    self.method,
                    reference,
                    *amount,
                )));
            }
            outcomes.remove(0)
        }

        fn method(&self) -> PaymentMethod {
            self.method
        }

        fn provider_name(&self) -> &'static str {
            "scripted"
        }
    }

    #[derive(Default)]
    struct Contacts {
        sent: Mutex<Vec<ContactRequest>>,
    }

    #[async_trait]
    impl ContactService for Contacts {
        async fn send(&self, _: &BearerToken, request: &ContactRequest) -> Result<(), ServiceError> {
            self.sent.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    struct Harness {
        storage: Arc<MemoryStorage>,
        cart: SharedCart,
        profiles: Arc<Profiles>,
        sales: Arc<Sales>,
        card: Arc<Scripted>,
        wallet: Arc<Scripted>,
        contacts: Arc<Contacts>,
        orch: CheckoutOrchestrator,
    }

    fn harness_with(sales: Sales) -> Harness {
        let mut items = HashMap::new();
        items.insert(
            "A".to_string(),
            CatalogItem::new("Box A", Price::from_cents(1000, Currency::EUR), "shop-1"),
        );
        items.insert(
            "B".to_string(),
            CatalogItem::new("Box B", Price::from_cents(500, Currency::EUR), "shop-2"),
        );
        items.insert(
            "HUGE".to_string(),
            CatalogItem::new("Box HUGE", Price::from_cents(i64::MAX, Currency::EUR), "shop-3"),
        );

        let storage = Arc::new(MemoryStorage::new());
        let cart = SharedCart::open(storage.clone()).unwrap();
        cart.add("A").unwrap();
        cart.add("A").unwrap();
        cart.add("B").unwrap();

        let profiles = Arc::new(Profiles::default());
        let sales = Arc::new(sales);
        let card = Arc::new(Scripted::new(PaymentMethod::Card));
        let wallet = Arc::new(Scripted::new(PaymentMethod::Wallet));
        let contacts = Arc::new(Contacts::default());

        let orch = CheckoutOrchestrator::new(
            cart.clone(),
            CartHydrator::new(Arc::new(Catalog(items)), Currency::EUR),
            profiles.clone(),
            sales.clone(),
            PaymentConfirmerSelector::new()
                .with_confirmer(card.clone())
                .with_confirmer(wallet.clone()),
        )
        .with_contact_service(contacts.clone());

        Harness {
            storage,
            cart,
            profiles,
            sales,
            card,
            wallet,
            contacts,
            orch,
        }
    }

    fn harness() -> Harness {
        harness_with(Sales::default())
    }

    fn token() -> Option<BearerToken> {
        Some(BearerToken::new("jwt"))
    }

    #[tokio::test]
    async fn test_card_checkout_records_sale_and_clears_cart() {
        let h = harness();

        let session = h.orch.begin(token()).await.unwrap();
        assert_eq!(session.total, Price::from_cents(2500, Currency::EUR));
        assert_eq!(h.orch.state(), CheckoutState::Ready);

        let sale = h.orch.pay(PaymentMethod::Card).await.unwrap();
        assert_eq!(sale.sale_id, "S100");
        assert_eq!(sale.payment_reference, "tok_1");

        let requests = h.sales.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].total_amount.amount, 2500);
        let lines: Vec<_> = requests[0]
            .lines
            .iter()
            .map(|l| (l.item_id.as_str().to_string(), l.quantity))
            .collect();
        assert_eq!(lines, vec![("A".to_string(), 2), ("B".to_string(), 1)]);
        assert_eq!(requests[0].payment.reference, "tok_1");
        assert_eq!(requests[0].payer.email, "ana@example.com");

        assert!(h.cart.snapshot().unwrap().is_empty());
        assert!(h.storage.persisted().is_empty());
        assert!(matches!(h.orch.state(), CheckoutState::Completed { ref sale } if sale.sale_id == "S100"));
        assert!(h.orch.session().is_none());
    }

    #[tokio::test]
    async fn test_wallet_cancel_returns_to_ready() {
        let h = harness();
        h.wallet.then(Ok(ConfirmationOutcome::Canceled));

        let session = h.orch.begin(token()).await.unwrap();
        let err = h.orch.pay(PaymentMethod::Wallet).await.unwrap_err();

        assert_eq!(err, CheckoutError::Canceled);
        assert_eq!(h.orch.state(), CheckoutState::Ready);
        assert_eq!(h.orch.session().unwrap().total, session.total);
        assert_eq!(h.cart.item_count().unwrap(), 3);
        assert_eq!(h.sales.calls(), 0);
        assert_eq!(h.orch.last_error(), Some(CheckoutError::Canceled));

        // same session, other method
        h.orch.pay(PaymentMethod::Card).await.unwrap();
        assert_eq!(h.sales.calls(), 1);
    }

    #[tokio::test]
    async fn test_decline_fails_and_allows_retry() {
        let h = harness();
        h.card.then(Ok(ConfirmationOutcome::Declined {
            reason: "insufficient funds".into(),
        }));

        h.orch.begin(token()).await.unwrap();
        let err = h.orch.pay(PaymentMethod::Card).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Declined { .. }));
        assert!(matches!(h.orch.state(), CheckoutState::Failed { .. }));
        assert_eq!(h.cart.item_count().unwrap(), 3);

        h.orch.pay(PaymentMethod::Card).await.unwrap();
        assert_eq!(h.card.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.sales.calls(), 1);
    }

    #[tokio::test]
    async fn test_reentrant_pay_is_rejected_while_submitting() {
        let h = harness_with(Sales {
            gated: true,
            ..Sales::default()
        });
        h.orch.begin(token()).await.unwrap();

        let orch = h.orch.clone();
        let first = tokio::spawn(async move { orch.pay(PaymentMethod::Card).await });
        h.sales.entered.notified().await;

        assert!(matches!(h.orch.state(), CheckoutState::Submitting { .. }));
        assert_eq!(
            h.orch.pay(PaymentMethod::Card).await,
            Err(CheckoutError::SubmissionInProgress)
        );
        assert!(matches!(
            h.orch.begin(token()).await,
            Err(CheckoutError::SubmissionInProgress)
        ));

        h.sales.release.notify_one();
        first.await.unwrap().unwrap();

        assert_eq!(h.sales.calls(), 1);
        assert_eq!(h.card.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sale_completes_after_view_goes_away() {
        let h = harness_with(Sales {
            gated: true,
            ..Sales::default()
        });
        h.orch.begin(token()).await.unwrap();

        let orch = h.orch.clone();
        let view = tokio::spawn(async move { orch.pay(PaymentMethod::Card).await });
        h.sales.entered.notified().await;

        view.abort();
        assert!(view.await.unwrap_err().is_cancelled());

        h.sales.release.notify_one();
        for _ in 0..100 {
            if matches!(h.orch.state(), CheckoutState::Completed { .. }) {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(matches!(h.orch.state(), CheckoutState::Completed { .. }));
        assert!(h.storage.persisted().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_sale_keeps_cart_and_resubmits_captured_payment() {
        let h = harness();
        h.sales.respond(Err(ServiceError::Rejected {
            status: 422,
            message: "total mismatch".into(),
        }));

        h.orch.begin(token()).await.unwrap();
        let err = h.orch.pay(PaymentMethod::Card).await.unwrap_err();

        assert!(matches!(err, CheckoutError::SaleCreationRejected { .. }));
        assert_eq!(h.cart.item_count().unwrap(), 3);
        assert_eq!(h.storage.persisted().len(), 2);

        // the card was charged, so the session cannot be thrown away quietly
        assert!(h.orch.support_request().unwrap().content().contains("tok_1"));
        assert_eq!(h.orch.leave(), Err(CheckoutError::SettlementLocked));
        assert!(matches!(
            h.orch.begin(token()).await,
            Err(CheckoutError::SettlementLocked)
        ));

        // the wallet is never asked: only the sale call is repeated
        let sale = h.orch.pay(PaymentMethod::Wallet).await.unwrap();
        assert_eq!(sale.sale_id, "S100");
        assert_eq!(sale.payment_reference, "tok_1");
        assert_eq!(h.card.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.wallet.calls.load(Ordering::SeqCst), 0);

        let requests = h.sales.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
        assert!(h.cart.snapshot().unwrap().is_empty());
        assert!(h.orch.support_request().is_none());
        assert!(h.orch.leave().is_ok());
    }

    #[tokio::test]
    async fn test_refused_captured_sale_can_be_handed_to_support() {
        let h = harness();
        h.sales.respond(Err(ServiceError::Rejected {
            status: 422,
            message: "payment reference refused".into(),
        }));

        h.orch.begin(token()).await.unwrap();
        h.orch.pay(PaymentMethod::Card).await.unwrap_err();

        let sent = h.orch.contact_support().await.unwrap();
        assert!(sent.content().contains("tok_1"));

        h.orch.acknowledge_settlement().unwrap();
        assert_eq!(h.orch.state(), CheckoutState::Idle);
        assert_eq!(h.cart.item_count().unwrap(), 3);

        // a new checkout charges again from scratch
        h.orch.begin(token()).await.unwrap();
        h.orch.pay(PaymentMethod::Card).await.unwrap();
        assert_eq!(h.card.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_leave_while_submitting_detaches_the_sale() {
        let h = harness_with(Sales {
            gated: true,
            ..Sales::default()
        });
        h.orch.begin(token()).await.unwrap();

        let payment = h.orch.start_payment(PaymentMethod::Card).unwrap();
        h.sales.entered.notified().await;

        h.orch.leave().unwrap();
        assert_eq!(h.orch.state(), CheckoutState::Idle);
        assert!(h.orch.session().is_none());

        // the sale in flight still excludes a second payment
        assert!(matches!(
            h.orch.begin(token()).await,
            Err(CheckoutError::SubmissionInProgress)
        ));

        h.sales.release.notify_one();
        assert_eq!(payment.await.unwrap().unwrap().sale_id, "S100");

        assert!(h.storage.persisted().is_empty());
        assert_eq!(h.orch.state(), CheckoutState::Idle);
        assert!(matches!(
            h.orch.begin(token()).await,
            Err(CheckoutError::EmptyCart)
        ));
        assert_eq!(h.sales.calls(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_sale_after_leave_is_reinstated() {
        let h = harness_with(Sales {
            gated: true,
            ..Sales::default()
        });
        h.sales.respond(Err(ServiceError::Timeout));
        h.orch.begin(token()).await.unwrap();

        let payment = h.orch.start_payment(PaymentMethod::Wallet).unwrap();
        h.sales.entered.notified().await;
        h.orch.leave().unwrap();

        h.sales.release.notify_one();
        assert!(matches!(
            payment.await.unwrap(),
            Err(CheckoutError::SettlementAmbiguous { .. })
        ));

        assert!(matches!(h.orch.state(), CheckoutState::Failed { ref error } if error.requires_support()));
        assert!(h.orch.support_request().unwrap().content().contains("ORDER-1"));
        assert_eq!(h.orch.leave(), Err(CheckoutError::SettlementLocked));
        assert_eq!(h.cart.item_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_server_fault_after_capture_is_settlement_ambiguous() {
        let h = harness();
        h.sales.respond(Err(ServiceError::Timeout));

        h.orch.begin(token()).await.unwrap();
        let err = h.orch.pay(PaymentMethod::Wallet).await.unwrap_err();

        assert!(matches!(
            err,
            CheckoutError::SettlementAmbiguous { ref payment_reference, .. } if payment_reference == "ORDER-1"
        ));
        assert_eq!(h.cart.item_count().unwrap(), 3);

        // no automatic or manual retry until support is involved
        assert_eq!(
            h.orch.pay(PaymentMethod::Card).await,
            Err(CheckoutError::SettlementLocked)
        );
        assert!(matches!(
            h.orch.begin(token()).await,
            Err(CheckoutError::SettlementLocked)
        ));
        assert_eq!(h.orch.leave(), Err(CheckoutError::SettlementLocked));
        assert_eq!(h.sales.calls(), 1);

        let sent = h.orch.contact_support().await.unwrap();
        assert_eq!(sent.recipient_type(), "admin");
        assert!(sent.content().contains("ORDER-1"));
        assert_eq!(h.contacts.sent.lock().unwrap().len(), 1);

        h.orch.acknowledge_settlement().unwrap();
        assert_eq!(h.orch.state(), CheckoutState::Idle);
        assert_eq!(h.cart.item_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_server_fault_without_capture_is_rejection() {
        let h = harness();
        h.card.then(Ok(ConfirmationOutcome::Confirmed(
            PaymentConfirmation::authorized(
                PaymentMethod::Card,
                "pi_auth",
                Price::from_cents(2500, Currency::EUR),
            ),
        )));
        h.sales.respond(Err(ServiceError::ServerFault {
            status: 500,
            message: "boom".into(),
        }));

        h.orch.begin(token()).await.unwrap();
        let err = h.orch.pay(PaymentMethod::Card).await.unwrap_err();
        assert!(matches!(err, CheckoutError::SaleCreationRejected { .. }));
        assert!(h.orch.support_request().is_none());

        // nothing was captured, so a retry goes through the provider again
        h.orch.pay(PaymentMethod::Card).await.unwrap();
        assert_eq!(h.card.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.sales.calls(), 2);
    }

    #[tokio::test]
    async fn test_adapter_settlement_error_locks_checkout() {
        let h = harness();
        h.wallet.then(Err(CheckoutError::SettlementAmbiguous {
            payment_reference: "ORDER-7".into(),
            reason: "capture timed out".into(),
        }));

        h.orch.begin(token()).await.unwrap();
        h.orch.pay(PaymentMethod::Wallet).await.unwrap_err();

        assert_eq!(h.sales.calls(), 0);
        assert_eq!(
            h.orch.pay(PaymentMethod::Card).await,
            Err(CheckoutError::SettlementLocked)
        );
        assert!(h.orch.support_request().is_some());
    }

    #[tokio::test]
    async fn test_begin_without_credential() {
        let h = harness();
        assert!(matches!(
            h.orch.begin(None).await,
            Err(CheckoutError::Unauthenticated)
        ));
        assert_eq!(h.profiles.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(h.orch.state(), CheckoutState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_begin_failures_are_reported_and_retryable() {
        let h = harness();

        *h.profiles.failure.lock().unwrap() = Some(ServiceError::Unauthenticated);
        assert!(matches!(
            h.orch.begin(token()).await,
            Err(CheckoutError::Unauthenticated)
        ));

        *h.profiles.failure.lock().unwrap() = Some(ServiceError::ServerFault {
            status: 503,
            message: "maintenance".into(),
        });
        assert!(matches!(
            h.orch.begin(token()).await,
            Err(CheckoutError::ProfileUnavailable(_))
        ));

        *h.profiles.failure.lock().unwrap() = None;
        assert!(h.orch.begin(token()).await.is_ok());
    }

    #[tokio::test]
    async fn test_begin_with_empty_or_unknown_cart() {
        let h = harness();
        h.cart.add("Z").unwrap();
        assert!(matches!(
            h.orch.begin(token()).await,
            Err(CheckoutError::CatalogUnavailable { ref item_id, .. }) if item_id == "Z"
        ));
        assert!(h.orch.session().is_none());

        h.cart.clear().unwrap();
        assert!(matches!(
            h.orch.begin(token()).await,
            Err(CheckoutError::EmptyCart)
        ));
    }

    #[tokio::test]
    async fn test_total_out_of_range_fails_begin() {
        let h = harness();
        h.cart.clear().unwrap();
        h.cart.add("HUGE").unwrap();
        h.cart.add("HUGE").unwrap();

        assert!(matches!(
            h.orch.begin(token()).await,
            Err(CheckoutError::CatalogUnavailable { ref item_id, .. }) if item_id == "HUGE"
        ));
        assert!(h.orch.session().is_none());
        assert_eq!(h.card.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cart_change_after_begin_discards_session() {
        let h = harness();
        h.orch.begin(token()).await.unwrap();

        h.cart.add("B").unwrap();
        assert_eq!(
            h.orch.pay(PaymentMethod::Card).await,
            Err(CheckoutError::CartChanged)
        );
        assert_eq!(h.orch.state(), CheckoutState::Idle);
        assert_eq!(h.card.calls.load(Ordering::SeqCst), 0);

        let session = h.orch.begin(token()).await.unwrap();
        assert_eq!(session.total.amount, 3000);
    }

    #[tokio::test]
    async fn test_pay_requires_ready_session() {
        let h = harness();
        assert!(matches!(
            h.orch.pay(PaymentMethod::Card).await,
            Err(CheckoutError::InvalidTransition { state: "idle", .. })
        ));

        h.orch.begin(token()).await.unwrap();
        h.orch.leave().unwrap();
        assert!(h.orch.session().is_none());
        assert!(matches!(
            h.orch.pay(PaymentMethod::Card).await,
            Err(CheckoutError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_same_entries_ignores_order() {
        let a = CartEntry::new(ItemId::parse("a").unwrap(), 1);
        let b = CartEntry::new(ItemId::parse("b").unwrap(), 2);
        assert!(same_entries(&[a.clone(), b.clone()], &[b.clone(), a.clone()]));
        assert!(!same_entries(&[a.clone()], &[a, b]));
    }
}
