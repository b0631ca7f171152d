//! # Checkout Error Types
//!
//! Typed error handling for the cart and checkout flow.
//! Cart and checkout operations return `Result<T, CheckoutError>`; the remote
//! collaborators report `ServiceError`, which the orchestrator classifies.

use thiserror::Error;

/// Core error type for cart and checkout operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckoutError {
    /// Checkout attempted with nothing in the cart
    #[error("Cart is empty")]
    EmptyCart,

    /// A catalog lookup failed or timed out during hydration
    #[error("Catalog unavailable for item {item_id}: {reason}")]
    CatalogUnavailable { item_id: String, reason: String },

    /// Payer profile could not be fetched
    #[error("Profile unavailable: {0}")]
    ProfileUnavailable(String),

    /// No bearer credential, or the credential was refused
    #[error("Not authenticated")]
    Unauthenticated,

    /// Payment provider declined the charge
    #[error("Payment declined: {reason}")]
    Declined { reason: String },

    /// Payer canceled the provider flow
    #[error("Payment canceled")]
    Canceled,

    /// Sale ledger validated and refused the sale
    #[error("Sale creation rejected: {reason}")]
    SaleCreationRejected { reason: String },

    /// Payment may be captured but the sale was not recorded
    #[error(
        "Payment {payment_reference} may have been captured but the sale was not recorded ({reason}); contact support"
    )]
    SettlementAmbiguous {
        payment_reference: String,
        reason: String,
    },

    /// Cart was edited after the checkout session was hydrated
    #[error("Cart changed since checkout started")]
    CartChanged,

    /// A payment or sale submission is already in flight
    #[error("A payment is already in progress for this checkout")]
    SubmissionInProgress,

    /// Operation not allowed in the current checkout state
    #[error("Cannot {action} while checkout is {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },

    /// A settlement-ambiguous failure has not been acknowledged yet
    #[error("Checkout is locked until the pending settlement is resolved with support")]
    SettlementLocked,

    /// No adapter registered for the requested payment method
    #[error("Payment method not available: {0}")]
    MethodUnavailable(String),

    /// Support contact request could not be delivered
    #[error("Support unavailable: {0}")]
    SupportUnavailable(String),

    /// Durable cart storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckoutError {
    /// Returns true if the user may retry the same action right away
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckoutError::CatalogUnavailable { .. }
                | CheckoutError::ProfileUnavailable(_)
                | CheckoutError::Declined { .. }
                | CheckoutError::Canceled
                | CheckoutError::SaleCreationRejected { .. }
        )
    }

    /// Returns true if this failure needs support intervention before any retry
    pub fn requires_support(&self) -> bool {
        matches!(self, CheckoutError::SettlementAmbiguous { .. })
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CheckoutError::EmptyCart => 400,
            CheckoutError::CatalogUnavailable { .. } => 502,
            CheckoutError::ProfileUnavailable(_) => 502,
            CheckoutError::Unauthenticated => 401,
            CheckoutError::Declined { .. } => 402,
            CheckoutError::Canceled => 409,
            CheckoutError::SaleCreationRejected { .. } => 422,
            CheckoutError::SettlementAmbiguous { .. } => 502,
            CheckoutError::CartChanged => 409,
            CheckoutError::SubmissionInProgress => 409,
            CheckoutError::InvalidTransition { .. } => 409,
            CheckoutError::SettlementLocked => 423,
            CheckoutError::MethodUnavailable(_) => 400,
            CheckoutError::SupportUnavailable(_) => 502,
            CheckoutError::Storage(_) => 500,
            CheckoutError::Configuration(_) => 500,
            CheckoutError::Internal(_) => 500,
        }
    }
}

/// Result type alias for cart and checkout operations
pub type CheckoutResult<T> = Result<T, CheckoutError>;

/// Errors reported by the remote collaborators (catalog, profile, sale ledger)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Requested resource does not exist
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// Bearer credential missing or refused
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Request validated and refused (4xx other than auth/not-found)
    #[error("Rejected [{status}]: {message}")]
    Rejected { status: u16, message: String },

    /// Service failed while handling the request (5xx)
    #[error("Server fault [{status}]: {message}")]
    ServerFault { status: u16, message: String },

    /// Request never completed (connection, DNS, TLS)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request exceeded its deadline
    #[error("Timed out")]
    Timeout,

    /// Response body could not be parsed
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// True when the request may have been applied remotely even though no
    /// success response was observed
    pub fn outcome_unknown(&self) -> bool {
        matches!(
            self,
            ServiceError::ServerFault { .. }
                | ServiceError::Transport(_)
                | ServiceError::Timeout
                | ServiceError::Malformed(_)
        )
    }
}
