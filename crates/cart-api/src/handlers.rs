//! # Request Handlers
//!
//! Axum request handlers for the storefront cart and checkout.

use crate::interaction::PendingInteraction;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use cart_core::{
    BearerToken, CartEntry, CheckoutError, CheckoutSession, CheckoutState, ContactRequest,
    PaymentMethod, SaleRecord,
};
use cart_providers::{ApprovalOutcome, CardFormOutcome};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Cart snapshot
#[derive(Debug, Serialize, Deserialize)]
pub struct CartResponse {
    pub items: Vec<CartEntry>,
    pub item_count: u32,
}

/// Checkout view for the storefront UI
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// State name (`idle`, `loading`, `ready`, ...)
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<CheckoutSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<PaymentMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sale: Option<SaleRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
    /// Card form or wallet approval waiting on the payer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingInteraction>,
    pub methods: Vec<PaymentMethod>,
}

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    pub method: PaymentMethod,
}

/// Hosted card form result
#[derive(Debug, Deserialize)]
pub struct CardFormRequest {
    #[serde(default)]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    pub canceled: bool,
}

/// Wallet approval result
#[derive(Debug, Deserialize)]
pub struct WalletApprovalRequest {
    pub approved: bool,
}

#[derive(Debug, Serialize)]
pub struct SupportResponse {
    pub sent: ContactRequest,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl From<&CheckoutError> for ErrorResponse {
    fn from(err: &CheckoutError) -> Self {
        let response = ErrorResponse::new(err.to_string(), err.status_code());
        match err {
            CheckoutError::SettlementAmbiguous {
                payment_reference, ..
            } => response.with_details(format!("payment_reference={}", payment_reference)),
            e if e.is_retryable() => response.with_details("retryable"),
            _ => response,
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn checkout_error_to_response(err: CheckoutError) -> ApiError {
    let response = ErrorResponse::from(&err);
    (
        StatusCode::from_u16(response.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response),
    )
}

fn cart_response(state: &AppState) -> Result<Json<CartResponse>, ApiError> {
    let items = state.cart.snapshot().map_err(checkout_error_to_response)?;
    let item_count = items.iter().map(|e| e.quantity).sum();
    Ok(Json(CartResponse { items, item_count }))
}

fn checkout_response(state: &AppState) -> CheckoutResponse {
    let current = state.checkout.state();
    let (method, sale, error) = match &current {
        CheckoutState::AwaitingPayment { method } | CheckoutState::Submitting { method } => {
            (Some(*method), None, None)
        }
        CheckoutState::Completed { sale } => (None, Some(sale.clone()), None),
        CheckoutState::Failed { error } => (None, None, Some(ErrorResponse::from(error))),
        _ => (
            None,
            None,
            state.checkout.last_error().as_ref().map(ErrorResponse::from),
        ),
    };

    CheckoutResponse {
        state: current.name(),
        session: state.checkout.session(),
        method,
        sale,
        error,
        pending: state.interactions.pending(),
        methods: state.checkout.methods(),
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "mystery-cart",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn get_cart(State(state): State<AppState>) -> Result<Json<CartResponse>, ApiError> {
    cart_response(&state)
}

#[instrument(skip(state))]
pub async fn add_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    state
        .cart
        .add(&item_id)
        .map_err(checkout_error_to_response)?;
    cart_response(&state)
}

#[instrument(skip(state))]
pub async fn decrease_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    state
        .cart
        .decrease(&item_id)
        .map_err(checkout_error_to_response)?;
    cart_response(&state)
}

#[instrument(skip(state))]
pub async fn remove_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    state
        .cart
        .remove(&item_id)
        .map_err(checkout_error_to_response)?;
    cart_response(&state)
}

/// Enter checkout with the caller's bearer credential
#[instrument(skip_all)]
pub async fn begin_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let credential = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(BearerToken::from_header);

    state
        .checkout
        .begin(credential)
        .await
        .map_err(checkout_error_to_response)?;

    Ok(Json(checkout_response(&state)))
}

pub async fn get_checkout(State(state): State<AppState>) -> Json<CheckoutResponse> {
    Json(checkout_response(&state))
}

pub async fn leave_checkout(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.checkout.leave().map_err(checkout_error_to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start a payment; progress is polled through `GET /api/v1/checkout`
#[instrument(skip(state, request), fields(method = %request.method))]
pub async fn pay(
    State(state): State<AppState>,
    Json(request): Json<PayRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let payment = state
        .checkout
        .start_payment(request.method)
        .map_err(checkout_error_to_response)?;

    tokio::spawn(async move {
        match payment.await {
            Ok(Ok(sale)) => info!("Checkout completed with sale {}", sale.sale_id),
            Ok(Err(e)) => warn!("Checkout payment ended: {}", e),
            Err(e) => error!("Payment task failed: {}", e),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(checkout_response(&state))))
}

/// Result of the hosted card form
#[instrument(skip_all)]
pub async fn submit_card(
    State(state): State<AppState>,
    Json(request): Json<CardFormRequest>,
) -> Result<StatusCode, ApiError> {
    let outcome = match (request.canceled, request.payment_method_id) {
        (true, _) => CardFormOutcome::Canceled,
        (false, Some(id)) if !id.trim().is_empty() => CardFormOutcome::Tokenized {
            payment_method_id: id.trim().to_string(),
        },
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    "Provide payment_method_id or canceled: true",
                    400,
                )),
            ))
        }
    };

    state.interactions.submit_card(outcome).map_err(|_| {
        (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("No card form is waiting for input", 409)),
        )
    })?;

    Ok(StatusCode::ACCEPTED)
}

/// Result of the wallet approval
#[instrument(skip_all, fields(approved = request.approved))]
pub async fn submit_wallet(
    State(state): State<AppState>,
    Json(request): Json<WalletApprovalRequest>,
) -> Result<StatusCode, ApiError> {
    let outcome = if request.approved {
        ApprovalOutcome::Approved
    } else {
        ApprovalOutcome::Canceled
    };

    state.interactions.submit_wallet(outcome).map_err(|_| {
        (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("No wallet approval is pending", 409)),
        )
    })?;

    Ok(StatusCode::ACCEPTED)
}

pub async fn acknowledge_settlement(
    State(state): State<AppState>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    state
        .checkout
        .acknowledge_settlement()
        .map_err(checkout_error_to_response)?;
    Ok(Json(checkout_response(&state)))
}

#[instrument(skip_all)]
pub async fn contact_support(
    State(state): State<AppState>,
) -> Result<Json<SupportResponse>, ApiError> {
    let sent = state
        .checkout
        .contact_support()
        .await
        .map_err(checkout_error_to_response)?;
    Ok(Json(SupportResponse { sent }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response() {
        let err = ErrorResponse::new("Test error", 400);
        assert_eq!(err.error, "Test error");
        assert_eq!(err.code, 400);
    }

    #[test]
    fn test_checkout_error_conversion() {
        let (status, Json(body)) = checkout_error_to_response(CheckoutError::SettlementAmbiguous {
            payment_reference: "ORDER-1".into(),
            reason: "timed out".into(),
        });
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.details.as_deref(), Some("payment_reference=ORDER-1"));

        let (status, Json(body)) = checkout_error_to_response(CheckoutError::EmptyCart);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.details.is_none());
    }
}
