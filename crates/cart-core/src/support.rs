//! # Contact Requests
//!
//! Messages the storefront can send to support, a shop, or another user.
//! Checkout only ever raises the support variant, for payments that may have
//! been captured without a recorded sale.

use crate::error::ServiceError;
use crate::product::Price;
use crate::services::BearerToken;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A contact request, tagged by recipient kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ContactRequest {
    Support(SupportTicket),
    Shop(ShopMessage),
    User(UserMessage),
}

/// Ticket for the storefront support team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportTicket {
    pub subject: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Price>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopMessage {
    pub shop_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub user_id: String,
    pub message: String,
}

impl ContactRequest {
    /// Recipient kind as the notification service names it
    pub fn recipient_type(&self) -> &'static str {
        match self {
            ContactRequest::Support(_) => "admin",
            ContactRequest::Shop(_) => "shop",
            ContactRequest::User(_) => "user",
        }
    }

    /// Notification type tag
    pub fn kind(&self) -> &'static str {
        match self {
            ContactRequest::Support(_) => "contact_support",
            ContactRequest::Shop(_) => "contact_shop",
            ContactRequest::User(_) => "contact_user",
        }
    }

    /// Human readable body
    pub fn content(&self) -> &str {
        match self {
            ContactRequest::Support(t) => &t.message,
            ContactRequest::Shop(m) => &m.message,
            ContactRequest::User(m) => &m.message,
        }
    }

    /// Support ticket for a payment that was captured but not recorded as a sale
    pub fn settlement_ambiguous(payment_reference: &str, amount: Price, reason: &str) -> Self {
        ContactRequest::Support(SupportTicket {
            subject: "Payment captured without a recorded sale".to_string(),
            message: format!(
                "A payment of {} (reference {}) may have been captured, but the sale could not be confirmed: {}. Please reconcile before the customer retries.",
                amount.display(),
                payment_reference,
                reason
            ),
            payment_reference: Some(payment_reference.to_string()),
            amount: Some(amount),
        })
    }
}

/// Delivery of contact requests
#[async_trait]
pub trait ContactService: Send + Sync {
    async fn send(
        &self,
        credential: &BearerToken,
        request: &ContactRequest,
    ) -> Result<(), ServiceError>;
}

pub type BoxedContactService = Arc<dyn ContactService>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::Currency;

    #[test]
    fn test_tagged_serialization() {
        let request = ContactRequest::Shop(ShopMessage {
            shop_id: "12".into(),
            message: "Is the summer box back?".into(),
        });
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["type"], "shop");
        assert_eq!(json["payload"]["shop_id"], "12");
        assert_eq!(request.recipient_type(), "shop");

        let back: ContactRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_settlement_ticket() {
        let ticket = ContactRequest::settlement_ambiguous(
            "ORDER-9",
            Price::from_cents(2500, Currency::EUR),
            "timed out",
        );

        assert_eq!(ticket.recipient_type(), "admin");
        assert_eq!(ticket.kind(), "contact_support");
        assert!(ticket.content().contains("€25.00"));
        assert!(ticket.content().contains("ORDER-9"));
    }
}
