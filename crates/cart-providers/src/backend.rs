//! # Storefront Backend Client
//!
//! HTTP implementation of the catalog, profile, sale ledger and contact
//! contracts against the storefront backend.

use crate::config::BackendConfig;
use async_trait::async_trait;
use cart_core::{
    BearerToken, CatalogItem, CatalogService, CheckoutError, CheckoutResult, ContactRequest,
    ContactService, ItemId, PayerProfile, PaymentMethod, Price, ProfileService, SaleRequest,
    SaleService, ServiceError,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

/// Client for the storefront backend
#[derive(Clone)]
pub struct BackendClient {
    config: BackendConfig,
    client: Client,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> CheckoutResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CheckoutError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> CheckoutResult<Self> {
        Self::new(BackendConfig::from_env()?)
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Send a request and decode a JSON success body
    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ServiceError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            error!("Unexpected backend response: {}", body);
            ServiceError::Malformed(e.to_string())
        })
    }
}

/// Map a failed request to `Timeout` or `Transport`
pub(crate) fn transport_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout
    } else {
        ServiceError::Transport(e.to_string())
    }
}

/// Map a non-success status to the service error taxonomy
pub(crate) fn status_error(status: StatusCode, body: &str) -> ServiceError {
    let message = error_message(body);
    match status {
        StatusCode::UNAUTHORIZED => ServiceError::Unauthenticated,
        StatusCode::NOT_FOUND => ServiceError::NotFound { resource: message },
        s if s.is_server_error() => ServiceError::ServerFault {
            status: s.as_u16(),
            message,
        },
        s => ServiceError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

/// Pull a human readable message out of an error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["error", "msg", "message"]
                .iter()
                .find_map(|k| v.get(k).and_then(Value::as_str).map(String::from))
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Backend ids arrive as numbers or strings
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Prices arrive as numbers or numeric strings
fn decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("price out of range")),
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected a price, got {}",
            other
        ))),
    }
}

/// Numeric ids go back out as numbers
fn id_value(id: &ItemId) -> Value {
    id.as_str()
        .parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(id.as_str()))
}

// =============================================================================
// Backend Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct MysteryBoxResponse {
    name: String,
    #[serde(deserialize_with = "decimal")]
    price: f64,
    #[serde(deserialize_with = "string_or_number")]
    shop_id: String,
    #[serde(default)]
    shop_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct SaleItemBody {
    mystery_box_id: Value,
    quantity: u32,
}

#[derive(Debug, Serialize)]
struct CreateSaleBody<'a> {
    total_amount: f64,
    items: Vec<SaleItemBody>,
    payment_method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stripe_payment_intent_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    paypal_order_id: Option<&'a str>,
    user_data: &'a PayerProfile,
}

impl<'a> CreateSaleBody<'a> {
    fn from_request(request: &'a SaleRequest) -> Self {
        let reference = request.payment.reference.as_str();
        let (payment_method, stripe, paypal) = match request.payment.method {
            PaymentMethod::Card => ("stripe", Some(reference), None),
            PaymentMethod::Wallet => ("paypal", None, Some(reference)),
        };

        Self {
            total_amount: request.total_amount.as_decimal(),
            items: request
                .lines
                .iter()
                .map(|line| SaleItemBody {
                    mystery_box_id: id_value(&line.item_id),
                    quantity: line.quantity,
                })
                .collect(),
            payment_method,
            stripe_payment_intent_id: stripe,
            paypal_order_id: paypal,
            user_data: &request.payer,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateSaleResponse {
    #[serde(deserialize_with = "string_or_number")]
    sale_id: String,
}

#[derive(Debug, Serialize)]
struct NotificationBody<'a> {
    recipient_type: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a str,
    extra_data: Value,
}

impl<'a> NotificationBody<'a> {
    fn from_request(request: &'a ContactRequest) -> Self {
        let extra_data = match request {
            ContactRequest::Support(ticket) => json!({
                "subject_affair": ticket.subject,
                "payment_reference": ticket.payment_reference,
                "amount": ticket.amount.map(|a| a.as_decimal()),
                "currency": ticket.amount.map(|a| a.currency.as_str()),
            }),
            ContactRequest::Shop(message) => json!({ "shop_id": message.shop_id }),
            ContactRequest::User(message) => json!({ "user_id": message.user_id }),
        };

        Self {
            recipient_type: request.recipient_type(),
            kind: request.kind(),
            content: request.content(),
            extra_data,
        }
    }
}

// =============================================================================
// Contract Implementations
// =============================================================================

#[async_trait]
impl CatalogService for BackendClient {
    #[instrument(skip(self), fields(item_id = %item_id))]
    async fn lookup(&self, item_id: &ItemId) -> Result<CatalogItem, ServiceError> {
        let url = self.config.url(&format!("/shops/mystery-box/{}", item_id));
        let body: MysteryBoxResponse = self.execute(self.client.get(&url)).await?;

        let unit_price = Price::from_decimal(body.price, self.config.currency)
            .ok_or_else(|| ServiceError::Malformed(format!("invalid price {}", body.price)))?;

        debug!("Catalog item {}: {} at {}", item_id, body.name, unit_price.display());

        let item = CatalogItem::new(body.name, unit_price, body.shop_id);
        Ok(match body.shop_name {
            Some(shop_name) => item.with_shop_name(shop_name),
            None => item,
        })
    }
}

#[async_trait]
impl ProfileService for BackendClient {
    #[instrument(skip_all)]
    async fn fetch_profile(&self, credential: &BearerToken) -> Result<PayerProfile, ServiceError> {
        let url = self.config.url("/users/profile");
        self.execute(
            self.client
                .get(&url)
                .header("Authorization", credential.header_value()),
        )
        .await
    }
}

#[async_trait]
impl SaleService for BackendClient {
    #[instrument(skip_all, fields(method = %request.payment.method))]
    async fn create_sale(
        &self,
        credential: &BearerToken,
        request: &SaleRequest,
    ) -> Result<String, ServiceError> {
        let url = self.config.url("/sales/create");
        let body = CreateSaleBody::from_request(request);

        let response: CreateSaleResponse = self
            .execute(
                self.client
                    .post(&url)
                    .header("Authorization", credential.header_value())
                    .json(&body),
            )
            .await
            .map_err(|e| {
                warn!("Sale creation failed: {}", e);
                e
            })?;

        info!("Backend recorded sale {}", response.sale_id);
        Ok(response.sale_id)
    }
}

#[async_trait]
impl ContactService for BackendClient {
    #[instrument(skip_all, fields(recipient = request.recipient_type()))]
    async fn send(&self, credential: &BearerToken, request: &ContactRequest) -> Result<(), ServiceError> {
        let url = self.config.url("/notifications/create");
        let _: Value = self
            .execute(
                self.client
                    .post(&url)
                    .header("Authorization", credential.header_value())
                    .json(&NotificationBody::from_request(request)),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cart_core::{Currency, PaymentReference, SaleLine};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> BackendClient {
        BackendClient::new(BackendConfig::new(server.uri())).unwrap()
    }

    fn sale_request(method: PaymentMethod, reference: &str) -> SaleRequest {
        SaleRequest {
            total_amount: Price::from_cents(2500, Currency::EUR),
            lines: vec![
                SaleLine {
                    item_id: ItemId::parse("7").unwrap(),
                    quantity: 2,
                },
                SaleLine {
                    item_id: ItemId::parse("9").unwrap(),
                    quantity: 1,
                },
            ],
            payment: PaymentReference {
                method,
                reference: reference.to_string(),
            },
            payer: PayerProfile {
                name: "Ana".into(),
                email: "ana@example.com".into(),
                ..PayerProfile::default()
            },
        }
    }

    #[tokio::test]
    async fn test_lookup_parses_mystery_box() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shops/mystery-box/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 7,
                "name": "Retro Gaming Box",
                "price": 19.99,
                "shop_id": 3,
                "shop_name": "Pixel Shop",
                "description": "ignored"
            })))
            .mount(&server)
            .await;

        let item = client(&server)
            .lookup(&ItemId::parse("7").unwrap())
            .await
            .unwrap();

        assert_eq!(item.name, "Retro Gaming Box");
        assert_eq!(item.unit_price, Price::from_cents(1999, Currency::EUR));
        assert_eq!(item.shop_id, "3");
        assert_eq!(item.shop_name.as_deref(), Some("Pixel Shop"));
    }

    #[tokio::test]
    async fn test_lookup_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shops/mystery-box/404"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"error": "Mystery box not found"})),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .lookup(&ItemId::parse("404").unwrap())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::NotFound {
                resource: "Mystery box not found".into()
            }
        );
    }

    #[tokio::test]
    async fn test_profile_requires_valid_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/profile"))
            .and(header("Authorization", "Bearer good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Ana",
                "surname": "García",
                "address": "Calle Mayor 1",
                "postal_code": "28013",
                "email": "ana@example.com"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/profile"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"msg": "Token has expired"})))
            .mount(&server)
            .await;

        let backend = client(&server);
        let profile = backend
            .fetch_profile(&BearerToken::new("good"))
            .await
            .unwrap();
        assert_eq!(profile.postal_code, "28013");

        assert_eq!(
            backend.fetch_profile(&BearerToken::new("stale")).await,
            Err(ServiceError::Unauthenticated)
        );
    }

    #[tokio::test]
    async fn test_create_sale_card_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sales/create"))
            .and(header("Authorization", "Bearer jwt"))
            .and(body_partial_json(json!({
                "total_amount": 25.0,
                "items": [
                    {"mystery_box_id": 7, "quantity": 2},
                    {"mystery_box_id": 9, "quantity": 1}
                ],
                "payment_method": "stripe",
                "stripe_payment_intent_id": "pi_123",
                "user_data": {"email": "ana@example.com"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sale_id": 100})))
            .expect(1)
            .mount(&server)
            .await;

        let sale_id = client(&server)
            .create_sale(&BearerToken::new("jwt"), &sale_request(PaymentMethod::Card, "pi_123"))
            .await
            .unwrap();
        assert_eq!(sale_id, "100");
    }

    #[tokio::test]
    async fn test_create_sale_error_classification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sales/create"))
            .and(body_partial_json(json!({"paypal_order_id": "BAD"})))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({"error": "order already used"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sales/create"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&server)
            .await;

        let backend = client(&server);
        let token = BearerToken::new("jwt");

        let rejected = backend
            .create_sale(&token, &sale_request(PaymentMethod::Wallet, "BAD"))
            .await
            .unwrap_err();
        assert_eq!(
            rejected,
            ServiceError::Rejected {
                status: 409,
                message: "order already used".into()
            }
        );
        assert!(!rejected.outcome_unknown());

        let fault = backend
            .create_sale(&token, &sale_request(PaymentMethod::Wallet, "ORDER-1"))
            .await
            .unwrap_err();
        assert!(fault.outcome_unknown());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let backend = BackendClient::new(BackendConfig::new("http://127.0.0.1:1")).unwrap();
        let err = backend
            .fetch_profile(&BearerToken::new("jwt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)));
    }

    #[tokio::test]
    async fn test_support_notification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notifications/create"))
            .and(body_partial_json(json!({
                "recipient_type": "admin",
                "type": "contact_support",
                "extra_data": {"payment_reference": "ORDER-1", "amount": 25.0}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"msg": "created"})))
            .expect(1)
            .mount(&server)
            .await;

        let request = ContactRequest::settlement_ambiguous(
            "ORDER-1",
            Price::from_cents(2500, Currency::EUR),
            "timed out",
        );
        client(&server)
            .send(&BearerToken::new("jwt"), &request)
            .await
            .unwrap();
    }
}
