//! # Remote Service Contracts
//!
//! The storefront backend is consumed through three narrow traits, one per
//! collaborator. `cart-providers` implements them over HTTP; tests implement
//! them in memory.

use crate::error::ServiceError;
use crate::order::{PayerProfile, SaleRequest};
use crate::product::{CatalogItem, ItemId};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Opaque bearer credential issued by the authentication flow
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Parse an `Authorization` header value (`Bearer <token>`), or a bare
    /// token. Blank input yields `None`.
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        let token = match value.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
            None if value.eq_ignore_ascii_case("bearer") => "",
            _ => value,
        };
        (!token.is_empty()).then(|| Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Header value for outgoing requests
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

/// Catalog lookup by item id
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Fetch one mystery box; `ServiceError::NotFound` when it does not exist
    async fn lookup(&self, item_id: &ItemId) -> Result<CatalogItem, ServiceError>;
}

/// Profile fetch for the authenticated user
#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn fetch_profile(&self, credential: &BearerToken) -> Result<PayerProfile, ServiceError>;
}

/// Sale ledger
#[async_trait]
pub trait SaleService: Send + Sync {
    /// Commit a purchase and return its sale id
    async fn create_sale(
        &self,
        credential: &BearerToken,
        request: &SaleRequest,
    ) -> Result<String, ServiceError>;
}

pub type BoxedCatalogService = Arc<dyn CatalogService>;
pub type BoxedProfileService = Arc<dyn ProfileService>;
pub type BoxedSaleService = Arc<dyn SaleService>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_from_header() {
        assert_eq!(
            BearerToken::from_header("Bearer abc.def").unwrap().as_str(),
            "abc.def"
        );
        assert_eq!(BearerToken::from_header("abc").unwrap().as_str(), "abc");
        assert!(BearerToken::from_header("Bearer   ").is_none());
        assert!(BearerToken::from_header("").is_none());
    }

    #[test]
    fn test_bearer_debug_is_redacted() {
        let token = BearerToken::new("secret-jwt");
        assert!(!format!("{token:?}").contains("secret"));
        assert_eq!(token.header_value(), "Bearer secret-jwt");
    }
}
