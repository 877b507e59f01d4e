//! Narrow capabilities the warranty services consume from the rest of the
//! platform.

use crate::error::WarrantyError;
use crate::ids::{AttachmentId, CustomerId, ProductId};
use crate::money::Money;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },
    #[error("{service} rejected the request: {message}")]
    Rejected {
        service: &'static str,
        message: String,
    },
}

impl CollaboratorError {
    pub fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        CollaboratorError::Unavailable {
            service,
            message: message.into(),
        }
    }
}

impl From<CollaboratorError> for WarrantyError {
    fn from(err: CollaboratorError) -> Self {
        WarrantyError::DependencyFailure(err.to_string())
    }
}

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Read-model projection of a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub id: ProductId,
    pub name: String,
    pub sku: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub base_price: Money,
    pub image_url: Option<String>,
}

#[async_trait]
pub trait ProductCatalog: Send + Sync + 'static {
    async fn lookup_product(&self, id: ProductId) -> CollaboratorResult<Option<ProductInfo>>;

    async fn lookup_product_by_sku(&self, sku: &str) -> CollaboratorResult<Option<ProductInfo>>;
}

#[async_trait]
pub trait CustomerDirectory: Send + Sync + 'static {
    async fn lookup_customer_by_email(&self, email: &str) -> CollaboratorResult<Option<CustomerId>>;
}

/// Template variables for a notification.
pub type NotificationPayload = BTreeMap<&'static str, String>;

/// Fire-and-forget notification sink. Callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(
        &self,
        recipient: &str,
        template_id: &str,
        payload: NotificationPayload,
    ) -> CollaboratorResult<()>;
}

/// Hands stored payloads to the malware scanner. Verdicts come back later
/// through the attachment service.
#[async_trait]
pub trait AttachmentScanner: Send + Sync + 'static {
    async fn submit(&self, attachment_id: AttachmentId, storage_ref: &str) -> CollaboratorResult<()>;
}

/// A notifier that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _: &str, _: &str, _: NotificationPayload) -> CollaboratorResult<()> {
        Ok(())
    }
}
