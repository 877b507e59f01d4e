use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use warranty_core::{
    CollaboratorError, CollaboratorResult, CustomerDirectory, CustomerId, Money, ProductCatalog,
    ProductId, ProductInfo,
};

/// Product catalog backed by a map. Can be switched offline to exercise
/// dependency failures.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    products: RwLock<HashMap<ProductId, ProductInfo>>,
    offline: AtomicBool,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(self, product: ProductInfo) -> Self {
        self.products.write().insert(product.id, product);
        self
    }

    /// A product with plausible defaults, keyed by `id`.
    pub fn product(id: u64, name: &str, sku: &str) -> ProductInfo {
        ProductInfo {
            id: ProductId::new(id),
            name: name.to_string(),
            sku: sku.to_string(),
            brand: Some("Acme".to_string()),
            category: Some("Electronics".to_string()),
            description: None,
            base_price: Money::from_major(100),
            image_url: None,
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> CollaboratorResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("catalog", "offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductCatalog for StaticCatalog {
    async fn lookup_product(&self, id: ProductId) -> CollaboratorResult<Option<ProductInfo>> {
        self.check_online()?;
        Ok(self.products.read().get(&id).cloned())
    }

    async fn lookup_product_by_sku(&self, sku: &str) -> CollaboratorResult<Option<ProductInfo>> {
        self.check_online()?;
        Ok(self
            .products
            .read()
            .values()
            .find(|product| product.sku == sku)
            .cloned())
    }
}

/// Customer directory keyed by lowercase email.
#[derive(Debug, Default)]
pub struct StaticCustomers {
    by_email: RwLock<HashMap<String, CustomerId>>,
}

impl StaticCustomers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_customer(self, email: &str, id: CustomerId) -> Self {
        self.by_email.write().insert(email.to_ascii_lowercase(), id);
        self
    }
}

#[async_trait]
impl CustomerDirectory for StaticCustomers {
    async fn lookup_customer_by_email(&self, email: &str) -> CollaboratorResult<Option<CustomerId>> {
        Ok(self
            .by_email
            .read()
            .get(&email.to_ascii_lowercase())
            .copied())
    }
}
