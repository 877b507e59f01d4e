use crate::cache::BarcodeCache;
use crate::coverage::{Coverage, CoverageDecision, CoveragePolicy, StandardCoveragePolicy};
use crate::settings::ValidatorSettings;
use jiff::civil::Date;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use typed_builder::TypedBuilder;
use warranty_core::deadline::within;
use warranty_core::{
    BarcodeCode, BarcodeFilter, BarcodeReader, BarcodeStatus, Clock, CustomerDirectory,
    IssueCategory, Money, Page, ProductCatalog, ProductInfo, Result, Violations, WarrantyBarcode,
    WarrantyError, WarrantyWindow,
};

/// Outcome of a public validation, as shown to storefront visitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Genuine, but nobody has registered it yet.
    Generated,
    Active,
    Claimed,
    Expired,
    /// Unknown, revoked or malformed. The three are indistinguishable.
    NotFound,
    ProductMismatch,
    Unavailable,
}

impl ValidationStatus {
    fn message(self) -> &'static str {
        match self {
            ValidationStatus::Generated => "Genuine product; the warranty has not been registered yet",
            ValidationStatus::Active => "Warranty is active",
            ValidationStatus::Claimed => "Warranty has already been used for a replacement",
            ValidationStatus::Expired => "Warranty has expired",
            ValidationStatus::NotFound => "Barcode not recognized",
            ValidationStatus::ProductMismatch => "Barcode does not belong to this product",
            ValidationStatus::Unavailable => "Validation is temporarily unavailable, please retry",
        }
    }

    /// Only a registered, live warranty validates.
    fn is_valid(self) -> bool {
        self == ValidationStatus::Active
    }
}

impl From<BarcodeStatus> for ValidationStatus {
    fn from(status: BarcodeStatus) -> Self {
        match status {
            BarcodeStatus::Generated => ValidationStatus::Generated,
            BarcodeStatus::Active => ValidationStatus::Active,
            BarcodeStatus::Claimed => ValidationStatus::Claimed,
            BarcodeStatus::Expired => ValidationStatus::Expired,
            BarcodeStatus::Revoked => ValidationStatus::NotFound,
        }
    }
}

/// Catalog fields safe to show publicly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSummary {
    pub name: String,
    pub sku: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
}

impl From<&ProductInfo> for ProductSummary {
    fn from(product: &ProductInfo) -> Self {
        Self {
            name: product.name.clone(),
            sku: product.sku.clone(),
            brand: product.brand.clone(),
            category: product.category.clone(),
            image_url: product.image_url.clone(),
        }
    }
}

/// Carries no customer or purchase fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResponse {
    pub valid: bool,
    /// The barcode as submitted.
    pub barcode: String,
    pub status: ValidationStatus,
    pub message: &'static str,
    pub product: Option<ProductSummary>,
    pub warranty: Option<WarrantyWindow>,
    pub coverage: Option<Coverage>,
}

impl ValidationResponse {
    fn bare(barcode: &str, status: ValidationStatus) -> Self {
        Self {
            valid: false,
            barcode: barcode.to_string(),
            status,
            message: status.message(),
            product: None,
            warranty: None,
            coverage: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductLookup {
    pub sku: String,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub purchase_date: Option<Date>,
    /// Restricts results to warranties registered by this customer.
    #[serde(default)]
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarrantySummary {
    pub barcode: BarcodeCode,
    pub product: ProductSummary,
    pub warranty: WarrantyWindow,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoverageCheck {
    pub barcode: String,
    pub issue_type: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageResponse {
    pub covered: bool,
    pub status: CoverageDecision,
    pub estimated_cost: Money,
    pub coverage: Coverage,
    pub recommendations: Vec<String>,
    pub next_steps: Vec<String>,
}

/// Read-only warranty answers for anonymous storefront visitors.
#[derive(TypedBuilder)]
pub struct ValidatorService<S> {
    store: Arc<S>,
    catalog: Arc<dyn ProductCatalog>,
    customers: Arc<dyn CustomerDirectory>,
    clock: Arc<dyn Clock>,
    #[builder(default = Arc::new(StandardCoveragePolicy::default()))]
    policy: Arc<dyn CoveragePolicy>,
    #[builder(default)]
    settings: ValidatorSettings,
    #[builder(default = BarcodeCache::new(settings.cache_capacity, settings.cache_ttl))]
    cache: BarcodeCache,
}

impl<S: BarcodeReader> ValidatorService<S> {
    /// Resolves a code to a publicly visible barcode. Malformed codes, codes
    /// with a foreign prefix and revoked barcodes all read as absent.
    async fn find(&self, input: &str) -> Result<Option<WarrantyBarcode>> {
        let Ok(code) = BarcodeCode::parse(input.trim()) else {
            return Ok(None);
        };
        if !self.settings.accepts_prefix(code.prefix()) {
            return Ok(None);
        }
        let store = self.store.clone();
        let key = code.clone();
        let barcode = self
            .cache
            .get_or_compute(&code, || async move { Ok(store.get_by_code(&key).await?) })
            .await?;
        Ok(barcode.filter(|b| b.status != BarcodeStatus::Revoked))
    }

    /// Drops a cached barcode after a write elsewhere changed it.
    pub async fn forget(&self, code: &BarcodeCode) {
        self.cache.invalidate(code).await;
    }

    #[instrument(skip(self))]
    pub async fn validate(&self, barcode: &str, sku: Option<&str>) -> ValidationResponse {
        let outcome = within(self.settings.request_timeout, "validator.validate", async {
            let Some(found) = self.find(barcode).await? else {
                return Ok(ValidationResponse::bare(barcode, ValidationStatus::NotFound));
            };
            let product = self.catalog.lookup_product(found.product_id).await?;

            if let Some(sku) = sku.map(str::trim).filter(|s| !s.is_empty()) {
                let matches = product.as_ref().is_some_and(|p| p.sku.eq_ignore_ascii_case(sku));
                if !matches {
                    debug!(sku, "sku does not match the barcode's product");
                    return Ok(ValidationResponse::bare(barcode, ValidationStatus::ProductMismatch));
                }
            }

            let window = found.view(self.clock.now());
            let status = ValidationStatus::from(window.status);
            Ok(ValidationResponse {
                valid: status.is_valid(),
                barcode: barcode.to_string(),
                status,
                message: status.message(),
                product: product.as_ref().map(ProductSummary::from),
                coverage: Some(self.policy.summary(&window)),
                warranty: Some(window),
            })
        })
        .await;

        outcome.unwrap_or_else(|err| {
            warn!(error = %err, "validation degraded");
            ValidationResponse::bare(barcode, ValidationStatus::Unavailable)
        })
    }

    /// Registered warranties for a product. Unknown SKUs and unknown emails
    /// yield an empty list.
    #[instrument(skip_all, fields(sku = %lookup.sku))]
    pub async fn lookup_by_product(&self, lookup: ProductLookup) -> Result<Vec<WarrantySummary>> {
        let sku = lookup.sku.trim();
        if sku.is_empty() {
            return Err(WarrantyError::invalid("sku", "is required", None));
        }

        within(self.settings.request_timeout, "validator.lookup", async {
            let Some(product) = self.catalog.lookup_product_by_sku(sku).await? else {
                return Ok(Vec::new());
            };

            let customer_id = match lookup.customer_email.as_deref().map(str::trim) {
                Some(email) if !email.is_empty() => {
                    match self.customers.lookup_customer_by_email(email).await? {
                        Some(id) => Some(id),
                        None => return Ok(Vec::new()),
                    }
                }
                _ => None,
            };

            let filter = BarcodeFilter {
                product_id: Some(product.id),
                customer_id,
                serial_number: lookup
                    .serial_number
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                purchase_date: lookup.purchase_date,
                registered_only: true,
                ..Default::default()
            };
            let page = Page::new(0, self.settings.max_lookup_results);
            let barcodes = self.store.list_barcodes(&filter, page).await?;

            let now = self.clock.now();
            let summary = ProductSummary::from(&product);
            let found: Vec<_> = barcodes
                .items
                .into_iter()
                .map(|b| WarrantySummary {
                    warranty: b.view(now),
                    barcode: b.code,
                    product: summary.clone(),
                })
                .collect();
            debug!(matches = found.len(), "product lookup finished");
            Ok(found)
        })
        .await
    }

    #[instrument(skip_all, fields(barcode = %check.barcode, issue = %check.issue_type))]
    pub async fn check_coverage(&self, check: CoverageCheck) -> Result<CoverageResponse> {
        let issue = IssueCategory::parse(check.issue_type.trim());
        let description = check.description.trim();
        let mut violations = Violations::new();
        violations
            .check(issue.is_some(), "issue_type", "is not a known issue category", || {
                Some(check.issue_type.clone())
            })
            .check(!description.is_empty(), "description", "is required", || None)
            .check(
                description.chars().count() <= self.settings.max_description_len,
                "description",
                format!("at most {} characters", self.settings.max_description_len),
                || None,
            );
        violations.finish()?;
        let Some(issue) = issue else {
            return Err(WarrantyError::invalid("issue_type", "is required", None));
        };

        within(self.settings.request_timeout, "validator.coverage", async {
            let barcode = self.find(&check.barcode).await?.ok_or_else(|| WarrantyError::NotFound {
                entity: "barcode",
                key: check.barcode.clone(),
            })?;
            let product = self.catalog.lookup_product(barcode.product_id).await?;
            let window = barcode.view(self.clock.now());
            let assessment = self.policy.assess(&window, issue, product.as_ref());
            debug!(decision = ?assessment.decision, cost = %assessment.estimated_cost, "coverage assessed");

            Ok(CoverageResponse {
                covered: assessment.covered(),
                status: assessment.decision,
                estimated_cost: assessment.estimated_cost,
                coverage: self.policy.summary(&window),
                recommendations: assessment.recommendations,
                next_steps: assessment.next_steps,
            })
        })
        .await
    }
}
