//! Public warranty validation for storefronts.
//!
//! [`ValidatorService`] answers anonymous questions about a barcode: is it
//! genuine, is its warranty live, and what would a repair cost. Answers never
//! carry customer or purchase data, and revoked barcodes look exactly like
//! unknown ones.

pub mod cache;
pub mod coverage;
pub mod service;
pub mod settings;

pub use cache::BarcodeCache;
pub use coverage::{Assessment, Coverage, CoverageDecision, CoveragePolicy, StandardCoveragePolicy};
pub use service::{
    CoverageCheck, CoverageResponse, ProductLookup, ProductSummary, ValidationResponse,
    ValidationStatus, ValidatorService, WarrantySummary,
};
pub use settings::ValidatorSettings;
