//! Warranty registration: activation, revocation and the barcode audit log.
//!
//! [`RegistryService`] binds a generated barcode to a customer, starting the
//! warranty clock, and exposes the derived warranty view of a barcode.

pub mod service;
pub mod settings;

pub use service::{ActivateWarranty, RegistryService, RevokeWarranty, WarrantyDetail};
pub use settings::RegistrySettings;
