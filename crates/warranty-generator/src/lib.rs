//! Barcode identifier generation.
//!
//! A generator is a pure function from (prefix, year, entropy source,
//! counter) to a barcode string. It never fails and keeps no state; the
//! issuance engine owns the counter and the collision handling.

pub mod base36;
mod error;
pub mod obfuscated;
pub mod payload;
pub mod seq;

pub use error::Error;
pub use obfuscated::{ObfuscatedGenerator, Obfuscator};
pub use payload::Payload;
pub use seq::SeqGenerator;

use warranty_core::{BarcodeCode, BarcodePrefix};

/// Inputs for one candidate.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub prefix: &'a BarcodePrefix,
    pub year: i16,
    /// Distinguishes independent producers sharing one counter space.
    pub source: u16,
    pub counter: u32,
}

/// Trait for generating barcode strings.
///
/// Implementations are pure: equal requests yield equal codes, and
/// uniqueness against the store is the caller's concern.
pub trait Generator: Send + Sync + 'static {
    fn generate(&self, request: &GenerationRequest<'_>) -> BarcodeCode;
}

impl<G: Generator> Generator for std::sync::Arc<G> {
    fn generate(&self, request: &GenerationRequest<'_>) -> BarcodeCode {
        (**self).generate(request)
    }
}
