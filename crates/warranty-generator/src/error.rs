use thiserror::Error;

/// Errors returned when building a generator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("multiplier {0} is even and would not be invertible")]
    EvenMultiplier(u64),
    #[error("multiplier must be non-zero in 48-bit space")]
    ZeroMultiplier,
}
