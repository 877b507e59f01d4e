use crate::claim::{ClaimAction, ClaimStatus};
use serde::Serialize;
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// Result type for the warranty services.
pub type Result<T> = std::result::Result<T, WarrantyError>;

/// Result type for repository operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// A unique index rejected the write. Carries the offending key.
    #[error("duplicate key: {0}")]
    Duplicate(String),
    /// A compare-and-set guard (status or version) did not match.
    #[error("concurrent modification: {0}")]
    Conflict(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage operation failed: {0}")]
    Operation(String),
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Timeout(_))
    }
}

/// Coarse error kinds shared by every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    InvalidState,
    InvalidTransition,
    PreconditionFailed,
    Forbidden,
    PayloadTooLarge,
    DeadlineExceeded,
    DependencyFailure,
    Internal,
}

/// One failed input check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
    pub value: Option<String>,
}

impl Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}: {} (got '{}')", self.field, self.message, value),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

/// Opaque id attached to internal errors so operators can find the log line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(smol_str::SmolStr);

static CORRELATION_SEQ: AtomicU32 = AtomicU32::new(0);

impl CorrelationId {
    pub fn generate() -> Self {
        let nanos = jiff::Timestamp::now().as_nanosecond() as u64;
        let seq = CORRELATION_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0u8; 12];
        bytes[..8].copy_from_slice(&nanos.to_be_bytes());
        bytes[8..].copy_from_slice(&seq.to_be_bytes());
        Self(smol_str::SmolStr::new(bs58::encode(bytes).into_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Error)]
pub enum WarrantyError {
    #[error("invalid argument: {}", join(.0))]
    InvalidArgument(Vec<FieldViolation>),
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("cannot {operation} {entity} in state {state}")]
    InvalidState {
        entity: &'static str,
        state: String,
        operation: &'static str,
    },
    #[error("cannot {action} a claim in status {from}; allowed: {}", join(.allowed))]
    InvalidTransition {
        from: ClaimStatus,
        action: ClaimAction,
        allowed: Vec<ClaimAction>,
    },
    #[error("precondition failed: {reason}: {detail}")]
    PreconditionFailed { reason: &'static str, detail: String },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("payload too large: {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: u64, limit: u64 },
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("dependency failure: {0}")]
    DependencyFailure(String),
    #[error("internal error (correlation id {0})")]
    Internal(CorrelationId),
}

fn join<T: Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl WarrantyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WarrantyError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            WarrantyError::NotFound { .. } => ErrorKind::NotFound,
            WarrantyError::Conflict(_) => ErrorKind::Conflict,
            WarrantyError::InvalidState { .. } => ErrorKind::InvalidState,
            WarrantyError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            WarrantyError::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            WarrantyError::Forbidden(_) => ErrorKind::Forbidden,
            WarrantyError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            WarrantyError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            WarrantyError::DependencyFailure(_) => ErrorKind::DependencyFailure,
            WarrantyError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn invalid(
        field: impl Into<String>,
        message: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        WarrantyError::InvalidArgument(vec![FieldViolation {
            field: field.into(),
            message: message.into(),
            value,
        }])
    }

    pub fn not_found(entity: &'static str, key: impl Display) -> Self {
        WarrantyError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn precondition(reason: &'static str, detail: impl Into<String>) -> Self {
        WarrantyError::PreconditionFailed {
            reason,
            detail: detail.into(),
        }
    }

    pub fn invalid_state(entity: &'static str, state: impl Display, operation: &'static str) -> Self {
        WarrantyError::InvalidState {
            entity,
            state: state.to_string(),
            operation,
        }
    }

    /// Wraps an unexpected failure. The detail is logged under a fresh
    /// correlation id and never returned to the caller.
    pub fn internal(detail: impl Display) -> Self {
        let id = CorrelationId::generate();
        tracing::error!(correlation_id = %id, error = %detail, "internal error");
        WarrantyError::Internal(id)
    }

    /// Returns the machine reason of a `PreconditionFailed`.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            WarrantyError::PreconditionFailed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl From<StorageError> for WarrantyError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Duplicate(key) => WarrantyError::Conflict(format!("duplicate key {key}")),
            StorageError::Conflict(message) => WarrantyError::Conflict(message),
            StorageError::NotFound(key) => WarrantyError::NotFound {
                entity: "record",
                key,
            },
            StorageError::Timeout(message) => WarrantyError::DeadlineExceeded(message),
            other => WarrantyError::internal(other),
        }
    }
}

/// Accumulates input violations so a request reports every bad field at once.
#[derive(Debug, Default)]
pub struct Violations(Vec<FieldViolation>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a violation unless `ok` holds.
    pub fn check(
        &mut self,
        ok: bool,
        field: &str,
        message: impl Into<String>,
        value: impl FnOnce() -> Option<String>,
    ) -> &mut Self {
        if !ok {
            self.0.push(FieldViolation {
                field: field.to_string(),
                message: message.into(),
                value: value(),
            });
        }
        self
    }

    pub fn push(&mut self, violation: FieldViolation) {
        self.0.push(violation);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn finish(self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(WarrantyError::InvalidArgument(self.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violations_collect_every_field() {
        let mut v = Violations::new();
        v.check(false, "quantity", "must be between 1 and 100000", || Some("0".into()))
            .check(true, "prefix", "unused", || None)
            .check(false, "expiry_months", "must be between 1 and 120", || Some("0".into()));

        let err = v.finish().unwrap_err();
        match err {
            WarrantyError::InvalidArgument(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].field, "quantity");
                assert_eq!(fields[1].field, "expiry_months");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn storage_errors_map_to_kinds() {
        let dup: WarrantyError = StorageError::Duplicate("WB-2024-AAAA0000".into()).into();
        assert_eq!(dup.kind(), ErrorKind::Conflict);

        let timeout: WarrantyError = StorageError::Timeout("pool".into()).into();
        assert_eq!(timeout.kind(), ErrorKind::DeadlineExceeded);

        let query: WarrantyError = StorageError::Query("syntax".into()).into();
        assert_eq!(query.kind(), ErrorKind::Internal);
        assert!(!query.to_string().contains("syntax"));
    }

    #[test]
    fn correlation_ids_are_distinct() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn transient_storage_errors() {
        assert!(StorageError::Unavailable("down".into()).is_transient());
        assert!(StorageError::Timeout("slow".into()).is_transient());
        assert!(!StorageError::Duplicate("x".into()).is_transient());
    }
}
