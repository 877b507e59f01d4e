//! Barcode issuance: batch lifecycle, the batch engine and collision
//! handling.
//!
//! [`IssuanceService`] is the administrative entry point. It validates and
//! persists batch requests, starts them on the [`BatchEngine`], reports
//! progress and handles cancellation.

pub mod detector;
pub mod engine;
pub mod progress;
pub mod service;
pub mod settings;

pub use detector::{CollisionDetector, Verdict};
pub use engine::{BatchEngine, CancelMode, BATCH_COMPLETED_TEMPLATE};
pub use progress::{ProgressSnapshot, RateWindow, Step};
pub use service::{CancelBatch, CreateBatch, IssuanceService};
pub use settings::EngineSettings;
