//! Persistence for the warranty subsystem.
//!
//! [`InMemoryStore`] implements every repository trait and backs tests and
//! single-node runs. [`MySqlStore`] persists the issuance side (barcodes,
//! batches, collisions and number sequences).

pub mod memory;
pub mod mysql;

pub use memory::InMemoryStore;
pub use mysql::MySqlStore;
pub use warranty_core::repository::*;
pub use warranty_core::{StorageError, StorageResult};
