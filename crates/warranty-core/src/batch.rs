use crate::barcode::{BarcodeCode, BarcodePrefix, NewBarcode};
use crate::ids::{ActorId, BatchId, CollisionId, ProductId, StorefrontId};
use crate::priority::Priority;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_QUANTITY: u32 = 1;
pub const MAX_QUANTITY: u32 = 100_000;
pub const MIN_EXPIRY_MONTHS: u32 = 1;
pub const MAX_EXPIRY_MONTHS: u32 = 120;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Completed => "completed",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => BatchStatus::Pending,
            "in_progress" => BatchStatus::InProgress,
            "completed" => BatchStatus::Completed,
            "cancelled" => BatchStatus::Cancelled,
            "failed" => BatchStatus::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Cancelled | BatchStatus::Failed
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, BatchStatus::Pending | BatchStatus::InProgress)
    }

    /// The batch state machine.
    ///
    /// ```text
    /// pending ──start──▶ in_progress ──finish──▶ completed
    ///    │                    │
    ///    └──cancel────────────┼──cancel──▶ cancelled
    ///                         └──abort──▶ failed
    /// ```
    pub fn can_become(self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Pending, BatchStatus::InProgress)
                | (BatchStatus::Pending, BatchStatus::Cancelled)
                | (BatchStatus::InProgress, BatchStatus::Completed)
                | (BatchStatus::InProgress, BatchStatus::Cancelled)
                | (BatchStatus::InProgress, BatchStatus::Failed)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A barcode issuance batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub batch_number: String,
    pub product_id: ProductId,
    pub storefront_id: StorefrontId,
    pub prefix: BarcodePrefix,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub requested: u32,
    /// Slots resolved so far, accepted or failed.
    pub generated: u32,
    pub successful: u32,
    pub failed: u32,
    pub error_count: u32,
    pub collision_count: u32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub expiry_months: u32,
    pub priority: Priority,
    pub notify_on_complete: bool,
    pub status: BatchStatus,
    pub last_error: Option<String>,
    pub created_by: ActorId,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub cancelled_at: Option<Timestamp>,
    pub cancelled_by: Option<ActorId>,
    pub cancel_reason: Option<String>,
    pub updated_at: Timestamp,
}

impl Batch {
    /// Percentage of slots resolved, 0-100. Exactly 100 once completed.
    pub fn progress(&self) -> u8 {
        if self.status == BatchStatus::Completed {
            return 100;
        }
        if self.requested == 0 {
            return 0;
        }
        let done = u64::from(self.generated.min(self.requested));
        (done * 100 / u64::from(self.requested)) as u8
    }

    pub fn remaining(&self) -> u32 {
        self.requested.saturating_sub(self.generated)
    }
}

/// Insert payload for a new batch in state `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBatch {
    pub batch_number: String,
    pub product_id: ProductId,
    pub storefront_id: StorefrontId,
    pub prefix: BarcodePrefix,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub requested: u32,
    pub max_retries: u32,
    pub expiry_months: u32,
    pub priority: Priority,
    pub notify_on_complete: bool,
    pub created_by: ActorId,
    pub created_at: Timestamp,
}

/// A compare-and-set status change for a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTransition {
    pub from: BatchStatus,
    pub to: BatchStatus,
    pub at: Timestamp,
    pub actor: Option<ActorId>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionType {
    DuplicateInBatch,
    DuplicateInStore,
}

impl CollisionType {
    pub fn as_str(self) -> &'static str {
        match self {
            CollisionType::DuplicateInBatch => "duplicate_in_batch",
            CollisionType::DuplicateInStore => "duplicate_in_store",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "duplicate_in_batch" => Some(CollisionType::DuplicateInBatch),
            "duplicate_in_store" => Some(CollisionType::DuplicateInStore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionResolution {
    Regenerated,
    Dropped,
}

impl CollisionResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            CollisionResolution::Regenerated => "regenerated",
            CollisionResolution::Dropped => "dropped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "regenerated" => Some(CollisionResolution::Regenerated),
            "dropped" => Some(CollisionResolution::Dropped),
            _ => None,
        }
    }
}

/// A candidate barcode that duplicated an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionRecord {
    pub id: CollisionId,
    pub batch_id: BatchId,
    pub slot: u32,
    pub candidate: BarcodeCode,
    pub collision_type: CollisionType,
    pub resolution: CollisionResolution,
    pub detected_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCollision {
    pub slot: u32,
    pub candidate: BarcodeCode,
    pub collision_type: CollisionType,
    pub resolution: CollisionResolution,
    pub detected_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

/// Everything the engine makes durable in one commit point.
///
/// Applying a chunk inserts the barcodes, appends the collisions and bumps
/// the batch counters in one atomic step. Counters only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkCommit {
    pub barcodes: Vec<NewBarcode>,
    pub failed: u32,
    pub errors: u32,
    pub retries: u32,
    pub collisions: Vec<NewCollision>,
    pub last_error: Option<String>,
    pub committed_at: Option<Timestamp>,
}

impl ChunkCommit {
    pub fn is_empty(&self) -> bool {
        self.barcodes.is_empty()
            && self.failed == 0
            && self.errors == 0
            && self.retries == 0
            && self.collisions.is_empty()
            && self.last_error.is_none()
    }

    /// Slots this chunk resolves.
    pub fn resolved_slots(&self) -> u32 {
        self.barcodes.len() as u32 + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_edges() {
        use BatchStatus::*;
        assert!(Pending.can_become(InProgress));
        assert!(Pending.can_become(Cancelled));
        assert!(InProgress.can_become(Completed));
        assert!(InProgress.can_become(Failed));
        assert!(!Pending.can_become(Completed));
        assert!(!Cancelled.can_become(InProgress));
        assert!(!Completed.can_become(Cancelled));
        assert!(!Failed.can_become(Completed));
    }

    #[test]
    fn status_strings_round_trip() {
        use BatchStatus::*;
        for s in [Pending, InProgress, Completed, Cancelled, Failed] {
            assert_eq!(BatchStatus::parse(s.as_str()), Some(s));
        }
    }
}
