mod barcodes;
mod batches;
mod claims;

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use warranty_core::{
    AttachmentId, BarcodeCode, BarcodeEvent, BarcodeId, Batch, BatchId, Claim, ClaimAttachment,
    ClaimId, CollisionRecord, RepairTicket, RequestKey, SequenceKind, TicketId, TimelineEvent,
    WarrantyBarcode,
};

/// In-memory implementation of every repository trait.
///
/// Rows live in sharded [`DashMap`]s. Writes that must touch several rows
/// atomically (chunk commits, claim commits, bulk inserts) run under a
/// [`parking_lot::Mutex`] so readers never observe half of one.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    ids: IdAllocator,

    barcodes: DashMap<BarcodeId, WarrantyBarcode>,
    codes: DashMap<BarcodeCode, BarcodeId>,
    barcode_events: DashMap<BarcodeId, Vec<BarcodeEvent>>,
    barcode_writes: Mutex<()>,

    batches: DashMap<BatchId, Batch>,
    batch_locks: DashMap<BatchId, Arc<Mutex<()>>>,
    collisions: DashMap<BatchId, Vec<CollisionRecord>>,

    sequences: DashMap<(SequenceKind, i16), u64>,

    claims: DashMap<ClaimId, Claim>,
    claim_numbers: DashMap<String, ClaimId>,
    open_claims: DashMap<BarcodeId, ClaimId>,
    timelines: DashMap<ClaimId, Vec<TimelineEvent>>,
    request_keys: DashMap<RequestKey, ClaimId>,
    tickets: DashMap<TicketId, RepairTicket>,
    attachments: DashMap<AttachmentId, ClaimAttachment>,
    claim_writes: Mutex<()>,
}

#[derive(Debug, Default)]
struct IdAllocator {
    barcode: AtomicU64,
    batch: AtomicU64,
    collision: AtomicU64,
    claim: AtomicU64,
    ticket: AtomicU64,
    attachment: AtomicU64,
    event: AtomicU64,
}

impl IdAllocator {
    fn next(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted barcodes.
    pub fn barcode_count(&self) -> usize {
        self.inner.barcodes.len()
    }
}
