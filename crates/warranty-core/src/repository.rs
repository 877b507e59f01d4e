use crate::attachment::{ClaimAttachment, NewAttachment, ScanOutcome};
use crate::barcode::{
    Activation, BarcodeCode, BarcodeEvent, BarcodeStatus, NewBarcode, WarrantyBarcode,
};
use crate::batch::{Batch, BatchStatus, BatchTransition, ChunkCommit, CollisionRecord, NewBatch};
use crate::claim::{Claim, ClaimCommit, ClaimStatus, NewClaim, NewTimelineEvent, RequestKey, TimelineEvent};
use crate::error::StorageResult;
use crate::ids::{
    ActorId, AttachmentId, BarcodeId, BatchId, ClaimId, CustomerId, ProductId, StorefrontId,
    TicketId,
};
use crate::numbering::SequenceKind;
use crate::priority::Priority;
use crate::ticket::{RepairTicket, TicketWrite};
use async_trait::async_trait;
use jiff::civil::Date;
use jiff::Timestamp;
use serde::Serialize;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 500;

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u32,
}

impl Page {
    pub fn new(offset: u64, limit: u32) -> Self {
        Self {
            offset,
            limit: limit.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn all() -> Self {
        Self::new(0, MAX_PAGE_SIZE)
    }

    /// Applies the page to an already filtered and ordered list.
    pub fn slice<T>(self, items: Vec<T>) -> Paged<T> {
        let total = items.len() as u64;
        let items = items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect();
        Paged {
            items,
            total,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, DEFAULT_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u32,
}

impl<T> Paged<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paged<U> {
        Paged {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarcodeFilter {
    pub product_id: Option<ProductId>,
    pub batch_id: Option<BatchId>,
    pub status: Option<BarcodeStatus>,
    pub customer_id: Option<CustomerId>,
    pub serial_number: Option<String>,
    pub purchase_date: Option<Date>,
    /// Only barcodes bound to a customer: `active` or `claimed`.
    pub registered_only: bool,
}

impl BarcodeFilter {
    /// Stored statuses of a barcode that has been registered and not revoked.
    pub const REGISTERED: [BarcodeStatus; 2] = [BarcodeStatus::Active, BarcodeStatus::Claimed];

    pub fn matches(&self, barcode: &WarrantyBarcode) -> bool {
        self.product_id.is_none_or(|id| barcode.product_id == id)
            && self.batch_id.is_none_or(|id| barcode.batch_id == Some(id))
            && self.status.is_none_or(|status| barcode.status == status)
            && (!self.registered_only || Self::REGISTERED.contains(&barcode.status))
            && self.purchase_date.is_none_or(|date| {
                barcode.purchase.as_ref().map(|p| p.purchase_date) == Some(date)
            })
            && self.customer_id.is_none_or(|id| barcode.customer_id == Some(id))
            && self.serial_number.as_deref().is_none_or(|serial| {
                barcode
                    .purchase
                    .as_ref()
                    .and_then(|p| p.serial_number.as_deref())
                    == Some(serial)
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchFilter {
    pub status: Option<BatchStatus>,
    pub priority: Option<Priority>,
    pub product_id: Option<ProductId>,
    pub storefront_id: Option<StorefrontId>,
    pub created_by: Option<ActorId>,
    pub created_from: Option<Timestamp>,
    pub created_to: Option<Timestamp>,
}

impl BatchFilter {
    pub fn matches(&self, batch: &Batch) -> bool {
        self.status.is_none_or(|s| batch.status == s)
            && self.priority.is_none_or(|p| batch.priority == p)
            && self.product_id.is_none_or(|id| batch.product_id == id)
            && self.storefront_id.is_none_or(|id| batch.storefront_id == id)
            && self.created_by.is_none_or(|id| batch.created_by == id)
            && self.created_from.is_none_or(|from| batch.created_at >= from)
            && self.created_to.is_none_or(|to| batch.created_at < to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimFilter {
    pub status: Option<ClaimStatus>,
    pub customer_id: Option<CustomerId>,
    pub barcode_id: Option<BarcodeId>,
    pub technician: Option<ActorId>,
    pub priority: Option<Priority>,
    pub claimed_from: Option<Timestamp>,
    pub claimed_to: Option<Timestamp>,
}

impl ClaimFilter {
    pub fn matches(&self, claim: &Claim) -> bool {
        self.status.is_none_or(|s| claim.status == s)
            && self.customer_id.is_none_or(|id| claim.customer_id == id)
            && self.barcode_id.is_none_or(|id| claim.barcode_id == id)
            && self.technician.is_none_or(|id| claim.assigned_technician == Some(id))
            && self.priority.is_none_or(|p| claim.priority == p)
            && self.claimed_from.is_none_or(|from| claim.claim_date >= from)
            && self.claimed_to.is_none_or(|to| claim.claim_date < to)
    }
}

/// Read side of the barcode store.
#[async_trait]
pub trait BarcodeReader: Send + Sync + 'static {
    async fn get_barcode(&self, id: BarcodeId) -> StorageResult<Option<WarrantyBarcode>>;

    async fn get_by_code(&self, code: &BarcodeCode) -> StorageResult<Option<WarrantyBarcode>>;

    async fn code_exists(&self, code: &BarcodeCode) -> StorageResult<bool>;

    async fn list_barcodes(
        &self,
        filter: &BarcodeFilter,
        page: Page,
    ) -> StorageResult<Paged<WarrantyBarcode>>;

    async fn list_by_batch(
        &self,
        batch_id: BatchId,
        page: Page,
    ) -> StorageResult<Paged<WarrantyBarcode>> {
        let filter = BarcodeFilter {
            batch_id: Some(batch_id),
            ..Default::default()
        };
        self.list_barcodes(&filter, page).await
    }

    /// Audit log of a barcode, oldest first.
    async fn barcode_events(&self, id: BarcodeId) -> StorageResult<Vec<BarcodeEvent>>;
}

#[async_trait]
pub trait BarcodeRepository: BarcodeReader {
    /// Inserts one barcode. A taken code fails with `StorageError::Duplicate`.
    async fn create_barcode(&self, barcode: NewBarcode) -> StorageResult<WarrantyBarcode>;

    /// Inserts all barcodes or none.
    async fn bulk_create_barcodes(
        &self,
        barcodes: Vec<NewBarcode>,
    ) -> StorageResult<Vec<WarrantyBarcode>>;

    /// Compare-and-set on the status column, appending an audit event.
    async fn update_status(
        &self,
        id: BarcodeId,
        from: BarcodeStatus,
        to: BarcodeStatus,
        actor: ActorId,
        at: Timestamp,
    ) -> StorageResult<WarrantyBarcode>;

    /// Binds the barcode to a customer. Guarded by `status = generated`; a
    /// lost race fails with `StorageError::Conflict`.
    async fn activate(
        &self,
        id: BarcodeId,
        activation: Activation,
        actor: ActorId,
    ) -> StorageResult<WarrantyBarcode>;

    async fn revoke(
        &self,
        id: BarcodeId,
        from: BarcodeStatus,
        reason: String,
        actor: ActorId,
        at: Timestamp,
    ) -> StorageResult<WarrantyBarcode>;
}

#[async_trait]
pub trait BatchRepository: Send + Sync + 'static {
    async fn create_batch(&self, batch: NewBatch) -> StorageResult<Batch>;

    async fn get_batch(&self, id: BatchId) -> StorageResult<Option<Batch>>;

    async fn list_batches(&self, filter: &BatchFilter, page: Page) -> StorageResult<Paged<Batch>>;

    /// Compare-and-set status change. Fails with `Conflict` when the stored
    /// status is not `transition.from`.
    async fn transition_batch(&self, id: BatchId, transition: BatchTransition)
        -> StorageResult<Batch>;

    /// Applies a chunk under the per-batch lock. The batch must be
    /// `in_progress`. If any barcode code is taken the whole chunk is
    /// rejected with `Duplicate` naming the first offending code.
    async fn commit_chunk(&self, id: BatchId, chunk: ChunkCommit) -> StorageResult<Batch>;

    async fn list_collisions(
        &self,
        id: BatchId,
        page: Page,
    ) -> StorageResult<Paged<CollisionRecord>>;
}

#[async_trait]
pub trait SequenceRepository: Send + Sync + 'static {
    /// Next value of the per-(kind, year) counter, starting at 1.
    async fn next_sequence(&self, kind: SequenceKind, year: i16) -> StorageResult<u64>;
}

/// Result of an atomic claim write.
#[derive(Debug, Clone)]
pub struct CommittedClaim {
    pub claim: Claim,
    pub events: Vec<TimelineEvent>,
    pub ticket: Option<RepairTicket>,
}

#[async_trait]
pub trait ClaimRepository: Send + Sync + 'static {
    /// Inserts a `pending` claim with its first timeline event. Fails with
    /// `Conflict` while another open claim exists for the same barcode.
    async fn create_claim(
        &self,
        claim: NewClaim,
        submitted: NewTimelineEvent,
        request_key: Option<RequestKey>,
    ) -> StorageResult<CommittedClaim>;

    async fn get_claim(&self, id: ClaimId) -> StorageResult<Option<Claim>>;

    async fn get_claim_by_number(&self, number: &str) -> StorageResult<Option<Claim>>;

    async fn open_claim_for_barcode(&self, barcode_id: BarcodeId) -> StorageResult<Option<Claim>>;

    async fn list_claims(&self, filter: &ClaimFilter, page: Page) -> StorageResult<Paged<Claim>>;

    /// Applies a claim write, its timeline entries and an optional ticket
    /// write in one step. See [`ClaimCommit`].
    async fn commit_claim(
        &self,
        commit: ClaimCommit,
        ticket: Option<TicketWrite>,
    ) -> StorageResult<CommittedClaim>;

    /// Full timeline ordered by sequence.
    async fn timeline(&self, id: ClaimId) -> StorageResult<Vec<TimelineEvent>>;

    /// Claim a request key was first used against, if any.
    async fn recall_request(&self, key: &RequestKey) -> StorageResult<Option<ClaimId>>;

    /// Removes the claim with its tickets, attachments and timeline.
    async fn delete_claim(&self, id: ClaimId) -> StorageResult<bool>;
}

#[async_trait]
pub trait TicketRepository: Send + Sync + 'static {
    async fn get_ticket(&self, id: TicketId) -> StorageResult<Option<RepairTicket>>;

    /// The claim's live (not cancelled) ticket.
    async fn active_ticket(&self, claim_id: ClaimId) -> StorageResult<Option<RepairTicket>>;

    async fn tickets_for_claim(&self, claim_id: ClaimId) -> StorageResult<Vec<RepairTicket>>;
}

#[async_trait]
pub trait AttachmentRepository: Send + Sync + 'static {
    async fn create_attachment(&self, attachment: NewAttachment) -> StorageResult<ClaimAttachment>;

    async fn get_attachment(&self, id: AttachmentId) -> StorageResult<Option<ClaimAttachment>>;

    async fn list_attachments(&self, claim_id: ClaimId) -> StorageResult<Vec<ClaimAttachment>>;

    /// Records a scan verdict. Only `pending` attachments accept one.
    async fn set_scan_result(
        &self,
        id: AttachmentId,
        outcome: ScanOutcome,
    ) -> StorageResult<ClaimAttachment>;
}

/// Everything the issuance pipeline needs from a store.
pub trait IssuanceStore: BarcodeRepository + BatchRepository + SequenceRepository {}

impl<T> IssuanceStore for T where T: BarcodeRepository + BatchRepository + SequenceRepository {}

/// Everything the claim workflow needs from a store.
pub trait ClaimStore:
    BarcodeRepository + ClaimRepository + TicketRepository + AttachmentRepository + SequenceRepository
{
}

impl<T> ClaimStore for T where
    T: BarcodeRepository
        + ClaimRepository
        + TicketRepository
        + AttachmentRepository
        + SequenceRepository
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_limits_are_clamped() {
        assert_eq!(Page::new(0, 0).limit, 1);
        assert_eq!(Page::new(0, 10_000).limit, MAX_PAGE_SIZE);
        assert_eq!(Page::default().limit, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn slice_reports_the_unpaged_total() {
        let paged = Page::new(2, 3).slice((0..10).collect::<Vec<_>>());
        assert_eq!(paged.items, vec![2, 3, 4]);
        assert_eq!(paged.total, 10);
    }
}
