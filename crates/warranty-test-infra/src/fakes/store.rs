use async_trait::async_trait;
use jiff::Timestamp;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use warranty_core::{
    Activation, ActorId, BarcodeCode, BarcodeEvent, BarcodeFilter, BarcodeId, BarcodeReader,
    BarcodeRepository, BarcodeStatus, Batch, BatchFilter, BatchId, BatchRepository,
    BatchTransition, ChunkCommit, CollisionRecord, NewBarcode, NewBatch, Page, Paged,
    SequenceKind, SequenceRepository, StorageError, StorageResult, WarrantyBarcode,
};

/// Wraps a store and interferes with chunk commits: the next few can be
/// made to fail with `Unavailable`, and every commit can be slowed down.
/// Everything else goes straight to the inner store.
#[derive(Debug, Default)]
pub struct FlakyStore<S> {
    inner: S,
    failing_commits: AtomicU32,
    commit_attempts: AtomicU32,
    commit_delay: Mutex<Option<Duration>>,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing_commits: AtomicU32::new(0),
            commit_attempts: AtomicU32::new(0),
            commit_delay: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// The next `count` chunk commits fail before reaching the inner store.
    pub fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Sleeps this long before every chunk commit.
    pub fn delay_commits(&self, delay: Duration) {
        *self.commit_delay.lock() = Some(delay);
    }

    /// Chunk commits attempted so far, failed ones included.
    pub fn commit_attempts(&self) -> u32 {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<S: BarcodeReader> BarcodeReader for FlakyStore<S> {
    async fn get_barcode(&self, id: BarcodeId) -> StorageResult<Option<WarrantyBarcode>> {
        self.inner.get_barcode(id).await
    }

    async fn get_by_code(&self, code: &BarcodeCode) -> StorageResult<Option<WarrantyBarcode>> {
        self.inner.get_by_code(code).await
    }

    async fn code_exists(&self, code: &BarcodeCode) -> StorageResult<bool> {
        self.inner.code_exists(code).await
    }

    async fn list_barcodes(
        &self,
        filter: &BarcodeFilter,
        page: Page,
    ) -> StorageResult<Paged<WarrantyBarcode>> {
        self.inner.list_barcodes(filter, page).await
    }

    async fn barcode_events(&self, id: BarcodeId) -> StorageResult<Vec<BarcodeEvent>> {
        self.inner.barcode_events(id).await
    }
}

#[async_trait]
impl<S: BarcodeRepository> BarcodeRepository for FlakyStore<S> {
    async fn create_barcode(&self, barcode: NewBarcode) -> StorageResult<WarrantyBarcode> {
        self.inner.create_barcode(barcode).await
    }

    async fn bulk_create_barcodes(
        &self,
        barcodes: Vec<NewBarcode>,
    ) -> StorageResult<Vec<WarrantyBarcode>> {
        self.inner.bulk_create_barcodes(barcodes).await
    }

    async fn update_status(
        &self,
        id: BarcodeId,
        from: BarcodeStatus,
        to: BarcodeStatus,
        actor: ActorId,
        at: Timestamp,
    ) -> StorageResult<WarrantyBarcode> {
        self.inner.update_status(id, from, to, actor, at).await
    }

    async fn activate(
        &self,
        id: BarcodeId,
        activation: Activation,
        actor: ActorId,
    ) -> StorageResult<WarrantyBarcode> {
        self.inner.activate(id, activation, actor).await
    }

    async fn revoke(
        &self,
        id: BarcodeId,
        from: BarcodeStatus,
        reason: String,
        actor: ActorId,
        at: Timestamp,
    ) -> StorageResult<WarrantyBarcode> {
        self.inner.revoke(id, from, reason, actor, at).await
    }
}

#[async_trait]
impl<S: BatchRepository> BatchRepository for FlakyStore<S> {
    async fn create_batch(&self, batch: NewBatch) -> StorageResult<Batch> {
        self.inner.create_batch(batch).await
    }

    async fn get_batch(&self, id: BatchId) -> StorageResult<Option<Batch>> {
        self.inner.get_batch(id).await
    }

    async fn list_batches(&self, filter: &BatchFilter, page: Page) -> StorageResult<Paged<Batch>> {
        self.inner.list_batches(filter, page).await
    }

    async fn transition_batch(
        &self,
        id: BatchId,
        transition: BatchTransition,
    ) -> StorageResult<Batch> {
        self.inner.transition_batch(id, transition).await
    }

    async fn commit_chunk(&self, id: BatchId, chunk: ChunkCommit) -> StorageResult<Batch> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.commit_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.take_failure() {
            return Err(StorageError::Unavailable(format!("commit for batch {id} dropped")));
        }
        self.inner.commit_chunk(id, chunk).await
    }

    async fn list_collisions(
        &self,
        id: BatchId,
        page: Page,
    ) -> StorageResult<Paged<CollisionRecord>> {
        self.inner.list_collisions(id, page).await
    }
}

#[async_trait]
impl<S: SequenceRepository> SequenceRepository for FlakyStore<S> {
    async fn next_sequence(&self, kind: SequenceKind, year: i16) -> StorageResult<u64> {
        self.inner.next_sequence(kind, year).await
    }
}
