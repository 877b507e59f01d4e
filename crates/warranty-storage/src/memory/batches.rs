use super::{IdAllocator, InMemoryStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use warranty_core::{
    Batch, BatchFilter, BatchId, BatchRepository, BatchStatus, BatchTransition, ChunkCommit,
    CollisionId, CollisionRecord, NewBatch, Page, Paged, SequenceKind, SequenceRepository,
    StorageError, StorageResult,
};

impl InMemoryStore {
    /// Advisory lock serializing writes to one batch row.
    fn batch_lock(&self, id: BatchId) -> Arc<Mutex<()>> {
        self.inner.batch_locks.entry(id).or_default().clone()
    }
}

#[async_trait]
impl BatchRepository for InMemoryStore {
    async fn create_batch(&self, batch: NewBatch) -> StorageResult<Batch> {
        if self
            .inner
            .batches
            .iter()
            .any(|row| row.batch_number == batch.batch_number)
        {
            return Err(StorageError::Duplicate(batch.batch_number));
        }

        let id = BatchId::new(IdAllocator::next(&self.inner.ids.batch));
        let row = Batch {
            id,
            batch_number: batch.batch_number,
            product_id: batch.product_id,
            storefront_id: batch.storefront_id,
            prefix: batch.prefix,
            description: batch.description,
            tags: batch.tags,
            requested: batch.requested,
            generated: 0,
            successful: 0,
            failed: 0,
            error_count: 0,
            collision_count: 0,
            retry_count: 0,
            max_retries: batch.max_retries,
            expiry_months: batch.expiry_months,
            priority: batch.priority,
            notify_on_complete: batch.notify_on_complete,
            status: BatchStatus::Pending,
            last_error: None,
            created_by: batch.created_by,
            created_at: batch.created_at,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancel_reason: None,
            updated_at: batch.created_at,
        };
        self.inner.batches.insert(id, row.clone());
        Ok(row)
    }

    async fn get_batch(&self, id: BatchId) -> StorageResult<Option<Batch>> {
        Ok(self.inner.batches.get(&id).map(|row| row.clone()))
    }

    async fn list_batches(&self, filter: &BatchFilter, page: Page) -> StorageResult<Paged<Batch>> {
        let mut rows: Vec<_> = self
            .inner
            .batches
            .iter()
            .filter(|row| filter.matches(row.value()))
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page.slice(rows))
    }

    async fn transition_batch(
        &self,
        id: BatchId,
        transition: BatchTransition,
    ) -> StorageResult<Batch> {
        let lock = self.batch_lock(id);
        let _guard = lock.lock();

        let mut row = self
            .inner
            .batches
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if row.status != transition.from {
            return Err(StorageError::Conflict(format!(
                "batch {} is {}, expected {}",
                row.batch_number, row.status, transition.from
            )));
        }
        if !transition.from.can_become(transition.to) {
            return Err(StorageError::Conflict(format!(
                "batch {} cannot move from {} to {}",
                row.batch_number, transition.from, transition.to
            )));
        }

        row.status = transition.to;
        row.updated_at = transition.at;
        match transition.to {
            BatchStatus::InProgress => row.started_at = Some(transition.at),
            BatchStatus::Completed => row.completed_at = Some(transition.at),
            BatchStatus::Cancelled => {
                row.cancelled_at = Some(transition.at);
                row.cancelled_by = transition.actor;
                row.cancel_reason = transition.reason;
            }
            BatchStatus::Failed => {
                row.completed_at = Some(transition.at);
                if transition.reason.is_some() {
                    row.last_error = transition.reason;
                }
            }
            BatchStatus::Pending => {}
        }
        Ok(row.clone())
    }

    async fn commit_chunk(&self, id: BatchId, chunk: ChunkCommit) -> StorageResult<Batch> {
        let lock = self.batch_lock(id);
        let _guard = lock.lock();
        let _writes = self.inner.barcode_writes.lock();

        let mut row = self
            .inner
            .batches
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if row.status != BatchStatus::InProgress {
            return Err(StorageError::Conflict(format!(
                "batch {} is {}, chunks need in_progress",
                row.batch_number, row.status
            )));
        }
        let resolved = chunk.resolved_slots();
        if row.generated + resolved > row.requested {
            return Err(StorageError::Conflict(format!(
                "chunk of {resolved} slots overflows batch {}",
                row.batch_number
            )));
        }
        if let Some(code) = self.first_taken_code(&chunk.barcodes) {
            return Err(StorageError::Duplicate(code.to_string()));
        }

        let accepted = chunk.barcodes.len() as u32;
        for barcode in chunk.barcodes {
            self.insert_barcode_locked(barcode);
        }

        let collisions = chunk.collisions.len() as u32;
        if collisions > 0 {
            let mut log = self.inner.collisions.entry(id).or_default();
            log.extend(chunk.collisions.into_iter().map(|c| CollisionRecord {
                id: CollisionId::new(IdAllocator::next(&self.inner.ids.collision)),
                batch_id: id,
                slot: c.slot,
                candidate: c.candidate,
                collision_type: c.collision_type,
                resolution: c.resolution,
                detected_at: c.detected_at,
                resolved_at: c.resolved_at,
            }));
        }

        row.generated += resolved;
        row.successful += accepted;
        row.failed += chunk.failed;
        row.error_count += chunk.errors;
        row.retry_count += chunk.retries;
        row.collision_count += collisions;
        if chunk.last_error.is_some() {
            row.last_error = chunk.last_error;
        }
        if let Some(at) = chunk.committed_at {
            row.updated_at = row.updated_at.max(at);
        }
        Ok(row.clone())
    }

    async fn list_collisions(
        &self,
        id: BatchId,
        page: Page,
    ) -> StorageResult<Paged<CollisionRecord>> {
        let rows = self
            .inner
            .collisions
            .get(&id)
            .map(|log| log.clone())
            .unwrap_or_default();
        Ok(page.slice(rows))
    }
}

#[async_trait]
impl SequenceRepository for InMemoryStore {
    async fn next_sequence(&self, kind: SequenceKind, year: i16) -> StorageResult<u64> {
        let mut value = self.inner.sequences.entry((kind, year)).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}
