//! Collision detection for one batch.
//!
//! A candidate is checked against the codes already staged by this batch
//! and then against the store's unique index. The staged set is exact; the
//! bloom filter in front of it only skips the set lookup for codes that
//! were certainly never staged. The store remains the arbiter at commit
//! time, so a code accepted here can still be rejected by the chunk commit.

use bloomfilter::Bloom;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use warranty_core::{
    BarcodeCode, BarcodeReader, CollisionType, Result, StorageResult, WarrantyError,
};

const FALSE_POSITIVE_RATE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Collision(CollisionType),
}

struct StagedSet {
    bloom: Bloom<BarcodeCode>,
    codes: HashSet<BarcodeCode>,
}

impl StagedSet {
    fn contains(&self, code: &BarcodeCode) -> bool {
        self.bloom.check(code) && self.codes.contains(code)
    }

    fn insert(&mut self, code: &BarcodeCode) -> bool {
        if self.contains(code) {
            return false;
        }
        self.bloom.set(code);
        self.codes.insert(code.clone())
    }
}

pub struct CollisionDetector<S> {
    store: Arc<S>,
    staged: Mutex<StagedSet>,
}

impl<S: BarcodeReader> CollisionDetector<S> {
    /// Sizes the prefilter for `expected` codes.
    pub fn new(store: Arc<S>, expected: usize) -> Result<Self> {
        let bloom = Bloom::new_for_fp_rate(expected.max(1), FALSE_POSITIVE_RATE)
            .map_err(WarrantyError::internal)?;
        Ok(Self {
            store,
            staged: Mutex::new(StagedSet {
                bloom,
                codes: HashSet::with_capacity(expected),
            }),
        })
    }

    /// Checks `candidate` and stages it when accepted.
    ///
    /// Of two workers racing on the same candidate, the first to stage it
    /// wins and the other sees `duplicate_in_batch`.
    pub async fn check(&self, candidate: &BarcodeCode) -> StorageResult<Verdict> {
        if self.staged.lock().contains(candidate) {
            return Ok(Verdict::Collision(CollisionType::DuplicateInBatch));
        }
        if self.store.code_exists(candidate).await? {
            return Ok(Verdict::Collision(CollisionType::DuplicateInStore));
        }
        if !self.staged.lock().insert(candidate) {
            return Ok(Verdict::Collision(CollisionType::DuplicateInBatch));
        }
        Ok(Verdict::Accepted)
    }

    pub fn staged_len(&self) -> usize {
        self.staged.lock().codes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;
    use warranty_core::{BarcodeRepository, NewBarcode, ProductId};
    use warranty_storage::InMemoryStore;

    fn code(s: &str) -> BarcodeCode {
        BarcodeCode::parse(s).unwrap()
    }

    #[tokio::test]
    async fn accepts_fresh_codes_once() {
        let detector = CollisionDetector::new(Arc::new(InMemoryStore::new()), 16).unwrap();

        let first = detector.check(&code("WB-2024-00000001")).await.unwrap();
        let second = detector.check(&code("WB-2024-00000001")).await.unwrap();

        assert_eq!(first, Verdict::Accepted);
        assert_eq!(
            second,
            Verdict::Collision(CollisionType::DuplicateInBatch)
        );
        assert_eq!(detector.staged_len(), 1);
    }

    #[tokio::test]
    async fn persisted_codes_collide_in_store() {
        let store = Arc::new(InMemoryStore::new());
        store
            .create_barcode(NewBarcode {
                code: code("WB-2024-COLLIDE01"),
                product_id: ProductId::new(1),
                storefront_id: None,
                batch_id: None,
                warranty_period_months: 12,
                created_at: Timestamp::UNIX_EPOCH,
            })
            .await
            .unwrap();
        let detector = CollisionDetector::new(store, 16).unwrap();

        let verdict = detector.check(&code("WB-2024-COLLIDE01")).await.unwrap();
        assert_eq!(
            verdict,
            Verdict::Collision(CollisionType::DuplicateInStore)
        );
        assert_eq!(detector.staged_len(), 0);
    }
}
