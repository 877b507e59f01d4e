use moka::future::Cache;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace};
use warranty_core::{BarcodeCode, Result, WarrantyBarcode};

/// Read-through cache of stored barcodes keyed by code.
///
/// Only the stored record is cached. Misses are cached as `None` so repeated
/// lookups of unknown codes do not reach the store. Derived warranty fields
/// are computed by the caller on every read.
#[derive(Debug, Clone)]
pub struct BarcodeCache {
    cache: Cache<BarcodeCode, Option<WarrantyBarcode>>,
}

impl BarcodeCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Returns the cached record or runs `load` once for all concurrent
    /// callers of the same code. Load errors are not cached.
    pub async fn get_or_compute<F, Fut>(&self, code: &BarcodeCode, load: F) -> Result<Option<WarrantyBarcode>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<WarrantyBarcode>>>,
    {
        trace!(code = %code, "barcode cache lookup");
        let record = self
            .cache
            .try_get_with(code.clone(), async {
                trace!(code = %code, "barcode cache miss, loading");
                load().await
            })
            .await
            .map_err(|e| e.as_ref().clone())?;
        debug!(code = %code, found = record.is_some(), "barcode resolved");
        Ok(record)
    }

    /// Drops the entry for `code`; the next read goes to the store.
    pub async fn invalidate(&self, code: &BarcodeCode) {
        self.cache.invalidate(code).await;
        debug!(code = %code, "barcode cache entry invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use warranty_core::{ErrorKind, WarrantyError};

    fn code() -> BarcodeCode {
        BarcodeCode::parse("WB-2024-00000001").unwrap()
    }

    #[tokio::test]
    async fn concurrent_misses_load_once() {
        let cache = BarcodeCache::new(100, Duration::from_secs(60));
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..10 {
            let cache = cache.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&code(), || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        loads.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_none());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn misses_are_cached_until_invalidated() {
        let cache = BarcodeCache::new(100, Duration::from_secs(60));
        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let load = || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        };

        cache.get_or_compute(&code(), load).await.unwrap();
        cache.get_or_compute(&code(), load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        cache.invalidate(&code()).await;
        cache.get_or_compute(&code(), load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = BarcodeCache::new(100, Duration::from_millis(50));
        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let load = || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        };

        cache.get_or_compute(&code(), load).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.get_or_compute(&code(), load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn load_errors_are_not_cached() {
        let cache = BarcodeCache::new(100, Duration::from_secs(60));

        let err = cache
            .get_or_compute(&code(), || async {
                Err(WarrantyError::DependencyFailure("store offline".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyFailure);

        let record = cache.get_or_compute(&code(), || async { Ok(None) }).await.unwrap();
        assert!(record.is_none());
    }
}
