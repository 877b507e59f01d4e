use super::{IdAllocator, InMemoryStore};
use async_trait::async_trait;
use jiff::Timestamp;
use std::collections::HashSet;
use warranty_core::{
    Activation, ActorId, BarcodeCode, BarcodeEvent, BarcodeEventKind, BarcodeFilter, BarcodeId,
    BarcodeReader, BarcodeRepository, BarcodeStatus, NewBarcode, Page, Paged, StorageError,
    StorageResult, WarrantyBarcode,
};

impl InMemoryStore {
    /// First code in `barcodes` that is already taken or repeated. Caller
    /// holds `barcode_writes`.
    pub(super) fn first_taken_code<'a>(
        &self,
        barcodes: impl IntoIterator<Item = &'a NewBarcode>,
    ) -> Option<BarcodeCode> {
        let mut seen = HashSet::new();
        barcodes
            .into_iter()
            .find(|b| self.inner.codes.contains_key(&b.code) || !seen.insert(&b.code))
            .map(|b| b.code.clone())
    }

    /// Caller holds `barcode_writes` and has checked uniqueness.
    pub(super) fn insert_barcode_locked(&self, new: NewBarcode) -> WarrantyBarcode {
        let id = BarcodeId::new(IdAllocator::next(&self.inner.ids.barcode));
        let barcode = WarrantyBarcode {
            id,
            code: new.code,
            product_id: new.product_id,
            storefront_id: new.storefront_id,
            batch_id: new.batch_id,
            status: BarcodeStatus::Generated,
            warranty_period_months: new.warranty_period_months,
            activated_at: None,
            expires_at: None,
            customer_id: None,
            purchase: None,
            revoked_at: None,
            revoked_reason: None,
            created_at: new.created_at,
        };
        self.inner.codes.insert(barcode.code.clone(), id);
        self.inner.barcodes.insert(id, barcode.clone());
        barcode
    }

    fn append_event(&self, event: BarcodeEvent) {
        self.inner
            .barcode_events
            .entry(event.barcode_id)
            .or_default()
            .push(event);
    }

    /// Applies `change` to the stored row if `guard` accepts its current
    /// status.
    fn mutate_barcode(
        &self,
        id: BarcodeId,
        guard: impl FnOnce(&WarrantyBarcode) -> StorageResult<()>,
        change: impl FnOnce(&mut WarrantyBarcode),
    ) -> StorageResult<WarrantyBarcode> {
        let mut row = self
            .inner
            .barcodes
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        guard(&row)?;
        change(&mut row);
        Ok(row.clone())
    }
}

fn expect_status(row: &WarrantyBarcode, from: BarcodeStatus) -> StorageResult<()> {
    if row.status == from {
        Ok(())
    } else {
        Err(StorageError::Conflict(format!(
            "barcode {} is {}, expected {}",
            row.code, row.status, from
        )))
    }
}

#[async_trait]
impl BarcodeReader for InMemoryStore {
    async fn get_barcode(&self, id: BarcodeId) -> StorageResult<Option<WarrantyBarcode>> {
        Ok(self.inner.barcodes.get(&id).map(|row| row.clone()))
    }

    async fn get_by_code(&self, code: &BarcodeCode) -> StorageResult<Option<WarrantyBarcode>> {
        let Some(id) = self.inner.codes.get(code).map(|id| *id) else {
            return Ok(None);
        };
        self.get_barcode(id).await
    }

    async fn code_exists(&self, code: &BarcodeCode) -> StorageResult<bool> {
        Ok(self.inner.codes.contains_key(code))
    }

    async fn list_barcodes(
        &self,
        filter: &BarcodeFilter,
        page: Page,
    ) -> StorageResult<Paged<WarrantyBarcode>> {
        let mut rows: Vec<_> = self
            .inner
            .barcodes
            .iter()
            .filter(|row| filter.matches(row.value()))
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by_key(|row| row.id);
        Ok(page.slice(rows))
    }

    async fn barcode_events(&self, id: BarcodeId) -> StorageResult<Vec<BarcodeEvent>> {
        Ok(self
            .inner
            .barcode_events
            .get(&id)
            .map(|events| events.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl BarcodeRepository for InMemoryStore {
    async fn create_barcode(&self, barcode: NewBarcode) -> StorageResult<WarrantyBarcode> {
        let _writes = self.inner.barcode_writes.lock();
        if let Some(code) = self.first_taken_code([&barcode]) {
            return Err(StorageError::Duplicate(code.to_string()));
        }
        Ok(self.insert_barcode_locked(barcode))
    }

    async fn bulk_create_barcodes(
        &self,
        barcodes: Vec<NewBarcode>,
    ) -> StorageResult<Vec<WarrantyBarcode>> {
        let _writes = self.inner.barcode_writes.lock();
        if let Some(code) = self.first_taken_code(&barcodes) {
            return Err(StorageError::Duplicate(code.to_string()));
        }
        Ok(barcodes
            .into_iter()
            .map(|barcode| self.insert_barcode_locked(barcode))
            .collect())
    }

    async fn update_status(
        &self,
        id: BarcodeId,
        from: BarcodeStatus,
        to: BarcodeStatus,
        actor: ActorId,
        at: Timestamp,
    ) -> StorageResult<WarrantyBarcode> {
        let updated = self.mutate_barcode(
            id,
            |row| expect_status(row, from),
            |row| row.status = to,
        )?;
        let kind = if to == BarcodeStatus::Claimed {
            BarcodeEventKind::Claimed
        } else {
            BarcodeEventKind::StatusChanged
        };
        self.append_event(BarcodeEvent {
            barcode_id: id,
            kind,
            actor_id: actor,
            at,
            detail: Some(format!("{from} -> {to}")),
        });
        Ok(updated)
    }

    async fn activate(
        &self,
        id: BarcodeId,
        activation: Activation,
        actor: ActorId,
    ) -> StorageResult<WarrantyBarcode> {
        let at = activation.activated_at;
        let updated = self.mutate_barcode(
            id,
            |row| expect_status(row, BarcodeStatus::Generated),
            |row| {
                row.status = BarcodeStatus::Active;
                row.activated_at = Some(activation.activated_at);
                row.expires_at = Some(activation.expires_at);
                row.customer_id = Some(activation.customer_id);
                row.purchase = Some(activation.purchase);
            },
        )?;
        self.append_event(BarcodeEvent {
            barcode_id: id,
            kind: BarcodeEventKind::Activated,
            actor_id: actor,
            at,
            detail: None,
        });
        Ok(updated)
    }

    async fn revoke(
        &self,
        id: BarcodeId,
        from: BarcodeStatus,
        reason: String,
        actor: ActorId,
        at: Timestamp,
    ) -> StorageResult<WarrantyBarcode> {
        let updated = self.mutate_barcode(
            id,
            |row| expect_status(row, from),
            |row| {
                row.status = BarcodeStatus::Revoked;
                row.revoked_at = Some(at);
                row.revoked_reason = Some(reason.clone());
            },
        )?;
        self.append_event(BarcodeEvent {
            barcode_id: id,
            kind: BarcodeEventKind::Revoked,
            actor_id: actor,
            at,
            detail: Some(reason),
        });
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warranty_core::{CustomerId, ProductId, PurchaseInfo};

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn new_barcode(code: &str) -> NewBarcode {
        NewBarcode {
            code: BarcodeCode::parse(code).unwrap(),
            product_id: ProductId::new(1),
            storefront_id: None,
            batch_id: None,
            warranty_period_months: 24,
            created_at: ts("2024-01-01T00:00:00Z"),
        }
    }

    fn activation() -> Activation {
        Activation {
            customer_id: CustomerId::new(9),
            activated_at: ts("2024-01-10T00:00:00Z"),
            expires_at: ts("2026-01-10T00:00:00Z"),
            purchase: PurchaseInfo {
                retailer: "Acme".into(),
                invoice_number: None,
                serial_number: Some("SN-1".into()),
                purchase_date: "2024-01-09".parse().unwrap(),
                price: None,
            },
        }
    }

    #[tokio::test]
    async fn create_and_get_by_code() {
        let store = InMemoryStore::new();
        let created = store.create_barcode(new_barcode("WB-2024-00000001")).await.unwrap();

        let got = store.get_by_code(&created.code).await.unwrap().unwrap();
        assert_eq!(got, created);
        assert_eq!(got.status, BarcodeStatus::Generated);
        assert!(got.activated_at.is_none());
    }

    #[tokio::test]
    async fn duplicate_code_is_reported() {
        let store = InMemoryStore::new();
        store.create_barcode(new_barcode("WB-2024-00000001")).await.unwrap();

        let err = store
            .create_barcode(new_barcode("WB-2024-00000001"))
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::Duplicate("WB-2024-00000001".into()));
    }

    #[tokio::test]
    async fn bulk_create_is_all_or_nothing() {
        let store = InMemoryStore::new();
        store.create_barcode(new_barcode("WB-2024-00000003")).await.unwrap();

        let err = store
            .bulk_create_barcodes(vec![
                new_barcode("WB-2024-00000001"),
                new_barcode("WB-2024-00000002"),
                new_barcode("WB-2024-00000003"),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Duplicate(code) if code == "WB-2024-00000003"));
        assert_eq!(store.barcode_count(), 1);
    }

    #[tokio::test]
    async fn bulk_create_rejects_repeats_inside_the_chunk() {
        let store = InMemoryStore::new();
        let err = store
            .bulk_create_barcodes(vec![
                new_barcode("WB-2024-00000001"),
                new_barcode("WB-2024-00000001"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(_)));
        assert_eq!(store.barcode_count(), 0);
    }

    #[tokio::test]
    async fn second_activation_conflicts() {
        let store = InMemoryStore::new();
        let created = store.create_barcode(new_barcode("WB-2024-00000001")).await.unwrap();

        let active = store.activate(created.id, activation(), ActorId::new(9)).await.unwrap();
        assert_eq!(active.status, BarcodeStatus::Active);
        assert_eq!(active.customer_id, Some(CustomerId::new(9)));

        let err = store
            .activate(created.id, activation(), ActorId::new(9))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let events = store.barcode_events(created.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, BarcodeEventKind::Activated);
    }

    #[tokio::test]
    async fn revoke_records_reason() {
        let store = InMemoryStore::new();
        let created = store.create_barcode(new_barcode("WB-2024-00000001")).await.unwrap();

        let revoked = store
            .revoke(
                created.id,
                BarcodeStatus::Generated,
                "stolen stock".into(),
                ActorId::new(1),
                ts("2024-02-01T00:00:00Z"),
            )
            .await
            .unwrap();
        assert_eq!(revoked.status, BarcodeStatus::Revoked);
        assert_eq!(revoked.revoked_reason.as_deref(), Some("stolen stock"));
    }

    #[tokio::test]
    async fn list_filters_by_serial_number() {
        let store = InMemoryStore::new();
        let a = store.create_barcode(new_barcode("WB-2024-00000001")).await.unwrap();
        store.create_barcode(new_barcode("WB-2024-00000002")).await.unwrap();
        store.activate(a.id, activation(), ActorId::new(9)).await.unwrap();

        let filter = BarcodeFilter {
            serial_number: Some("SN-1".into()),
            ..Default::default()
        };
        let page = store.list_barcodes(&filter, Page::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, a.id);
    }

    #[tokio::test]
    async fn registered_only_filters_before_paging() {
        let store = InMemoryStore::new();
        for n in 1..=5 {
            store.create_barcode(new_barcode(&format!("WB-2024-0000000{n}"))).await.unwrap();
        }
        let last = store.create_barcode(new_barcode("WB-2024-00000006")).await.unwrap();
        store.activate(last.id, activation(), ActorId::new(9)).await.unwrap();

        let filter = BarcodeFilter {
            registered_only: true,
            purchase_date: Some("2024-01-09".parse().unwrap()),
            ..Default::default()
        };
        let page = store.list_barcodes(&filter, Page::new(0, 2)).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, last.id);

        let other_day = BarcodeFilter {
            purchase_date: Some("2024-01-10".parse().unwrap()),
            ..filter
        };
        assert_eq!(store.list_barcodes(&other_day, Page::new(0, 2)).await.unwrap().total, 0);
    }
}
