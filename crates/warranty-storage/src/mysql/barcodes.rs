use super::{
    invalid_column, map_sqlx_error, map_write_error, optional_timestamp, timestamp, MySqlStore,
};
use async_trait::async_trait;
use jiff::civil::Date;
use jiff::Timestamp;
use sqlx::mysql::MySqlRow;
use sqlx::{MySql, QueryBuilder, Row, Transaction};
use warranty_core::{
    Activation, ActorId, BarcodeCode, BarcodeEvent, BarcodeEventKind, BarcodeFilter, BarcodeId,
    BarcodeReader, BarcodeRepository, BarcodeStatus, BatchId, CustomerId, Money, NewBarcode, Page,
    Paged, ProductId, PurchaseInfo, StorageError, StorageResult, StorefrontId, WarrantyBarcode,
};

const BARCODE_COLUMNS: &str = "id, code, product_id, storefront_id, batch_id, status, \
     warranty_period_months, activated_at, expires_at, customer_id, retailer, invoice_number, \
     serial_number, purchase_date, price_cents, revoked_at, revoked_reason, created_at";

fn barcode_from_row(row: &MySqlRow) -> StorageResult<WarrantyBarcode> {
    let code: String = row.try_get("code").map_err(map_sqlx_error)?;
    let status: String = row.try_get("status").map_err(map_sqlx_error)?;
    let retailer: Option<String> = row.try_get("retailer").map_err(map_sqlx_error)?;
    let purchase_date: Option<String> = row.try_get("purchase_date").map_err(map_sqlx_error)?;

    let purchase = match (retailer, purchase_date) {
        (Some(retailer), Some(date)) => Some(PurchaseInfo {
            retailer,
            invoice_number: row.try_get("invoice_number").map_err(map_sqlx_error)?,
            serial_number: row.try_get("serial_number").map_err(map_sqlx_error)?,
            purchase_date: date
                .parse::<Date>()
                .map_err(|_| invalid_column("purchase_date", &date))?,
            price: row
                .try_get::<Option<u64>, _>("price_cents")
                .map_err(map_sqlx_error)?
                .map(Money::from_cents),
        }),
        _ => None,
    };

    Ok(WarrantyBarcode {
        id: BarcodeId::new(row.try_get("id").map_err(map_sqlx_error)?),
        code: BarcodeCode::new_unchecked(code),
        product_id: ProductId::new(row.try_get("product_id").map_err(map_sqlx_error)?),
        storefront_id: row
            .try_get::<Option<u64>, _>("storefront_id")
            .map_err(map_sqlx_error)?
            .map(StorefrontId::new),
        batch_id: row
            .try_get::<Option<u64>, _>("batch_id")
            .map_err(map_sqlx_error)?
            .map(BatchId::new),
        status: BarcodeStatus::parse(&status).ok_or_else(|| invalid_column("status", &status))?,
        warranty_period_months: row
            .try_get("warranty_period_months")
            .map_err(map_sqlx_error)?,
        activated_at: optional_timestamp(
            row.try_get("activated_at").map_err(map_sqlx_error)?,
            "activated_at",
        )?,
        expires_at: optional_timestamp(
            row.try_get("expires_at").map_err(map_sqlx_error)?,
            "expires_at",
        )?,
        customer_id: row
            .try_get::<Option<u64>, _>("customer_id")
            .map_err(map_sqlx_error)?
            .map(CustomerId::new),
        purchase,
        revoked_at: optional_timestamp(
            row.try_get("revoked_at").map_err(map_sqlx_error)?,
            "revoked_at",
        )?,
        revoked_reason: row.try_get("revoked_reason").map_err(map_sqlx_error)?,
        created_at: timestamp(row.try_get("created_at").map_err(map_sqlx_error)?, "created_at")?,
    })
}

fn event_kind(kind: BarcodeEventKind) -> &'static str {
    match kind {
        BarcodeEventKind::Activated => "activated",
        BarcodeEventKind::Revoked => "revoked",
        BarcodeEventKind::Claimed => "claimed",
        BarcodeEventKind::StatusChanged => "status_changed",
    }
}

fn parse_event_kind(kind: &str) -> StorageResult<BarcodeEventKind> {
    match kind {
        "activated" => Ok(BarcodeEventKind::Activated),
        "revoked" => Ok(BarcodeEventKind::Revoked),
        "claimed" => Ok(BarcodeEventKind::Claimed),
        "status_changed" => Ok(BarcodeEventKind::StatusChanged),
        other => Err(invalid_column("kind", other)),
    }
}

/// Inserts barcodes in one multi-row statement.
pub(super) async fn insert_barcodes(
    tx: &mut Transaction<'_, MySql>,
    barcodes: &[NewBarcode],
) -> StorageResult<()> {
    if barcodes.is_empty() {
        return Ok(());
    }

    let mut builder: QueryBuilder<MySql> = QueryBuilder::new(
        "INSERT INTO warranty_barcodes \
         (code, product_id, storefront_id, batch_id, status, warranty_period_months, created_at) ",
    );
    builder.push_values(barcodes, |mut row, barcode| {
        row.push_bind(barcode.code.as_str())
            .push_bind(barcode.product_id.get())
            .push_bind(barcode.storefront_id.map(StorefrontId::get))
            .push_bind(barcode.batch_id.map(BatchId::get))
            .push_bind(BarcodeStatus::Generated.as_str())
            .push_bind(barcode.warranty_period_months)
            .push_bind(barcode.created_at.as_second());
    });

    builder
        .build()
        .execute(&mut **tx)
        .await
        .map(|_| ())
        .map_err(|err| map_write_error(err, barcodes[0].code.as_str()))
}

async fn insert_event(
    tx: &mut Transaction<'_, MySql>,
    event: &BarcodeEvent,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO warranty_barcode_events (barcode_id, kind, actor_id, at, detail)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.barcode_id.get())
    .bind(event_kind(event.kind))
    .bind(event.actor_id.get())
    .bind(event.at.as_second())
    .bind(event.detail.as_deref())
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

impl MySqlStore {
    async fn fetch_barcode(&self, id: BarcodeId) -> StorageResult<Option<WarrantyBarcode>> {
        let row = sqlx::query(&format!(
            "SELECT {BARCODE_COLUMNS} FROM warranty_barcodes WHERE id = ? LIMIT 1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(barcode_from_row).transpose()
    }

    /// Explains why a guarded update touched no row.
    async fn guard_failure(&self, id: BarcodeId, expected: BarcodeStatus) -> StorageError {
        match self.fetch_barcode(id).await {
            Ok(Some(row)) => StorageError::Conflict(format!(
                "barcode {} is {}, expected {}",
                row.code, row.status, expected
            )),
            Ok(None) => StorageError::NotFound(id.to_string()),
            Err(err) => err,
        }
    }

    async fn finish_guarded_update(
        &self,
        mut tx: Transaction<'_, MySql>,
        rows_affected: u64,
        id: BarcodeId,
        expected: BarcodeStatus,
        event: BarcodeEvent,
    ) -> StorageResult<WarrantyBarcode> {
        if rows_affected == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(self.guard_failure(id, expected).await);
        }
        insert_event(&mut tx, &event).await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        self.fetch_barcode(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl BarcodeReader for MySqlStore {
    async fn get_barcode(&self, id: BarcodeId) -> StorageResult<Option<WarrantyBarcode>> {
        self.fetch_barcode(id).await
    }

    async fn get_by_code(&self, code: &BarcodeCode) -> StorageResult<Option<WarrantyBarcode>> {
        let row = sqlx::query(&format!(
            "SELECT {BARCODE_COLUMNS} FROM warranty_barcodes WHERE code = ? LIMIT 1"
        ))
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(barcode_from_row).transpose()
    }

    async fn code_exists(&self, code: &BarcodeCode) -> StorageResult<bool> {
        let exists = sqlx::query("SELECT 1 FROM warranty_barcodes WHERE code = ? LIMIT 1")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .is_some();

        Ok(exists)
    }

    async fn list_barcodes(
        &self,
        filter: &BarcodeFilter,
        page: Page,
    ) -> StorageResult<Paged<WarrantyBarcode>> {
        fn push_filter<'a>(builder: &mut QueryBuilder<'a, MySql>, filter: &'a BarcodeFilter) {
            builder.push(" WHERE 1 = 1");
            if let Some(product_id) = filter.product_id {
                builder.push(" AND product_id = ").push_bind(product_id.get());
            }
            if let Some(batch_id) = filter.batch_id {
                builder.push(" AND batch_id = ").push_bind(batch_id.get());
            }
            if let Some(status) = filter.status {
                builder.push(" AND status = ").push_bind(status.as_str());
            }
            if let Some(customer_id) = filter.customer_id {
                builder.push(" AND customer_id = ").push_bind(customer_id.get());
            }
            if let Some(serial) = filter.serial_number.as_deref() {
                builder.push(" AND serial_number = ").push_bind(serial);
            }
            if let Some(date) = filter.purchase_date {
                builder.push(" AND purchase_date = ").push_bind(date.to_string());
            }
            if filter.registered_only {
                builder.push(" AND status IN (");
                let mut statuses = builder.separated(", ");
                for status in BarcodeFilter::REGISTERED {
                    statuses.push_bind(status.as_str());
                }
                statuses.push_unseparated(")");
            }
        }

        let mut count: QueryBuilder<MySql> =
            QueryBuilder::new("SELECT COUNT(*) AS total FROM warranty_barcodes");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(map_sqlx_error)?;

        let mut select: QueryBuilder<MySql> =
            QueryBuilder::new(format!("SELECT {BARCODE_COLUMNS} FROM warranty_barcodes"));
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY id LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset);
        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Paged {
            items: rows.iter().map(barcode_from_row).collect::<StorageResult<_>>()?,
            total: total.max(0) as u64,
            offset: page.offset,
            limit: page.limit,
        })
    }

    async fn barcode_events(&self, id: BarcodeId) -> StorageResult<Vec<BarcodeEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT barcode_id, kind, actor_id, at, detail
            FROM warranty_barcode_events
            WHERE barcode_id = ?
            ORDER BY id
            "#,
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                let kind: String = row.try_get("kind").map_err(map_sqlx_error)?;
                Ok(BarcodeEvent {
                    barcode_id: BarcodeId::new(row.try_get("barcode_id").map_err(map_sqlx_error)?),
                    kind: parse_event_kind(&kind)?,
                    actor_id: ActorId::new(row.try_get("actor_id").map_err(map_sqlx_error)?),
                    at: timestamp(row.try_get("at").map_err(map_sqlx_error)?, "at")?,
                    detail: row.try_get("detail").map_err(map_sqlx_error)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl BarcodeRepository for MySqlStore {
    async fn create_barcode(&self, barcode: NewBarcode) -> StorageResult<WarrantyBarcode> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        insert_barcodes(&mut tx, std::slice::from_ref(&barcode)).await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        self.get_by_code(&barcode.code)
            .await?
            .ok_or_else(|| StorageError::NotFound(barcode.code.to_string()))
    }

    async fn bulk_create_barcodes(
        &self,
        barcodes: Vec<NewBarcode>,
    ) -> StorageResult<Vec<WarrantyBarcode>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        insert_barcodes(&mut tx, &barcodes).await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        let mut created = Vec::with_capacity(barcodes.len());
        for barcode in &barcodes {
            let row = self
                .get_by_code(&barcode.code)
                .await?
                .ok_or_else(|| StorageError::NotFound(barcode.code.to_string()))?;
            created.push(row);
        }
        Ok(created)
    }

    async fn update_status(
        &self,
        id: BarcodeId,
        from: BarcodeStatus,
        to: BarcodeStatus,
        actor: ActorId,
        at: Timestamp,
    ) -> StorageResult<WarrantyBarcode> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let result = sqlx::query("UPDATE warranty_barcodes SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(id.get())
            .bind(from.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let kind = if to == BarcodeStatus::Claimed {
            BarcodeEventKind::Claimed
        } else {
            BarcodeEventKind::StatusChanged
        };
        let event = BarcodeEvent {
            barcode_id: id,
            kind,
            actor_id: actor,
            at,
            detail: Some(format!("{from} -> {to}")),
        };
        self.finish_guarded_update(tx, result.rows_affected(), id, from, event)
            .await
    }

    async fn activate(
        &self,
        id: BarcodeId,
        activation: Activation,
        actor: ActorId,
    ) -> StorageResult<WarrantyBarcode> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let purchase = &activation.purchase;
        let result = sqlx::query(
            r#"
            UPDATE warranty_barcodes
            SET status = ?, activated_at = ?, expires_at = ?, customer_id = ?,
                retailer = ?, invoice_number = ?, serial_number = ?, purchase_date = ?,
                price_cents = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(BarcodeStatus::Active.as_str())
        .bind(activation.activated_at.as_second())
        .bind(activation.expires_at.as_second())
        .bind(activation.customer_id.get())
        .bind(purchase.retailer.as_str())
        .bind(purchase.invoice_number.as_deref())
        .bind(purchase.serial_number.as_deref())
        .bind(purchase.purchase_date.to_string())
        .bind(purchase.price.map(Money::cents))
        .bind(id.get())
        .bind(BarcodeStatus::Generated.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let event = BarcodeEvent {
            barcode_id: id,
            kind: BarcodeEventKind::Activated,
            actor_id: actor,
            at: activation.activated_at,
            detail: None,
        };
        self.finish_guarded_update(
            tx,
            result.rows_affected(),
            id,
            BarcodeStatus::Generated,
            event,
        )
        .await
    }

    async fn revoke(
        &self,
        id: BarcodeId,
        from: BarcodeStatus,
        reason: String,
        actor: ActorId,
        at: Timestamp,
    ) -> StorageResult<WarrantyBarcode> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let result = sqlx::query(
            r#"
            UPDATE warranty_barcodes
            SET status = ?, revoked_at = ?, revoked_reason = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(BarcodeStatus::Revoked.as_str())
        .bind(at.as_second())
        .bind(reason.as_str())
        .bind(id.get())
        .bind(from.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let event = BarcodeEvent {
            barcode_id: id,
            kind: BarcodeEventKind::Revoked,
            actor_id: actor,
            at,
            detail: Some(reason),
        };
        self.finish_guarded_update(tx, result.rows_affected(), id, from, event)
            .await
    }
}
