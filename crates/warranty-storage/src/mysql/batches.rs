use super::barcodes::insert_barcodes;
use super::{
    invalid_column, map_sqlx_error, map_write_error, optional_timestamp, timestamp, MySqlStore,
};
use async_trait::async_trait;
use sqlx::mysql::MySqlRow;
use sqlx::{MySql, QueryBuilder, Row};
use warranty_core::{
    ActorId, Batch, BatchFilter, BatchId, BatchRepository, BatchStatus, BatchTransition,
    BarcodeCode, BarcodePrefix, ChunkCommit, CollisionId, CollisionRecord, CollisionResolution,
    CollisionType, NewBatch, Page, Paged, Priority, ProductId, SequenceKind, SequenceRepository,
    StorageError, StorageResult, StorefrontId,
};

const BATCH_COLUMNS: &str = "id, batch_number, product_id, storefront_id, prefix, description, \
     tags, requested, generated, successful, failed, error_count, collision_count, retry_count, \
     max_retries, expiry_months, priority, notify_on_complete, status, last_error, created_by, \
     created_at, started_at, completed_at, cancelled_at, cancelled_by, cancel_reason, updated_at";

fn batch_from_row(row: &MySqlRow) -> StorageResult<Batch> {
    let prefix: String = row.try_get("prefix").map_err(map_sqlx_error)?;
    let tags: String = row.try_get("tags").map_err(map_sqlx_error)?;
    let priority: String = row.try_get("priority").map_err(map_sqlx_error)?;
    let status: String = row.try_get("status").map_err(map_sqlx_error)?;

    Ok(Batch {
        id: BatchId::new(row.try_get("id").map_err(map_sqlx_error)?),
        batch_number: row.try_get("batch_number").map_err(map_sqlx_error)?,
        product_id: ProductId::new(row.try_get("product_id").map_err(map_sqlx_error)?),
        storefront_id: StorefrontId::new(row.try_get("storefront_id").map_err(map_sqlx_error)?),
        prefix: BarcodePrefix::new(&prefix).map_err(|_| invalid_column("prefix", &prefix))?,
        description: row.try_get("description").map_err(map_sqlx_error)?,
        tags: serde_json::from_str(&tags).map_err(|_| invalid_column("tags", &tags))?,
        requested: row.try_get("requested").map_err(map_sqlx_error)?,
        generated: row.try_get("generated").map_err(map_sqlx_error)?,
        successful: row.try_get("successful").map_err(map_sqlx_error)?,
        failed: row.try_get("failed").map_err(map_sqlx_error)?,
        error_count: row.try_get("error_count").map_err(map_sqlx_error)?,
        collision_count: row.try_get("collision_count").map_err(map_sqlx_error)?,
        retry_count: row.try_get("retry_count").map_err(map_sqlx_error)?,
        max_retries: row.try_get("max_retries").map_err(map_sqlx_error)?,
        expiry_months: row.try_get("expiry_months").map_err(map_sqlx_error)?,
        priority: priority
            .parse::<Priority>()
            .map_err(|_| invalid_column("priority", &priority))?,
        notify_on_complete: row.try_get("notify_on_complete").map_err(map_sqlx_error)?,
        status: BatchStatus::parse(&status).ok_or_else(|| invalid_column("status", &status))?,
        last_error: row.try_get("last_error").map_err(map_sqlx_error)?,
        created_by: ActorId::new(row.try_get("created_by").map_err(map_sqlx_error)?),
        created_at: timestamp(row.try_get("created_at").map_err(map_sqlx_error)?, "created_at")?,
        started_at: optional_timestamp(
            row.try_get("started_at").map_err(map_sqlx_error)?,
            "started_at",
        )?,
        completed_at: optional_timestamp(
            row.try_get("completed_at").map_err(map_sqlx_error)?,
            "completed_at",
        )?,
        cancelled_at: optional_timestamp(
            row.try_get("cancelled_at").map_err(map_sqlx_error)?,
            "cancelled_at",
        )?,
        cancelled_by: row
            .try_get::<Option<u64>, _>("cancelled_by")
            .map_err(map_sqlx_error)?
            .map(ActorId::new),
        cancel_reason: row.try_get("cancel_reason").map_err(map_sqlx_error)?,
        updated_at: timestamp(row.try_get("updated_at").map_err(map_sqlx_error)?, "updated_at")?,
    })
}

fn collision_from_row(row: &MySqlRow) -> StorageResult<CollisionRecord> {
    let collision_type: String = row.try_get("collision_type").map_err(map_sqlx_error)?;
    let resolution: String = row.try_get("resolution").map_err(map_sqlx_error)?;
    let candidate: String = row.try_get("candidate").map_err(map_sqlx_error)?;

    Ok(CollisionRecord {
        id: CollisionId::new(row.try_get("id").map_err(map_sqlx_error)?),
        batch_id: BatchId::new(row.try_get("batch_id").map_err(map_sqlx_error)?),
        slot: row.try_get("slot").map_err(map_sqlx_error)?,
        candidate: BarcodeCode::new_unchecked(candidate),
        collision_type: CollisionType::parse(&collision_type)
            .ok_or_else(|| invalid_column("collision_type", &collision_type))?,
        resolution: CollisionResolution::parse(&resolution)
            .ok_or_else(|| invalid_column("resolution", &resolution))?,
        detected_at: timestamp(row.try_get("detected_at").map_err(map_sqlx_error)?, "detected_at")?,
        resolved_at: optional_timestamp(
            row.try_get("resolved_at").map_err(map_sqlx_error)?,
            "resolved_at",
        )?,
    })
}

fn push_batch_filter<'a>(builder: &mut QueryBuilder<'a, MySql>, filter: &'a BatchFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(priority) = filter.priority {
        builder.push(" AND priority = ").push_bind(priority.as_str());
    }
    if let Some(product_id) = filter.product_id {
        builder.push(" AND product_id = ").push_bind(product_id.get());
    }
    if let Some(storefront_id) = filter.storefront_id {
        builder.push(" AND storefront_id = ").push_bind(storefront_id.get());
    }
    if let Some(created_by) = filter.created_by {
        builder.push(" AND created_by = ").push_bind(created_by.get());
    }
    if let Some(from) = filter.created_from {
        builder.push(" AND created_at >= ").push_bind(from.as_second());
    }
    if let Some(to) = filter.created_to {
        builder.push(" AND created_at < ").push_bind(to.as_second());
    }
}

impl MySqlStore {
    async fn fetch_batch(&self, id: BatchId) -> StorageResult<Option<Batch>> {
        let row = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM warranty_batches WHERE id = ? LIMIT 1"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(batch_from_row).transpose()
    }

    async fn require_batch(&self, id: BatchId) -> StorageResult<Batch> {
        self.fetch_batch(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl BatchRepository for MySqlStore {
    async fn create_batch(&self, batch: NewBatch) -> StorageResult<Batch> {
        let tags = serde_json::to_string(&batch.tags)
            .map_err(|e| StorageError::InvalidData(format!("unencodable tags: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO warranty_batches (
                batch_number, product_id, storefront_id, prefix, description, tags,
                requested, max_retries, expiry_months, priority, notify_on_complete,
                status, created_by, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(batch.batch_number.as_str())
        .bind(batch.product_id.get())
        .bind(batch.storefront_id.get())
        .bind(batch.prefix.as_str())
        .bind(batch.description.as_deref())
        .bind(tags)
        .bind(batch.requested)
        .bind(batch.max_retries)
        .bind(batch.expiry_months)
        .bind(batch.priority.as_str())
        .bind(batch.notify_on_complete)
        .bind(BatchStatus::Pending.as_str())
        .bind(batch.created_by.get())
        .bind(batch.created_at.as_second())
        .bind(batch.created_at.as_second())
        .execute(&self.pool)
        .await
        .map_err(|err| map_write_error(err, &batch.batch_number))?;

        self.require_batch(BatchId::new(result.last_insert_id()))
            .await
    }

    async fn get_batch(&self, id: BatchId) -> StorageResult<Option<Batch>> {
        self.fetch_batch(id).await
    }

    async fn list_batches(&self, filter: &BatchFilter, page: Page) -> StorageResult<Paged<Batch>> {
        let mut count: QueryBuilder<MySql> =
            QueryBuilder::new("SELECT COUNT(*) AS total FROM warranty_batches");
        push_batch_filter(&mut count, filter);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(map_sqlx_error)?;

        let mut select: QueryBuilder<MySql> =
            QueryBuilder::new(format!("SELECT {BATCH_COLUMNS} FROM warranty_batches"));
        push_batch_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset);
        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Paged {
            items: rows.iter().map(batch_from_row).collect::<StorageResult<_>>()?,
            total: total.max(0) as u64,
            offset: page.offset,
            limit: page.limit,
        })
    }

    async fn transition_batch(
        &self,
        id: BatchId,
        transition: BatchTransition,
    ) -> StorageResult<Batch> {
        if !transition.from.can_become(transition.to) {
            return Err(StorageError::Conflict(format!(
                "batch {id} cannot move from {} to {}",
                transition.from, transition.to
            )));
        }

        let at = transition.at.as_second();
        let mut builder: QueryBuilder<MySql> = QueryBuilder::new("UPDATE warranty_batches SET status = ");
        builder
            .push_bind(transition.to.as_str())
            .push(", updated_at = ")
            .push_bind(at);
        match transition.to {
            BatchStatus::InProgress => {
                builder.push(", started_at = ").push_bind(at);
            }
            BatchStatus::Completed => {
                builder.push(", completed_at = ").push_bind(at);
            }
            BatchStatus::Cancelled => {
                builder
                    .push(", cancelled_at = ")
                    .push_bind(at)
                    .push(", cancelled_by = ")
                    .push_bind(transition.actor.map(ActorId::get))
                    .push(", cancel_reason = ")
                    .push_bind(transition.reason.as_deref());
            }
            BatchStatus::Failed => {
                builder
                    .push(", completed_at = ")
                    .push_bind(at)
                    .push(", last_error = COALESCE(")
                    .push_bind(transition.reason.as_deref())
                    .push(", last_error)");
            }
            BatchStatus::Pending => {}
        }
        builder
            .push(" WHERE id = ")
            .push_bind(id.get())
            .push(" AND status = ")
            .push_bind(transition.from.as_str());

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let row = self.require_batch(id).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "batch {} is {}, expected {}",
                row.batch_number, row.status, transition.from
            )));
        }
        Ok(row)
    }

    async fn commit_chunk(&self, id: BatchId, chunk: ChunkCommit) -> StorageResult<Batch> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // The row lock serializes chunk commits for one batch.
        let row = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM warranty_batches WHERE id = ? FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        let batch = batch_from_row(&row)?;

        if batch.status != BatchStatus::InProgress {
            return Err(StorageError::Conflict(format!(
                "batch {} is {}, chunks need in_progress",
                batch.batch_number, batch.status
            )));
        }
        let resolved = chunk.resolved_slots();
        if batch.generated + resolved > batch.requested {
            return Err(StorageError::Conflict(format!(
                "chunk of {resolved} slots overflows batch {}",
                batch.batch_number
            )));
        }

        // A unique violation aborts the statement; dropping `tx` rolls back.
        insert_barcodes(&mut tx, &chunk.barcodes).await?;

        if !chunk.collisions.is_empty() {
            let mut builder: QueryBuilder<MySql> = QueryBuilder::new(
                "INSERT INTO warranty_batch_collisions \
                 (batch_id, slot, candidate, collision_type, resolution, detected_at, resolved_at) ",
            );
            builder.push_values(&chunk.collisions, |mut row, collision| {
                row.push_bind(id.get())
                    .push_bind(collision.slot)
                    .push_bind(collision.candidate.as_str())
                    .push_bind(collision.collision_type.as_str())
                    .push_bind(collision.resolution.as_str())
                    .push_bind(collision.detected_at.as_second())
                    .push_bind(collision.resolved_at.map(|at| at.as_second()));
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        let updated_at = chunk
            .committed_at
            .map_or(batch.updated_at, |at| batch.updated_at.max(at));
        sqlx::query(
            r#"
            UPDATE warranty_batches
            SET generated = generated + ?,
                successful = successful + ?,
                failed = failed + ?,
                error_count = error_count + ?,
                retry_count = retry_count + ?,
                collision_count = collision_count + ?,
                last_error = COALESCE(?, last_error),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(resolved)
        .bind(chunk.barcodes.len() as u32)
        .bind(chunk.failed)
        .bind(chunk.errors)
        .bind(chunk.retries)
        .bind(chunk.collisions.len() as u32)
        .bind(chunk.last_error.as_deref())
        .bind(updated_at.as_second())
        .bind(id.get())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        self.require_batch(id).await
    }

    async fn list_collisions(
        &self,
        id: BatchId,
        page: Page,
    ) -> StorageResult<Paged<CollisionRecord>> {
        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM warranty_batch_collisions WHERE batch_id = ?",
        )
        .bind(id.get())
        .fetch_one(&self.pool)
        .await
        .and_then(|row| row.try_get("total"))
        .map_err(map_sqlx_error)?;

        let rows = sqlx::query(
            r#"
            SELECT id, batch_id, slot, candidate, collision_type, resolution, detected_at, resolved_at
            FROM warranty_batch_collisions
            WHERE batch_id = ?
            ORDER BY id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(id.get())
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(Paged {
            items: rows
                .iter()
                .map(collision_from_row)
                .collect::<StorageResult<_>>()?,
            total: total.max(0) as u64,
            offset: page.offset,
            limit: page.limit,
        })
    }
}

#[async_trait]
impl SequenceRepository for MySqlStore {
    async fn next_sequence(&self, kind: SequenceKind, year: i16) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query(
            r#"
            INSERT INTO warranty_sequences (kind, year, value)
            VALUES (?, ?, 1)
            ON DUPLICATE KEY UPDATE value = value + 1
            "#,
        )
        .bind(kind.as_str())
        .bind(year)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let value: u64 = sqlx::query("SELECT value FROM warranty_sequences WHERE kind = ? AND year = ?")
            .bind(kind.as_str())
            .bind(year)
            .fetch_one(&mut *tx)
            .await
            .and_then(|row| row.try_get("value"))
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(value)
    }
}
