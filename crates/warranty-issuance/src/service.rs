use crate::engine::{BatchEngine, CancelMode, CancelRequest};
use crate::progress::{ProgressSnapshot, Step};
use crate::settings::EngineSettings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use warranty_core::batch::{MAX_EXPIRY_MONTHS, MAX_QUANTITY, MIN_EXPIRY_MONTHS, MIN_QUANTITY};
use warranty_core::calendar::utc_year;
use warranty_core::deadline::within;
use warranty_core::{
    Actor, BarcodePrefix, Batch, BatchFilter, BatchId, BatchStatus, BatchTransition, Clock,
    CollisionRecord, IssuanceStore, NewBatch, Notifier, Page, Paged, Priority, ProductCatalog,
    ProductId, Result, SequenceKind, StorageError, StorefrontId, Violations, WarrantyError,
};
use warranty_generator::Generator;

const MAX_RETRIES_LIMIT: u32 = 10;
const MAX_TAGS: usize = 20;
const MAX_DESCRIPTION_LEN: usize = 1000;

/// Parameters of a new issuance batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatch {
    pub product_id: ProductId,
    pub storefront_id: StorefrontId,
    pub quantity: u32,
    pub prefix: String,
    pub expiry_months: u32,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Per-slot regeneration budget; the engine default when absent.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub notify_on_complete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelBatch {
    pub reason: Option<String>,
    /// Interrupt in-flight generation instead of letting staged codes commit.
    #[serde(default)]
    pub force: bool,
}

/// Administrative surface of barcode issuance.
pub struct IssuanceService<S, G> {
    store: Arc<S>,
    catalog: Arc<dyn ProductCatalog>,
    clock: Arc<dyn Clock>,
    settings: Arc<EngineSettings>,
    engine: BatchEngine<S, G>,
}

impl<S: IssuanceStore, G: Generator> IssuanceService<S, G> {
    pub fn new(
        store: Arc<S>,
        generator: G,
        catalog: Arc<dyn ProductCatalog>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let settings = Arc::new(settings);
        let engine = BatchEngine::new(
            store.clone(),
            Arc::new(generator),
            notifier,
            clock.clone(),
            settings.clone(),
        );
        Self {
            store,
            catalog,
            clock,
            settings,
            engine,
        }
    }

    pub fn engine(&self) -> &BatchEngine<S, G> {
        &self.engine
    }

    fn validate(&self, request: &CreateBatch) -> Result<BarcodePrefix> {
        let mut violations = Violations::new();
        violations
            .check(
                (MIN_QUANTITY..=MAX_QUANTITY).contains(&request.quantity),
                "quantity",
                format!("must be between {MIN_QUANTITY} and {MAX_QUANTITY}"),
                || Some(request.quantity.to_string()),
            )
            .check(
                (MIN_EXPIRY_MONTHS..=MAX_EXPIRY_MONTHS).contains(&request.expiry_months),
                "expiry_months",
                format!("must be between {MIN_EXPIRY_MONTHS} and {MAX_EXPIRY_MONTHS}"),
                || Some(request.expiry_months.to_string()),
            )
            .check(
                request.max_retries.is_none_or(|n| n <= MAX_RETRIES_LIMIT),
                "max_retries",
                format!("must be at most {MAX_RETRIES_LIMIT}"),
                || request.max_retries.map(|n| n.to_string()),
            )
            .check(
                request.tags.len() <= MAX_TAGS,
                "tags",
                format!("at most {MAX_TAGS} tags"),
                || None,
            )
            .check(
                request
                    .description
                    .as_ref()
                    .is_none_or(|d| d.chars().count() <= MAX_DESCRIPTION_LEN),
                "description",
                format!("at most {MAX_DESCRIPTION_LEN} characters"),
                || None,
            );

        let prefix = match BarcodePrefix::new(&request.prefix) {
            Ok(prefix) => Some(prefix),
            Err(WarrantyError::InvalidArgument(fields)) => {
                fields.into_iter().for_each(|f| violations.push(f));
                None
            }
            Err(other) => return Err(other),
        };

        violations.finish()?;
        prefix.ok_or_else(|| WarrantyError::invalid("prefix", "is required", None))
    }

    /// Creates a `pending` batch.
    #[instrument(skip_all, fields(actor = %actor.id, product_id = %request.product_id))]
    pub async fn create_batch(&self, actor: &Actor, request: CreateBatch) -> Result<Batch> {
        actor.require_admin("create batches")?;
        let prefix = self.validate(&request)?;

        within(self.settings.request_timeout, "batch.create", async {
            if self.catalog.lookup_product(request.product_id).await?.is_none() {
                return Err(WarrantyError::invalid(
                    "product_id",
                    "unknown product",
                    Some(request.product_id.to_string()),
                ));
            }

            let now = self.clock.now();
            let year = utc_year(now);
            let sequence = self.store.next_sequence(SequenceKind::Batch, year).await?;
            let batch = self
                .store
                .create_batch(NewBatch {
                    batch_number: SequenceKind::Batch.format(year, sequence),
                    product_id: request.product_id,
                    storefront_id: request.storefront_id,
                    prefix,
                    description: request.description,
                    tags: request.tags,
                    requested: request.quantity,
                    max_retries: request
                        .max_retries
                        .unwrap_or(self.settings.default_max_retries),
                    expiry_months: request.expiry_months,
                    priority: request.priority,
                    notify_on_complete: request.notify_on_complete,
                    created_by: actor.id,
                    created_at: now,
                })
                .await?;

            info!(batch_id = %batch.id, batch = %batch.batch_number, requested = batch.requested, "batch created");
            Ok(batch)
        })
        .await
    }

    async fn require_batch(&self, id: BatchId) -> Result<Batch> {
        self.store
            .get_batch(id)
            .await?
            .ok_or_else(|| WarrantyError::not_found("batch", id))
    }

    /// Moves a batch to `in_progress` and launches its run. Starting a
    /// running or completed batch returns it unchanged.
    #[instrument(skip_all, fields(actor = %actor.id, batch_id = %id))]
    pub async fn start_batch(&self, actor: &Actor, id: BatchId) -> Result<Batch> {
        actor.require_admin("start batches")?;

        within(self.settings.request_timeout, "batch.start", async {
            let batch = self.require_batch(id).await?;
            match batch.status {
                BatchStatus::Pending => {
                    let transition = BatchTransition {
                        from: BatchStatus::Pending,
                        to: BatchStatus::InProgress,
                        at: self.clock.now(),
                        actor: Some(actor.id),
                        reason: None,
                    };
                    match self.store.transition_batch(id, transition).await {
                        Ok(started) => {
                            info!(batch = %started.batch_number, "batch started");
                            self.engine.launch(started.clone());
                            Ok(started)
                        }
                        // Lost a race with another start or a cancel.
                        Err(StorageError::Conflict(_)) => {
                            let current = self.require_batch(id).await?;
                            self.ensure_running(current)
                        }
                        Err(err) => Err(err.into()),
                    }
                }
                _ => self.ensure_running(batch),
            }
        })
        .await
    }

    fn ensure_running(&self, batch: Batch) -> Result<Batch> {
        match batch.status {
            BatchStatus::InProgress => {
                // Resumes a batch whose run died with a previous process.
                self.engine.launch(batch.clone());
                Ok(batch)
            }
            BatchStatus::Completed => Ok(batch),
            BatchStatus::Pending | BatchStatus::Cancelled | BatchStatus::Failed => Err(
                WarrantyError::invalid_state("batch", batch.status, "start"),
            ),
        }
    }

    pub async fn progress(&self, id: BatchId) -> Result<ProgressSnapshot> {
        let batch = within(
            self.settings.request_timeout,
            "batch.progress",
            self.require_batch(id),
        )
        .await?;
        let now = self.clock.now();

        Ok(match self.engine.run_handle(id) {
            Some(handle) => {
                let step = handle.step();
                let window = handle.window();
                ProgressSnapshot::new(&batch, step, Some(&*window), now)
            }
            None => ProgressSnapshot::new(&batch, Step::Generating, None, now),
        })
    }

    /// Cancels a pending or running batch. Committed barcodes remain.
    #[instrument(skip_all, fields(actor = %actor.id, batch_id = %id, force = request.force))]
    pub async fn cancel_batch(
        &self,
        actor: &Actor,
        id: BatchId,
        request: CancelBatch,
    ) -> Result<Batch> {
        actor.require_admin("cancel batches")?;

        within(self.settings.request_timeout, "batch.cancel", async {
            // A pending batch may be started between our read and our write.
            for _ in 0..3 {
                let batch = self.require_batch(id).await?;
                if batch.status.is_terminal() {
                    return Err(WarrantyError::invalid_state("batch", batch.status, "cancel"));
                }

                if batch.status == BatchStatus::InProgress {
                    if let Some(handle) = self.engine.run_handle(id) {
                        handle.request_cancel(CancelRequest {
                            mode: if request.force {
                                CancelMode::Force
                            } else {
                                CancelMode::Graceful
                            },
                            actor: actor.id,
                            reason: request.reason.clone(),
                        });
                        handle.wait_done().await;

                        let finished = self.require_batch(id).await?;
                        return match finished.status {
                            BatchStatus::Cancelled => {
                                info!(batch = %finished.batch_number, generated = finished.generated, "batch cancelled");
                                Ok(finished)
                            }
                            status => Err(WarrantyError::invalid_state("batch", status, "cancel")),
                        };
                    }
                }

                let transition = BatchTransition {
                    from: batch.status,
                    to: BatchStatus::Cancelled,
                    at: self.clock.now(),
                    actor: Some(actor.id),
                    reason: request.reason.clone(),
                };
                match self.store.transition_batch(id, transition).await {
                    Ok(cancelled) => {
                        info!(batch = %cancelled.batch_number, "batch cancelled");
                        return Ok(cancelled);
                    }
                    Err(StorageError::Conflict(_)) => continue,
                    Err(err) => return Err(err.into()),
                }
            }
            Err(WarrantyError::Conflict(format!(
                "batch {id} kept changing while cancelling"
            )))
        })
        .await
    }

    pub async fn get_batch(&self, actor: &Actor, id: BatchId) -> Result<Batch> {
        actor.require_admin("read batches")?;
        within(self.settings.request_timeout, "batch.get", self.require_batch(id)).await
    }

    pub async fn list_batches(
        &self,
        actor: &Actor,
        filter: &BatchFilter,
        page: Page,
    ) -> Result<Paged<Batch>> {
        actor.require_admin("list batches")?;
        within(self.settings.request_timeout, "batch.list", async {
            Ok(self.store.list_batches(filter, page).await?)
        })
        .await
    }

    pub async fn list_collisions(
        &self,
        actor: &Actor,
        id: BatchId,
        page: Page,
    ) -> Result<Paged<CollisionRecord>> {
        actor.require_admin("list collisions")?;
        within(self.settings.request_timeout, "batch.collisions", async {
            self.require_batch(id).await?;
            Ok(self.store.list_collisions(id, page).await?)
        })
        .await
    }
}
