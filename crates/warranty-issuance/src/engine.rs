//! Batch execution.
//!
//! One run per in-progress batch. A feeder pushes slot indices into a
//! bounded queue, a fixed pool of workers turns slots into accepted codes
//! (or failures) through the generator and the collision detector, and the
//! run task aggregates worker outcomes into chunk commits. Only the
//! aggregator writes batch progress, so counters never move backwards.

use crate::detector::{CollisionDetector, Verdict};
use crate::progress::{RateWindow, Step};
use crate::settings::EngineSettings;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use jiff::Timestamp;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};
use warranty_core::calendar::utc_year;
use warranty_core::{
    ActorId, BarcodeCode, BarcodePrefix, Batch, BatchId, BatchStatus, BatchTransition,
    ChunkCommit, Clock, CollisionResolution, CollisionType, IssuanceStore, NewBarcode,
    NewCollision, NotificationPayload, Notifier, StorageError,
};
use warranty_generator::{GenerationRequest, Generator};

/// Template used for the completion notification.
pub const BATCH_COMPLETED_TEMPLATE: &str = "warranty_batch_completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelMode {
    /// Stop drawing new slots and commit what is already staged.
    Graceful,
    /// Interrupt in-flight generation and drop staged codes.
    Force,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CancelRequest {
    pub mode: CancelMode,
    pub actor: ActorId,
    pub reason: Option<String>,
}

/// Shared state of one running batch.
pub(crate) struct RunHandle {
    cancel: watch::Sender<Option<CancelRequest>>,
    done: watch::Sender<bool>,
    step: AtomicU8,
    window: Mutex<RateWindow>,
}

impl RunHandle {
    fn new(rate_window: usize) -> Self {
        Self {
            cancel: watch::Sender::new(None),
            done: watch::Sender::new(false),
            step: AtomicU8::new(Step::Queued.as_u8()),
            window: Mutex::new(RateWindow::new(rate_window)),
        }
    }

    /// Records a cancellation. A forced request upgrades a graceful one,
    /// never the other way round.
    pub fn request_cancel(&self, request: CancelRequest) {
        self.cancel.send_modify(|current| match current {
            Some(existing) if existing.mode == CancelMode::Force => {}
            _ => *current = Some(request),
        });
    }

    fn cancel_request(&self) -> Option<CancelRequest> {
        self.cancel.borrow().clone()
    }

    pub async fn wait_done(&self) {
        let mut done = self.done.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = done.wait_for(|finished| *finished).await;
    }

    fn mark_done(&self) {
        self.done.send_replace(true);
    }

    pub fn step(&self) -> Step {
        Step::from_u8(self.step.load(Ordering::Acquire))
    }

    fn set_step(&self, step: Step) {
        self.step.store(step.as_u8(), Ordering::Release);
    }

    pub fn window(&self) -> MutexGuard<'_, RateWindow> {
        self.window.lock()
    }
}

/// Runs batches in the background and tracks the live ones.
pub struct BatchEngine<S, G> {
    store: Arc<S>,
    generator: Arc<G>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: Arc<EngineSettings>,
    runs: Arc<DashMap<BatchId, Arc<RunHandle>>>,
}

impl<S, G> Clone for BatchEngine<S, G> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            generator: self.generator.clone(),
            notifier: self.notifier.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
            runs: self.runs.clone(),
        }
    }
}

impl<S: IssuanceStore, G: Generator> BatchEngine<S, G> {
    pub fn new(
        store: Arc<S>,
        generator: Arc<G>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: Arc<EngineSettings>,
    ) -> Self {
        Self {
            store,
            generator,
            notifier,
            clock,
            settings,
            runs: Arc::new(DashMap::new()),
        }
    }

    pub fn is_running(&self, id: BatchId) -> bool {
        self.runs.contains_key(&id)
    }

    pub(crate) fn run_handle(&self, id: BatchId) -> Option<Arc<RunHandle>> {
        self.runs.get(&id).map(|handle| handle.clone())
    }

    /// Spawns a run for an in-progress batch unless one is already live.
    pub(crate) fn launch(&self, batch: Batch) -> Arc<RunHandle> {
        let handle = match self.runs.entry(batch.id) {
            Entry::Occupied(entry) => return entry.get().clone(),
            Entry::Vacant(entry) => entry
                .insert(Arc::new(RunHandle::new(self.settings.rate_window)))
                .clone(),
        };

        let id = batch.id;
        let run = Run {
            store: self.store.clone(),
            generator: self.generator.clone(),
            notifier: self.notifier.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
            handle: handle.clone(),
        };
        let runs = self.runs.clone();
        let span = tracing::info_span!("batch_run", batch_id = %id, batch = %batch.batch_number);

        tokio::spawn(
            async move {
                let end = run.execute(&batch).await;
                run.finish(&batch, end).await;
                runs.remove(&id);
                run.handle.mark_done();
            }
            .instrument(span),
        );

        handle
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotTask {
    slot: u32,
    attempt: u32,
}

#[derive(Debug)]
enum SlotResult {
    Accepted(BarcodeCode),
    Failed(String),
}

#[derive(Debug)]
struct SlotOutcome {
    task: SlotTask,
    result: SlotResult,
    collisions: Vec<NewCollision>,
    errors: u32,
}

#[derive(Debug, PartialEq, Eq)]
enum RunEnd {
    Completed,
    Failed(String),
    Cancelled,
    /// The batch row changed under the run, e.g. a concurrent cancel.
    Interrupted(String),
}

struct Run<S, G> {
    store: Arc<S>,
    generator: Arc<G>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: Arc<EngineSettings>,
    handle: Arc<RunHandle>,
}

/// Accepted codes and failures not yet committed, in arrival order.
#[derive(Default)]
struct PendingChunk {
    commit: ChunkCommit,
    tasks: Vec<SlotTask>,
}

impl PendingChunk {
    fn resolved(&self) -> u32 {
        self.commit.resolved_slots()
    }

    fn take(&mut self) -> PendingChunk {
        std::mem::take(self)
    }
}

impl<S: IssuanceStore, G: Generator> Run<S, G> {
    async fn execute(&self, batch: &Batch) -> RunEnd {
        let total = batch.remaining();
        if total == 0 {
            return RunEnd::Completed;
        }
        info!(requested = batch.requested, remaining = total, "batch run started");

        let detector = match CollisionDetector::new(self.store.clone(), total as usize) {
            Ok(detector) => Arc::new(detector),
            Err(err) => return RunEnd::Failed(err.to_string()),
        };

        let (slot_tx, slot_rx) = mpsc::channel::<SlotTask>(self.settings.queue_capacity.max(1));
        let slot_rx = Arc::new(tokio::sync::Mutex::new(slot_rx));
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<SlotOutcome>();

        let feeder = tokio::spawn({
            let slot_tx = slot_tx.clone();
            let slots = batch.generated..batch.requested;
            async move {
                for slot in slots {
                    if slot_tx.send(SlotTask { slot, attempt: 0 }).await.is_err() {
                        break;
                    }
                }
            }
        });

        let mut workers = JoinSet::new();
        for index in 0..self.settings.workers.max(1) {
            let worker = Worker {
                index,
                detector: detector.clone(),
                generator: self.generator.clone(),
                clock: self.clock.clone(),
                prefix: batch.prefix.clone(),
                year: utc_year(batch.created_at),
                source: (batch.id.get() & 0xFFFF) as u16 ^ self.settings.worker_seed,
                requested: batch.requested,
                max_retries: batch.max_retries,
                slots: slot_rx.clone(),
                outcomes: outcome_tx.clone(),
                cancel: self.handle.cancel.subscribe(),
            };
            workers.spawn(worker.run().in_current_span());
        }
        drop(outcome_tx);

        self.handle.set_step(Step::Generating);
        let end = self
            .aggregate(batch, total, &slot_tx, &mut outcome_rx)
            .await;

        feeder.abort();
        drop(slot_tx);
        if matches!(
            self.handle.cancel_request(),
            Some(CancelRequest {
                mode: CancelMode::Force,
                ..
            })
        ) {
            workers.abort_all();
        }
        while workers.join_next().await.is_some() {}

        end
    }

    async fn aggregate(
        &self,
        batch: &Batch,
        total: u32,
        slot_tx: &mpsc::Sender<SlotTask>,
        outcome_rx: &mut mpsc::UnboundedReceiver<SlotOutcome>,
    ) -> RunEnd {
        let mut cancel = self.handle.cancel.subscribe();
        let mut unresolved = total;
        let mut pending = PendingChunk::default();

        while unresolved > 0 {
            if let Some(request) = self.handle.cancel_request() {
                if request.mode == CancelMode::Graceful && !pending.commit.is_empty() {
                    if let Err(end) = self.commit(batch, &mut pending, slot_tx, &mut unresolved).await {
                        return end;
                    }
                }
                return RunEnd::Cancelled;
            }

            let outcome = tokio::select! {
                outcome = outcome_rx.recv() => outcome,
                _ = cancel.changed() => continue,
            };
            let Some(outcome) = outcome else {
                if self.handle.cancel_request().is_some() {
                    continue;
                }
                return RunEnd::Interrupted("workers stopped before every slot resolved".into());
            };

            pending.commit.collisions.extend(outcome.collisions);
            pending.commit.errors += outcome.errors;
            match outcome.result {
                SlotResult::Accepted(code) => {
                    pending.commit.barcodes.push(NewBarcode {
                        code,
                        product_id: batch.product_id,
                        storefront_id: Some(batch.storefront_id),
                        batch_id: Some(batch.id),
                        warranty_period_months: batch.expiry_months,
                        created_at: self.clock.now(),
                    });
                    pending.tasks.push(outcome.task);
                }
                SlotResult::Failed(reason) => {
                    debug!(slot = outcome.task.slot, %reason, "slot failed");
                    pending.commit.failed += 1;
                    pending.commit.errors += 1;
                    pending.commit.last_error = Some(reason);
                }
            }

            let resolved = pending.resolved();
            if resolved as usize >= self.settings.chunk_size || resolved >= unresolved {
                if let Err(end) = self.commit(batch, &mut pending, slot_tx, &mut unresolved).await {
                    return end;
                }
            }
        }

        RunEnd::Completed
    }

    /// Commits the pending chunk. Codes the store rejects as duplicates are
    /// pulled out and their slots regenerated; transient errors are retried
    /// with backoff.
    async fn commit(
        &self,
        batch: &Batch,
        pending: &mut PendingChunk,
        slot_tx: &mpsc::Sender<SlotTask>,
        unresolved: &mut u32,
    ) -> Result<(), RunEnd> {
        let mut chunk = pending.take();
        let mut requeue = Vec::new();
        let mut transient_failures = 0u32;
        self.handle.set_step(Step::Committing);

        let committed = loop {
            let now = self.clock.now();
            chunk.commit.committed_at = Some(now);

            match self.store.commit_chunk(batch.id, chunk.commit.clone()).await {
                Ok(committed) => break committed,
                Err(StorageError::Duplicate(code)) => {
                    let Some(index) = chunk
                        .commit
                        .barcodes
                        .iter()
                        .position(|barcode| barcode.code.as_str() == code)
                    else {
                        return Err(RunEnd::Failed(format!(
                            "store rejected unknown key {code}"
                        )));
                    };
                    let barcode = chunk.commit.barcodes.remove(index);
                    let task = chunk.tasks.remove(index);
                    let next = task.attempt + 1;
                    let exhausted = next > batch.max_retries;
                    debug!(slot = task.slot, code = %barcode.code, "duplicate at commit");

                    chunk.commit.collisions.push(collision(
                        task.slot,
                        barcode.code,
                        CollisionType::DuplicateInStore,
                        exhausted,
                        now,
                    ));
                    if exhausted {
                        chunk.commit.failed += 1;
                        chunk.commit.errors += 1;
                        chunk.commit.last_error =
                            Some(format!("slot {} exhausted its retry budget", task.slot));
                    } else {
                        requeue.push(SlotTask {
                            slot: task.slot,
                            attempt: next,
                        });
                    }
                }
                Err(err) if err.is_transient() && transient_failures < batch.max_retries => {
                    transient_failures += 1;
                    chunk.commit.retries += 1;
                    let delay = self.settings.commit_backoff * 2u32.saturating_pow(transient_failures - 1);
                    warn!(error = %err, attempt = transient_failures, delay_ms = delay.as_millis() as u64, "chunk commit failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(StorageError::Conflict(message)) => return Err(RunEnd::Interrupted(message)),
                Err(err) => {
                    error!(error = %err, "chunk commit failed permanently");
                    return Err(RunEnd::Failed(err.to_string()));
                }
            }
        };

        *unresolved -= chunk.commit.resolved_slots();
        self.handle
            .window()
            .record(self.clock.now(), committed.generated);
        self.handle.set_step(Step::Generating);
        debug!(
            generated = committed.generated,
            successful = committed.successful,
            failed = committed.failed,
            "chunk committed"
        );

        for task in requeue {
            if slot_tx.send(task).await.is_err() {
                return Err(RunEnd::Interrupted("slot queue closed".into()));
            }
        }

        let threshold = u64::from(committed.requested) * u64::from(self.settings.failure_threshold_percent);
        if u64::from(committed.failed) * 100 > threshold {
            return Err(RunEnd::Failed(format!(
                "failure threshold exceeded: {} of {} slots failed",
                committed.failed, committed.requested
            )));
        }
        Ok(())
    }

    async fn finish(&self, batch: &Batch, end: RunEnd) {
        self.handle.set_step(Step::Finalizing);
        let cancel = self.handle.cancel_request();

        let transition = match (&end, cancel) {
            (RunEnd::Completed | RunEnd::Cancelled, Some(request)) => BatchTransition {
                from: BatchStatus::InProgress,
                to: BatchStatus::Cancelled,
                at: self.clock.now(),
                actor: Some(request.actor),
                reason: request.reason,
            },
            (RunEnd::Completed, None) => BatchTransition {
                from: BatchStatus::InProgress,
                to: BatchStatus::Completed,
                at: self.clock.now(),
                actor: None,
                reason: None,
            },
            (RunEnd::Failed(reason), _) => BatchTransition {
                from: BatchStatus::InProgress,
                to: BatchStatus::Failed,
                at: self.clock.now(),
                actor: None,
                reason: Some(reason.clone()),
            },
            (RunEnd::Cancelled, None) | (RunEnd::Interrupted(_), _) => {
                warn!(?end, "batch run stopped without a final transition");
                self.handle.set_step(Step::Finished);
                return;
            }
        };

        match self.store.transition_batch(batch.id, transition).await {
            Ok(finished) => {
                info!(
                    status = %finished.status,
                    successful = finished.successful,
                    failed = finished.failed,
                    collisions = finished.collision_count,
                    "batch run finished"
                );
                if finished.status == BatchStatus::Completed && finished.notify_on_complete {
                    self.notify_completed(&finished).await;
                }
            }
            Err(err) => error!(error = %err, "failed to record batch outcome"),
        }
        self.handle.set_step(Step::Finished);
    }

    async fn notify_completed(&self, batch: &Batch) {
        let mut payload = NotificationPayload::new();
        payload.insert("batch_number", batch.batch_number.clone());
        payload.insert("successful", batch.successful.to_string());
        payload.insert("failed", batch.failed.to_string());
        payload.insert("collisions", batch.collision_count.to_string());

        if let Err(err) = self
            .notifier
            .notify(&batch.created_by.to_string(), BATCH_COMPLETED_TEMPLATE, payload)
            .await
        {
            warn!(error = %err, "batch completion notification failed");
        }
    }
}

fn collision(
    slot: u32,
    candidate: BarcodeCode,
    collision_type: CollisionType,
    exhausted: bool,
    at: Timestamp,
) -> NewCollision {
    NewCollision {
        slot,
        candidate,
        collision_type,
        resolution: if exhausted {
            CollisionResolution::Dropped
        } else {
            CollisionResolution::Regenerated
        },
        detected_at: at,
        resolved_at: Some(at),
    }
}

struct Worker<S, G> {
    index: usize,
    detector: Arc<CollisionDetector<S>>,
    generator: Arc<G>,
    clock: Arc<dyn Clock>,
    prefix: BarcodePrefix,
    year: i16,
    source: u16,
    requested: u32,
    max_retries: u32,
    slots: Arc<tokio::sync::Mutex<mpsc::Receiver<SlotTask>>>,
    outcomes: mpsc::UnboundedSender<SlotOutcome>,
    cancel: watch::Receiver<Option<CancelRequest>>,
}

impl<S: IssuanceStore, G: Generator> Worker<S, G> {
    async fn run(self) {
        loop {
            if self.cancel.borrow().is_some() {
                break;
            }
            let task = self.slots.lock().await.recv().await;
            let Some(task) = task else {
                break;
            };
            let outcome = self.resolve(task).await;
            if self.outcomes.send(outcome).is_err() {
                break;
            }
        }
        debug!(worker = self.index, "worker stopped");
    }

    async fn resolve(&self, task: SlotTask) -> SlotOutcome {
        let mut collisions = Vec::new();
        let mut errors = 0;
        let mut last_error = None;

        for attempt in task.attempt..=self.max_retries {
            let counter = attempt.wrapping_mul(self.requested).wrapping_add(task.slot);
            let candidate = self.generator.generate(&GenerationRequest {
                prefix: &self.prefix,
                year: self.year,
                source: self.source,
                counter,
            });

            match self.detector.check(&candidate).await {
                Ok(Verdict::Accepted) => {
                    return SlotOutcome {
                        task: SlotTask {
                            slot: task.slot,
                            attempt,
                        },
                        result: SlotResult::Accepted(candidate),
                        collisions,
                        errors,
                    };
                }
                Ok(Verdict::Collision(kind)) => {
                    debug!(slot = task.slot, attempt, %candidate, kind = kind.as_str(), "collision");
                    last_error = Some(format!("candidate {candidate} collided ({})", kind.as_str()));
                    collisions.push(collision(
                        task.slot,
                        candidate,
                        kind,
                        attempt >= self.max_retries,
                        self.clock.now(),
                    ));
                }
                Err(err) => {
                    warn!(slot = task.slot, attempt, error = %err, "collision check failed");
                    errors += 1;
                    last_error = Some(err.to_string());
                }
            }
        }

        SlotOutcome {
            task,
            result: SlotResult::Failed(
                last_error.unwrap_or_else(|| format!("slot {} has no attempts left", task.slot)),
            ),
            collisions,
            errors,
        }
    }
}
