use jiff::{SignedDuration, Timestamp};
use serde::Serialize;
use std::collections::VecDeque;
use warranty_core::{Batch, BatchId, BatchStatus};

/// What a batch run is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Queued,
    Generating,
    Committing,
    Finalizing,
    Finished,
}

impl Step {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Step::Queued,
            1 => Step::Generating,
            2 => Step::Committing,
            3 => Step::Finalizing,
            _ => Step::Finished,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Step::Queued => 0,
            Step::Generating => 1,
            Step::Committing => 2,
            Step::Finalizing => 3,
            Step::Finished => 4,
        }
    }
}

/// Sliding window of (time, generated) samples taken at each commit.
#[derive(Debug)]
pub struct RateWindow {
    capacity: usize,
    samples: VecDeque<(Timestamp, u32)>,
}

impl RateWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            samples: VecDeque::with_capacity(capacity.max(2)),
        }
    }

    pub fn record(&mut self, at: Timestamp, generated: u32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((at, generated));
    }

    /// Items per second across the window, `None` with fewer than two
    /// samples or no elapsed time.
    pub fn rate(&self) -> Option<f64> {
        let (first_at, first) = *self.samples.front()?;
        let (last_at, last) = *self.samples.back()?;
        let elapsed = last_at.duration_since(first_at).as_secs_f64();
        if self.samples.len() < 2 || elapsed <= 0.0 {
            return None;
        }
        Some(f64::from(last.saturating_sub(first)) / elapsed)
    }

    /// Linear extrapolation of when `remaining` items will be done.
    pub fn estimate_completion(&self, now: Timestamp, remaining: u32) -> Option<Timestamp> {
        let rate = self.rate().filter(|rate| *rate > 0.0)?;
        let seconds = f64::from(remaining) / rate;
        let eta = SignedDuration::try_from_secs_f64(seconds).ok()?;
        now.checked_add(eta).ok()
    }
}

/// Polling view of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub batch_id: BatchId,
    pub batch_number: String,
    pub status: BatchStatus,
    pub progress: u8,
    pub current_step: Step,
    pub processed: u32,
    pub remaining: u32,
    pub successful: u32,
    pub failed: u32,
    pub error_count: u32,
    pub collision_count: u32,
    pub retry_count: u32,
    /// Items per second over the recent commit window.
    pub rate: Option<f64>,
    pub last_updated: Timestamp,
    pub estimated_completion: Option<Timestamp>,
}

impl ProgressSnapshot {
    pub(crate) fn new(batch: &Batch, step: Step, window: Option<&RateWindow>, now: Timestamp) -> Self {
        let live = batch.status == BatchStatus::InProgress;
        let rate = window.filter(|_| live).and_then(RateWindow::rate);
        let estimated_completion = window
            .filter(|_| live)
            .and_then(|w| w.estimate_completion(now, batch.remaining()));
        let current_step = match batch.status {
            BatchStatus::Pending => Step::Queued,
            BatchStatus::InProgress => step,
            _ => Step::Finished,
        };

        Self {
            batch_id: batch.id,
            batch_number: batch.batch_number.clone(),
            status: batch.status,
            progress: batch.progress(),
            current_step,
            processed: batch.generated,
            remaining: batch.remaining(),
            successful: batch.successful,
            failed: batch.failed,
            error_count: batch.error_count,
            collision_count: batch.collision_count,
            retry_count: batch.retry_count,
            rate,
            last_updated: batch.updated_at,
            estimated_completion,
        }
    }
}
