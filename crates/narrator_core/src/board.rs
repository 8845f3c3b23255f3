use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::job::{new_job_id, JobId, JobPatch, JobSource, JobStatus, ProcessingJob};

/// Maximum number of jobs allowed in a non-terminal state at once.
pub const MAX_ACTIVE_JOBS: usize = 3;

/// Failure modes of the board's own operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("too many conversions in progress (limit {limit})")]
    CapacityExceeded { limit: usize },
    #[error("job {id} not found")]
    NotFound { id: JobId },
    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

/// Pure, in-memory job table keyed by id.
///
/// All methods are synchronous and side-effect free. The engine wraps a board
/// in a mutex and layers persistence and event emission on top; callers there
/// get one critical section per mutation, which is what makes the merge
/// semantics here safe against the cleanup sweep and cancellation racing the
/// pipeline's own updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobBoard {
    jobs: BTreeMap<JobId, ProcessingJob>,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `queued` job, or refuses with `CapacityExceeded` when
    /// [`MAX_ACTIVE_JOBS`] jobs are already non-terminal.
    pub fn create(
        &mut self,
        source: JobSource,
        text: String,
        filename: String,
        now: DateTime<Utc>,
    ) -> Result<ProcessingJob, BoardError> {
        if !self.can_start_new_job() {
            return Err(BoardError::CapacityExceeded {
                limit: MAX_ACTIVE_JOBS,
            });
        }
        let job = ProcessingJob {
            id: new_job_id(),
            created_at: now,
            source,
            text,
            filename,
            status: JobStatus::Queued,
            progress: 0,
            message: String::from("Waiting to start"),
        };
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Option<&ProcessingJob> {
        self.jobs.get(id)
    }

    /// Merges `patch` into the job, last-write-wins per field.
    ///
    /// A `status` change must follow the forward-only transition rule; a
    /// merge that would leave a terminal state is refused, which is the guard
    /// that keeps a late pipeline completion from overwriting a timeout or
    /// cancellation result. A `progress` value below the current one is
    /// dropped rather than applied.
    pub fn merge(&mut self, id: &str, patch: JobPatch) -> Result<ProcessingJob, BoardError> {
        let job = match self.jobs.get_mut(id) {
            Some(job) => job,
            None => {
                return Err(BoardError::NotFound { id: id.to_string() });
            }
        };
        if let Some(next) = patch.status {
            if !job.status.can_transition_to(next) {
                return Err(BoardError::InvalidTransition {
                    from: job.status,
                    to: next,
                });
            }
            job.status = next;
        }
        if let Some(progress) = patch.progress {
            job.progress = job.progress.max(progress);
        }
        if let Some(message) = patch.message {
            job.message = message;
        }
        if let Some(text) = patch.text {
            job.text = text;
        }
        Ok(job.clone())
    }

    /// Removes the job if present. Idempotent; removing an unknown id is a
    /// no-op returning `None`.
    pub fn remove(&mut self, id: &str) -> Option<ProcessingJob> {
        self.jobs.remove(id)
    }

    /// True iff fewer than [`MAX_ACTIVE_JOBS`] jobs are non-terminal.
    pub fn can_start_new_job(&self) -> bool {
        self.non_terminal_count() < MAX_ACTIVE_JOBS
    }

    pub fn non_terminal_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|job| !job.status.is_terminal())
            .count()
    }

    /// Evicts every job created more than `retention` ago, regardless of
    /// status, and returns the evicted records. Run from a recurring sweep.
    pub fn cleanup_old(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<ProcessingJob> {
        let expired: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| now - job.created_at > retention)
            .map(|job| job.id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.jobs.remove(&id))
            .collect()
    }

    /// Re-inserts a previously persisted job, keeping its id and timestamps.
    /// Bypasses the capacity check: restored jobs are finalized by the
    /// registry before anything new is admitted.
    pub fn restore(&mut self, job: ProcessingJob) {
        self.jobs.insert(job.id.clone(), job);
    }

    /// Jobs in ascending id order (BTreeMap iteration order).
    pub fn jobs(&self) -> impl Iterator<Item = &ProcessingJob> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
