//! Job tracking for the engine service.
//!
//! `JobRegistry` wraps the in-memory [`JobBoard`] with everything a running
//! service needs around it: every mutation is mirrored to the injected
//! [`KeyValueStore`], published as an [`EngineEvent`], and reflected in the
//! active-jobs indicator. Terminal outcomes additionally go through the
//! [`NotificationSink`].
//!
//! The board stays the single source of truth while the process lives; store
//! writes are a best-effort mirror and never fail a conversion.

use std::sync::Arc;

use engine_logging::{engine_debug, engine_warn};
use thiserror::Error;
use tokio::sync::Mutex;

use narrator_core::{BoardError, JobBoard, JobPatch, JobSource, JobStatus, ProcessingJob};

use crate::notify::NotificationSink;
use crate::store::{job_key, KeyValueStore, StoreError, JOB_KEY_PREFIX};
use crate::types::{Clock, EngineEvent};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Outbound event seam. The engine service hands the registry a sink wired
/// to its event channel; tests hand it a collecting sink.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

pub struct ChannelEventSink {
    tx: std::sync::mpsc::Sender<EngineEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: std::sync::mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

pub struct JobRegistry {
    board: Mutex<JobBoard>,
    store: Arc<dyn KeyValueStore>,
    events: Arc<dyn EventSink>,
    notifier: Arc<dyn NotificationSink>,
    clock: Clock,
    retention: chrono::Duration,
}

impl JobRegistry {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        events: Arc<dyn EventSink>,
        notifier: Arc<dyn NotificationSink>,
        clock: Clock,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            board: Mutex::new(JobBoard::new()),
            store,
            events,
            notifier,
            clock,
            retention,
        }
    }

    /// Creates a queued job, mirrors it, and announces it. Refused with
    /// [`BoardError::CapacityExceeded`] when the active cap is full.
    pub async fn create(
        &self,
        source: JobSource,
        text: String,
        filename: String,
    ) -> Result<ProcessingJob, RegistryError> {
        let (job, active) = {
            let mut board = self.board.lock().await;
            let job = board.create(source, text, filename, (self.clock)())?;
            (job, board.non_terminal_count())
        };
        self.mirror(&job).await;
        self.events.emit(EngineEvent::JobChanged { job: job.clone() });
        self.publish_active(active);
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> Option<ProcessingJob> {
        self.board.lock().await.get(id).cloned()
    }

    /// All current records, oldest first.
    pub async fn snapshot(&self) -> Vec<ProcessingJob> {
        let board = self.board.lock().await;
        let mut jobs: Vec<ProcessingJob> = board.jobs().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    /// Applies a partial update. Transition guards apply: a terminal record
    /// refuses to change status, which is how a late pipeline result loses
    /// the race against a timeout or cancellation.
    pub async fn update(
        &self,
        id: &str,
        patch: JobPatch,
    ) -> Result<ProcessingJob, RegistryError> {
        let (prev_status, job, active) = {
            let mut board = self.board.lock().await;
            let prev_status = board
                .get(id)
                .map(|job| job.status)
                .ok_or_else(|| BoardError::NotFound { id: id.to_string() })?;
            let job = board.merge(id, patch)?;
            (prev_status, job, board.non_terminal_count())
        };

        self.mirror(&job).await;
        self.events.emit(EngineEvent::JobChanged { job: job.clone() });

        if !prev_status.is_terminal() && job.status.is_terminal() {
            self.publish_active(active);
            self.record_outcome(&job).await;
            let title = job.source.display_title();
            match job.status {
                JobStatus::Success => self.notifier.success(title, &job.message),
                JobStatus::Error => self.notifier.failure(title, &job.message),
                JobStatus::Queued | JobStatus::Processing => {}
            }
        }
        Ok(job)
    }

    /// Removes a record if present. Idempotent.
    pub async fn remove(&self, id: &str) -> Option<ProcessingJob> {
        let (removed, active) = {
            let mut board = self.board.lock().await;
            let removed = board.remove(id);
            (removed, board.non_terminal_count())
        };
        let removed = removed?;

        if let Err(err) = self.store.remove(&job_key(id)).await {
            engine_warn!("failed to remove stored job {id}: {err}");
        }
        self.events.emit(EngineEvent::JobRemoved {
            job_id: id.to_string(),
        });
        if !removed.status.is_terminal() {
            self.publish_active(active);
        }
        Some(removed)
    }

    pub async fn can_start_new_job(&self) -> bool {
        self.board.lock().await.can_start_new_job()
    }

    pub async fn active_count(&self) -> usize {
        self.board.lock().await.non_terminal_count()
    }

    /// Evicts records older than the retention period, whatever their
    /// status. Returns the evicted records.
    pub async fn cleanup_old(&self) -> Vec<ProcessingJob> {
        let (evicted, active) = {
            let mut board = self.board.lock().await;
            let evicted = board.cleanup_old((self.clock)(), self.retention);
            (evicted, board.non_terminal_count())
        };
        if evicted.is_empty() {
            return evicted;
        }

        let mut lost_active = false;
        for job in &evicted {
            engine_debug!("retention evicted job {} ({:?})", job.id, job.status);
            if let Err(err) = self.store.remove(&job_key(&job.id)).await {
                engine_warn!("failed to remove stored job {}: {err}", job.id);
            }
            self.events.emit(EngineEvent::JobRemoved {
                job_id: job.id.clone(),
            });
            lost_active |= !job.status.is_terminal();
        }
        if lost_active {
            self.publish_active(active);
        }
        evicted
    }

    /// Reloads job records persisted by a previous run. Jobs that were still
    /// in flight when the process died are finalized as failed; their
    /// pipelines are gone. Returns how many records were restored.
    pub async fn restore_from_store(&self) -> Result<usize, RegistryError> {
        let keys = self.store.keys().await?;
        let mut restored = 0;
        for key in keys.iter().filter(|k| k.starts_with(JOB_KEY_PREFIX)) {
            let Some(value) = self.store.read(key).await? else {
                continue;
            };
            let mut job: ProcessingJob = match serde_json::from_value(value) {
                Ok(job) => job,
                Err(err) => {
                    engine_warn!("dropping undecodable stored job at {key}: {err}");
                    let _ = self.store.remove(key).await;
                    continue;
                }
            };
            if !job.status.is_terminal() {
                job.status = JobStatus::Error;
                job.message = "Conversion was interrupted. Try again.".to_string();
                self.mirror(&job).await;
            }
            let mut board = self.board.lock().await;
            board.restore(job.clone());
            drop(board);
            self.events.emit(EngineEvent::JobChanged { job });
            restored += 1;
        }
        self.publish_active(self.active_count().await);
        Ok(restored)
    }

    async fn mirror(&self, job: &ProcessingJob) {
        match serde_json::to_value(job) {
            Ok(value) => {
                if let Err(err) = self.store.write(&job_key(&job.id), value).await {
                    engine_warn!("failed to persist job {}: {err}", job.id);
                }
            }
            Err(err) => engine_warn!("failed to encode job {}: {err}", job.id),
        }
    }

    fn publish_active(&self, count: usize) {
        self.events.emit(EngineEvent::ActiveJobs { count });
        self.notifier.set_active_jobs(count);
    }

    async fn record_outcome(&self, job: &ProcessingJob) {
        let succeeded = job.status == JobStatus::Success;
        let active = self.active_count().await;
        let result = self
            .store
            .update(
                crate::store::OPS_STATE_KEY,
                Box::new(move |current| {
                    let mut ops: crate::store::OpsState = current
                        .and_then(|value| serde_json::from_value(value).ok())
                        .unwrap_or_default();
                    ops.active_jobs = active;
                    if succeeded {
                        ops.total_completed += 1;
                    } else {
                        ops.total_failed += 1;
                    }
                    serde_json::to_value(ops).ok()
                }),
            )
            .await;
        if let Err(err) = result {
            engine_warn!("failed to update ops state: {err}");
        }
    }
}
