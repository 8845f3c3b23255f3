use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque job identifier (UUID v4 in textual form).
pub type JobId = String;

/// Allocates a fresh job id.
pub fn new_job_id() -> JobId {
    Uuid::new_v4().to_string()
}

/// Lifecycle state of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Success,
    Error,
}

impl JobStatus {
    /// True for `success` and `error`; terminal jobs accept no further
    /// transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error)
    }

    /// Forward-only transition check: `queued → processing → {success, error}`.
    ///
    /// Cancellation may finalize a job that never started, so `queued` steps
    /// directly to `error` as well. Re-asserting the current status is not a
    /// transition and is always accepted.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (JobStatus::Queued, JobStatus::Processing) => true,
            (JobStatus::Queued, JobStatus::Error) => true,
            (JobStatus::Processing, JobStatus::Success | JobStatus::Error) => true,
            _ => false,
        }
    }
}

/// Where a job's text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSource {
    /// Originating tab/page identifier, when the caller has one.
    pub tab_id: Option<i64>,
    pub url: String,
    pub page_title: String,
    /// Title recovered by the article extractor, when it found one.
    pub article_title: Option<String>,
}

impl JobSource {
    /// The best available title: the extracted article title, falling back to
    /// the page title.
    pub fn display_title(&self) -> &str {
        self.article_title.as_deref().unwrap_or(&self.page_title)
    }
}

/// One text-to-audio conversion request and its tracked lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: JobId,
    pub created_at: DateTime<Utc>,
    pub source: JobSource,
    /// The text to convert. May be replaced until generation starts.
    pub text: String,
    /// Derived output filename, including the `.wav` extension.
    pub filename: String,
    pub status: JobStatus,
    /// 0–100; never decreases within a job's lifetime.
    pub progress: u8,
    /// Human-readable status or error text, safe to show to the user.
    pub message: String,
}

/// Partial update merged into a job record, last-write-wins per field.
///
/// `status` changes are validated against the forward-only transition rule;
/// a `progress` value below the current one is ignored so progress stays
/// monotonic even with racing writers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub text: Option<String>,
}

impl JobPatch {
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Progress bump plus stage message, the common pipeline update.
    pub fn progressing(progress: u8, message: impl Into<String>) -> Self {
        Self::default()
            .with_status(JobStatus::Processing)
            .with_progress(progress)
            .with_message(message)
    }

    /// Successful completion: progress 100 and a closing message.
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self::default()
            .with_status(JobStatus::Success)
            .with_progress(100)
            .with_message(message)
    }

    /// Failure: status `error` with a sanitized message. Progress is left
    /// where it was, showing how far the job got.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::default()
            .with_status(JobStatus::Error)
            .with_message(message)
    }
}
