use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use narrator_core::{JobId, ProcessingJob};
use thiserror::Error;

/// Injected wall clock, so retention and timestamps are testable.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The real wall clock.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// State changes published by the engine for UI/badge consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A job record was created or mutated; carries the full record.
    JobChanged { job: ProcessingJob },
    /// A job record was removed (cancellation cleanup or retention sweep).
    JobRemoved { job_id: JobId },
    /// The number of non-terminal jobs changed.
    ActiveJobs { count: usize },
    /// A conversion request was refused before a job record existed.
    ConversionRejected { url: String, kind: FailureKind },
}

/// Subclassification of provider HTTP failures, for messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFault {
    Auth,
    RateLimited,
    BadRequest,
    Server,
}

impl ProviderFault {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ProviderFault::Auth,
            429 => ProviderFault::RateLimited,
            400..=499 => ProviderFault::BadRequest,
            _ => ProviderFault::Server,
        }
    }
}

/// Failure taxonomy for the conversion pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Provider credentials missing or unusable before any call was made.
    Configuration,
    /// The concurrency cap refused a new job.
    CapacityExceeded,
    /// A single request's cost exceeds the total token budget; waiting can
    /// never satisfy it, so it is not retried.
    BudgetExceeded { cost: u32, budget: u32 },
    /// The provider answered with a 4xx/5xx status.
    Provider(ProviderFault),
    /// Transport-level failure talking to the provider.
    Network,
    /// The pipeline's wall-clock timeout fired first.
    Timeout,
    /// The content collaborator produced no usable text.
    Extraction,
    /// The finished audio could not be handed to the download sink.
    Delivery,
    /// The user cancelled the job.
    Cancelled,
}

impl FailureKind {
    /// Sanitized text written into the job record. Never carries provider
    /// payloads, status lines, or IO error strings; those stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            FailureKind::Configuration => {
                "No API key configured. Add your speech provider key in settings.".to_string()
            }
            FailureKind::CapacityExceeded => {
                "Too many conversions are already running. Wait for one to finish.".to_string()
            }
            FailureKind::BudgetExceeded { .. } => {
                "A section of the text is too large for the configured rate limit.".to_string()
            }
            FailureKind::Provider(ProviderFault::Auth) => {
                "The speech provider rejected the API key. Check your credentials.".to_string()
            }
            FailureKind::Provider(ProviderFault::RateLimited) => {
                "The speech provider is rate limiting requests. Try again in a minute.".to_string()
            }
            FailureKind::Provider(ProviderFault::BadRequest) => {
                "The speech provider rejected the request.".to_string()
            }
            FailureKind::Provider(ProviderFault::Server) => {
                "The speech provider reported a server error. Try again later.".to_string()
            }
            FailureKind::Network => {
                "Could not reach the speech provider. Check your connection.".to_string()
            }
            FailureKind::Timeout => {
                "The conversion timed out. Try shortening the content.".to_string()
            }
            FailureKind::Extraction => {
                "Could not extract readable text from the page.".to_string()
            }
            FailureKind::Delivery => "Could not save the audio file.".to_string(),
            FailureKind::Cancelled => "Cancelled by user".to_string(),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Configuration => write!(f, "configuration"),
            FailureKind::CapacityExceeded => write!(f, "capacity exceeded"),
            FailureKind::BudgetExceeded { cost, budget } => {
                write!(f, "budget exceeded (cost {cost}, budget {budget})")
            }
            FailureKind::Provider(ProviderFault::Auth) => write!(f, "provider auth"),
            FailureKind::Provider(ProviderFault::RateLimited) => write!(f, "provider rate limited"),
            FailureKind::Provider(ProviderFault::BadRequest) => write!(f, "provider bad request"),
            FailureKind::Provider(ProviderFault::Server) => write!(f, "provider server error"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Extraction => write!(f, "extraction failed"),
            FailureKind::Delivery => write!(f, "delivery failed"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Internal error carrier for the pipeline: a taxonomy kind plus a detail
/// string that goes to the logs only, never into a job message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct SpeechError {
    pub kind: FailureKind,
    pub detail: String,
}

impl SpeechError {
    pub(crate) fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}
