//! Narrator engine: the async conversion service behind the frontends.
//!
//! Owns page extraction, provider calls behind a shared rate limiter, job
//! tracking with persistence, and delivery of the finished WAV files. Driven
//! through [`EngineHandle`] from synchronous code.
mod download;
mod engine;
mod filename;
mod limiter;
mod notify;
mod page;
mod persist;
mod pipeline;
mod registry;
mod store;
mod synth;
mod types;

pub use download::{DownloadPayload, DownloadSink, FsDownloadSink, WAV_MIME};
pub use engine::{EngineCommand, EngineHandle, EngineSettings};
pub use filename::derive_output_filename;
pub use limiter::{LimiterSettings, ScheduleError, SlidingWindowLimiter, ThrottleHook};
pub use notify::{LogNotificationSink, NotificationSink};
pub use page::{ExtractedPage, HttpPageSource, PageSettings, PageSource};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use pipeline::{ConversionPipeline, PipelineSettings};
pub use registry::{ChannelEventSink, EventSink, JobRegistry, RegistryError};
pub use store::{
    job_key, FileStore, KeyValueStore, MemoryStore, MergeFn, OpsState, StoreChange, StoreError,
    UserSettings, JOB_KEY_PREFIX, OPS_STATE_KEY, USER_SETTINGS_KEY,
};
pub use synth::{OpenAiSpeech, SpeechRequest, SpeechSettings, SpeechSynthesizer};
pub use types::{system_clock, Clock, EngineEvent, FailureKind, ProviderFault, SpeechError};
