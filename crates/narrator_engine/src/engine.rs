//! The engine service: a dedicated thread owning a tokio runtime, driven by
//! commands over a channel.
//!
//! Frontends stay synchronous: they construct an [`EngineHandle`], send
//! [`EngineCommand`]s, and poll [`EngineEvent`]s back. Everything async —
//! page extraction, the conversion pipelines, the retention sweep — lives on
//! the runtime behind the handle. Dropping the handle shuts the service down;
//! jobs still in flight are finalized as interrupted on the next start.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};
use tokio_util::sync::CancellationToken;

use narrator_core::{JobId, JobPatch, JobSource};

use crate::download::{DownloadSink, FsDownloadSink};
use crate::filename::derive_output_filename;
use crate::limiter::{LimiterSettings, SlidingWindowLimiter};
use crate::notify::{LogNotificationSink, NotificationSink};
use crate::page::{HttpPageSource, PageSettings, PageSource};
use crate::pipeline::{ConversionPipeline, PipelineSettings};
use crate::registry::{ChannelEventSink, EventSink, JobRegistry, RegistryError};
use crate::store::{KeyValueStore, UserSettings, USER_SETTINGS_KEY};
use crate::synth::{OpenAiSpeech, SpeechSettings, SpeechSynthesizer};
use crate::types::{system_clock, EngineEvent, FailureKind, SpeechError};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub page: PageSettings,
    pub speech: SpeechSettings,
    pub limiter: LimiterSettings,
    pub pipeline: PipelineSettings,
    /// Directory the download sink writes finished audio into.
    pub output_dir: PathBuf,
    /// Age at which the sweep evicts job records, regardless of status.
    pub retention: chrono::Duration,
    pub sweep_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            page: PageSettings::default(),
            speech: SpeechSettings::default(),
            limiter: LimiterSettings::default(),
            pipeline: PipelineSettings::default(),
            output_dir: PathBuf::from("narrations"),
            retention: chrono::Duration::minutes(60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Everything a frontend can ask the engine to do.
pub enum EngineCommand {
    /// Fetch a page, extract its readable text, and convert it.
    ConvertPage { url: String },
    /// Convert text the caller already has.
    ConvertText { source: JobSource, text: String },
    /// Replace a job's text, e.g. after the user edited the extraction.
    ReplaceText { job_id: JobId, text: String },
    /// Finalize the job as cancelled and stop its pipeline.
    Cancel { job_id: JobId },
    /// Drop the job record. Running work is stopped first.
    Remove { job_id: JobId },
}

/// Synchronous facade over the engine service thread.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
}

impl EngineHandle {
    /// Builds the HTTP collaborators, seeds `user` into the store, restores
    /// persisted jobs, and starts the service thread.
    pub fn new(
        settings: EngineSettings,
        store: Arc<dyn KeyValueStore>,
        user: UserSettings,
    ) -> Result<Self, SpeechError> {
        let collaborators = Collaborators {
            pages: Arc::new(HttpPageSource::new(settings.page.clone())?),
            synthesizer: Arc::new(OpenAiSpeech::new(settings.speech.clone())?),
            sink: Arc::new(FsDownloadSink::new(settings.output_dir.clone())),
        };

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        thread::spawn(move || {
            service_thread(settings, store, user, collaborators, cmd_rx, event_tx);
        });

        Ok(Self { cmd_tx, event_rx })
    }

    pub fn convert_page(&self, url: impl Into<String>) {
        self.send(EngineCommand::ConvertPage { url: url.into() });
    }

    pub fn convert_text(&self, source: JobSource, text: impl Into<String>) {
        self.send(EngineCommand::ConvertText {
            source,
            text: text.into(),
        });
    }

    pub fn replace_text(&self, job_id: JobId, text: impl Into<String>) {
        self.send(EngineCommand::ReplaceText {
            job_id,
            text: text.into(),
        });
    }

    pub fn cancel(&self, job_id: JobId) {
        self.send(EngineCommand::Cancel { job_id });
    }

    pub fn remove(&self, job_id: JobId) {
        self.send(EngineCommand::Remove { job_id });
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Blocking poll with a deadline, for frontends that have nothing to do
    /// between events.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    fn send(&self, command: EngineCommand) {
        // A closed channel means the service thread is gone; nothing useful
        // to do with the command.
        let _ = self.cmd_tx.send(command);
    }
}

/// Externally-built adapters handed to the service thread. Construction
/// happens in [`EngineHandle::new`] so client-build failures surface
/// synchronously to the caller.
struct Collaborators {
    pages: Arc<dyn PageSource>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn DownloadSink>,
}

fn service_thread(
    settings: EngineSettings,
    store: Arc<dyn KeyValueStore>,
    user: UserSettings,
    collaborators: Collaborators,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");

    let events: Arc<dyn EventSink> = Arc::new(ChannelEventSink::new(event_tx));
    let notifier: Arc<dyn NotificationSink> = Arc::new(LogNotificationSink);
    let registry = Arc::new(JobRegistry::new(
        store.clone(),
        events.clone(),
        notifier,
        system_clock(),
        settings.retention,
    ));
    let limiter = Arc::new(SlidingWindowLimiter::new(settings.limiter.clone()));
    let pipeline = Arc::new(ConversionPipeline::new(
        registry.clone(),
        store.clone(),
        limiter,
        collaborators.synthesizer,
        collaborators.sink,
        settings.pipeline.clone(),
    ));

    runtime.block_on(async {
        match serde_json::to_value(&user) {
            Ok(value) => {
                if let Err(err) = store.write(USER_SETTINGS_KEY, value).await {
                    engine_warn!("failed to seed user settings: {err}");
                }
            }
            Err(err) => engine_warn!("failed to encode user settings: {err}"),
        }
        match registry.restore_from_store().await {
            Ok(0) => {}
            Ok(restored) => engine_info!("restored {restored} job records from the store"),
            Err(err) => engine_warn!("job restore failed: {err}"),
        }
    });

    let sweep_registry = registry.clone();
    let sweep_interval = settings.sweep_interval;
    runtime.spawn(async move {
        let mut tick = tokio::time::interval(sweep_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            sweep_registry.cleanup_old().await;
        }
    });

    let service = EngineService {
        registry,
        pipeline,
        pages: collaborators.pages,
        events,
        cancels: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
    };

    while let Ok(command) = cmd_rx.recv() {
        let service = service.clone();
        runtime.spawn(async move {
            service.handle(command).await;
        });
    }
    engine_info!("engine command channel closed, shutting down");
}

#[derive(Clone)]
struct EngineService {
    registry: Arc<JobRegistry>,
    pipeline: Arc<ConversionPipeline>,
    pages: Arc<dyn PageSource>,
    events: Arc<dyn EventSink>,
    cancels: Arc<tokio::sync::Mutex<HashMap<JobId, CancellationToken>>>,
}

impl EngineService {
    async fn handle(&self, command: EngineCommand) {
        match command {
            EngineCommand::ConvertPage { url } => self.convert_page(url).await,
            EngineCommand::ConvertText { source, text } => {
                self.convert_text(source, text).await;
            }
            EngineCommand::ReplaceText { job_id, text } => {
                let patch = JobPatch::default().with_text(text);
                if let Err(err) = self.registry.update(&job_id, patch).await {
                    engine_warn!("text replacement for {job_id} refused: {err}");
                }
            }
            EngineCommand::Cancel { job_id } => self.cancel(job_id).await,
            EngineCommand::Remove { job_id } => {
                if let Some(token) = self.cancels.lock().await.remove(&job_id) {
                    token.cancel();
                }
                if self.registry.remove(&job_id).await.is_none() {
                    engine_debug!("remove for unknown job {job_id}");
                }
            }
        }
    }

    async fn convert_page(&self, url: String) {
        // Cheap pre-check; creation re-checks under the lock.
        if !self.registry.can_start_new_job().await {
            self.reject(&url, FailureKind::CapacityExceeded);
            return;
        }

        let page = match self.pages.load(&url).await {
            Ok(page) => page,
            Err(err) => {
                engine_warn!("extraction failed for {url}: {err}");
                self.reject(&url, err.kind);
                return;
            }
        };

        let title = page
            .article_title
            .as_deref()
            .or((page.page_title != url).then_some(page.page_title.as_str()));
        let filename = derive_output_filename(title, &url);
        let source = JobSource {
            tab_id: None,
            url: page.url,
            page_title: page.page_title,
            article_title: page.article_title,
        };
        self.spawn_conversion(source, page.text, filename, &url).await;
    }

    async fn convert_text(&self, source: JobSource, text: String) {
        if text.trim().is_empty() {
            self.reject(&source.url, FailureKind::Extraction);
            return;
        }
        let filename = derive_output_filename(Some(source.display_title()), &source.url);
        let url = source.url.clone();
        self.spawn_conversion(source, text, filename, &url).await;
    }

    async fn spawn_conversion(
        &self,
        source: JobSource,
        text: String,
        filename: String,
        requested_url: &str,
    ) {
        let job = match self.registry.create(source, text, filename).await {
            Ok(job) => job,
            Err(RegistryError::Board(err)) => {
                engine_warn!("conversion of {requested_url} refused: {err}");
                self.reject(requested_url, FailureKind::CapacityExceeded);
                return;
            }
            Err(err) => {
                engine_warn!("conversion of {requested_url} failed to start: {err}");
                self.reject(requested_url, FailureKind::Configuration);
                return;
            }
        };

        let token = CancellationToken::new();
        self.cancels
            .lock()
            .await
            .insert(job.id.clone(), token.clone());

        let pipeline = self.pipeline.clone();
        let cancels = self.cancels.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            pipeline.run(&job_id, token).await;
            cancels.lock().await.remove(&job_id);
        });
    }

    /// Out-of-band cancellation: finalize the record first so the outcome is
    /// immediate, then stop the pipeline. The transition guard makes the
    /// record write idempotent against the pipeline's own terminal write.
    async fn cancel(&self, job_id: JobId) {
        let patch = JobPatch::failed(FailureKind::Cancelled.user_message());
        match self.registry.update(&job_id, patch).await {
            Ok(_) => {}
            Err(RegistryError::Board(err)) => {
                engine_debug!("cancel of {job_id} had no record to finalize: {err}")
            }
            Err(err) => engine_warn!("cancel of {job_id} could not update the record: {err}"),
        }
        if let Some(token) = self.cancels.lock().await.remove(&job_id) {
            token.cancel();
        }
    }

    fn reject(&self, url: &str, kind: FailureKind) {
        self.events.emit(EngineEvent::ConversionRejected {
            url: url.to_string(),
            kind,
        });
    }
}
