//! The conversion pipeline: one job record in, one delivered WAV out.
//!
//! `run` drives a single job end to end: load credentials, chunk the text,
//! synthesize each chunk behind the shared rate limiter, assemble the audio
//! in order, encode, deliver, finalize. The whole pipeline races a wall-clock
//! timeout and the job's cancellation token; whichever finishes first writes
//! the terminal record, and the transition guard in the registry keeps the
//! losers from overwriting it.

use std::sync::Arc;
use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};
use tokio_util::sync::CancellationToken;

use narrator_core::{split_text_into_chunks, AudioFormat, JobPatch, TextChunk};

use crate::download::{DownloadPayload, DownloadSink};
use crate::limiter::SlidingWindowLimiter;
use crate::registry::{JobRegistry, RegistryError};
use crate::store::{KeyValueStore, UserSettings, USER_SETTINGS_KEY};
use crate::synth::{SpeechRequest, SpeechSynthesizer};
use crate::types::{FailureKind, SpeechError};

// Progress map. Synthesis owns the wide middle band; the band below 100
// leaves headroom so the bar never shows done before delivery finished.
const PROGRESS_PREPARED: u8 = 5;
const PROGRESS_SYNTH_SPAN: u32 = 85;
const PROGRESS_ENCODING: u8 = 95;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Upper token estimate per synthesized chunk.
    pub chunk_budget_tokens: u32,
    /// Wall-clock limit for one whole conversion.
    pub job_timeout: Duration,
    /// Sample layout of the provider's raw audio, used for WAV encoding.
    pub audio: AudioFormat,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_budget_tokens: 1000,
            job_timeout: Duration::from_secs(45 * 60),
            audio: AudioFormat::default(),
        }
    }
}

pub struct ConversionPipeline {
    registry: Arc<JobRegistry>,
    store: Arc<dyn KeyValueStore>,
    limiter: Arc<SlidingWindowLimiter>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn DownloadSink>,
    settings: PipelineSettings,
}

impl ConversionPipeline {
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<dyn KeyValueStore>,
        limiter: Arc<SlidingWindowLimiter>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn DownloadSink>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            store,
            limiter,
            synthesizer,
            sink,
            settings,
        }
    }

    /// Runs the job to a terminal state. Never panics the worker: every
    /// outcome ends as a guarded terminal merge on the job record.
    pub async fn run(&self, job_id: &str, cancel: CancellationToken) {
        let outcome = tokio::select! {
            outcome = self.convert(job_id, &cancel) => outcome,
            _ = tokio::time::sleep(self.settings.job_timeout) => {
                engine_warn!("job {job_id} hit the {:?} timeout", self.settings.job_timeout);
                Err(SpeechError::new(FailureKind::Timeout, "wall-clock timeout"))
            }
            _ = cancel.cancelled() => {
                Err(SpeechError::new(FailureKind::Cancelled, "cancellation token fired"))
            }
        };

        match outcome {
            Ok(()) => {}
            Err(err) => {
                engine_warn!("job {job_id} failed: {err}");
                self.finalize_failure(job_id, &err.kind).await;
            }
        }
    }

    async fn convert(&self, job_id: &str, cancel: &CancellationToken) -> Result<(), SpeechError> {
        let job = self.registry.get(job_id).await.ok_or_else(|| {
            SpeechError::new(FailureKind::Cancelled, "job record missing at start")
        })?;

        let settings = self.user_settings().await;
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| SpeechError::new(FailureKind::Configuration, "no api key"))?
            .to_string();

        let chunks = split_text_into_chunks(&job.text, self.settings.chunk_budget_tokens);
        if chunks.is_empty() {
            return Err(SpeechError::new(
                FailureKind::Extraction,
                "no speakable text in job",
            ));
        }
        engine_info!(
            "job {job_id}: {} chunks, {} chars",
            chunks.len(),
            job.text.len()
        );
        self.progress(job_id, PROGRESS_PREPARED, "Prepared text for synthesis")
            .await?;

        let samples = self
            .synthesize_chunks(job_id, &chunks, &api_key, &settings, cancel)
            .await?;

        self.progress(job_id, PROGRESS_ENCODING, "Encoding audio").await?;
        let wav = self.settings.audio.encode(&samples);

        let payload = DownloadPayload::wav(job.filename.clone(), wav);
        let delivered = self.sink.deliver(payload).await?;
        if let Some(path) = delivered {
            engine_debug!("job {job_id}: delivered to {}", path.display());
        }

        let done = JobPatch::succeeded(format!("Audio saved as {}", job.filename));
        if let Err(err) = self.registry.update(job_id, done).await {
            // A cancel can land between delivery and this merge; the record
            // keeps the earlier terminal state.
            engine_debug!("job {job_id}: success merge refused: {err}");
        }
        Ok(())
    }

    /// Synthesizes every chunk in order, one provider call per chunk, each
    /// admitted by the shared limiter at its estimated token cost.
    async fn synthesize_chunks(
        &self,
        job_id: &str,
        chunks: &[TextChunk],
        api_key: &str,
        settings: &UserSettings,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, SpeechError> {
        let total = chunks.len() as u32;
        let mut samples = Vec::new();
        for chunk in chunks {
            let step = chunk.index as u32;
            let pct = PROGRESS_PREPARED + (step * PROGRESS_SYNTH_SPAN / total) as u8;
            self.progress(
                job_id,
                pct,
                format!("Generating speech ({}/{total})", step + 1),
            )
            .await?;

            let request = SpeechRequest {
                api_key: api_key.to_string(),
                model: settings.model.clone(),
                voice: settings.voice.clone(),
                text: chunk.text.clone(),
            };
            let audio = self
                .limiter
                .schedule(chunk.estimated_tokens, cancel, || {
                    self.synthesizer.synthesize(&request)
                })
                .await??;
            engine_debug!(
                "job {job_id}: chunk {}/{total} -> {} bytes",
                step + 1,
                audio.len()
            );
            samples.extend_from_slice(&audio);
        }
        Ok(samples)
    }

    async fn user_settings(&self) -> UserSettings {
        match self.store.read(USER_SETTINGS_KEY).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
            Ok(None) => UserSettings::default(),
            Err(err) => {
                engine_warn!("failed to read user settings: {err}");
                UserSettings::default()
            }
        }
    }

    /// A refused progress merge means the record is terminal or gone;
    /// translated into an error so the pipeline stops doing work.
    async fn progress(
        &self,
        job_id: &str,
        pct: u8,
        message: impl Into<String>,
    ) -> Result<(), SpeechError> {
        match self
            .registry
            .update(job_id, JobPatch::progressing(pct, message))
            .await
        {
            Ok(_) => Ok(()),
            Err(RegistryError::Board(err)) => Err(SpeechError::new(
                FailureKind::Cancelled,
                format!("job record closed: {err}"),
            )),
            Err(RegistryError::Store(err)) => Err(SpeechError::new(
                FailureKind::Cancelled,
                format!("job record unavailable: {err}"),
            )),
        }
    }

    /// Guarded terminal merge with the sanitized message for `kind`. Losing
    /// the merge means another writer finalized first; that record wins.
    async fn finalize_failure(&self, job_id: &str, kind: &FailureKind) {
        let patch = JobPatch::failed(kind.user_message());
        if let Err(err) = self.registry.update(job_id, patch).await {
            engine_debug!("job {job_id}: failure merge refused: {err}");
        }
    }
}
