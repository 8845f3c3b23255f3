//! Conversion run driver.
//!
//! Submits the requested pages and text files to the engine, paced to the
//! concurrency cap, and follows the event stream until every submission has
//! a terminal outcome. Stdout carries one line per job change; diagnostics
//! go to the log.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use engine_logging::engine_info;
use narrator_core::{JobId, JobSource, JobStatus, ProcessingJob, MAX_ACTIVE_JOBS};
use narrator_engine::{EngineEvent, EngineHandle, EngineSettings, FileStore};

use crate::cli::Cli;
use crate::settings;

const STATE_FILENAME: &str = ".narrator_state.json";
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// A live job reports progress at least once per provider call, so silence
/// this long means the engine thread is gone.
const STALL_TIMEOUT: Duration = Duration::from_secs(600);

pub(crate) struct RunSummary {
    pub completed: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

pub(crate) fn run(cli: Cli) -> anyhow::Result<RunSummary> {
    let user = settings::resolve_settings(&cli, settings::load_settings(&cli.settings));
    if cli.save_settings {
        settings::save_settings(&cli.settings, &user);
    }

    let inputs = gather_inputs(&cli)?;
    if inputs.is_empty() {
        bail!("nothing to convert: pass at least one URL or --text-file");
    }

    let output_dir = user
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("narrations"));
    let store =
        FileStore::open(&output_dir.join(STATE_FILENAME)).context("open job state store")?;
    let engine_settings = EngineSettings {
        output_dir: output_dir.clone(),
        ..EngineSettings::default()
    };
    let handle = EngineHandle::new(engine_settings, Arc::new(store), user)
        .context("start conversion engine")?;

    drive(&handle, inputs)
}

enum Input {
    Page { url: String },
    Text { source: JobSource, text: String },
}

fn gather_inputs(cli: &Cli) -> anyhow::Result<Vec<Input>> {
    let mut inputs = Vec::new();
    for url in &cli.urls {
        inputs.push(Input::Page { url: url.clone() });
    }
    for path in &cli.text_files {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read text file {}", path.display()))?;
        let title = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("text")
            .to_string();
        inputs.push(Input::Text {
            source: JobSource {
                tab_id: None,
                url: path.display().to_string(),
                page_title: title,
                article_title: None,
            },
            text,
        });
    }
    Ok(inputs)
}

fn drive(handle: &EngineHandle, inputs: Vec<Input>) -> anyhow::Result<RunSummary> {
    let mut pending: VecDeque<Input> = inputs.into();
    let mut tracker = Tracker::default();
    let mut last_event = Instant::now();

    while !pending.is_empty() || tracker.in_flight() > 0 {
        while tracker.in_flight() < MAX_ACTIVE_JOBS {
            let Some(input) = pending.pop_front() else {
                break;
            };
            submit(handle, &mut tracker, input);
        }

        match handle.recv_timeout(POLL_INTERVAL) {
            Some(event) => {
                last_event = Instant::now();
                tracker.apply(event);
            }
            None if last_event.elapsed() > STALL_TIMEOUT => {
                bail!("engine stopped responding");
            }
            None => {}
        }
    }

    Ok(tracker.into_summary())
}

fn submit(handle: &EngineHandle, tracker: &mut Tracker, input: Input) {
    match input {
        Input::Page { url } => {
            engine_info!("requesting conversion of {url}");
            tracker.submitted(url.clone());
            handle.convert_page(url);
        }
        Input::Text { source, text } => {
            engine_info!("requesting conversion of {}", source.url);
            tracker.submitted(source.url.clone());
            handle.convert_text(source, text);
        }
    }
}

/// Matches engine events back to this run's submissions.
///
/// The engine keys rejections by the requested URL, while a created job may
/// carry a different URL after redirects; and a freshly started engine
/// replays job records from previous runs, which are nobody's business here.
#[derive(Default)]
struct Tracker {
    /// Request labels submitted but not yet seen as jobs, oldest first.
    awaiting_start: VecDeque<String>,
    running: HashMap<JobId, String>,
    completed: usize,
    failed: usize,
}

impl Tracker {
    fn submitted(&mut self, label: String) {
        self.awaiting_start.push_back(label);
    }

    fn in_flight(&self) -> usize {
        self.awaiting_start.len() + self.running.len()
    }

    fn apply(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::JobChanged { job } => self.job_changed(job),
            EngineEvent::ConversionRejected { url, kind } => {
                if let Some(pos) = self.awaiting_start.iter().position(|label| *label == url) {
                    self.awaiting_start.remove(pos);
                    self.failed += 1;
                    println!("rejected {url}: {}", kind.user_message());
                }
            }
            EngineEvent::ActiveJobs { .. } | EngineEvent::JobRemoved { .. } => {}
        }
    }

    fn job_changed(&mut self, job: ProcessingJob) {
        if !self.running.contains_key(&job.id) {
            // Records restored from a previous run surface already terminal;
            // an unknown non-terminal job mid-run is one of ours starting.
            if job.status.is_terminal() || self.awaiting_start.is_empty() {
                return;
            }
            let pos = self
                .awaiting_start
                .iter()
                .position(|label| *label == job.source.url)
                .unwrap_or(0);
            if let Some(label) = self.awaiting_start.remove(pos) {
                self.running.insert(job.id.clone(), label);
            }
        }

        println!(
            "[{:>3}%] {}: {}",
            job.progress,
            job.source.display_title(),
            job.message
        );

        if job.status.is_terminal() {
            self.running.remove(&job.id);
            match job.status {
                JobStatus::Success => self.completed += 1,
                _ => self.failed += 1,
            }
        }
    }

    fn into_summary(self) -> RunSummary {
        RunSummary {
            completed: self.completed,
            failed: self.failed,
        }
    }
}
