//! Command-line surface of the narrator.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Convert web pages and text files into spoken audio.
#[derive(Debug, Parser)]
#[command(name = "narrator", version, about)]
pub struct Cli {
    /// Web pages to read aloud.
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,

    /// Plain-text files to read aloud. May be given more than once.
    #[arg(long = "text-file", value_name = "PATH")]
    pub text_files: Vec<PathBuf>,

    /// Directory finished audio is written into.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Voice preset to request from the speech provider.
    #[arg(long)]
    pub voice: Option<String>,

    /// Speech model to request from the provider.
    #[arg(long)]
    pub model: Option<String>,

    /// Provider API key. Falls back to $OPENAI_API_KEY, then to the
    /// settings file.
    #[arg(long, value_name = "KEY")]
    pub api_key: Option<String>,

    /// Settings file location.
    #[arg(long, value_name = "PATH", default_value = "narrator.ron")]
    pub settings: PathBuf,

    /// Write the resolved settings back to the settings file and continue.
    #[arg(long)]
    pub save_settings: bool,

    /// Where log output goes.
    #[arg(long, value_enum, default_value_t = LogTarget::Terminal)]
    pub log: LogTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogTarget {
    Terminal,
    File,
    Both,
}

impl From<LogTarget> for engine_logging::LogDestination {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::Terminal => engine_logging::LogDestination::Terminal,
            LogTarget::File => engine_logging::LogDestination::File,
            LogTarget::Both => engine_logging::LogDestination::Both,
        }
    }
}
