//! Settings file handling.
//!
//! Settings live in a RON file the user can edit by hand. A missing file
//! means defaults; an unreadable or unparsable file is logged and treated as
//! defaults rather than refusing to start.

use std::env;
use std::fs;
use std::path::Path;

use engine_logging::{engine_error, engine_info, engine_warn};
use narrator_engine::{AtomicFileWriter, UserSettings};

use crate::cli::Cli;

const API_KEY_ENV: &str = "OPENAI_API_KEY";

pub(crate) fn load_settings(path: &Path) -> UserSettings {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return UserSettings::default();
        }
        Err(err) => {
            engine_warn!("Failed to read settings from {:?}: {}", path, err);
            return UserSettings::default();
        }
    };

    match ron::from_str(&content) {
        Ok(settings) => {
            engine_info!("Loaded settings from {:?}", path);
            settings
        }
        Err(err) => {
            engine_warn!("Failed to parse settings from {:?}: {}", path, err);
            UserSettings::default()
        }
    }
}

pub(crate) fn save_settings(path: &Path, settings: &UserSettings) {
    let pretty = ron::ser::PrettyConfig::new();
    let content = match ron::ser::to_string_pretty(settings, pretty) {
        Ok(text) => text,
        Err(err) => {
            engine_error!("Failed to serialize settings: {}", err);
            return;
        }
    };

    let dir = match path.parent() {
        Some(parent) if parent != Path::new("") => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
        engine_error!("Settings path {:?} has no file name", path);
        return;
    };

    let writer = AtomicFileWriter::new(dir);
    match writer.write(filename, content.as_bytes()) {
        Ok(_) => engine_info!("Saved settings to {:?}", path),
        Err(err) => engine_error!("Failed to write settings to {:?}: {}", path, err),
    }
}

/// Settings-file values overridden by the environment, overridden by flags.
pub(crate) fn resolve_settings(cli: &Cli, from_file: UserSettings) -> UserSettings {
    let api_key = cli
        .api_key
        .clone()
        .or_else(|| env::var(API_KEY_ENV).ok())
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .or(from_file.api_key);

    UserSettings {
        api_key,
        voice: cli.voice.clone().unwrap_or(from_file.voice),
        model: cli.model.clone().unwrap_or(from_file.model),
        output_dir: cli.output_dir.clone().or(from_file.output_dir),
    }
}
