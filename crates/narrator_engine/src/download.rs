//! Delivery of the finished audio to the user.
//!
//! The pipeline hands a complete, named payload to a [`DownloadSink`] and
//! treats any refusal as a delivery failure. The stock sink writes into a
//! downloads directory; tests substitute their own to capture payloads.

use std::path::PathBuf;

use crate::persist::AtomicFileWriter;
use crate::types::{FailureKind, SpeechError};

pub const WAV_MIME: &str = "audio/wav";

/// A finished artifact ready to hand over.
#[derive(Debug, Clone)]
pub struct DownloadPayload {
    pub filename: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl DownloadPayload {
    pub fn wav(filename: String, bytes: Vec<u8>) -> Self {
        Self {
            filename,
            mime: WAV_MIME,
            bytes,
        }
    }
}

#[async_trait::async_trait]
pub trait DownloadSink: Send + Sync {
    /// Delivers the payload and reports where it ended up, when the sink
    /// has a meaningful location to report.
    async fn deliver(&self, payload: DownloadPayload) -> Result<Option<PathBuf>, SpeechError>;
}

/// Writes downloads into a directory, atomically.
pub struct FsDownloadSink {
    writer: AtomicFileWriter,
}

impl FsDownloadSink {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir),
        }
    }
}

#[async_trait::async_trait]
impl DownloadSink for FsDownloadSink {
    async fn deliver(&self, payload: DownloadPayload) -> Result<Option<PathBuf>, SpeechError> {
        let path = self
            .writer
            .write(&payload.filename, &payload.bytes)
            .map_err(|err| SpeechError::new(FailureKind::Delivery, err.to_string()))?;
        Ok(Some(path))
    }
}
