//! Narrator core: pure domain logic for text-to-speech conversion jobs.
//!
//! Everything here is synchronous and IO-free: the job board (a keyed table
//! with capacity, merge, and retention semantics), the token estimator and
//! text chunker, and the WAV container encoder. The engine crate supplies
//! the async plumbing around these.
mod board;
mod chunk;
mod job;
mod wav;

pub use board::{BoardError, JobBoard, MAX_ACTIVE_JOBS};
pub use chunk::{estimate_token_count, split_text_into_chunks, TextChunk};
pub use job::{new_job_id, JobId, JobPatch, JobSource, JobStatus, ProcessingJob};
pub use wav::{encode_wav, AudioFormat, WAV_HEADER_LEN};
