//! Byte-exact linear-PCM WAV container construction.
//!
//! The 44-byte header layout is a compatibility contract: any standard WAV
//! reader must accept the output unmodified, so the bytes are assembled
//! directly rather than through a writer abstraction.

use serde::{Deserialize, Serialize};

/// Length of the RIFF/fmt/data header preceding the sample bytes.
pub const WAV_HEADER_LEN: usize = 44;

/// PCM stream parameters for the provider's raw audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl Default for AudioFormat {
    /// The OpenAI `pcm` response format: mono, 24 kHz, signed 16-bit.
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 24_000,
            bits_per_sample: 16,
        }
    }
}

impl AudioFormat {
    /// Wraps `samples` in a WAV container using this format.
    pub fn encode(&self, samples: &[u8]) -> Vec<u8> {
        encode_wav(samples, self.channels, self.sample_rate, self.bits_per_sample)
    }
}

/// Wraps raw little-endian PCM sample bytes in a standard WAV container.
///
/// Deterministic and pure: a 44-byte header followed by `samples` unmodified.
/// The caller is responsible for `samples` actually matching the declared
/// channel count, sample rate, and bit depth.
pub fn encode_wav(samples: &[u8], channels: u16, sample_rate: u32, bits_per_sample: u16) -> Vec<u8> {
    let data_len = samples.len() as u32;
    let bytes_per_sample = u32::from(bits_per_sample / 8);
    let byte_rate = sample_rate * u32::from(channels) * bytes_per_sample;
    let block_align = channels * (bits_per_sample / 8);

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + samples.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // linear PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(samples);
    out
}
