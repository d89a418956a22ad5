//! Common types for mixline
//!
//! PCM format description and 16-bit sample encoding shared by the
//! sequence, engine and device modules.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default output sample rate (44.1kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default output channel count (mono)
pub const DEFAULT_CHANNELS: u16 = 1;

/// Every sample in the pipeline is 16-bit signed PCM
pub const BYTES_PER_SAMPLE: usize = 2;

/// Upper clip bound for mixed output
pub const SAMPLE_MAX: i32 = 32767;

/// Lower clip bound for mixed output (symmetric with [`SAMPLE_MAX`])
pub const SAMPLE_MIN: i32 = -32767;

/// Unique identity of a track sequence within the process
pub type SequenceId = u64;

/// Byte order of 16-bit PCM samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the host CPU
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    /// Decode one sample from two bytes
    #[inline]
    pub fn decode(self, bytes: [u8; 2]) -> i16 {
        match self {
            ByteOrder::Little => i16::from_le_bytes(bytes),
            ByteOrder::Big => i16::from_be_bytes(bytes),
        }
    }

    /// Encode one sample into two bytes
    #[inline]
    pub fn encode(self, sample: i16) -> [u8; 2] {
        match self {
            ByteOrder::Little => sample.to_le_bytes(),
            ByteOrder::Big => sample.to_be_bytes(),
        }
    }

    /// Encode a slice of samples into a freshly allocated byte buffer
    pub fn encode_all(self, samples: &[i16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
        for &sample in samples {
            bytes.extend_from_slice(&self.encode(sample));
        }
        bytes
    }

    /// Decode a byte buffer into samples (a trailing odd byte is ignored)
    pub fn decode_all(self, bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| self.decode([pair[0], pair[1]]))
            .collect()
    }
}

/// Negotiated PCM output format
///
/// Samples are always 16-bit signed; only rate, channel count and byte
/// order vary between devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub byte_order: ByteOrder,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, byte_order: ByteOrder) -> Self {
        Self {
            sample_rate,
            channels,
            byte_order,
        }
    }

    /// Mono little-endian format at the given rate
    pub fn mono(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1, ByteOrder::Little)
    }

    /// Size of one frame in bytes
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }

    #[inline]
    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.bytes_per_frame()
    }

    #[inline]
    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / self.bytes_per_frame()
    }

    /// Wall-clock duration of a frame count at this rate
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    /// Frame count covering a wall-clock duration at this rate
    pub fn duration_to_frames(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as u64
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS, ByteOrder::Little)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz, {} ch, 16-bit {:?}-endian",
            self.sample_rate, self.channels, self.byte_order
        )
    }
}
