//! Audio backend configuration
//!
//! Defines the requested output format, device selection and buffer size.
//! The engine's buffer quantum is derived from the device buffer length.

use serde::{Deserialize, Serialize};

use crate::types::{AudioFormat, ByteOrder, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};

/// Smallest device buffer accepted (frames)
pub const MIN_BUFFER_FRAMES: u32 = 64;

/// Largest device buffer accepted (frames)
pub const MAX_BUFFER_FRAMES: u32 = 16384;

/// Default device buffer length in frames
///
/// 2048 frames @ 44.1kHz = ~46ms of device buffering, mixed in
/// quanta of 1024 frames.
pub const DEFAULT_BUFFER_FRAMES: u32 = 2048;

/// Audio device identifier
///
/// Includes both the device name and the host backend (ALSA, CoreAudio, etc.)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier (e.g., "ALSA", "CoreAudio")
    /// If None, all hosts are searched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Get a display label that includes the host if available
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Configuration for the output device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device (None = use system default)
    pub device: Option<DeviceId>,

    /// Requested sample rate in Hz
    pub sample_rate: u32,

    /// Requested channel count (track sequences must match it)
    pub channels: u16,

    /// Byte order the engine encodes mixed output in
    pub byte_order: ByteOrder,

    /// Device buffer length in frames; the mixing quantum is half of it
    pub buffer_frames: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            byte_order: ByteOrder::Little,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
        }
    }
}

impl AudioConfig {
    /// The PCM format requested from the device
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels.max(1), self.byte_order)
    }

    /// Device buffer length clamped to supported bounds
    pub fn effective_buffer_frames(&self) -> u32 {
        self.buffer_frames.clamp(MIN_BUFFER_FRAMES, MAX_BUFFER_FRAMES)
    }

    /// Frames produced per mixing iteration
    pub fn quantum_frames(&self) -> usize {
        quantum_for_buffer(self.effective_buffer_frames())
    }

    /// Calculate device buffer latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.effective_buffer_frames() as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Set the output device
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Set the requested sample rate
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the requested channel count
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    /// Set the output byte order
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Set the device buffer length in frames
    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_frames = frames;
        self
    }
}

/// Mixing quantum for a device buffer of `buffer_frames`
#[inline]
pub fn quantum_for_buffer(buffer_frames: u32) -> usize {
    (buffer_frames as usize / 2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantum_is_half_buffer() {
        let config = AudioConfig::default().with_buffer_frames(2048);
        assert_eq!(config.quantum_frames(), 1024);
    }

    #[test]
    fn test_buffer_frames_clamped() {
        let tiny = AudioConfig::default().with_buffer_frames(8);
        assert_eq!(tiny.effective_buffer_frames(), MIN_BUFFER_FRAMES);

        let huge = AudioConfig::default().with_buffer_frames(1 << 20);
        assert_eq!(huge.effective_buffer_frames(), MAX_BUFFER_FRAMES);
    }

    #[test]
    fn test_device_label() {
        assert_eq!(DeviceId::new("hw:0,0").display_label(), "hw:0,0");
        assert_eq!(
            DeviceId::with_host("hw:0,0", "ALSA").display_label(),
            "[ALSA] hw:0,0"
        );
    }
}
