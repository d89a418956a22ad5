//! Mixer configuration
//!
//! ```yaml
//! audio:
//!   device: null
//!   sample_rate: 44100
//!   channels: 1
//!   byte_order: little
//!   buffer_frames: 2048
//! stop_wait_ms: 25
//! stop_wait_attempts: 40
//! event_capacity: 256
//! realtime_priority: true
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;

/// Default wait slice while the engine is stopping
pub const DEFAULT_STOP_WAIT_MS: u64 = 25;

/// Default number of wait slices before admission gives up
pub const DEFAULT_STOP_WAIT_ATTEMPTS: u32 = 40;

/// Default per-subscriber event queue length
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Output device and format
    pub audio: AudioConfig,

    /// Length of one wait slice when admitting during engine shutdown
    pub stop_wait_ms: u64,

    /// Wait slices before admission fails with `EngineStopping`
    pub stop_wait_attempts: u32,

    /// Events buffered per subscriber before new ones are dropped
    pub event_capacity: usize,

    /// Elevate the mixing thread to real-time scheduling
    pub realtime_priority: bool,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            stop_wait_ms: DEFAULT_STOP_WAIT_MS,
            stop_wait_attempts: DEFAULT_STOP_WAIT_ATTEMPTS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            realtime_priority: true,
        }
    }
}

impl MixerConfig {
    pub fn with_audio(mut self, audio: AudioConfig) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_stop_wait(mut self, slice: Duration, attempts: u32) -> Self {
        self.stop_wait_ms = slice.as_millis() as u64;
        self.stop_wait_attempts = attempts;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_realtime_priority(mut self, enabled: bool) -> Self {
        self.realtime_priority = enabled;
        self
    }

    pub fn stop_wait_slice(&self) -> Duration {
        Duration::from_millis(self.stop_wait_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ByteOrder;

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "audio:\n  buffer_frames: 1024\n  byte_order: big\nstop_wait_attempts: 3\n";
        let config: MixerConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.audio.buffer_frames, 1024);
        assert_eq!(config.audio.byte_order, ByteOrder::Big);
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.stop_wait_attempts, 3);
        assert_eq!(config.stop_wait_ms, DEFAULT_STOP_WAIT_MS);
        assert!(config.realtime_priority);
    }

    #[test]
    fn test_stop_wait_slice_never_zero() {
        let config = MixerConfig::default().with_stop_wait(Duration::ZERO, 2);
        assert_eq!(config.stop_wait_slice(), Duration::from_millis(1));
        assert_eq!(config.stop_wait_attempts, 2);
    }
}
