//! Synthesized demo clips

use std::f32::consts::TAU;
use std::sync::Arc;

use mixline_core::sequence::{SequenceError, SequenceListener, TrackSequence};
use mixline_core::{AudioFormat, SequenceId};

/// Logs clip lifecycle with the clip's name
pub struct ClipLogger {
    name: String,
}

impl ClipLogger {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into() })
    }
}

impl SequenceListener for ClipLogger {
    fn on_started(&self, sequence: SequenceId) {
        log::info!("{} (#{}) started", self.name, sequence);
    }

    fn on_stopped(&self, sequence: SequenceId, final_frame: u64) {
        log::info!("{} (#{}) stopped at frame {}", self.name, sequence, final_frame);
    }
}

/// One clip to synthesize
pub struct ToneSpec {
    pub name: &'static str,
    pub frequency: f32,
    pub seconds: f32,
    pub delay_seconds: f32,
    pub volume: f32,
}

/// Sine tone with a short linear fade at both ends, copied to every channel
pub fn sine(format: &AudioFormat, frequency: f32, seconds: f32) -> Vec<i16> {
    let frames = (format.sample_rate as f32 * seconds).max(1.0) as usize;
    let fade = (format.sample_rate as usize / 100).clamp(1, frames / 2 + 1);
    let channels = format.channels as usize;

    let mut samples = Vec::with_capacity(frames * channels);
    for n in 0..frames {
        let phase = TAU * frequency * n as f32 / format.sample_rate as f32;
        let envelope = (n.min(frames - 1 - n) as f32 / fade as f32).min(1.0);
        let value = (phase.sin() * envelope * 0.5 * i16::MAX as f32) as i16;
        samples.extend(std::iter::repeat(value).take(channels));
    }
    samples
}

/// Build the track sequence for `tone` in the output format
pub fn build(format: &AudioFormat, tone: &ToneSpec) -> Result<Arc<TrackSequence>, SequenceError> {
    let samples = sine(format, tone.frequency, tone.seconds);
    let delay = format.duration_to_frames(std::time::Duration::from_secs_f32(tone.delay_seconds));

    TrackSequence::builder(format.byte_order.encode_all(&samples), format.byte_order)
        .channels(format.channels)
        .initiate_after(delay)
        .volume(tone.volume)
        .label(tone.name)
        .listener(ClipLogger::new(tone.name))
        .build()
}
