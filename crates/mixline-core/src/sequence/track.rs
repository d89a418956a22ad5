//! Track sequences
//!
//! A [`TrackSequence`] is one single-use, scheduled playback of a clip: the
//! PCM it plays, the inclusive frame range to play, when to start relative
//! to admission, and a handful of mix controls the caller may change while
//! it plays.
//!
//! Everything that defines *what* plays is fixed at construction. The
//! initiation frame is written once by the schedule when the sequence is
//! admitted. The cursor, volume, mute, solo and stop flags are independent
//! atomics so the mixing thread reads them without the schedule lock.
//!
//! ```ignore
//! let clip = TrackSequence::builder(pcm_bytes, ByteOrder::Little)
//!     .channels(2)
//!     .range(0, 44_099)
//!     .initiate_after(22_050)
//!     .volume(0.8)
//!     .label("kick")
//!     .build()?;
//!
//! mixer.admit(&clip)?;
//! clip.set_muted(true);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use basedrop::Shared;
use thiserror::Error;

use crate::engine::gc::gc_handle;
use crate::types::{ByteOrder, SequenceId, BYTES_PER_SAMPLE};

static NEXT_SEQUENCE_ID: AtomicU64 = AtomicU64::new(1);

/// Initiation frame value before admission
const UNASSIGNED: u64 = u64::MAX;

/// Errors raised while constructing a track sequence
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("Sample buffer is empty")]
    EmptyBuffer,

    #[error("Sample buffer has an odd byte length ({0}); samples are 16-bit")]
    OddByteLength(usize),

    #[error("Sample buffer of {samples} samples is not a whole number of {channels}-channel frames")]
    PartialFrame { samples: usize, channels: u16 },

    #[error("Channel count must be at least 1")]
    NoChannels,

    #[error("Invalid play range {start}..={end} for a buffer of {frames} frames")]
    InvalidRange { start: u64, end: u64, frames: u64 },
}

/// Lifecycle of a track sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SequenceState {
    /// Created or admitted, not yet mixed
    Scheduled = 0,
    /// Mixed at least once
    Playing = 1,
    /// Removed from the schedule; terminal
    Finished = 2,
}

impl SequenceState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SequenceState::Scheduled,
            1 => SequenceState::Playing,
            _ => SequenceState::Finished,
        }
    }
}

/// Per-sequence lifecycle callbacks
///
/// Invoked on the notification thread, never on the mixing thread.
pub trait SequenceListener: Send + Sync {
    fn on_started(&self, _sequence: SequenceId) {}

    fn on_stopped(&self, _sequence: SequenceId, _final_frame: u64) {}
}

/// Interleaved 16-bit PCM owned by a track sequence
pub struct SampleData {
    bytes: Vec<u8>,
    byte_order: ByteOrder,
    channels: u16,
}

impl SampleData {
    pub fn new(bytes: Vec<u8>, byte_order: ByteOrder, channels: u16) -> Self {
        Self {
            bytes,
            byte_order,
            channels,
        }
    }

    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }

    pub fn frame_count(&self) -> u64 {
        (self.bytes.len() / self.bytes_per_frame().max(1)) as u64
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Raw bytes of `count` frames starting at `first`, clamped to the buffer
    #[inline]
    pub fn frames(&self, first: u64, count: usize) -> &[u8] {
        let bpf = self.bytes_per_frame();
        let start = (first as usize).saturating_mul(bpf).min(self.bytes.len());
        let end = start.saturating_add(count * bpf).min(self.bytes.len());
        &self.bytes[start..end]
    }
}

impl fmt::Debug for SampleData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleData")
            .field("frames", &self.frame_count())
            .field("channels", &self.channels)
            .field("byte_order", &self.byte_order)
            .finish()
    }
}

/// One scheduled, single-use playback of a clip
pub struct TrackSequence {
    id: SequenceId,
    label: Option<String>,
    /// Released (set to None) when the sequence finishes
    source: Mutex<Option<Shared<SampleData>>>,
    channels: u16,
    byte_order: ByteOrder,
    start_frame: u64,
    end_frame: u64,
    relative_initiation: u64,

    initiation: AtomicU64,
    current_frame: AtomicU64,
    /// f32 bits
    volume: AtomicU32,
    muted: AtomicBool,
    solo: AtomicBool,
    stop_pending: AtomicBool,
    state: AtomicU8,

    listener: Option<Arc<dyn SequenceListener>>,
}

impl TrackSequence {
    /// Start building a sequence over interleaved 16-bit PCM bytes
    pub fn builder(bytes: Vec<u8>, byte_order: ByteOrder) -> TrackSequenceBuilder {
        TrackSequenceBuilder {
            bytes,
            byte_order,
            channels: 1,
            range: None,
            relative_initiation: 0,
            volume: 1.0,
            label: None,
            listener: None,
        }
    }

    /// Sequence playing all of `samples`, stored in `byte_order`
    pub fn from_samples(
        samples: &[i16],
        channels: u16,
        byte_order: ByteOrder,
    ) -> Result<Arc<Self>, SequenceError> {
        Self::builder(byte_order.encode_all(samples), byte_order)
            .channels(channels)
            .build()
    }

    pub fn id(&self) -> SequenceId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// First frame played
    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    /// Last frame played (inclusive)
    pub fn end_frame(&self) -> u64 {
        self.end_frame
    }

    /// Frames between admission time and the first played frame
    pub fn relative_initiation_frame(&self) -> u64 {
        self.relative_initiation
    }

    /// Absolute timeline frame this sequence starts at, once admitted
    pub fn initiation_frame(&self) -> Option<u64> {
        match self.initiation.load(Ordering::Acquire) {
            UNASSIGNED => None,
            frame => Some(frame),
        }
    }

    /// Only the schedule assigns (and rebases) the initiation frame
    pub(crate) fn set_initiation_frame(&self, frame: u64) {
        self.initiation.store(frame, Ordering::Release);
    }

    /// Next frame to be mixed; exceeds `end_frame` once playback ran out
    pub fn current_frame(&self) -> u64 {
        self.current_frame.load(Ordering::Acquire)
    }

    pub(crate) fn advance_cursor(&self, frames: u64) {
        self.current_frame.fetch_add(frames, Ordering::AcqRel);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Set the track gain, clamped to 0.0..=1.0
    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(clamp_gain(volume).to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_solo(&self) -> bool {
        self.solo.load(Ordering::Relaxed)
    }

    pub fn set_solo(&self, solo: bool) {
        self.solo.store(solo, Ordering::Relaxed);
    }

    pub fn is_stop_pending(&self) -> bool {
        self.stop_pending.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stop_pending(&self) {
        self.stop_pending.store(true, Ordering::Release);
    }

    pub fn state(&self) -> SequenceState {
        SequenceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_playing(&self) -> bool {
        self.state() == SequenceState::Playing
    }

    pub fn has_finished(&self) -> bool {
        self.state() == SequenceState::Finished
    }

    /// Ready for removal: stopped, or the cursor ran past the end
    pub fn is_complete(&self) -> bool {
        self.is_stop_pending() || self.current_frame() > self.end_frame
    }

    /// Frame reported when the sequence stops (overrun clamps to the end)
    pub fn final_frame(&self) -> u64 {
        self.current_frame().min(self.end_frame)
    }

    pub(crate) fn listener(&self) -> Option<&Arc<dyn SequenceListener>> {
        self.listener.as_ref()
    }

    /// Sample buffer, if the sequence has not finished
    pub(crate) fn source(&self) -> Option<Shared<SampleData>> {
        self.source
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Scheduled -> Playing; true on the first call only
    pub(crate) fn mark_playing(&self) -> bool {
        self.state
            .compare_exchange(
                SequenceState::Scheduled as u8,
                SequenceState::Playing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Enter the terminal state and release the sample buffer
    ///
    /// Returns false if the sequence had already finished.
    pub(crate) fn finish(&self) -> bool {
        let previous = self
            .state
            .swap(SequenceState::Finished as u8, Ordering::AcqRel);
        if previous == SequenceState::Finished as u8 {
            return false;
        }
        let released = self
            .source
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(released);
        true
    }
}

impl fmt::Debug for TrackSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackSequence")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("range", &(self.start_frame..=self.end_frame))
            .field("initiation", &self.initiation_frame())
            .field("current_frame", &self.current_frame())
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for [`TrackSequence`]
pub struct TrackSequenceBuilder {
    bytes: Vec<u8>,
    byte_order: ByteOrder,
    channels: u16,
    range: Option<(u64, u64)>,
    relative_initiation: u64,
    volume: f32,
    label: Option<String>,
    listener: Option<Arc<dyn SequenceListener>>,
}

impl TrackSequenceBuilder {
    /// Interleaved channel count (default 1)
    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    /// Inclusive play range in frames (default: the whole buffer)
    pub fn range(mut self, start_frame: u64, end_frame: u64) -> Self {
        self.range = Some((start_frame, end_frame));
        self
    }

    /// Start `frames` after the timeline position at admission
    pub fn initiate_after(mut self, frames: u64) -> Self {
        self.relative_initiation = frames;
        self
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn listener(mut self, listener: Arc<dyn SequenceListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> Result<Arc<TrackSequence>, SequenceError> {
        if self.bytes.is_empty() {
            return Err(SequenceError::EmptyBuffer);
        }
        if self.bytes.len() % BYTES_PER_SAMPLE != 0 {
            return Err(SequenceError::OddByteLength(self.bytes.len()));
        }
        if self.channels == 0 {
            return Err(SequenceError::NoChannels);
        }
        let samples = self.bytes.len() / BYTES_PER_SAMPLE;
        if samples % self.channels as usize != 0 {
            return Err(SequenceError::PartialFrame {
                samples,
                channels: self.channels,
            });
        }

        let data = SampleData::new(self.bytes, self.byte_order, self.channels);
        let frames = data.frame_count();
        let (start, end) = self.range.unwrap_or((0, frames - 1));
        if start >= end || end >= frames {
            return Err(SequenceError::InvalidRange { start, end, frames });
        }

        Ok(Arc::new(TrackSequence {
            id: NEXT_SEQUENCE_ID.fetch_add(1, Ordering::Relaxed),
            label: self.label,
            source: Mutex::new(Some(Shared::new(&gc_handle(), data))),
            channels: self.channels,
            byte_order: self.byte_order,
            start_frame: start,
            end_frame: end,
            relative_initiation: self.relative_initiation,
            initiation: AtomicU64::new(UNASSIGNED),
            current_frame: AtomicU64::new(start),
            volume: AtomicU32::new(clamp_gain(self.volume).to_bits()),
            muted: AtomicBool::new(false),
            solo: AtomicBool::new(false),
            stop_pending: AtomicBool::new(false),
            state: AtomicU8::new(SequenceState::Scheduled as u8),
            listener: self.listener,
        }))
    }
}

/// Clamp a gain to 0.0..=1.0 (NaN becomes silence)
pub(crate) fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        0.0
    } else {
        gain.clamp(0.0, 1.0)
    }
}
