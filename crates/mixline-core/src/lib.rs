//! Mixline Core - software mixing of scheduled PCM sequences onto one output device

pub mod audio;
pub mod config;
pub mod coord;
pub mod engine;
pub mod mixer;
pub mod sequence;
pub mod types;

pub use mixer::{Admission, Mixer, MixerError, MixerResult};
pub use sequence::{SequenceListener, SequenceState, TrackSequence};
pub use types::*;
