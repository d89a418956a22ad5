//! Mixer error types

use std::time::Duration;

use thiserror::Error;

use crate::audio::AudioError;
use crate::types::SequenceId;

/// Errors returned synchronously by the mixer's scheduling API
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MixerError {
    /// Sequences are single-use; a finished one cannot be scheduled again
    #[error("Sequence {0} has finished and cannot be scheduled again")]
    StaleSequence(SequenceId),

    #[error("Sequence has {sequence} channels but the output has {output}")]
    FormatMismatch { sequence: u16, output: u16 },

    /// The output device could not be opened for a new session
    #[error("Output device unavailable: {0}")]
    DeviceUnavailable(#[from] AudioError),

    /// The previous session did not finish shutting down in time
    #[error("Mixing engine still stopping after {0:?}")]
    EngineStopping(Duration),

    #[error("Failed to spawn mixing thread: {0}")]
    EngineSpawn(String),
}

/// Result type for mixer operations
pub type MixerResult<T> = Result<T, MixerError>;
