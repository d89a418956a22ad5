//! Tone generator hand-off
//!
//! An external tone generator (a metronome, a synth preview) may hold the
//! output device between mixing sessions. The mixer asks it to let go right
//! before every session opens the device.

/// A device user that yields to the mixer
pub trait ToneGenerator: Send + Sync {
    /// Whether the generator currently holds an output device
    fn holds_device(&self) -> bool;

    /// Close the generator's device; returns once it is released
    fn release_device(&self);
}

/// Tone generator for setups without one
#[derive(Debug, Clone, Copy, Default)]
pub struct NoToneGenerator;

impl ToneGenerator for NoToneGenerator {
    fn holds_device(&self) -> bool {
        false
    }

    fn release_device(&self) {}
}
