//! Coordination with the other users of the audio device
//!
//! - [`DeviceArbiter`]: playback and capture exclusion
//! - [`CaptureCoordinator`]: capture sessions
//! - [`ToneGenerator`]: external generators that must yield the device

mod arbiter;
mod capture;
mod tone;

pub use arbiter::{DeviceArbiter, DeviceClient, DeviceRole};
pub use capture::{CaptureCoordinator, CaptureSource};
pub use tone::{NoToneGenerator, ToneGenerator};
