//! Output device layer for mixline
//!
//! The mixing engine writes interleaved 16-bit PCM into an [`OutputDevice`]
//! obtained from a [`DeviceProvider`]. Two backends ship with the crate:
//!
//! - **CPAL** ([`CpalDeviceProvider`]): real hardware on every platform CPAL
//!   supports, fed through a lock-free ring buffer
//! - **Memory** ([`MemoryDeviceProvider`]): captures output for offline
//!   rendering and deterministic tests
//!
//! # Example Usage
//!
//! ```ignore
//! use mixline_core::audio::{AudioConfig, CpalDeviceProvider, DeviceProvider};
//!
//! let config = AudioConfig::default().with_buffer_frames(2048);
//! let provider = CpalDeviceProvider::new(config.device.clone());
//! let mut device = provider.open(&config.format(), config.effective_buffer_frames())?;
//!
//! device.write(&pcm_bytes)?;
//! let played = device.position().frames();
//! ```

mod config;
mod cpal_backend;
mod device;
mod error;
mod memory;

pub use config::{
    quantum_for_buffer, AudioConfig, DeviceId, DEFAULT_BUFFER_FRAMES, MAX_BUFFER_FRAMES,
    MIN_BUFFER_FRAMES,
};
pub use cpal_backend::{CpalDeviceProvider, CpalOutputDevice};
pub use device::{find_device_by_id, get_cpal_default_device, DeviceProvider, FramePosition, OutputDevice};
pub use error::{AudioError, AudioResult};
pub use memory::{CapturedPcm, MemoryDevice, MemoryDeviceProvider};
