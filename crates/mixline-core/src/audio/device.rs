//! Output device boundary
//!
//! The mixing engine talks to hardware through two traits:
//!
//! - [`DeviceProvider`]: acquires a device for a requested format
//!   (the engine calls this once per session, right before it starts)
//! - [`OutputDevice`]: a blocking PCM byte sink owned by the engine thread
//!
//! The hardware frame position is published through a [`FramePosition`]
//! handle so callers can read it without touching the engine thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};
use crate::types::AudioFormat;

/// Frames consumed by the hardware since the device was opened
///
/// Written by the device (callback thread or sink), read lock-free by the
/// mixer facade.
#[derive(Debug, Clone, Default)]
pub struct FramePosition(Arc<AtomicU64>);

impl FramePosition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current hardware position in frames
    #[inline]
    pub fn frames(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Record that `frames` more frames reached the hardware
    #[inline]
    pub fn advance(&self, frames: u64) {
        self.0.fetch_add(frames, Ordering::AcqRel);
    }
}

/// A blocking PCM output sink
///
/// Implementations are moved onto the mixing thread, hence `Send`.
pub trait OutputDevice: Send {
    /// Format negotiated when the device was opened
    fn format(&self) -> AudioFormat;

    /// Device buffer length in frames
    fn buffer_frames(&self) -> usize;

    /// Shared handle to the hardware frame position
    fn position(&self) -> FramePosition;

    /// Write PCM bytes, blocking while the device buffer is full
    ///
    /// Returns the number of bytes accepted.
    fn write(&mut self, bytes: &[u8]) -> AudioResult<usize>;

    /// Block until everything written has been played
    fn drain(&mut self) -> AudioResult<()>;

    /// Release the device; further writes fail with [`AudioError::Closed`]
    fn close(&mut self);
}

/// Acquires output devices for the mixing engine
pub trait DeviceProvider: Send + Sync {
    /// Open a device for `format` with a buffer of `buffer_frames`
    fn open(&self, format: &AudioFormat, buffer_frames: u32) -> AudioResult<Box<dyn OutputDevice>>;
}

// ═══════════════════════════════════════════════════════════════════════════
// CPAL device lookup
// ═══════════════════════════════════════════════════════════════════════════

/// Get a human-readable name for a host ID
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

/// Get a host by its name string
fn get_host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|host_id| host_name(*host_id) == name)
        .and_then(|host_id| cpal::host_from_id(host_id).ok())
}

/// Find an output device by its ID
///
/// Uses the host specified in the DeviceId if available, otherwise
/// searches all available hosts.
pub fn find_device_by_id(id: &DeviceId) -> AudioResult<cpal::Device> {
    if let Some(ref host_name) = id.host {
        if let Some(host) = get_host_by_name(host_name) {
            return host
                .output_devices()
                .map_err(|e| AudioError::ConfigError(e.to_string()))?
                .find(|d: &cpal::Device| d.name().ok().as_ref() == Some(&id.name))
                .ok_or_else(|| AudioError::DeviceNotFound(id.name.clone()));
        }
    }

    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(mut devices) = host.output_devices() else {
            continue;
        };
        if let Some(device) =
            devices.find(|d: &cpal::Device| d.name().ok().as_ref() == Some(&id.name))
        {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(id.name.clone()))
}

/// Get the CPAL default output device from the default host
pub fn get_cpal_default_device() -> AudioResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::NoDefaultDevice("No default output device".to_string()))
}
