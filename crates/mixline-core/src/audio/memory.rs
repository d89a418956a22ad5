//! In-memory output device
//!
//! Captures everything the engine writes instead of playing it. Used for
//! offline rendering and for driving the engine deterministically in tests.
//! The "hardware" consumes every write immediately, so the frame position
//! equals the number of frames written.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::device::{DeviceProvider, FramePosition, OutputDevice};
use super::error::{AudioError, AudioResult};
use crate::types::AudioFormat;

/// PCM captured by memory devices, shared with whoever created the provider
#[derive(Debug, Clone, Default)]
pub struct CapturedPcm(Arc<Mutex<Vec<u8>>>);

impl CapturedPcm {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, bytes: &[u8]) {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(bytes);
    }

    /// Copy of all captured bytes
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Captured bytes decoded as samples in `format`'s byte order
    pub fn samples(&self, format: &AudioFormat) -> Vec<i16> {
        format.byte_order.decode_all(&self.bytes())
    }

    /// Number of captured bytes
    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Output device that records written PCM
pub struct MemoryDevice {
    format: AudioFormat,
    buffer_frames: usize,
    position: FramePosition,
    captured: CapturedPcm,
    /// Sleep for the real-time length of each write
    paced: bool,
    /// Remaining successful writes before the device reports a failure
    writes_until_failure: Option<usize>,
    closed: bool,
}

impl MemoryDevice {
    pub fn new(format: AudioFormat, buffer_frames: usize) -> Self {
        Self {
            format,
            buffer_frames,
            position: FramePosition::new(),
            captured: CapturedPcm::new(),
            paced: false,
            writes_until_failure: None,
            closed: false,
        }
    }

    /// Record into an existing capture buffer
    pub fn with_capture(mut self, captured: CapturedPcm) -> Self {
        self.captured = captured;
        self
    }

    /// Sleep for the real-time length of every write (simulated back-pressure)
    pub fn with_pacing(mut self, pace: bool) -> Self {
        self.paced = pace;
        self
    }

    /// Fail the write after `writes` successful ones
    pub fn failing_after(mut self, writes: usize) -> Self {
        self.writes_until_failure = Some(writes);
        self
    }

    /// Everything written so far
    pub fn captured(&self) -> &CapturedPcm {
        &self.captured
    }
}

impl OutputDevice for MemoryDevice {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    fn position(&self) -> FramePosition {
        self.position.clone()
    }

    fn write(&mut self, bytes: &[u8]) -> AudioResult<usize> {
        if self.closed {
            return Err(AudioError::Closed);
        }
        if let Some(remaining) = self.writes_until_failure.as_mut() {
            if *remaining == 0 {
                return Err(AudioError::StreamError("simulated device failure".to_string()));
            }
            *remaining -= 1;
        }

        let frames = self.format.bytes_to_frames(bytes.len());
        if self.paced {
            std::thread::sleep(self.format.frames_to_duration(frames as u64));
        }

        self.captured.append(bytes);
        self.position.advance(frames as u64);
        Ok(bytes.len())
    }

    fn drain(&mut self) -> AudioResult<()> {
        if self.closed {
            return Err(AudioError::Closed);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Provider handing out [`MemoryDevice`]s that share one capture buffer
#[derive(Debug, Clone, Default)]
pub struct MemoryDeviceProvider {
    captured: CapturedPcm,
    opens: Arc<AtomicUsize>,
    fail_open: Arc<AtomicBool>,
    paced: bool,
    fail_after_writes: Option<usize>,
}

impl MemoryDeviceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices sleep for the real-time duration of each write
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    /// Devices fail after `writes` successful writes
    pub fn failing_after(mut self, writes: usize) -> Self {
        self.fail_after_writes = Some(writes);
        self
    }

    /// Make subsequent `open` calls fail (device unavailable)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_open.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful opens so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// PCM written by every device this provider opened
    pub fn captured(&self) -> CapturedPcm {
        self.captured.clone()
    }
}

impl DeviceProvider for MemoryDeviceProvider {
    fn open(&self, format: &AudioFormat, buffer_frames: u32) -> AudioResult<Box<dyn OutputDevice>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(AudioError::NoDevices);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let mut device = MemoryDevice::new(*format, buffer_frames as usize)
            .with_capture(self.captured.clone())
            .with_pacing(self.paced);
        if let Some(writes) = self.fail_after_writes {
            device = device.failing_after(writes);
        }
        Ok(Box::new(device))
    }
}
