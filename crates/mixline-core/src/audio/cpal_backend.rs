//! CPAL output device
//!
//! Adapts CPAL's pull-style callback to the blocking byte sink the mixing
//! engine writes to.
//!
//! ```text
//! ┌──────────────────┐   write() (blocks     ┌─────────────────────┐
//! │  Mixing Thread   │───when ring is full)─►│  Sample Ring Buffer │
//! │ (engine quantum) │                       │ (lock-free SPSC i16)│
//! └──────────────────┘                       └──────────┬──────────┘
//!                                                       │ pop()
//!                                            ┌──────────▼──────────┐
//!                                            │ CPAL Audio Callback │
//!                                            │ advances position   │
//!                                            └─────────────────────┘
//! ```
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream lives on a
//! small host thread that only waits for the close signal. The device handle
//! that moves onto the mixing thread owns the producer side of the ring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};
use crossbeam::channel;

use super::config::DeviceId;
use super::device::{find_device_by_id, get_cpal_default_device, DeviceProvider, FramePosition, OutputDevice};
use super::error::{AudioError, AudioResult};
use crate::types::{AudioFormat, BYTES_PER_SAMPLE};

/// Opens CPAL output devices for the mixing engine
#[derive(Debug, Clone, Default)]
pub struct CpalDeviceProvider {
    /// Output device (None = system default)
    device: Option<DeviceId>,
}

impl CpalDeviceProvider {
    pub fn new(device: Option<DeviceId>) -> Self {
        Self { device }
    }
}

impl DeviceProvider for CpalDeviceProvider {
    fn open(&self, format: &AudioFormat, buffer_frames: u32) -> AudioResult<Box<dyn OutputDevice>> {
        let device = CpalOutputDevice::open(self.device.clone(), *format, buffer_frames)?;
        Ok(Box::new(device))
    }
}

/// Blocking output sink backed by a CPAL stream
pub struct CpalOutputDevice {
    format: AudioFormat,
    buffer_frames: usize,
    /// Producer side of the sample ring (consumer lives in the CPAL callback)
    producer: rtrb::Producer<i16>,
    capacity: usize,
    position: FramePosition,
    /// Set by the stream error callback
    failed: Arc<AtomicBool>,
    close_tx: Option<channel::Sender<()>>,
    host_thread: Option<JoinHandle<()>>,
}

impl CpalOutputDevice {
    /// Open the device and start its stream
    ///
    /// Blocks until the host thread reports whether the stream started.
    pub fn open(device_id: Option<DeviceId>, format: AudioFormat, buffer_frames: u32) -> AudioResult<Self> {
        let capacity = buffer_frames as usize * format.channels as usize;
        let (producer, consumer) = rtrb::RingBuffer::<i16>::new(capacity);
        let position = FramePosition::new();
        let failed = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = channel::bounded::<AudioResult<()>>(1);
        let (close_tx, close_rx) = channel::bounded::<()>(1);

        let stream_position = position.clone();
        let stream_failed = Arc::clone(&failed);
        let host_thread = thread::Builder::new()
            .name("mixline-device".into())
            .spawn(move || {
                let stream = match build_stream(
                    device_id.as_ref(),
                    &format,
                    buffer_frames,
                    consumer,
                    stream_position,
                    stream_failed,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamPlayError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until the engine closes the device
                let _ = close_rx.recv();
                drop(stream);
                log::debug!("Output stream released");
            })
            .map_err(|e| AudioError::StreamBuildError(format!("Failed to spawn device thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = host_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = host_thread.join();
                return Err(AudioError::StreamBuildError(
                    "Device thread exited before the stream started".to_string(),
                ));
            }
        }

        log::info!(
            "Output device opened: {} ({} frames, ~{:.1}ms)",
            format,
            buffer_frames,
            (buffer_frames as f32 / format.sample_rate as f32) * 1000.0
        );

        Ok(Self {
            format,
            buffer_frames: buffer_frames as usize,
            producer,
            capacity,
            position,
            failed,
            close_tx: Some(close_tx),
            host_thread: Some(host_thread),
        })
    }

    /// Poll interval while waiting for ring space (an eighth of the buffer)
    fn poll_interval(&self) -> Duration {
        self.format
            .frames_to_duration(self.buffer_frames as u64 / 8)
            .max(Duration::from_millis(1))
    }

    fn check_stream(&self) -> AudioResult<()> {
        if self.close_tx.is_none() {
            return Err(AudioError::Closed);
        }
        if self.failed.load(Ordering::Acquire) {
            return Err(AudioError::StreamError("Output stream failed".to_string()));
        }
        Ok(())
    }
}

impl OutputDevice for CpalOutputDevice {
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
        let order = self.format.byte_order;
        let total = bytes.len() / BYTES_PER_SAMPLE;
        let mut samples = bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| order.decode([pair[0], pair[1]]));
        let poll = self.poll_interval();

        let mut written = 0;
        while written < total {
            self.check_stream()?;

            let free = self.producer.slots();
            if free == 0 {
                // Back-pressure: wait for the callback to consume
                thread::sleep(poll);
                continue;
            }

            let n = free.min(total - written);
            for sample in samples.by_ref().take(n) {
                // Cannot fail: `n` slots were free and only this thread pushes
                let _ = self.producer.push(sample);
            }
            written += n;
        }

        Ok(total * BYTES_PER_SAMPLE)
    }

    fn drain(&mut self) -> AudioResult<()> {
        // Bounded: twice the time the full ring takes to play out
        let deadline = Instant::now()
            + self.format.frames_to_duration(self.buffer_frames as u64 * 2)
            + Duration::from_millis(50);
        let poll = self.poll_interval();

        while self.producer.slots() < self.capacity {
            self.check_stream()?;
            if Instant::now() >= deadline {
                log::warn!("Output drain timed out with {} samples queued", self.capacity - self.producer.slots());
                break;
            }
            thread::sleep(poll);
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        if let Some(handle) = self.host_thread.take() {
            if handle.join().is_err() {
                log::error!("Output device thread panicked");
            }
        }
    }
}

impl Drop for CpalOutputDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pick a supported stream configuration matching `format`
///
/// Prefers native 16-bit output, falls back to f32 with conversion.
fn select_sample_format(device: &cpal::Device, format: &AudioFormat) -> AudioResult<SampleFormat> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();

    if supported.is_empty() {
        return Err(AudioError::ConfigError(
            "No supported output configurations".to_string(),
        ));
    }

    let matches = |sample_format: SampleFormat| {
        supported.iter().any(|c| {
            c.sample_format() == sample_format
                && c.channels() == format.channels
                && format.sample_rate >= c.min_sample_rate().0
                && format.sample_rate <= c.max_sample_rate().0
        })
    };

    [SampleFormat::I16, SampleFormat::F32]
        .into_iter()
        .find(|sample_format| matches(*sample_format))
        .ok_or_else(|| AudioError::UnsupportedFormat(format.to_string()))
}

fn build_stream(
    device_id: Option<&DeviceId>,
    format: &AudioFormat,
    buffer_frames: u32,
    mut consumer: rtrb::Consumer<i16>,
    position: FramePosition,
    failed: Arc<AtomicBool>,
) -> AudioResult<Stream> {
    let device = match device_id {
        Some(id) => find_device_by_id(id)?,
        None => get_cpal_default_device()?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let sample_format = select_sample_format(&device, format)?;
    let channels = format.channels as usize;
    let stream_config = StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: CpalBufferSize::Fixed(buffer_frames),
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                fill_from_ring(data, &mut consumer, &position, channels, |s| s, 0);
            },
            error_callback(failed),
            None,
        ),
        _ => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                fill_from_ring(data, &mut consumer, &position, channels, |s| s as f32 / 32768.0, 0.0);
            },
            error_callback(failed),
            None,
        ),
    };

    stream.map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

/// Copy queued samples into the device buffer, silence on underrun
#[inline]
fn fill_from_ring<T: Copy>(
    data: &mut [T],
    consumer: &mut rtrb::Consumer<i16>,
    position: &FramePosition,
    channels: usize,
    convert: impl Fn(i16) -> T,
    silence: T,
) {
    let mut popped = 0usize;
    for slot in data.iter_mut() {
        match consumer.pop() {
            Ok(sample) => {
                *slot = convert(sample);
                popped += 1;
            }
            Err(_) => *slot = silence,
        }
    }
    position.advance((popped / channels.max(1)) as u64);
}

fn error_callback(failed: Arc<AtomicBool>) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        log::error!("Output audio stream error: {}", err);
        failed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_from_ring_underrun_is_silent() {
        let (mut producer, mut consumer) = rtrb::RingBuffer::<i16>::new(8);
        let position = FramePosition::new();
        producer.push(1000).unwrap();
        producer.push(-1000).unwrap();

        let mut data = [7i16; 4];
        fill_from_ring(&mut data, &mut consumer, &position, 1, |s| s, 0);

        assert_eq!(data, [1000, -1000, 0, 0]);
        assert_eq!(position.frames(), 2);
    }

    #[test]
    fn test_fill_from_ring_converts_to_float() {
        let (mut producer, mut consumer) = rtrb::RingBuffer::<i16>::new(8);
        let position = FramePosition::new();
        producer.push(16384).unwrap();
        producer.push(-16384).unwrap();

        let mut data = [0.0f32; 2];
        fill_from_ring(&mut data, &mut consumer, &position, 2, |s| s as f32 / 32768.0, 0.0);

        assert_eq!(data, [0.5, -0.5]);
        assert_eq!(position.frames(), 1);
    }
}
