//! Capture sessions
//!
//! Capture shares the audio device with playback. Beginning a capture takes
//! the device through the [`DeviceArbiter`], which stops all playback and
//! waits for the mixing session to end before the source starts. Starting
//! playback ends an active capture. Capture errors are logged and
//! never reach the mixing engine.

use std::sync::{Arc, Mutex, Weak};

use super::arbiter::{DeviceArbiter, DeviceClient, DeviceRole};
use crate::audio::AudioResult;

/// The recording side of the device layer
pub trait CaptureSource: Send {
    fn start(&mut self) -> AudioResult<()>;

    /// Stop recording and close the capture resources
    fn stop(&mut self) -> AudioResult<()>;
}

struct CaptureState {
    source: Box<dyn CaptureSource>,
    active: bool,
}

pub struct CaptureCoordinator {
    arbiter: Arc<DeviceArbiter>,
    state: Mutex<CaptureState>,
}

impl CaptureCoordinator {
    /// Create a coordinator and register it with `arbiter`
    pub fn new(arbiter: Arc<DeviceArbiter>, source: Box<dyn CaptureSource>) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            arbiter: Arc::clone(&arbiter),
            state: Mutex::new(CaptureState {
                source,
                active: false,
            }),
        });
        let weak = Arc::downgrade(&coordinator);
        let client: Weak<dyn DeviceClient> = weak;
        arbiter.register(DeviceRole::Capture, client);
        coordinator
    }

    /// Start capturing; returns false if the source failed to start or
    /// playback kept the device
    ///
    /// Blocks until playback has released the device.
    pub fn begin(&self) -> bool {
        if self.is_active() {
            return true;
        }
        self.arbiter.acquire(DeviceRole::Capture);

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.active {
            return true;
        }
        if self.arbiter.owner() != Some(DeviceRole::Capture) {
            log::warn!("Playback kept the audio device, capture not started");
            return false;
        }
        match state.source.start() {
            Ok(()) => {
                state.active = true;
                log::info!("Capture started");
                true
            }
            Err(e) => {
                drop(state);
                log::error!("Failed to start capture: {}", e);
                self.arbiter.release(DeviceRole::Capture);
                false
            }
        }
    }

    /// Stop capturing and give the device back
    pub fn end(&self) {
        self.stop_source("capture ended");
        self.arbiter.release(DeviceRole::Capture);
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).active
    }

    fn stop_source(&self, reason: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.active {
            return;
        }
        state.active = false;
        match state.source.stop() {
            Ok(()) => log::info!("Capture stopped ({})", reason),
            Err(e) => log::error!("Error stopping capture ({}): {}", reason, e),
        }
    }
}

impl DeviceClient for CaptureCoordinator {
    fn relinquish(&self) {
        self.stop_source("playback took the device");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct FakeSource {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        refuse: Arc<AtomicBool>,
    }

    impl CaptureSource for FakeSource {
        fn start(&mut self) -> AudioResult<()> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(AudioError::Busy("input".to_string()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) -> AudioResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Err(AudioError::StreamError("stop reported an error".to_string()))
        }
    }

    #[test]
    fn test_begin_and_end() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let source = FakeSource::default();
        let capture = CaptureCoordinator::new(Arc::clone(&arbiter), Box::new(source.clone()));

        assert!(capture.begin());
        assert!(capture.begin());
        assert_eq!(source.starts.load(Ordering::SeqCst), 1);
        assert_eq!(arbiter.owner(), Some(DeviceRole::Capture));

        // Stop errors are logged, not propagated
        capture.end();
        assert!(!capture.is_active());
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
        assert_eq!(arbiter.owner(), None);
    }

    #[test]
    fn test_playback_ends_capture() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let source = FakeSource::default();
        let capture = CaptureCoordinator::new(Arc::clone(&arbiter), Box::new(source.clone()));

        capture.begin();
        assert_eq!(arbiter.acquire(DeviceRole::Playback), Some(DeviceRole::Capture));
        assert!(!capture.is_active());
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
        assert_eq!(arbiter.owner(), Some(DeviceRole::Playback));
    }

    struct StubbornPlayback {
        arbiter: Arc<DeviceArbiter>,
    }

    impl DeviceClient for StubbornPlayback {
        fn relinquish(&self) {
            self.arbiter.acquire(DeviceRole::Playback);
        }
    }

    #[test]
    fn test_capture_waits_for_playback_to_let_go() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let playback: Arc<dyn DeviceClient> = Arc::new(StubbornPlayback {
            arbiter: Arc::clone(&arbiter),
        });
        arbiter.register(DeviceRole::Playback, Arc::downgrade(&playback));
        let source = FakeSource::default();
        let capture = CaptureCoordinator::new(Arc::clone(&arbiter), Box::new(source.clone()));

        arbiter.acquire(DeviceRole::Playback);
        assert!(!capture.begin());
        assert!(!capture.is_active());
        assert_eq!(source.starts.load(Ordering::SeqCst), 0);
        assert_eq!(arbiter.owner(), Some(DeviceRole::Playback));
    }

    #[test]
    fn test_failed_start_releases_device() {
        let arbiter = Arc::new(DeviceArbiter::new());
        let source = FakeSource::default();
        source.refuse.store(true, Ordering::SeqCst);
        let capture = CaptureCoordinator::new(Arc::clone(&arbiter), Box::new(source));

        assert!(!capture.begin());
        assert!(!capture.is_active());
        assert_eq!(arbiter.owner(), None);
    }
}
