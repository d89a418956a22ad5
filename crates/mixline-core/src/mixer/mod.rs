//! Mixer - the public control surface
//!
//! The [`Mixer`] owns the sequence schedule and starts a mixing session on
//! demand: the first admission opens the output device and spawns the
//! `mixline-engine` thread; the session ends by itself (and releases the
//! device) once nothing is left to play.
//!
//! # Example Usage
//!
//! ```ignore
//! use mixline_core::audio::CpalDeviceProvider;
//! use mixline_core::config::MixerConfig;
//! use mixline_core::mixer::Mixer;
//!
//! let config = MixerConfig::default();
//! let mixer = Mixer::new(config.clone(), Arc::new(CpalDeviceProvider::new(config.audio.device)))?;
//! let events = mixer.subscribe();
//!
//! mixer.admit(&kick)?;
//! mixer.admit_synchronized(&[bass.clone(), pad.clone()])?;
//! mixer.set_master_volume(0.8);
//!
//! for event in events.iter() {
//!     println!("{:?}", event);
//! }
//! ```

mod error;

pub use error::{MixerError, MixerResult};

use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;

use crate::audio::{quantum_for_buffer, DeviceProvider, FramePosition};
use crate::config::MixerConfig;
use crate::coord::{DeviceArbiter, DeviceClient, DeviceRole, NoToneGenerator, ToneGenerator};
use crate::engine::events::NotificationDispatcher;
use crate::engine::{
    retire, rt, EngineShared, EngineState, EngineStatsSnapshot, EventBus, MixingEngine,
    PlaybackEvent, ScheduleGuard,
};
use crate::sequence::TrackSequence;
use crate::types::AudioFormat;

/// Outcome of admitting one sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Inserted; plays from `initiation_frame` on the session timeline
    Scheduled { initiation_frame: u64 },
    /// Already in the schedule; nothing changed
    AlreadyQueued,
    /// Batch member left out (finished, or channel count mismatch)
    Skipped,
}

/// Device details of the running session
#[derive(Clone)]
struct LiveDevice {
    format: AudioFormat,
    position: FramePosition,
    quantum: usize,
}

struct MixerInner {
    shared: Arc<EngineShared>,
    provider: Arc<dyn DeviceProvider>,
    tone: Arc<dyn ToneGenerator>,
    arbiter: Arc<DeviceArbiter>,
    config: MixerConfig,
    format: AudioFormat,
    buffer_frames: u32,
    live: Arc<Mutex<Option<LiveDevice>>>,
    engine_thread: Mutex<Option<JoinHandle<()>>>,
    bus: Arc<EventBus>,
    dispatcher: NotificationDispatcher,
}

/// Handle to the mixer (cheap to clone, shareable across threads)
#[derive(Clone)]
pub struct Mixer {
    inner: Arc<MixerInner>,
}

impl Mixer {
    /// Mixer without a tone generator, with its own device arbiter
    pub fn new(config: MixerConfig, provider: Arc<dyn DeviceProvider>) -> MixerResult<Self> {
        Self::with_coordination(
            config,
            provider,
            Arc::new(NoToneGenerator),
            Arc::new(DeviceArbiter::new()),
        )
    }

    /// Mixer sharing the device with a tone generator and a capture path
    pub fn with_coordination(
        config: MixerConfig,
        provider: Arc<dyn DeviceProvider>,
        tone: Arc<dyn ToneGenerator>,
        arbiter: Arc<DeviceArbiter>,
    ) -> MixerResult<Self> {
        let bus = Arc::new(EventBus::new(config.event_capacity));
        let dispatcher = NotificationDispatcher::spawn(Arc::clone(&bus))
            .map_err(|e| MixerError::EngineSpawn(e.to_string()))?;

        let inner = Arc::new(MixerInner {
            shared: Arc::new(EngineShared::new()),
            provider,
            tone,
            arbiter: Arc::clone(&arbiter),
            format: config.audio.format(),
            buffer_frames: config.audio.effective_buffer_frames(),
            config,
            live: Arc::new(Mutex::new(None)),
            engine_thread: Mutex::new(None),
            bus,
            dispatcher,
        });

        let weak = Arc::downgrade(&inner);
        let client: Weak<dyn DeviceClient> = weak;
        arbiter.register(DeviceRole::Playback, client);

        log::info!(
            "Mixer ready: {} ({} frame device buffer)",
            inner.format,
            inner.buffer_frames
        );
        Ok(Self { inner })
    }

    /// Schedule `track` at `timeline + relative_initiation_frame`
    ///
    /// Starts a mixing session if none is running. Blocks only while a
    /// previous session is shutting down, for a bounded time.
    pub fn admit(&self, track: &Arc<TrackSequence>) -> MixerResult<Admission> {
        let inner = &self.inner;
        if track.has_finished() {
            return Err(MixerError::StaleSequence(track.id()));
        }
        inner.check_format(track)?;
        inner.claim_device();

        let mut state = inner.lock_when_not_stopping()?;
        if state.schedule.contains(track.id()) {
            return Ok(Admission::AlreadyQueued);
        }
        if track.has_finished() {
            return Err(MixerError::StaleSequence(track.id()));
        }

        let initiation = state.timeline + track.relative_initiation_frame();
        inner.shared.schedule(&mut state, track, initiation);
        log::debug!("Admitted sequence {} at frame {}", track.id(), initiation);

        inner.ensure_engine(state)?;
        Ok(Admission::Scheduled {
            initiation_frame: track.initiation_frame().unwrap_or(initiation),
        })
    }

    /// Schedule a group of sequences to start together
    ///
    /// All members share one offset: `timeline + quantum` while a session is
    /// running (the group starts on the next pass), `timeline` otherwise.
    /// Each member starts at that offset plus its relative initiation.
    /// Queued members are left alone and finished or mismatched members are
    /// skipped; only a device failure at session start fails the batch.
    pub fn admit_synchronized(&self, batch: &[Arc<TrackSequence>]) -> MixerResult<Vec<Admission>> {
        let inner = &self.inner;
        inner.claim_device();
        let mut state = inner.lock_when_not_stopping()?;

        let offset = if state.engine == EngineState::Running {
            state.timeline + inner.quantum_frames() as u64
        } else {
            state.timeline
        };

        let mut outcomes = Vec::with_capacity(batch.len());
        let mut scheduled = Vec::new();
        for track in batch {
            if state.schedule.contains(track.id()) {
                outcomes.push(Admission::AlreadyQueued);
                continue;
            }
            if track.has_finished() {
                log::warn!("Skipping finished sequence {} in synchronized batch", track.id());
                outcomes.push(Admission::Skipped);
                continue;
            }
            if let Err(e) = inner.check_format(track) {
                log::warn!("Skipping sequence {} in synchronized batch: {}", track.id(), e);
                outcomes.push(Admission::Skipped);
                continue;
            }

            inner
                .shared
                .schedule(&mut state, track, offset + track.relative_initiation_frame());
            scheduled.push(outcomes.len());
            outcomes.push(Admission::Scheduled {
                initiation_frame: 0,
            });
        }

        if scheduled.is_empty() {
            return Ok(outcomes);
        }
        log::debug!(
            "Admitted {} synchronized sequences at offset {}",
            scheduled.len(),
            offset
        );
        inner.ensure_engine(state)?;

        // Initiation frames may have been rebased by a new session
        for index in scheduled {
            if let Some(frame) = batch[index].initiation_frame() {
                outcomes[index] = Admission::Scheduled {
                    initiation_frame: frame,
                };
            }
        }
        Ok(outcomes)
    }

    /// Stop one sequence at the next quantum; never blocks
    ///
    /// A sequence stopped before it is admitted is retired, without being
    /// mixed, on the first pass after its admission.
    pub fn request_stop(&self, track: &TrackSequence) {
        if !track.has_finished() {
            self.inner.shared.request_stop(track);
        }
    }

    /// Stop everything admitted so far at the next quantum; never blocks
    pub fn request_stop_all(&self) {
        self.inner.shared.request_stop_all();
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.inner.shared.master.set_volume(volume);
    }

    pub fn master_volume(&self) -> f32 {
        self.inner.shared.master.volume()
    }

    pub fn set_master_mute(&self, muted: bool) {
        self.inner.shared.master.set_muted(muted);
    }

    pub fn is_master_muted(&self) -> bool {
        self.inner.shared.master.is_muted()
    }

    /// In solo mode only sequences flagged solo are audible
    pub fn set_solo_enabled(&self, enabled: bool) {
        self.inner.shared.master.set_solo_enabled(enabled);
    }

    pub fn solo_enabled(&self) -> bool {
        self.inner.shared.master.solo_enabled()
    }

    /// Hardware frame position of the running session
    pub fn live_frame_position(&self) -> Option<u64> {
        self.inner.live().map(|live| live.position.frames())
    }

    /// Format negotiated by the running session
    pub fn live_format(&self) -> Option<AudioFormat> {
        self.inner.live().map(|live| live.format)
    }

    pub fn engine_state(&self) -> EngineState {
        self.inner.shared.lock().engine
    }

    /// Frames rendered in the current (or last) session
    pub fn timeline(&self) -> u64 {
        self.inner.shared.timeline()
    }

    /// Number of sequences queued or playing
    pub fn queued_count(&self) -> usize {
        self.inner.shared.lock().schedule.len()
    }

    pub fn is_queued(&self, track: &TrackSequence) -> bool {
        self.inner.shared.lock().schedule.contains(track.id())
    }

    /// Frames rendered per engine iteration
    pub fn quantum_frames(&self) -> usize {
        self.inner.quantum_frames()
    }

    /// Format requested from the device
    pub fn format(&self) -> AudioFormat {
        self.inner.format
    }

    pub fn config(&self) -> &MixerConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.inner.shared.stats.snapshot()
    }

    /// Receive lifecycle events from now on
    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        self.inner.bus.subscribe()
    }

    /// Block until no session is running, or `timeout` passes
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.inner.wait_until_idle(timeout)
    }
}

impl MixerInner {
    fn check_format(&self, track: &TrackSequence) -> MixerResult<()> {
        if track.channels() != self.format.channels {
            return Err(MixerError::FormatMismatch {
                sequence: track.channels(),
                output: self.format.channels,
            });
        }
        Ok(())
    }

    fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while state.engine.is_live() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .state_changed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        true
    }

    /// Take the device back from an active capture
    ///
    /// Must be called without the schedule locked: evicting capture waits
    /// for the capture source to stop.
    fn claim_device(&self) {
        if self.arbiter.owner() == Some(DeviceRole::Capture) {
            self.arbiter.acquire(DeviceRole::Playback);
        }
    }

    fn live(&self) -> Option<LiveDevice> {
        if !self.shared.lock().engine.is_live() {
            return None;
        }
        self.live.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Safe to call with the schedule locked
    fn quantum_frames(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|live| live.quantum)
            .unwrap_or_else(|| quantum_for_buffer(self.buffer_frames))
    }

    /// Lock the schedule once no session is shutting down
    ///
    /// Waits in slices of `stop_wait_ms`, at most `stop_wait_attempts` times.
    fn lock_when_not_stopping(&self) -> MixerResult<ScheduleGuard<'_>> {
        let slice = self.config.stop_wait_slice();
        let mut state = self.shared.lock();
        let mut attempts = 0u32;

        while state.engine == EngineState::Stopping {
            if attempts >= self.config.stop_wait_attempts {
                log::warn!("Admission gave up waiting for the mixing engine to stop");
                return Err(MixerError::EngineStopping(slice * attempts));
            }
            attempts += 1;
            state = self
                .shared
                .state_changed
                .wait_timeout(state, slice)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        Ok(state)
    }

    /// Start a session unless one is running
    ///
    /// Called with the schedule locked and at least one sequence queued.
    fn ensure_engine(&self, mut state: ScheduleGuard<'_>) -> MixerResult<()> {
        if state.engine == EngineState::Running {
            return Ok(());
        }

        // The previous session has terminated; reap its thread
        let previous = self
            .engine_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = previous {
            if handle.join().is_err() {
                log::error!("Previous mixing thread panicked");
            }
        }

        if self.tone.holds_device() {
            log::info!("Releasing tone generator device for playback");
        }
        self.tone.release_device();
        self.arbiter.acquire(DeviceRole::Playback);

        let device = match self.provider.open(&self.format, self.buffer_frames) {
            Ok(device) => device,
            Err(e) => {
                log::error!("Failed to open output device: {}", e);
                self.flush(&mut state);
                drop(state);
                self.arbiter.release(DeviceRole::Playback);
                return Err(MixerError::DeviceUnavailable(e));
            }
        };

        let session = self.shared.begin_session(&mut state);
        *self.live.lock().unwrap_or_else(|e| e.into_inner()) = Some(LiveDevice {
            format: device.format(),
            position: device.position(),
            quantum: quantum_for_buffer(device.buffer_frames() as u32),
        });

        let engine = MixingEngine::new(
            Arc::clone(&self.shared),
            device,
            self.dispatcher.sender(),
            session,
        );
        let realtime = self.config.realtime_priority;
        let live = Arc::clone(&self.live);
        let arbiter = Arc::clone(&self.arbiter);

        let spawned = thread::Builder::new()
            .name("mixline-engine".into())
            .spawn(move || {
                if realtime {
                    rt::set_realtime_priority();
                }
                engine.run();
                *live.lock().unwrap_or_else(|e| e.into_inner()) = None;
                arbiter.release(DeviceRole::Playback);
            });

        match spawned {
            Ok(handle) => {
                *self.engine_thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to spawn mixing thread: {}", e);
                self.flush(&mut state);
                state.engine = EngineState::Terminated;
                drop(state);
                *self.live.lock().unwrap_or_else(|e| e.into_inner()) = None;
                self.arbiter.release(DeviceRole::Playback);
                self.shared.state_changed.notify_all();
                Err(MixerError::EngineSpawn(e.to_string()))
            }
        }
    }

    /// Finish every queued sequence with a stop notification
    fn flush(&self, state: &mut ScheduleGuard<'_>) {
        let notifier = self.dispatcher.sender();
        for track in state.schedule.drain() {
            retire(&notifier, &self.shared.stats, &track);
        }
    }
}

impl DeviceClient for MixerInner {
    /// Stop everything and wait for the session to release the device
    ///
    /// If playback is still running after the admission wait budget (a
    /// sequence admitted after the stop keeps it alive), playback takes the
    /// device back and the capture that asked for it does not start.
    fn relinquish(&self) {
        log::info!("Playback relinquishing the audio device");
        self.shared.request_stop_all();

        let timeout = self.config.stop_wait_slice() * self.config.stop_wait_attempts.max(1);
        if !self.wait_until_idle(timeout) {
            log::warn!("Playback still running after {:?}, keeping the audio device", timeout);
            self.arbiter.acquire(DeviceRole::Playback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioConfig, AudioResult, CapturedPcm, MemoryDeviceProvider};
    use crate::coord::{CaptureCoordinator, CaptureSource};
    use crate::types::ByteOrder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(10);

    fn mixer_with(provider: &MemoryDeviceProvider) -> Mixer {
        let config = MixerConfig::default().with_realtime_priority(false);
        Mixer::new(config, Arc::new(provider.clone())).unwrap()
    }

    fn clip(value: i16, frames: usize) -> Arc<TrackSequence> {
        TrackSequence::from_samples(&vec![value; frames], 1, ByteOrder::Little).unwrap()
    }

    /// Collect events until the session with the given number stops
    fn events_until_stopped(rx: &Receiver<PlaybackEvent>, session: u64) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.recv_timeout(WAIT) {
            events.push(event);
            if event == (PlaybackEvent::EngineStopped { session }) {
                break;
            }
        }
        events
    }

    #[test]
    fn test_admitted_clip_plays_to_completion() {
        let provider = MemoryDeviceProvider::new();
        let mixer = mixer_with(&provider);
        let events = mixer.subscribe();
        let track = clip(1234, 3000);

        assert_eq!(
            mixer.admit(&track).unwrap(),
            Admission::Scheduled { initiation_frame: 0 }
        );
        assert!(mixer.wait_until_idle(WAIT));

        let events = events_until_stopped(&events, 1);
        assert!(events.contains(&PlaybackEvent::EngineStarted { session: 1 }));
        assert!(events.contains(&PlaybackEvent::Started { sequence: track.id() }));
        assert!(events.contains(&PlaybackEvent::Stopped {
            sequence: track.id(),
            final_frame: 2999,
        }));

        let format = mixer.format();
        let samples = provider.captured().samples(&format);
        assert_eq!(samples.len(), 3000);
        assert!(samples.iter().all(|&s| s == 1234));
        assert!(track.has_finished());
        assert_eq!(mixer.engine_state(), EngineState::Terminated);
        assert_eq!(mixer.live_format(), None);
        assert_eq!(mixer.live_frame_position(), None);
        assert_eq!(mixer.stats().sequences_finished, 1);
    }

    #[test]
    fn test_finished_clip_is_rejected_every_time() {
        let provider = MemoryDeviceProvider::new();
        let mixer = mixer_with(&provider);
        let track = clip(1, 100);

        mixer.admit(&track).unwrap();
        assert!(mixer.wait_until_idle(WAIT));
        assert!(track.has_finished());

        for _ in 0..3 {
            assert_eq!(
                mixer.admit(&track),
                Err(MixerError::StaleSequence(track.id()))
            );
        }
        assert_eq!(mixer.queued_count(), 0);
    }

    #[test]
    fn test_queued_clip_is_not_admitted_twice() {
        let provider = MemoryDeviceProvider::new().paced();
        let mixer = mixer_with(&provider);
        let track = clip(1, 441_000);

        mixer.admit(&track).unwrap();
        assert_eq!(mixer.admit(&track).unwrap(), Admission::AlreadyQueued);
        assert!(mixer.is_queued(&track));
        assert_eq!(mixer.queued_count(), 1);
        assert_eq!(mixer.live_format(), Some(mixer.format()));
        assert!(mixer.live_frame_position().is_some());

        mixer.request_stop_all();
        assert!(mixer.wait_until_idle(WAIT));
        assert!(track.has_finished());
        assert!(!mixer.is_queued(&track));
    }

    #[test]
    fn test_synchronized_batch_while_idle_shares_initiation() {
        let provider = MemoryDeviceProvider::new().paced();
        let mixer = mixer_with(&provider);
        let a = clip(1, 441_000);
        let b = clip(2, 441_000);

        let outcomes = mixer
            .admit_synchronized(&[Arc::clone(&a), Arc::clone(&b)])
            .unwrap();
        assert_eq!(
            outcomes,
            vec![
                Admission::Scheduled { initiation_frame: 0 },
                Admission::Scheduled { initiation_frame: 0 },
            ]
        );
        assert_eq!(a.initiation_frame(), b.initiation_frame());

        mixer.request_stop_all();
        assert!(mixer.wait_until_idle(WAIT));
    }

    #[test]
    fn test_synchronized_batch_while_running_starts_next_quantum() {
        let provider = MemoryDeviceProvider::new();
        let mixer = mixer_with(&provider);
        {
            // A session mid-flight, without a thread driving it
            let mut state = mixer.inner.shared.lock();
            state.engine = EngineState::Running;
            state.timeline = 5000;
        }
        let a = clip(1, 100);
        let b = clip(2, 100);
        let quantum = mixer.quantum_frames() as u64;
        assert_eq!(quantum, 1024);

        let outcomes = mixer
            .admit_synchronized(&[Arc::clone(&a), Arc::clone(&b), Arc::clone(&a)])
            .unwrap();
        assert_eq!(
            outcomes,
            vec![
                Admission::Scheduled { initiation_frame: 5000 + quantum },
                Admission::Scheduled { initiation_frame: 5000 + quantum },
                Admission::AlreadyQueued,
            ]
        );
        assert_eq!(provider.open_count(), 0);
    }

    #[test]
    fn test_synchronized_batch_skips_stale_members() {
        let provider = MemoryDeviceProvider::new();
        let mixer = mixer_with(&provider);
        let stale = clip(1, 100);
        mixer.admit(&stale).unwrap();
        assert!(mixer.wait_until_idle(WAIT));

        let fresh = clip(1, 100);
        let stereo = TrackSequence::from_samples(&[0i16; 200], 2, ByteOrder::Little).unwrap();
        let outcomes = mixer
            .admit_synchronized(&[Arc::clone(&stale), Arc::clone(&fresh), stereo])
            .unwrap();
        assert_eq!(outcomes[0], Admission::Skipped);
        assert!(matches!(outcomes[1], Admission::Scheduled { .. }));
        assert_eq!(outcomes[2], Admission::Skipped);
        assert!(mixer.wait_until_idle(WAIT));
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let provider = MemoryDeviceProvider::new();
        let mixer = mixer_with(&provider);
        let stereo = TrackSequence::from_samples(&[0i16; 200], 2, ByteOrder::Little).unwrap();

        assert_eq!(
            mixer.admit(&stereo),
            Err(MixerError::FormatMismatch { sequence: 2, output: 1 })
        );
        assert_eq!(provider.open_count(), 0);
    }

    #[test]
    fn test_stereo_output_mixes_interleaved_frames() {
        let provider = MemoryDeviceProvider::new();
        let config = MixerConfig::default()
            .with_audio(AudioConfig::default().with_channels(2).with_byte_order(ByteOrder::Big))
            .with_realtime_priority(false);
        let mixer = Mixer::new(config, Arc::new(provider.clone())).unwrap();

        let mut samples = Vec::new();
        for _ in 0..500 {
            samples.extend_from_slice(&[100i16, -100]);
        }
        let track = TrackSequence::from_samples(&samples, 2, ByteOrder::Little).unwrap();
        mixer.admit(&track).unwrap();
        assert!(mixer.wait_until_idle(WAIT));

        let output = provider.captured().samples(&mixer.format());
        assert_eq!(output, samples);
    }

    #[test]
    fn test_device_unavailable_fails_admission() {
        let provider = MemoryDeviceProvider::new();
        let mixer = mixer_with(&provider);
        let events = mixer.subscribe();
        provider.set_unavailable(true);

        let track = clip(1, 100);
        assert!(matches!(
            mixer.admit(&track),
            Err(MixerError::DeviceUnavailable(_))
        ));
        assert!(track.has_finished());
        assert_eq!(mixer.queued_count(), 0);
        assert!(!mixer.engine_state().is_live());
        assert_eq!(
            events.recv_timeout(WAIT).unwrap(),
            PlaybackEvent::Stopped {
                sequence: track.id(),
                final_frame: 0,
            }
        );

        provider.set_unavailable(false);
        let retry = clip(1, 100);
        assert!(mixer.admit(&retry).is_ok());
        assert!(mixer.wait_until_idle(WAIT));
        assert_eq!(provider.open_count(), 1);
    }

    #[test]
    fn test_admission_gives_up_while_engine_stays_stopping() {
        let provider = MemoryDeviceProvider::new();
        let config = MixerConfig::default()
            .with_stop_wait(Duration::from_millis(5), 2)
            .with_realtime_priority(false);
        let mixer = Mixer::new(config, Arc::new(provider)).unwrap();
        mixer.inner.shared.lock().engine = EngineState::Stopping;

        let result = mixer.admit(&clip(1, 100));
        assert_eq!(
            result,
            Err(MixerError::EngineStopping(Duration::from_millis(10)))
        );
    }

    #[test]
    fn test_sessions_restart_timeline() {
        let provider = MemoryDeviceProvider::new();
        let mixer = mixer_with(&provider);
        let events = mixer.subscribe();

        mixer.admit(&clip(1, 2048)).unwrap();
        assert!(mixer.wait_until_idle(WAIT));
        assert_eq!(mixer.timeline(), 2048);

        let second = clip(1, 100);
        assert_eq!(
            mixer.admit(&second).unwrap(),
            Admission::Scheduled { initiation_frame: 0 }
        );
        assert!(mixer.wait_until_idle(WAIT));
        assert_eq!(mixer.timeline(), 100);

        let all = events_until_stopped(&events, 2);
        assert!(all.contains(&PlaybackEvent::EngineStopped { session: 1 }));
        assert_eq!(provider.open_count(), 2);
    }

    #[test]
    fn test_request_stop_single_clip() {
        let provider = MemoryDeviceProvider::new().paced();
        let mixer = mixer_with(&provider);
        let keep = clip(1, 8192);
        let stop = clip(1, 441_000);

        mixer.admit(&keep).unwrap();
        mixer.admit(&stop).unwrap();
        mixer.request_stop(&stop);

        assert!(mixer.wait_until_idle(WAIT));
        assert!(stop.has_finished());
        assert!(stop.final_frame() < 441_000 - 1);
        assert_eq!(keep.final_frame(), 8191);
    }

    #[test]
    fn test_clip_stopped_before_admission_never_plays() {
        let provider = MemoryDeviceProvider::new();
        let mixer = mixer_with(&provider);
        let events = mixer.subscribe();
        let track = clip(5000, 4096);

        mixer.request_stop(&track);
        assert!(track.is_stop_pending());
        mixer.admit(&track).unwrap();
        assert!(mixer.wait_until_idle(WAIT));

        assert!(track.has_finished());
        assert_eq!(track.final_frame(), 0);
        assert!(provider.captured().is_empty());
        let events = events_until_stopped(&events, 1);
        assert!(!events.contains(&PlaybackEvent::Started { sequence: track.id() }));
        assert!(events.contains(&PlaybackEvent::Stopped {
            sequence: track.id(),
            final_frame: 0,
        }));
    }

    #[test]
    fn test_master_setters_are_visible() {
        let provider = MemoryDeviceProvider::new();
        let mixer = mixer_with(&provider);
        mixer.set_master_volume(1.5);
        mixer.set_master_mute(true);
        mixer.set_solo_enabled(true);

        assert_eq!(mixer.master_volume(), 1.0);
        assert!(mixer.is_master_muted());
        assert!(mixer.solo_enabled());

        mixer.admit(&clip(9000, 500)).unwrap();
        assert!(mixer.wait_until_idle(WAIT));
        let format = mixer.format();
        assert!(provider.captured().samples(&format).iter().all(|&s| s == 0));
    }

    #[derive(Default)]
    struct RecordingTone {
        releases: AtomicUsize,
    }

    impl ToneGenerator for RecordingTone {
        fn holds_device(&self) -> bool {
            self.releases.load(Ordering::SeqCst) == 0
        }

        fn release_device(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_tone_generator_released_before_each_session() {
        let provider = MemoryDeviceProvider::new();
        let tone = Arc::new(RecordingTone::default());
        let mixer = Mixer::with_coordination(
            MixerConfig::default().with_realtime_priority(false),
            Arc::new(provider),
            tone.clone(),
            Arc::new(DeviceArbiter::new()),
        )
        .unwrap();

        mixer.admit(&clip(1, 100)).unwrap();
        assert!(mixer.wait_until_idle(WAIT));
        mixer.admit(&clip(1, 100)).unwrap();
        assert!(mixer.wait_until_idle(WAIT));

        assert_eq!(tone.releases.load(Ordering::SeqCst), 2);
    }

    /// Records what playback was doing at the moment capture started
    #[derive(Clone)]
    struct RecordingCapture {
        mixer: Mixer,
        output: CapturedPcm,
        started: Arc<Mutex<Option<(EngineState, usize)>>>,
        stops: Arc<AtomicUsize>,
    }

    impl RecordingCapture {
        fn new(mixer: &Mixer, provider: &MemoryDeviceProvider) -> Self {
            Self {
                mixer: mixer.clone(),
                output: provider.captured(),
                started: Arc::new(Mutex::new(None)),
                stops: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl CaptureSource for RecordingCapture {
        fn start(&mut self) -> AudioResult<()> {
            *self.started.lock().unwrap() = Some((self.mixer.engine_state(), self.output.len()));
            Ok(())
        }

        fn stop(&mut self) -> AudioResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn coordinated(provider: &MemoryDeviceProvider, arbiter: &Arc<DeviceArbiter>) -> Mixer {
        Mixer::with_coordination(
            MixerConfig::default().with_realtime_priority(false),
            Arc::new(provider.clone()),
            Arc::new(NoToneGenerator),
            Arc::clone(arbiter),
        )
        .unwrap()
    }

    #[test]
    fn test_capture_starts_only_after_playback_released_device() {
        let provider = MemoryDeviceProvider::new().paced();
        let arbiter = Arc::new(DeviceArbiter::new());
        let mixer = coordinated(&provider, &arbiter);
        let source = RecordingCapture::new(&mixer, &provider);
        let capture = CaptureCoordinator::new(Arc::clone(&arbiter), Box::new(source.clone()));

        let long = clip(1, 441_000);
        mixer.admit(&long).unwrap();
        assert_eq!(arbiter.owner(), Some(DeviceRole::Playback));
        thread::sleep(Duration::from_millis(100));

        assert!(capture.begin());
        let (state_at_start, written_at_start) = source.started.lock().unwrap().unwrap();
        assert_eq!(state_at_start, EngineState::Terminated);
        assert!(long.has_finished());
        assert_eq!(arbiter.owner(), Some(DeviceRole::Capture));

        // Nothing reaches the output while capturing
        thread::sleep(Duration::from_millis(100));
        assert_eq!(provider.captured().len(), written_at_start);
        assert_eq!(mixer.engine_state(), EngineState::Terminated);
    }

    #[test]
    fn test_admission_ends_capture_before_playing() {
        let provider = MemoryDeviceProvider::new();
        let arbiter = Arc::new(DeviceArbiter::new());
        let mixer = coordinated(&provider, &arbiter);
        let source = RecordingCapture::new(&mixer, &provider);
        let capture = CaptureCoordinator::new(Arc::clone(&arbiter), Box::new(source.clone()));

        assert!(capture.begin());
        mixer.admit(&clip(1, 100)).unwrap();
        assert!(!capture.is_active());
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
        assert!(mixer.wait_until_idle(WAIT));

        assert!(capture.begin());
        mixer
            .admit_synchronized(&[clip(1, 100), clip(2, 100)])
            .unwrap();
        assert!(!capture.is_active());
        assert_eq!(source.stops.load(Ordering::SeqCst), 2);
        assert!(mixer.wait_until_idle(WAIT));
    }

    #[test]
    fn test_capture_refused_while_playback_keeps_running() {
        let provider = MemoryDeviceProvider::new();
        let arbiter = Arc::new(DeviceArbiter::new());
        let config = MixerConfig::default()
            .with_stop_wait(Duration::from_millis(5), 2)
            .with_realtime_priority(false);
        let mixer = Mixer::with_coordination(
            config,
            Arc::new(provider.clone()),
            Arc::new(NoToneGenerator),
            Arc::clone(&arbiter),
        )
        .unwrap();
        let source = RecordingCapture::new(&mixer, &provider);
        let capture = CaptureCoordinator::new(Arc::clone(&arbiter), Box::new(source.clone()));

        // A session that never reaches its end within the wait budget
        mixer.inner.shared.lock().engine = EngineState::Running;
        arbiter.acquire(DeviceRole::Playback);

        assert!(!capture.begin());
        assert!(!capture.is_active());
        assert!(source.started.lock().unwrap().is_none());
        assert_eq!(arbiter.owner(), Some(DeviceRole::Playback));
    }
}
