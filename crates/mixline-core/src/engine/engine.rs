//! Mixing engine - the real-time render loop
//!
//! One engine runs per playback session on the `mixline-engine` thread. Each
//! iteration renders one quantum (half the device buffer):
//!
//! 1. Under the schedule lock: apply stop requests, scan the schedule,
//!    retire completed sequences, collect the due ones
//! 2. Terminate if nothing is due and nothing is queued
//! 3. Without the lock: mix due sequences into an `i32` accumulator
//! 4. Apply master mute/volume, clip, encode to the device byte order
//! 5. Advance the timeline under the lock, then write to the device
//!
//! The timeline is advanced before the (blocking) write, so it never trails
//! the hardware position.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use basedrop::Shared;
use crossbeam::channel::Sender;

use super::events::{Notification, PlaybackEvent};
use super::mix::{accumulate, gain_to_q16, render, render_silence};
use crate::audio::{quantum_for_buffer, AudioError, OutputDevice};
use crate::sequence::{clamp_gain, SampleData, ScanResult, SequenceSchedule, TrackSequence};
use crate::types::AudioFormat;

/// Lifecycle of the mixing engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No session has run yet
    #[default]
    NotStarted,
    /// Rendering; holds the output device
    Running,
    /// Releasing the device; admissions wait
    Stopping,
    /// Session ended; the next admission starts a new one
    Terminated,
}

impl EngineState {
    /// True while a session holds the device
    pub fn is_live(self) -> bool {
        matches!(self, EngineState::Running | EngineState::Stopping)
    }
}

/// State guarded by the schedule lock
pub(crate) struct ScheduleState {
    pub schedule: SequenceSchedule,
    /// Frames rendered since the current (or last) session started
    pub timeline: u64,
    pub engine: EngineState,
    /// Incremented for every engine session
    pub session: u64,
}

pub(crate) type ScheduleGuard<'a> = MutexGuard<'a, ScheduleState>;

/// Master mix parameters, read by the engine once per quantum
pub struct MasterControls {
    /// f32 bits
    volume: AtomicU32,
    muted: AtomicBool,
    solo_enabled: AtomicBool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MasterSnapshot {
    pub gain_q16: i32,
    pub muted: bool,
    pub solo_enabled: bool,
}

impl MasterControls {
    pub fn new() -> Self {
        Self {
            volume: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
            solo_enabled: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(clamp_gain(volume).to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// When enabled only sequences flagged solo are audible
    #[inline]
    pub fn solo_enabled(&self) -> bool {
        self.solo_enabled.load(Ordering::Relaxed)
    }

    pub fn set_solo_enabled(&self, enabled: bool) {
        self.solo_enabled.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MasterSnapshot {
        MasterSnapshot {
            gain_q16: gain_to_q16(self.volume()),
            muted: self.is_muted(),
            solo_enabled: self.solo_enabled(),
        }
    }
}

impl Default for MasterControls {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-free engine counters for monitoring
#[derive(Default)]
pub struct EngineStats {
    iterations: AtomicU64,
    frames_rendered: AtomicU64,
    sequences_finished: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStatsSnapshot {
    pub iterations: u64,
    pub frames_rendered: u64,
    pub sequences_finished: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            iterations: self.iterations.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            sequences_finished: self.sequences_finished.load(Ordering::Relaxed),
        }
    }
}

/// Everything the mixer facade and the engine thread share
pub(crate) struct EngineShared {
    state: Mutex<ScheduleState>,
    /// Signalled on every engine state transition
    pub state_changed: Condvar,
    /// Mirror of `ScheduleState::timeline` for lock-free reads
    timeline: AtomicU64,
    /// Next admission number
    admissions: AtomicU64,
    /// Sequences admitted before this number are to be stopped
    stop_watermark: AtomicU64,
    /// A single sequence was stopped; sweep past the scan horizon
    stop_sweep: AtomicBool,
    pub master: MasterControls,
    pub stats: EngineStats,
}

impl EngineShared {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScheduleState {
                schedule: SequenceSchedule::new(),
                timeline: 0,
                engine: EngineState::NotStarted,
                session: 0,
            }),
            state_changed: Condvar::new(),
            timeline: AtomicU64::new(0),
            admissions: AtomicU64::new(0),
            stop_watermark: AtomicU64::new(0),
            stop_sweep: AtomicBool::new(false),
            master: MasterControls::new(),
            stats: EngineStats::default(),
        }
    }

    pub fn lock(&self) -> ScheduleGuard<'_> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn timeline(&self) -> u64 {
        self.timeline.load(Ordering::Acquire)
    }

    fn set_timeline(&self, state: &mut ScheduleState, frames: u64) {
        state.timeline = frames;
        self.timeline.store(frames, Ordering::Release);
    }

    /// Insert `track` at `initiation_frame`; false if already scheduled
    pub fn schedule(&self, state: &mut ScheduleState, track: &Arc<TrackSequence>, initiation_frame: u64) -> bool {
        if state.schedule.contains(track.id()) {
            return false;
        }
        let admission = self.admissions.fetch_add(1, Ordering::AcqRel);
        state
            .schedule
            .insert(Arc::clone(track), initiation_frame, admission)
    }

    /// Start a new session: rebase the schedule and restart the timeline
    pub fn begin_session(&self, state: &mut ScheduleState) -> u64 {
        let origin = state.timeline;
        state.schedule.rebase(origin);
        self.set_timeline(state, 0);
        state.engine = EngineState::Running;
        state.session += 1;
        self.state_changed.notify_all();
        state.session
    }

    /// Flag one sequence for removal on the next iteration
    pub fn request_stop(&self, track: &TrackSequence) {
        track.mark_stop_pending();
        self.stop_sweep.store(true, Ordering::Release);
    }

    /// Flag every sequence admitted so far for removal
    pub fn request_stop_all(&self) {
        let mark = self.admissions.load(Ordering::Acquire);
        self.stop_watermark.fetch_max(mark, Ordering::AcqRel);
    }
}

/// Result of one engine iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Iteration {
    Rendered { frames: usize },
    Terminated,
}

struct MixJob {
    track: Arc<TrackSequence>,
    source: Shared<SampleData>,
}

/// The render loop of one playback session
pub(crate) struct MixingEngine {
    shared: Arc<EngineShared>,
    device: Box<dyn OutputDevice>,
    notifier: Sender<Notification>,
    format: AudioFormat,
    quantum: usize,
    session: u64,
    applied_watermark: u64,

    // Reused every iteration
    scan: ScanResult,
    jobs: Vec<MixJob>,
    accumulator: Vec<i32>,
    output: Vec<u8>,
}

impl MixingEngine {
    pub fn new(
        shared: Arc<EngineShared>,
        device: Box<dyn OutputDevice>,
        notifier: Sender<Notification>,
        session: u64,
    ) -> Self {
        let format = device.format();
        let quantum = quantum_for_buffer(device.buffer_frames() as u32);
        let samples = quantum * format.channels as usize;

        Self {
            shared,
            device,
            notifier,
            format,
            quantum,
            session,
            applied_watermark: 0,
            scan: ScanResult::default(),
            jobs: Vec::new(),
            accumulator: vec![0; samples],
            output: Vec::with_capacity(format.frames_to_bytes(quantum)),
        }
    }

    pub fn quantum(&self) -> usize {
        self.quantum
    }

    /// Render until the session terminates
    pub fn run(mut self) {
        log::info!(
            "Mixing session {} started ({}, quantum {} frames)",
            self.session,
            self.format,
            self.quantum
        );
        let _ = self.notifier.send(Notification::engine(PlaybackEvent::EngineStarted {
            session: self.session,
        }));

        while let Iteration::Rendered { .. } = self.iterate() {}
    }

    /// Render one quantum (or terminate)
    pub fn iterate(&mut self) -> Iteration {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();

        let watermark = shared.stop_watermark.load(Ordering::Acquire);
        let mut sweep = shared.stop_sweep.swap(false, Ordering::AcqRel);
        if watermark > self.applied_watermark {
            let stopped = state.schedule.stop_admitted_before(watermark);
            if stopped > 0 {
                log::debug!("Stop-all flagged {} sequences", stopped);
            }
            self.applied_watermark = watermark;
            sweep = true;
        }

        let timeline = state.timeline;
        self.scan.clear();
        state
            .schedule
            .scan(timeline + self.quantum as u64, sweep, &mut self.scan);

        for key in &self.scan.completed {
            if let Some(track) = state.schedule.remove(key) {
                retire(&self.notifier, &shared.stats, &track);
            }
        }

        if self.scan.due.is_empty() && state.schedule.is_empty() {
            return self.shut_down(state, None);
        }

        self.jobs.clear();
        for track in self.scan.due.drain(..) {
            if let Some(source) = track.source() {
                self.jobs.push(MixJob { track, source });
            }
        }
        let pending = self.scan.pending > 0;
        drop(state);

        let produced = self.mix(timeline, pending);

        let mut state = shared.lock();
        let advanced = state.timeline + produced as u64;
        shared.set_timeline(&mut state, advanced);
        drop(state);

        shared.stats.iterations.fetch_add(1, Ordering::Relaxed);
        shared
            .stats
            .frames_rendered
            .fetch_add(produced as u64, Ordering::Relaxed);

        let written = self.device.write(&self.output);
        // Release sample references outside the lock (deallocation is deferred)
        self.jobs.clear();

        match written {
            Ok(_) => Iteration::Rendered { frames: produced },
            Err(e) => {
                let state = shared.lock();
                self.shut_down(state, Some(e))
            }
        }
    }

    /// Mix the collected jobs into `self.output`; returns frames produced
    fn mix(&mut self, timeline: u64, pending: bool) -> usize {
        let channels = self.format.channels as usize;
        let quantum = self.quantum;
        let master = self.shared.master.snapshot();

        let acc = &mut self.accumulator[..quantum * channels];
        acc.fill(0);

        let mut filled = 0usize;
        let mut continues = pending;

        for job in &self.jobs {
            let track = &job.track;
            let initiation = track.initiation_frame().unwrap_or(timeline);
            let offset = (initiation.saturating_sub(timeline) as usize).min(quantum);
            let span = quantum - offset;
            if span == 0 {
                // Starts exactly at the next quantum boundary
                continues = true;
                continue;
            }

            if track.mark_playing() {
                let _ = self.notifier.send(Notification::sequence(
                    track,
                    PlaybackEvent::Started {
                        sequence: track.id(),
                    },
                ));
            }

            let cursor = track.current_frame();
            let remaining = (track.end_frame() + 1).saturating_sub(cursor);
            let frames = (span as u64).min(remaining) as usize;

            let audible = !track.is_muted() && (!master.solo_enabled || track.is_solo());
            if audible && frames > 0 {
                accumulate(
                    &mut acc[offset * channels..(offset + frames) * channels],
                    job.source.frames(cursor, frames),
                    track.byte_order(),
                    gain_to_q16(track.volume()),
                );
            }

            // Silenced sequences keep pace with the timeline
            track.advance_cursor(span as u64);
            if cursor + span as u64 <= track.end_frame() {
                continues = true;
            }
            filled = filled.max(offset + frames);
        }

        let produced = if continues || filled == 0 { quantum } else { filled };
        let samples = produced * channels;

        self.output.clear();
        if master.muted {
            render_silence(samples, &mut self.output);
        } else {
            render(&acc[..samples], master.gain_q16, self.format.byte_order, &mut self.output);
        }
        produced
    }

    /// Release the device, flush the schedule and mark the session ended
    fn shut_down(&mut self, mut state: ScheduleGuard<'_>, failure: Option<AudioError>) -> Iteration {
        state.engine = EngineState::Stopping;
        self.shared.state_changed.notify_all();
        drop(state);

        match &failure {
            None => {
                if let Err(e) = self.device.drain() {
                    log::warn!("Output drain failed: {}", e);
                }
            }
            Some(e) => log::error!("Output device failed in session {}: {}", self.session, e),
        }
        self.device.close();

        // Leftovers finish under the lock, so no admission can see a drained
        // sequence that is not yet marked finished
        let mut state = self.shared.lock();
        for track in state.schedule.drain() {
            retire(&self.notifier, &self.shared.stats, &track);
        }
        state.engine = EngineState::Terminated;
        let timeline = state.timeline;
        drop(state);
        self.shared.state_changed.notify_all();

        let _ = self.notifier.send(Notification::engine(PlaybackEvent::EngineStopped {
            session: self.session,
        }));
        log::info!(
            "Mixing session {} terminated after {} frames{}",
            self.session,
            timeline,
            if failure.is_some() { " (device error)" } else { "" }
        );
        Iteration::Terminated
    }
}

/// Finish `track` and publish its stop notification
pub(crate) fn retire(notifier: &Sender<Notification>, stats: &EngineStats, track: &TrackSequence) {
    let final_frame = track.final_frame();
    if track.finish() {
        stats.sequences_finished.fetch_add(1, Ordering::Relaxed);
        let _ = notifier.send(Notification::sequence(
            track,
            PlaybackEvent::Stopped {
                sequence: track.id(),
                final_frame,
            },
        ));
    }
}
