//! Ordered schedule of live track sequences
//!
//! Entries are kept ascending by `(initiation_frame, admission)`. The
//! admission number is a process-wide counter assigned on insert, so two
//! sequences starting on the same frame keep the order they were admitted
//! in. The mixing engine relies on the ordering: [`SequenceSchedule::scan`]
//! stops at the first entry that is not due yet.
//!
//! The schedule doubles as the registry of queued/playing sequences; a
//! sequence is in it exactly while it may still produce sound.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::track::TrackSequence;
use crate::types::SequenceId;

/// Sort key of a schedule entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScheduleKey {
    pub initiation_frame: u64,
    pub admission: u64,
}

/// Classification produced by one scan
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Entries ready for removal (stopped or played out)
    pub completed: Vec<ScheduleKey>,
    /// Entries that start within the scan horizon
    pub due: Vec<Arc<TrackSequence>>,
    /// Entries beyond the horizon that stay queued
    pub pending: usize,
}

impl ScanResult {
    pub fn clear(&mut self) {
        self.completed.clear();
        self.due.clear();
        self.pending = 0;
    }
}

#[derive(Default)]
pub struct SequenceSchedule {
    entries: BTreeMap<ScheduleKey, Arc<TrackSequence>>,
    index: HashMap<SequenceId, ScheduleKey>,
}

impl SequenceSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: SequenceId) -> bool {
        self.index.contains_key(&id)
    }

    /// Insert `track` to start at `initiation_frame`
    ///
    /// Assigns the track's initiation frame. Returns false (and changes
    /// nothing) if the track is already scheduled.
    pub fn insert(&mut self, track: Arc<TrackSequence>, initiation_frame: u64, admission: u64) -> bool {
        if self.index.contains_key(&track.id()) {
            return false;
        }
        let key = ScheduleKey {
            initiation_frame,
            admission,
        };
        track.set_initiation_frame(initiation_frame);
        self.index.insert(track.id(), key);
        self.entries.insert(key, track);
        true
    }

    pub fn remove(&mut self, key: &ScheduleKey) -> Option<Arc<TrackSequence>> {
        let track = self.entries.remove(key)?;
        self.index.remove(&track.id());
        Some(track)
    }

    pub fn remove_sequence(&mut self, id: SequenceId) -> Option<Arc<TrackSequence>> {
        let key = self.index.remove(&id)?;
        self.entries.remove(&key)
    }

    /// Entries in schedule order
    pub fn iter(&self) -> impl Iterator<Item = (&ScheduleKey, &Arc<TrackSequence>)> {
        self.entries.iter()
    }

    /// Classify entries against `horizon` (the last frame of the next quantum)
    ///
    /// Scanning stops at the first entry that starts after the horizon and is
    /// not complete. With `sweep_tail` the rest of the schedule is still
    /// walked, collecting only completed entries, so a stopped sequence queued
    /// far in the future is removed promptly.
    pub fn scan(&self, horizon: u64, sweep_tail: bool, out: &mut ScanResult) {
        let mut past_horizon = false;
        for (key, track) in &self.entries {
            if track.is_complete() {
                out.completed.push(*key);
            } else if !past_horizon && key.initiation_frame <= horizon {
                out.due.push(Arc::clone(track));
            } else {
                past_horizon = true;
                out.pending += 1;
                if !sweep_tail {
                    break;
                }
            }
        }
    }

    /// Mark every entry admitted before `watermark` as stop-pending
    pub fn stop_admitted_before(&mut self, watermark: u64) -> usize {
        let mut stopped = 0;
        for (key, track) in &self.entries {
            if key.admission < watermark && !track.is_stop_pending() {
                track.mark_stop_pending();
                stopped += 1;
            }
        }
        stopped
    }

    /// Shift the schedule so `origin` becomes frame 0
    ///
    /// Used when a new engine session restarts the timeline. Relative order
    /// is preserved; entries already in the past start immediately.
    pub fn rebase(&mut self, origin: u64) {
        if origin == 0 || self.entries.is_empty() {
            return;
        }
        let entries = std::mem::take(&mut self.entries);
        for (key, track) in entries {
            let rebased = ScheduleKey {
                initiation_frame: key.initiation_frame.saturating_sub(origin),
                admission: key.admission,
            };
            track.set_initiation_frame(rebased.initiation_frame);
            self.index.insert(track.id(), rebased);
            self.entries.insert(rebased, track);
        }
    }

    /// Remove everything, in schedule order
    pub fn drain(&mut self) -> Vec<Arc<TrackSequence>> {
        self.index.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }
}
