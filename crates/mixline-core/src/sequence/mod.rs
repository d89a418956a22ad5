//! Track sequences and the schedule that orders them

mod schedule;
mod track;

pub use schedule::{ScanResult, ScheduleKey, SequenceSchedule};
pub use track::{
    SampleData, SequenceError, SequenceListener, SequenceState, TrackSequence,
    TrackSequenceBuilder,
};

pub(crate) use track::clamp_gain;
