//! Real-time mixing engine
//!
//! - [`engine`]: the per-session render loop and the state it shares with
//!   the mixer facade
//! - [`mix`]: fixed-point gain, accumulate and clip kernels
//! - [`events`]: lifecycle notifications and their dispatcher thread
//! - [`gc`]: deferred deallocation of sample buffers
//! - [`rt`]: real-time scheduling for the mixing thread

#[allow(clippy::module_inception)]
mod engine;
pub mod events;
pub mod gc;
pub mod mix;
pub mod rt;

pub use engine::{EngineState, EngineStats, EngineStatsSnapshot, MasterControls};
pub use events::{EventBus, PlaybackEvent};

pub(crate) use engine::{retire, EngineShared, MixingEngine, ScheduleGuard};
