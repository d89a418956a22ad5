//! Configuration for mixline
//!
//! ```ignore
//! use mixline_core::config::{default_config_path, load_config, save_config, MixerConfig};
//!
//! let path = default_config_path();
//! let config: MixerConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod io;
mod mixer;
mod paths;

pub use io::{load_config, save_config};
pub use mixer::{
    MixerConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_STOP_WAIT_ATTEMPTS, DEFAULT_STOP_WAIT_MS,
};
pub use paths::{config_dir, default_config_path};
