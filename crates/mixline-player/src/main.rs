//! Mixline Player - schedules a few synthesized clips and plays them
//!
//! ## Command line flags
//!
//! - `--config <path>`: Load this YAML config instead of the default location
//! - `--offline`: Render into memory instead of opening the output device,
//!   then report the peak level
//! - `--list-config`: Print the effective configuration as YAML and exit

mod clips;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use clips::ToneSpec;
use mixline_core::audio::{CapturedPcm, CpalDeviceProvider, DeviceProvider, MemoryDeviceProvider};
use mixline_core::config::{default_config_path, load_config, MixerConfig};
use mixline_core::engine::PlaybackEvent;
use mixline_core::{Admission, Mixer};

/// Longest a session is allowed to run before the player gives up
const PLAYBACK_TIMEOUT: Duration = Duration::from_secs(30);

const LEAD: ToneSpec = ToneSpec {
    name: "lead",
    frequency: 440.0,
    seconds: 1.5,
    delay_seconds: 0.0,
    volume: 0.8,
};

/// Started together, half a second after the lead
const CHORD: [ToneSpec; 2] = [
    ToneSpec {
        name: "third",
        frequency: 554.37,
        seconds: 1.0,
        delay_seconds: 0.5,
        volume: 0.6,
    },
    ToneSpec {
        name: "fifth",
        frequency: 659.25,
        seconds: 1.0,
        delay_seconds: 0.5,
        volume: 0.6,
    },
];

struct Args {
    config: Option<PathBuf>,
    offline: bool,
    list_config: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        offline: false,
        list_config: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--offline" => args.offline = true,
            "--list-config" => args.list_config = true,
            other => bail!("Unknown argument: {}", other),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let config: MixerConfig = load_config(&config_path);

    if args.list_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    log::info!("mixline-player starting up");
    let (provider, captured): (Arc<dyn DeviceProvider>, Option<CapturedPcm>) = if args.offline {
        let memory = MemoryDeviceProvider::new();
        let captured = memory.captured();
        (Arc::new(memory), Some(captured))
    } else {
        (Arc::new(CpalDeviceProvider::new(config.audio.device.clone())), None)
    };

    let mixer = Mixer::new(config, provider).context("Failed to create mixer")?;
    let format = mixer.format();
    let events = mixer.subscribe();

    let lead = clips::build(&format, &LEAD)?;
    let chord = CHORD
        .iter()
        .map(|tone| clips::build(&format, tone))
        .collect::<Result<Vec<_>, _>>()?;

    mixer.admit(&lead).context("Failed to start playback")?;
    for (tone, outcome) in CHORD.iter().zip(mixer.admit_synchronized(&chord)?) {
        match outcome {
            Admission::Scheduled { initiation_frame } => {
                log::info!("{} scheduled at frame {}", tone.name, initiation_frame)
            }
            other => log::warn!("{} not scheduled: {:?}", tone.name, other),
        }
    }

    let mut finished = 0;
    loop {
        match events.recv_timeout(PLAYBACK_TIMEOUT) {
            Ok(PlaybackEvent::Stopped { .. }) => finished += 1,
            Ok(PlaybackEvent::EngineStopped { session }) => {
                log::info!("Session {} ended", session);
                break;
            }
            Ok(event) => log::debug!("{:?}", event),
            Err(_) => {
                log::warn!("No playback events for {:?}, stopping", PLAYBACK_TIMEOUT);
                mixer.request_stop_all();
                mixer.wait_until_idle(Duration::from_secs(2));
                break;
            }
        }
    }

    let stats = mixer.stats();
    println!(
        "Played {} clips: {} frames in {} iterations ({})",
        finished, stats.frames_rendered, stats.iterations, format
    );

    if let Some(captured) = captured {
        let samples = captured.samples(&format);
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        let dbfs = if peak == 0 {
            f32::NEG_INFINITY
        } else {
            20.0 * (peak as f32 / i16::MAX as f32).log10()
        };
        println!(
            "Offline render: {:.2}s, peak {} ({:.1} dBFS)",
            format.frames_to_duration(format.bytes_to_frames(captured.len()) as u64).as_secs_f32(),
            peak,
            dbfs
        );
    }

    Ok(())
}
