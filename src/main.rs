//! oxide-audio - audio device I/O
//!
//! Command-line entry point: list devices, play test signals, meter input.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use oa_core::config::Config;
use oa_device::{DeviceInfo, DeviceIo, DeviceRegistry, DeviceSession, Direction};

const USAGE: &str = "usage: oxide-audio <list | sine [hz] [secs] | noise [secs] | meter [secs]>";
const METER_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    // Load config to get initial log level
    let config = Config::load().unwrap_or_default();
    oa_core::logging::init(&config);

    tracing::info!("Starting oxide-audio");

    let registry = DeviceRegistry::with_config(config.audio.clone())
        .context("failed to bring up the audio subsystem")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("list");
    match command {
        "list" => list(&registry),
        "sine" => {
            let hz = parse_arg(&args, 1, 440.0)?;
            let secs = parse_arg(&args, 2, 2.0)?;
            sine(&registry, hz, secs)
        }
        "noise" => noise(&registry, parse_arg(&args, 1, 2.0)?),
        "meter" => meter(&registry, parse_arg(&args, 1, 5.0)?),
        "help" | "-h" | "--help" => {
            println!("{USAGE}");
            Ok(())
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }
}

fn parse_arg(args: &[String], index: usize, default: f32) -> Result<f32> {
    match args.get(index) {
        Some(value) => value
            .parse()
            .with_context(|| format!("invalid number '{value}'")),
        None => Ok(default),
    }
}

fn list(registry: &DeviceRegistry) -> Result<()> {
    println!("backend: {}", registry.backend_name());
    for direction in [Direction::Output, Direction::Input] {
        let default = registry
            .default_device(direction)?
            .map(|session| session.name().to_string());
        println!("{direction} devices:");
        for session in registry.devices(direction)? {
            let marker = if default.as_deref() == Some(session.name()) {
                "*"
            } else {
                " "
            };
            let format = session.format();
            println!(
                " {marker} {} ({} ch, {} Hz, {}, {} frames)",
                session.name(),
                format.channels,
                format.sample_rate,
                format.sample_format,
                format.buffer_size_frames
            );
        }
    }
    Ok(())
}

fn default_output(registry: &DeviceRegistry) -> Result<DeviceSession> {
    registry
        .default_output_device()?
        .context("no default output device")
}

/// Play on the default output for `secs`, then stop
fn run_for(session: &mut DeviceSession, secs: f32) -> Result<()> {
    session.start()?;
    println!(
        "{}: {} Hz, {} frames per period",
        session.name(),
        session.sample_rate(),
        session.buffer_size_frames()
    );
    thread::sleep(Duration::from_secs_f32(secs.max(0.0)));
    session.stop()?;
    Ok(())
}

fn sine(registry: &DeviceRegistry, hz: f32, secs: f32) -> Result<()> {
    let mut session = default_output(registry)?;
    let step = hz / session.sample_rate() as f32;
    let mut phase = 0.0f32;
    session.connect::<f32, _>(move |_: &DeviceInfo, io: &mut DeviceIo<'_, f32>| {
        let Some(out) = io.output_buffer.as_mut() else {
            return;
        };
        for frame in 0..out.size_frames() {
            let value = (phase * TAU).sin() * 0.2;
            phase = (phase + step).fract();
            for channel in 0..out.size_channels() {
                out[(channel, frame)] = value;
            }
        }
    })?;
    run_for(&mut session, secs)
}

fn noise(registry: &DeviceRegistry, secs: f32) -> Result<()> {
    let mut session = default_output(registry)?;
    let mut state = 0x2545_f491_u32;
    session.connect::<f32, _>(move |_: &DeviceInfo, io: &mut DeviceIo<'_, f32>| {
        let Some(out) = io.output_buffer.as_mut() else {
            return;
        };
        for frame in 0..out.size_frames() {
            // xorshift32
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let value = (state as f32 / u32::MAX as f32 * 2.0 - 1.0) * 0.1;
            for channel in 0..out.size_channels() {
                out[(channel, frame)] = value;
            }
        }
    })?;
    run_for(&mut session, secs)
}

fn meter(registry: &DeviceRegistry, secs: f32) -> Result<()> {
    let mut session = registry
        .default_input_device()?
        .context("no default input device")?;

    // Non-negative f32 bit patterns order the same as the values
    let peak = Arc::new(AtomicU32::new(0));
    let writer = Arc::clone(&peak);
    session.connect::<f32, _>(move |_: &DeviceInfo, io: &mut DeviceIo<'_, f32>| {
        let Some(input) = io.input_buffer.as_ref() else {
            return;
        };
        let mut max = 0.0f32;
        for frame in 0..input.size_frames() {
            for channel in 0..input.size_channels() {
                max = max.max(input[(channel, frame)].abs());
            }
        }
        writer.fetch_max(max.to_bits(), Ordering::Relaxed);
    })?;

    if !session.start()? {
        bail!("input device was already running");
    }
    println!("metering {} for {secs} s", session.name());

    let deadline = Instant::now() + Duration::from_secs_f32(secs.max(0.0));
    while Instant::now() < deadline {
        thread::sleep(METER_INTERVAL);
        let level = f32::from_bits(peak.swap(0, Ordering::Relaxed));
        let db = if level > 0.0 {
            20.0 * level.log10()
        } else {
            f32::NEG_INFINITY
        };
        println!("{db:7.1} dB");
    }
    session.stop()?;
    Ok(())
}
