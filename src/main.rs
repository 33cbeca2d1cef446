//! Phasescope CLI - run the pipeline against a live capture device and
//! report lock quality and tracked frequencies.

use std::time::{Duration, Instant};

use clap::Parser;
use tracing::info;

use phasescope::capture::{list_input_devices, CaptureDevice};
use phasescope::config::VisualizerConfig;
use phasescope::engine::Visualizer;

#[derive(Parser)]
#[command(name = "phasescope")]
#[command(about = "Phase-locked audio waveform visualizer core", long_about = None)]
struct Cli {
    /// Input device name (default: system default input)
    #[arg(short, long)]
    device: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<String>,

    /// Disable cross-correlation phase locking
    #[arg(long)]
    no_phase_lock: bool,

    /// Disable adaptive frequency tracking
    #[arg(long)]
    no_tracking: bool,

    /// Run for this many seconds, then exit (default: run until killed)
    #[arg(long)]
    duration: Option<f32>,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    if cli.list_devices {
        for name in list_input_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => VisualizerConfig::from_file(path)?,
        None => VisualizerConfig::default(),
    };

    let device = CaptureDevice::open(cli.device.as_deref())?;
    let (mut visualizer, producer) = Visualizer::new(config, device.sample_rate());
    let controls = visualizer.controls();
    controls.set_phase_lock_enabled(!cli.no_phase_lock);
    controls.set_tracking_enabled(!cli.no_tracking);

    let stream = device.start(producer)?;

    // 240 Hz render cadence; report once a second.
    let tick = Duration::from_micros(1_000_000 / 240);
    let deadline = cli.duration.map(|s| Instant::now() + Duration::from_secs_f32(s));
    let mut last_report = Instant::now();

    loop {
        let started = Instant::now();
        if controls.shutdown_requested() {
            break;
        }
        if let Some(deadline) = deadline {
            if started >= deadline {
                break;
            }
        }
        if !stream.is_healthy() {
            return Err("capture device lost".into());
        }

        let frame = visualizer.frame();

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let tracked: Vec<String> = frame
                .trackers
                .iter()
                .filter(|t| t.confidence > 0.5)
                .map(|t| format!("{:.1}Hz({:.2})", t.frequency, t.confidence))
                .collect();
            info!(
                correlation = frame.correlation as f64,
                band = ?frame.band,
                locked = frame.phase_locked,
                dropped = frame.dropped_samples,
                trackers = %tracked.join(" "),
                "frame"
            );
        }

        if let Some(remaining) = tick.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    // Consumers go first: dropping the visualizer joins the discovery
    // thread, then the capture stream stops.
    drop(visualizer);
    drop(stream);
    Ok(())
}
