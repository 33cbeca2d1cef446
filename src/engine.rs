//! Pipeline orchestration
//!
//! Owns the ring buffer and the two analysis consumers. The discovery
//! thread runs the adaptive tracker at the FFT hop cadence and publishes
//! pool snapshots through an `ArcSwap`, so the frame assembler picks them
//! up without any lock spanning the two analysis sources. Phase locking
//! and frame assembly run on the caller's render thread via
//! [`Visualizer::frame`].
//!
//! Teardown is consumers-before-producer: dropping the `Visualizer` stops
//! and joins the discovery thread; the capture stream (the producer side)
//! is owned by the caller and dropped after.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tracing::info;

use crate::config::VisualizerConfig;
use crate::frame::{FrameAssembler, VisualizationFrame};
use crate::phase_lock::CorrelationPhaseLocker;
use crate::ring_buffer::{Producer, Reader, RingBuffer};
use crate::tracker::{AdaptivePhaseTracker, TrackerSnapshot};

/// Runtime flags owned by the external input collaborator. Read at the
/// start of each tick; writes take effect on the next one.
pub struct Controls {
    phase_lock_enabled: AtomicBool,
    tracking_enabled: AtomicBool,
    shutdown: AtomicBool,
}

impl Controls {
    fn new() -> Self {
        Self {
            phase_lock_enabled: AtomicBool::new(true),
            tracking_enabled: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn phase_lock_enabled(&self) -> bool {
        self.phase_lock_enabled.load(Ordering::Relaxed)
    }

    pub fn set_phase_lock_enabled(&self, enabled: bool) {
        self.phase_lock_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn tracking_enabled(&self) -> bool {
        self.tracking_enabled.load(Ordering::Relaxed)
    }

    pub fn set_tracking_enabled(&self, enabled: bool) {
        self.tracking_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// The assembled signal-processing engine between capture and renderer.
pub struct Visualizer {
    locker: CorrelationPhaseLocker,
    assembler: FrameAssembler,
    frame_reader: Reader,
    controls: Arc<Controls>,
    snapshot: Arc<ArcSwap<TrackerSnapshot>>,
    stop: Arc<AtomicBool>,
    discovery: Option<thread::JoinHandle<()>>,
    phase_lock_was_enabled: bool,
}

impl Visualizer {
    /// Build the pipeline for a capture source running at `sample_rate`.
    /// Returns the engine and the ring producer to hand to the capture
    /// collaborator.
    pub fn new(config: VisualizerConfig, sample_rate: u32) -> (Self, Producer) {
        let (producer, ring) = RingBuffer::with_capacity(config.ring_capacity);
        let locker = CorrelationPhaseLocker::new(config.phase_lock.clone(), ring.clone());
        let assembler = FrameAssembler::new(ring.clone(), config.display_samples);
        let frame_reader = ring.reader();
        let controls = Arc::new(Controls::new());
        let snapshot = Arc::new(ArcSwap::from_pointee(TrackerSnapshot::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let tracker = AdaptivePhaseTracker::new(config.tracker.clone(), sample_rate as f32);
        let discovery = Some(spawn_discovery(
            tracker,
            ring,
            sample_rate,
            Arc::clone(&snapshot),
            Arc::clone(&controls),
            Arc::clone(&stop),
        ));

        info!(
            rate = sample_rate,
            display = config.display_samples,
            "visualizer pipeline ready"
        );

        (
            Self {
                locker,
                assembler,
                frame_reader,
                controls,
                snapshot,
                stop,
                discovery,
                phase_lock_was_enabled: true,
            },
            producer,
        )
    }

    pub fn controls(&self) -> Arc<Controls> {
        Arc::clone(&self.controls)
    }

    /// Produce one frame for the renderer. Called once per render tick;
    /// runs the phase-lock analysis inline when enabled.
    pub fn frame(&mut self) -> VisualizationFrame {
        let phase_lock = self.controls.phase_lock_enabled();
        if !phase_lock && self.phase_lock_was_enabled {
            // Re-enabling later should start from a fresh reference.
            self.locker.reset();
        }
        self.phase_lock_was_enabled = phase_lock;

        let dropped = self.frame_reader.poll_overrun();
        let trackers = self.snapshot.load_full();

        if phase_lock {
            let state = self.locker.tick(self.assembler.display_samples());
            self.assembler.assemble(Some(&state), &trackers, dropped)
        } else {
            self.assembler.assemble(None, &trackers, dropped)
        }
    }
}

impl Drop for Visualizer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.discovery.take() {
            let _ = handle.join();
        }
    }
}

/// Discovery thread: one tracker tick per FFT hop (fft_size / 4 samples,
/// ~23 ms at the default 4096/44.1k).
fn spawn_discovery(
    mut tracker: AdaptivePhaseTracker,
    ring: RingBuffer,
    sample_rate: u32,
    snapshot: Arc<ArcSwap<TrackerSnapshot>>,
    controls: Arc<Controls>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let fft_size = tracker.fft_size();
        let hop = Duration::from_secs_f64(fft_size as f64 / 4.0 / sample_rate as f64);
        let mut reader = ring.reader();
        let mut fresh = Vec::new();
        let mut window = Vec::new();
        let mut was_tracking = true;

        loop {
            if stop.load(Ordering::Acquire) {
                break;
            }
            let started = Instant::now();

            if controls.tracking_enabled() {
                // Bound the backlog so a scheduling stall cannot turn into
                // an unbounded catch-up burst.
                reader.read_latest(fft_size * 2, &mut fresh);
                tracker.process_samples(&fresh);
                ring.snapshot_latest(fft_size, &mut window);
                tracker.discover(&window);
                snapshot.store(Arc::new(tracker.snapshot()));
                was_tracking = true;
            } else {
                reader.poll_overrun();
                if was_tracking {
                    snapshot.store(Arc::new(TrackerSnapshot::default()));
                    was_tracking = false;
                }
            }

            if let Some(remaining) = hop.checked_sub(started.elapsed()) {
                thread::sleep(remaining);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    const SAMPLE_RATE: u32 = 48000;

    fn tone(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (TAU * freq * i as f32 / SAMPLE_RATE as f32).sin())
            .collect()
    }

    #[test]
    fn frames_have_fixed_shape_from_the_start() {
        let (mut visualizer, _producer) =
            Visualizer::new(VisualizerConfig::default(), SAMPLE_RATE);
        let frame = visualizer.frame();
        assert_eq!(frame.samples.len(), 2400);
        assert!(!frame.phase_locked);
    }

    #[test]
    fn pipeline_locks_and_discovers_a_tone() {
        let (mut visualizer, mut producer) =
            Visualizer::new(VisualizerConfig::default(), SAMPLE_RATE);
        producer.write(&tone(750.0, 9600));

        let frame = visualizer.frame();
        assert_eq!(frame.samples.len(), 2400);
        assert!(frame.phase_locked, "correlation = {}", frame.correlation);
        assert!(frame.correlation > 0.9);

        // Give the discovery thread a few hops to find the tone.
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            producer.write(&tone(750.0, 1024));
            let frame = visualizer.frame();
            if frame
                .trackers
                .iter()
                .any(|t| (t.frequency - 750.0).abs() < 10.0)
            {
                break;
            }
            assert!(Instant::now() < deadline, "tracker never appeared");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn disabling_phase_lock_bypasses_the_locker() {
        let (mut visualizer, mut producer) =
            Visualizer::new(VisualizerConfig::default(), SAMPLE_RATE);
        producer.write(&tone(440.0, 9600));

        let controls = visualizer.controls();
        controls.set_phase_lock_enabled(false);
        let frame = visualizer.frame();
        assert!(!frame.phase_locked);
        assert_eq!(frame.correlation, 0.0);

        controls.set_phase_lock_enabled(true);
        let frame = visualizer.frame();
        assert!(frame.phase_locked);
    }

    #[test]
    fn drop_joins_the_discovery_thread() {
        let (visualizer, _producer) = Visualizer::new(VisualizerConfig::default(), SAMPLE_RATE);
        drop(visualizer); // must not hang or panic
    }

    #[test]
    fn shutdown_flag_round_trips() {
        let (visualizer, _producer) = Visualizer::new(VisualizerConfig::default(), SAMPLE_RATE);
        let controls = visualizer.controls();
        assert!(!controls.shutdown_requested());
        controls.request_shutdown();
        assert!(controls.shutdown_requested());
    }
}
