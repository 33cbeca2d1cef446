//! End-to-end tests driving the public pipeline API with synthetic audio

use std::f32::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

use phasescope::config::VisualizerConfig;
use phasescope::engine::Visualizer;
use phasescope::phase_lock::LockBand;

const SAMPLE_RATE: u32 = 48000;

fn tone(freq: f32, amplitude: f32, len: usize, start: usize) -> Vec<f32> {
    (start..start + len)
        .map(|i| amplitude * (TAU * freq * i as f32 / SAMPLE_RATE as f32).sin())
        .collect()
}

#[test]
fn steady_tone_locks_with_excellent_band() {
    let (mut visualizer, mut producer) = Visualizer::new(VisualizerConfig::default(), SAMPLE_RATE);
    producer.write(&tone(750.0, 0.5, 9600, 0));

    let frame = visualizer.frame();
    assert_eq!(frame.samples.len(), 2400);
    assert!(frame.phase_locked);
    assert!(frame.correlation > 0.9, "correlation = {}", frame.correlation);
    assert_eq!(frame.band, LockBand::Excellent);
}

#[test]
fn lock_persists_as_audio_advances() {
    let (mut visualizer, mut producer) = Visualizer::new(VisualizerConfig::default(), SAMPLE_RATE);

    let mut written = 0usize;
    producer.write(&tone(750.0, 0.5, 9600, 0));
    written += 9600;
    assert!(visualizer.frame().phase_locked);

    // Keep the stream moving by a non-multiple of the period; the search
    // must keep finding an excellent alignment against the standing
    // reference every tick.
    for _ in 0..20 {
        producer.write(&tone(750.0, 0.5, 1000, written));
        written += 1000;
        let frame = visualizer.frame();
        assert!(frame.phase_locked);
        assert!(frame.correlation > 0.95, "correlation = {}", frame.correlation);
    }
}

#[test]
fn discovery_thread_reports_the_tone() {
    let (mut visualizer, mut producer) = Visualizer::new(VisualizerConfig::default(), SAMPLE_RATE);

    let mut written = 0usize;
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        producer.write(&tone(440.0, 0.5, 1024, written));
        written += 1024;
        let frame = visualizer.frame();
        if frame
            .trackers
            .iter()
            .any(|t| (t.frequency - 440.0).abs() < 10.0)
        {
            break;
        }
        assert!(Instant::now() < deadline, "tracker never appeared");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn frames_are_idempotent_without_new_audio() {
    let (mut visualizer, mut producer) = Visualizer::new(VisualizerConfig::default(), SAMPLE_RATE);
    visualizer.controls().set_tracking_enabled(false);
    producer.write(&tone(750.0, 0.5, 9600, 0));
    // Let the discovery thread observe the disabled flag and settle on
    // the empty snapshot before taking the baseline frame.
    thread::sleep(Duration::from_millis(100));

    let first = visualizer.frame();
    for _ in 0..5 {
        let frame = visualizer.frame();
        assert_eq!(frame, first);
    }
}

#[test]
fn threaded_capture_and_render_smoke() {
    let (mut visualizer, mut producer) = Visualizer::new(VisualizerConfig::default(), SAMPLE_RATE);

    let writer = thread::spawn(move || {
        let mut written = 0usize;
        for _ in 0..100 {
            producer.write(&tone(440.0, 0.5, 480, written));
            written += 480;
            thread::sleep(Duration::from_millis(2));
        }
    });

    for _ in 0..50 {
        let frame = visualizer.frame();
        assert_eq!(frame.samples.len(), 2400);
        assert!(frame.samples.iter().all(|s| s.abs() <= 1.0));
        assert!(frame.trackers.len() <= 16);
        thread::sleep(Duration::from_millis(4));
    }

    writer.join().unwrap();
}

#[test]
fn disabling_tracking_empties_the_tracker_list() {
    let (mut visualizer, mut producer) = Visualizer::new(VisualizerConfig::default(), SAMPLE_RATE);
    let controls = visualizer.controls();

    let mut written = 0usize;
    let deadline = Instant::now() + Duration::from_secs(3);
    while visualizer.frame().trackers.is_empty() {
        producer.write(&tone(440.0, 0.5, 1024, written));
        written += 1024;
        assert!(Instant::now() < deadline, "tracker never appeared");
        thread::sleep(Duration::from_millis(10));
    }

    controls.set_tracking_enabled(false);
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if visualizer.frame().trackers.is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "tracker list never cleared");
        thread::sleep(Duration::from_millis(10));
    }
}
