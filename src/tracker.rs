//! Adaptive multi-frequency PLL tracking
//!
//! A fixed pool of per-frequency phase-locked loops. Spectral discovery
//! (one FFT hop, ~43 Hz) finds peaks and either reinforces the tracker
//! already covering that frequency or spawns a new one; every incoming
//! sample then drives each live tracker's quadrature PLL so the phase,
//! frequency, and amplitude estimates follow the signal continuously,
//! including vibrato and pitch bends.
//!
//! Removal is deliberately hysteretic: a tracker dies only after the
//! persistence timeout has elapsed with no above-threshold signal AND its
//! confidence has decayed below the floor. Brief amplitude dips (staccato
//! playing) therefore never drop and recreate a tracker.

use crate::config::TrackerConfig;
use crate::spectral::{SpectralAnalyzer, SpectralPeak};
use std::f32::consts::{PI, TAU};

/// Proportional phase correction per sample, rad per rad of error.
const PLL_KP: f32 = 8.0e-3;
/// Integral frequency correction, Hz per rad of error per sample. The
/// frequency estimate itself is the integrator, giving zero steady-state
/// frequency error on a stable tone.
const PLL_KI: f32 = 5.0e-2;
/// EMA coefficient for the I/Q demodulation low-pass.
const DEMOD_ALPHA: f32 = 0.02;
/// EMA coefficient for the amplitude estimate.
const AMP_ALPHA: f32 = 5.0e-3;
/// Confidence rise per sample while signal is present.
const CONF_RISE: f32 = 1.0e-3;
/// Confidence decay per sample while silent: ~3 s from 1.0 down to the
/// 0.05 removal floor, so the 2 s persistence window always wins.
const CONF_DECAY: f32 = 2.0e-5;
/// EMA coefficient for the lock-quality estimate.
const LOCK_ALPHA: f32 = 1.0e-3;
/// How far a reinforcing peak pulls the tracked frequency per tick.
const REINFORCE_PULL: f32 = 0.25;
const MIN_FREQ: f32 = 20.0;
const MAX_FREQ: f32 = 20000.0;

/// One tracked frequency component. All fields are plain state; the
/// per-sample update is a pure function of (state, sample, dt).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyTracker {
    /// Current frequency estimate in Hz.
    pub frequency: f32,
    /// Phase accumulator in [0, 2π).
    pub phase: f32,
    /// Smoothed amplitude estimate, >= 0.
    pub amplitude: f32,
    /// Persistence/trust score in [0, 1], used for removal hysteresis.
    pub confidence: f32,
    /// How cleanly the PLL is following the signal, in [0, 1].
    pub lock_quality: f32,
    /// Seconds since the demodulated amplitude last cleared the presence
    /// threshold.
    pub silence: f32,
    i_lp: f32,
    q_lp: f32,
}

impl FrequencyTracker {
    /// Seed a tracker at a discovered peak: zero phase, low confidence.
    pub fn seeded(frequency: f32) -> Self {
        Self {
            frequency: frequency.clamp(MIN_FREQ, MAX_FREQ),
            phase: 0.0,
            amplitude: 0.0,
            confidence: 0.1,
            lock_quality: 0.0,
            silence: 0.0,
            i_lp: 0.0,
            q_lp: 0.0,
        }
    }

    /// One PLL step for one incoming sample. `dt` is the sample period.
    pub fn update(&mut self, sample: f32, dt: f32, presence_threshold: f32) {
        let (sin_p, cos_p) = self.phase.sin_cos();

        // Quadrature demodulation against the local oscillator; the EMA
        // low-pass keeps the baseband (difference-frequency) products.
        let i = sample * cos_p;
        let q = -sample * sin_p;
        self.i_lp += DEMOD_ALPHA * (i - self.i_lp);
        self.q_lp += DEMOD_ALPHA * (q - self.q_lp);

        // |I + jQ| is half the tone amplitude once locked.
        let instantaneous = 2.0 * (self.i_lp * self.i_lp + self.q_lp * self.q_lp).sqrt();
        self.amplitude += AMP_ALPHA * (instantaneous - self.amplitude);

        if instantaneous > presence_threshold {
            // Four-quadrant phase error; positive means the oscillator
            // lags the signal.
            let err = self.q_lp.atan2(self.i_lp);
            self.frequency = (self.frequency + PLL_KI * err).clamp(MIN_FREQ, MAX_FREQ);
            self.phase = (self.phase + TAU * self.frequency * dt + PLL_KP * err).rem_euclid(TAU);
            self.confidence += CONF_RISE * (1.0 - self.confidence);
            self.silence = 0.0;
            let quality = 1.0 - err.abs() / PI;
            self.lock_quality += LOCK_ALPHA * (quality - self.lock_quality);
        } else {
            // Coast: below the presence threshold the decayed I/Q angle
            // is meaningless, so the loop holds its frequency and only
            // advances the oscillator. This is what lets a tracker ride
            // out a staccato gap and re-engage at the same pitch.
            self.phase = (self.phase + TAU * self.frequency * dt).rem_euclid(TAU);
            self.confidence -= CONF_DECAY * self.confidence;
            self.silence += dt;
            self.lock_quality -= LOCK_ALPHA * self.lock_quality;
        }
    }

    /// Pull the frequency estimate toward a reinforcing spectral peak and
    /// restart the silence clock.
    fn reinforce(&mut self, peak_frequency: f32) {
        self.frequency += REINFORCE_PULL * (peak_frequency - self.frequency);
        self.silence = 0.0;
    }

    fn expired(&self, timeout: f32, confidence_floor: f32) -> bool {
        self.silence >= timeout && self.confidence < confidence_floor
    }
}

/// Renderer-facing copy of one tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerRecord {
    pub frequency: f32,
    pub phase: f32,
    pub amplitude: f32,
    pub confidence: f32,
    pub lock_quality: f32,
}

/// Immutable pool snapshot taken once per discovery tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerSnapshot {
    pub trackers: Vec<TrackerRecord>,
}

pub struct AdaptivePhaseTracker {
    config: TrackerConfig,
    sample_period: f32,
    spectral: SpectralAnalyzer,
    trackers: Vec<FrequencyTracker>,
    peaks: Vec<SpectralPeak>,
}

impl AdaptivePhaseTracker {
    pub fn new(config: TrackerConfig, sample_rate: f32) -> Self {
        let spectral =
            SpectralAnalyzer::new(config.fft_size, sample_rate, config.noise_floor_factor);
        Self {
            sample_period: 1.0 / sample_rate,
            trackers: Vec::with_capacity(config.pool_capacity),
            peaks: Vec::new(),
            spectral,
            config,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.spectral.fft_size()
    }

    pub fn trackers(&self) -> &[FrequencyTracker] {
        &self.trackers
    }

    /// Feed newly captured samples through every live tracker's PLL.
    pub fn process_samples(&mut self, samples: &[f32]) {
        let dt = self.sample_period;
        let threshold = self.config.presence_threshold;
        for tracker in &mut self.trackers {
            for &sample in samples {
                tracker.update(sample, dt, threshold);
            }
        }
    }

    /// One discovery tick over the newest analysis window: find spectral
    /// peaks, reinforce or spawn trackers (strongest peaks first, top N
    /// only, so a noisy tick cannot exhaust the pool), then retire
    /// trackers that are both long-silent and low-confidence.
    pub fn discover(&mut self, window: &[f32]) {
        self.spectral
            .analyze(window, self.config.top_peaks, &mut self.peaks);

        let tolerance = self.config.match_tolerance_hz;
        let capacity = self.config.pool_capacity;
        for peak in &self.peaks {
            let matched = self
                .trackers
                .iter()
                .position(|t| (t.frequency - peak.frequency).abs() <= tolerance);
            match matched {
                Some(index) => self.trackers[index].reinforce(peak.frequency),
                None if self.trackers.len() < capacity => {
                    tracing::debug!(frequency = peak.frequency as f64, "tracker spawned");
                    self.trackers.push(FrequencyTracker::seeded(peak.frequency));
                }
                // Pool full: the weakest unmatched peaks simply wait.
                None => {}
            }
        }

        let timeout = self.config.persistence_timeout;
        let floor = self.config.confidence_floor;
        self.trackers.retain(|t| {
            let keep = !t.expired(timeout, floor);
            if !keep {
                tracing::debug!(frequency = t.frequency as f64, "tracker retired");
            }
            keep
        });
    }

    /// Copy out the pool for the frame assembler.
    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            trackers: self
                .trackers
                .iter()
                .map(|t| TrackerRecord {
                    frequency: t.frequency,
                    phase: t.phase,
                    amplitude: t.amplitude,
                    confidence: t.confidence,
                    lock_quality: t.lock_quality,
                })
                .collect(),
        }
    }
}
