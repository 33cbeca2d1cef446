//! Cross-correlation phase locking
//!
//! Finds the alignment between the live signal and a periodically
//! refreshed reference window so that the displayed waveform appears
//! stationary. Each analysis tick takes one snapshot of the newest
//! samples from the ring; when a reference refresh is due it is captured
//! from that same snapshot *before* the lag search starts, so a refresh
//! can never invalidate an in-flight comparison.

use crate::config::PhaseLockConfig;
use crate::ring_buffer::RingBuffer;

/// Coarse search evaluates every 4th lag; the fine pass refines around it.
const COARSE_STEP: usize = 4;
const FINE_SPAN: i64 = 2;

/// Renderer-facing quality band. Purely informational: the search keeps
/// running at full strength no matter the band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockBand {
    Excellent,
    Moderate,
    Poor,
}

impl LockBand {
    pub fn from_correlation(correlation: f32) -> Self {
        if correlation > 0.7 {
            LockBand::Excellent
        } else if correlation >= 0.5 {
            LockBand::Moderate
        } else {
            LockBand::Poor
        }
    }
}

/// Snapshot of the locker after a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseLockState {
    /// Smoothed display-window start, modulo ring capacity.
    pub offset: f32,
    /// Best normalized correlation found this tick, in [-1, 1].
    pub correlation: f32,
    pub band: LockBand,
    /// Whether the correlation cleared the lock threshold (below it the
    /// target falls back to the raw newest window).
    pub locked: bool,
    pub ticks_since_refresh: u32,
}

pub struct CorrelationPhaseLocker {
    config: PhaseLockConfig,
    ring: RingBuffer,
    reference: Vec<f32>,
    has_reference: bool,
    ticks_since_refresh: u32,
    offset: Option<f32>,
    scratch: Vec<f32>,
    state: PhaseLockState,
}

impl CorrelationPhaseLocker {
    pub fn new(config: PhaseLockConfig, ring: RingBuffer) -> Self {
        Self {
            reference: Vec::with_capacity(config.window),
            has_reference: false,
            ticks_since_refresh: 0,
            offset: None,
            scratch: Vec::new(),
            state: PhaseLockState {
                offset: 0.0,
                correlation: 0.0,
                band: LockBand::Poor,
                locked: false,
                ticks_since_refresh: 0,
            },
            config,
            ring,
        }
    }

    pub fn state(&self) -> &PhaseLockState {
        &self.state
    }

    /// Forget the reference and smoothed offset. Called when phase lock is
    /// toggled off so re-enabling starts from a fresh reference.
    pub fn reset(&mut self) {
        self.has_reference = false;
        self.ticks_since_refresh = 0;
        self.offset = None;
        self.state.correlation = 0.0;
        self.state.band = LockBand::Poor;
        self.state.locked = false;
    }

    /// Run one analysis tick and return the updated state.
    pub fn tick(&mut self, display_samples: usize) -> PhaseLockState {
        let window = self.config.window;
        let capacity = self.ring.capacity() as u64;
        let need = display_samples.max(window) + self.config.search_range;
        let base = self.ring.snapshot_latest(need, &mut self.scratch);
        let len = self.scratch.len();

        if len < window || len < display_samples {
            // Not enough audio yet; aim at whatever raw tail exists.
            let raw = base + len.saturating_sub(display_samples) as u64;
            self.state = PhaseLockState {
                offset: self.update_offset(raw, capacity),
                correlation: 0.0,
                band: LockBand::Poor,
                locked: false,
                ticks_since_refresh: self.ticks_since_refresh,
            };
            return self.state;
        }

        // Snapshot-then-search ordering: the reference (when due) comes
        // from this tick's snapshot, before any comparison against it.
        if !self.has_reference || self.ticks_since_refresh >= self.config.refresh_interval {
            self.reference.clear();
            self.reference.extend_from_slice(&self.scratch[len - window..]);
            self.has_reference = true;
            self.ticks_since_refresh = 0;
        } else {
            self.ticks_since_refresh += 1;
        }

        // Lag 0 aligns the candidate with the raw newest display window.
        let zero_lag_start = len.saturating_sub(display_samples).min(len - window);
        let max_lag = self.config.search_range.min(zero_lag_start);

        let mut best_lag = 0usize;
        let mut best_corr = f32::NEG_INFINITY;
        let mut lag = 0usize;
        while lag <= max_lag {
            let start = zero_lag_start - lag;
            let corr = normalized_correlation(&self.scratch[start..start + window], &self.reference);
            if corr > best_corr {
                best_corr = corr;
                best_lag = lag;
            }
            lag += COARSE_STEP;
        }

        for fine in -FINE_SPAN..=FINE_SPAN {
            let lag = best_lag as i64 + fine;
            if lag < 0 || lag > max_lag as i64 || fine == 0 {
                continue;
            }
            let start = zero_lag_start - lag as usize;
            let corr = normalized_correlation(&self.scratch[start..start + window], &self.reference);
            if corr > best_corr {
                best_corr = corr;
                best_lag = lag as usize;
            }
        }

        let correlation = best_corr.clamp(-1.0, 1.0);
        let locked = correlation >= self.config.lock_threshold;
        let target = if locked {
            base + (zero_lag_start - best_lag) as u64
        } else {
            base + zero_lag_start as u64
        };

        self.state = PhaseLockState {
            offset: self.update_offset(target, capacity),
            correlation,
            band: LockBand::from_correlation(correlation),
            locked,
            ticks_since_refresh: self.ticks_since_refresh,
        };
        self.state
    }

    fn update_offset(&mut self, target_abs: u64, capacity: u64) -> f32 {
        let target = (target_abs % capacity) as f32;
        let next = match self.offset {
            // First tick jumps straight to the target.
            None => target,
            Some(prev) => smooth_toward(prev, target, self.config.smoothing, capacity as f32),
        };
        self.offset = Some(next);
        next
    }
}

/// Normalized cross-correlation of two equal-length windows. Silence in
/// either window (near-zero energy) is defined as zero correlation so a
/// silent room never claims a lock.
pub(crate) fn normalized_correlation(signal: &[f32], reference: &[f32]) -> f32 {
    debug_assert_eq!(signal.len(), reference.len());
    let mut dot = 0.0f32;
    let mut sig_energy = 0.0f32;
    let mut ref_energy = 0.0f32;
    for (&s, &r) in signal.iter().zip(reference) {
        dot += s * r;
        sig_energy += s * s;
        ref_energy += r * r;
    }
    if sig_energy > f32::EPSILON && ref_energy > f32::EPSILON {
        dot / (sig_energy * ref_energy).sqrt()
    } else {
        0.0
    }
}

/// One exponential smoothing step in the circular offset domain: move
/// `(1 - alpha)` of the way toward `target`, taking whichever direction
/// around the ring is shorter.
pub(crate) fn smooth_toward(prev: f32, target: f32, alpha: f32, capacity: f32) -> f32 {
    let delta = wrap_delta(target - prev, capacity);
    (prev + (1.0 - alpha) * delta).rem_euclid(capacity)
}

/// Reduce a circular difference to the shortest signed path, in
/// (-capacity/2, capacity/2].
pub(crate) fn wrap_delta(delta: f32, capacity: f32) -> f32 {
    let wrapped = delta.rem_euclid(capacity);
    if wrapped > capacity / 2.0 {
        wrapped - capacity
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhaseLockConfig;
    use crate::ring_buffer::RingBuffer;
    use std::f32::consts::TAU;

    fn sine(len: usize, period: f32) -> Vec<f32> {
        (0..len).map(|i| (TAU * i as f32 / period).sin()).collect()
    }

    #[test]
    fn correlation_of_identical_windows_is_one() {
        let wave = sine(512, 64.0);
        let corr = normalized_correlation(&wave, &wave);
        assert!((corr - 1.0).abs() < 1e-4, "corr = {corr}");
    }

    #[test]
    fn correlation_finds_known_integer_lag() {
        // Two incommensurate periods (lcm 13700) make every lag in the
        // scan range distinct; a single sine would repeat every period.
        let wave: Vec<f32> = (0..4096)
            .map(|i| {
                let t = i as f32;
                (TAU * t / 100.0).sin() + 0.6 * (TAU * t / 137.0).sin()
            })
            .collect();
        let reference = wave[2000..2512].to_vec();
        let true_lag = 300usize;

        let mut best = (0usize, f32::NEG_INFINITY);
        for lag in 0..600 {
            let start = 2000 + true_lag - lag;
            let corr = normalized_correlation(&wave[start..start + 512], &reference);
            if corr > best.1 {
                best = (lag, corr);
            }
        }
        assert_eq!(best.0, true_lag);
        assert!(best.1 > 0.999, "corr = {}", best.1);
    }

    #[test]
    fn silence_yields_zero_correlation() {
        let silent = vec![0.0f32; 512];
        let wave = sine(512, 64.0);
        assert_eq!(normalized_correlation(&silent, &wave), 0.0);
        assert_eq!(normalized_correlation(&wave, &silent), 0.0);
    }

    #[test]
    fn band_thresholds() {
        assert_eq!(LockBand::from_correlation(0.9), LockBand::Excellent);
        assert_eq!(LockBand::from_correlation(0.6), LockBand::Moderate);
        assert_eq!(LockBand::from_correlation(0.5), LockBand::Moderate);
        assert_eq!(LockBand::from_correlation(0.3), LockBand::Poor);
        assert_eq!(LockBand::from_correlation(-0.2), LockBand::Poor);
    }

    #[test]
    fn wrap_delta_takes_shortest_path() {
        assert_eq!(wrap_delta(10.0, 1024.0), 10.0);
        assert_eq!(wrap_delta(-10.0, 1024.0), -10.0);
        // 1000 forward is 24 backward on a 1024 ring.
        assert_eq!(wrap_delta(1000.0, 1024.0), -24.0);
        assert_eq!(wrap_delta(-1000.0, 1024.0), 24.0);
        assert_eq!(wrap_delta(512.0, 1024.0), 512.0);
    }

    #[test]
    fn smoothing_converges_after_step_change() {
        let alpha = 0.9f32;
        let capacity = 16384.0f32;
        let target = 5000.0f32;
        let mut offset = 4500.0f32;
        let mut ticks = 0;
        while (offset - target).abs() > 1.0 {
            offset = smooth_toward(offset, target, alpha, capacity);
            ticks += 1;
            assert!(ticks < 200, "did not converge");
        }
        // error shrinks by alpha each tick: ~59 ticks from 500 samples
        assert!(ticks <= 70, "took {ticks} ticks");
    }

    #[test]
    fn smoothing_crosses_the_ring_boundary() {
        let capacity = 16384.0f32;
        let mut offset = 16380.0f32;
        let target = 4.0f32;
        for _ in 0..200 {
            offset = smooth_toward(offset, target, 0.9, capacity);
        }
        assert!(wrap_delta(target - offset, capacity).abs() < 0.5, "offset = {offset}");
    }

    #[test]
    fn locker_locks_onto_steady_sine() {
        let (mut producer, ring) = RingBuffer::with_capacity(16384);
        let period = 64usize; // 750 Hz at 48 kHz
        producer.write(&sine(8192, period as f32));

        let config = PhaseLockConfig::default();
        let mut locker = CorrelationPhaseLocker::new(config, ring.clone());
        let state = locker.tick(2400);

        assert!(state.locked);
        assert!(state.correlation > 0.99, "corr = {}", state.correlation);
        assert_eq!(state.band, LockBand::Excellent);

        // The chosen window start must be phase-aligned with the reference
        // (captured at the newest 512 samples), i.e. an integer number of
        // periods behind it.
        let ref_start = 8192u64 - 512;
        let chosen = state.offset.round() as u64;
        assert_eq!((ref_start - chosen) % period as u64, 0, "offset = {chosen}");
    }

    #[test]
    fn silent_ring_reports_poor_band() {
        let (mut producer, ring) = RingBuffer::with_capacity(16384);
        producer.write(&vec![0.0f32; 8192]);

        let mut locker = CorrelationPhaseLocker::new(PhaseLockConfig::default(), ring);
        let state = locker.tick(2400);
        assert!(!state.locked);
        assert_eq!(state.correlation, 0.0);
        assert_eq!(state.band, LockBand::Poor);
    }

    #[test]
    fn reference_refresh_cadence() {
        let (mut producer, ring) = RingBuffer::with_capacity(16384);
        producer.write(&sine(8192, 64.0));

        let config = PhaseLockConfig {
            refresh_interval: 3,
            ..PhaseLockConfig::default()
        };
        let mut locker = CorrelationPhaseLocker::new(config, ring);
        assert_eq!(locker.tick(2400).ticks_since_refresh, 0); // initial capture
        assert_eq!(locker.tick(2400).ticks_since_refresh, 1);
        assert_eq!(locker.tick(2400).ticks_since_refresh, 2);
        assert_eq!(locker.tick(2400).ticks_since_refresh, 3);
        assert_eq!(locker.tick(2400).ticks_since_refresh, 0); // refreshed
    }
}
