//! Configuration surface for the visualizer core
//!
//! Every knob has a default matching the tuned live behavior; a TOML file
//! can override any subset of them.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration for the whole pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisualizerConfig {
    /// Ring buffer capacity in samples (rounded up to a power of two).
    pub ring_capacity: usize,
    /// Width of the phase-aligned window handed to the renderer.
    pub display_samples: usize,
    pub phase_lock: PhaseLockConfig,
    pub tracker: TrackerConfig,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 16384,
            display_samples: 2400,
            phase_lock: PhaseLockConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl VisualizerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// Knobs for the cross-correlation phase locker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhaseLockConfig {
    /// Reference window length in samples.
    pub window: usize,
    /// How far back from the newest sample the lag search extends.
    pub search_range: usize,
    /// Exponential smoothing factor for the phase offset; higher is
    /// steadier, lower follows the signal faster.
    pub smoothing: f32,
    /// Analysis ticks between reference window refreshes (~0.5 s at the
    /// 240 Hz render cadence).
    pub refresh_interval: u32,
    /// Correlation below this falls back to the raw newest window.
    pub lock_threshold: f32,
}

impl Default for PhaseLockConfig {
    fn default() -> Self {
        Self {
            window: 512,
            search_range: 1024,
            smoothing: 0.9,
            refresh_interval: 120,
            lock_threshold: 0.5,
        }
    }
}

/// Knobs for spectral discovery and the PLL tracker pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// FFT size for the discovery tick (power of two).
    pub fft_size: usize,
    /// A peak within this distance of an existing tracker reinforces it
    /// instead of spawning a new one.
    pub match_tolerance_hz: f32,
    /// Seconds without an above-threshold signal before a tracker becomes
    /// eligible for removal.
    pub persistence_timeout: f32,
    /// Confidence below which a silent tracker is actually removed.
    pub confidence_floor: f32,
    /// Maximum simultaneous trackers.
    pub pool_capacity: usize,
    /// Strongest peaks considered per discovery tick.
    pub top_peaks: usize,
    /// Demodulated amplitude above this counts as signal presence.
    pub presence_threshold: f32,
    /// Noise floor = this factor times the mean spectral magnitude.
    pub noise_floor_factor: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            fft_size: 4096,
            match_tolerance_hz: 5.0,
            persistence_timeout: 2.0,
            confidence_floor: 0.05,
            pool_capacity: 16,
            top_peaks: 8,
            presence_threshold: 0.01,
            noise_floor_factor: 4.0,
        }
    }
}
