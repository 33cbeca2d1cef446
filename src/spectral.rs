//! Spectral magnitude estimation and peak discovery
//!
//! Hann-windowed real FFT over the most recent sample window, an
//! EMA-smoothed adaptive noise floor, and local-maximum peak picking with
//! parabolic interpolation for sub-bin frequency accuracy. Magnitudes are
//! normalized so a full-scale sine reads approximately 1.0.

use std::sync::Arc;

use num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};

/// Smoothing applied to the noise floor across discovery ticks.
const FLOOR_ALPHA: f32 = 0.2;
/// Magnitudes below this never count as peaks regardless of the floor.
const ABSOLUTE_FLOOR: f32 = 1e-4;

/// A local maximum in the magnitude spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralPeak {
    /// Interpolated frequency in Hz.
    pub frequency: f32,
    /// Interpolated magnitude (full-scale sine ~ 1.0).
    pub magnitude: f32,
    /// FFT bin of the raw maximum.
    pub bin: usize,
}

pub struct SpectralAnalyzer {
    fft: Arc<dyn RealToComplex<f32>>,
    fft_size: usize,
    sample_rate: f32,
    noise_floor_factor: f32,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    magnitudes: Vec<f32>,
    noise_floor: f32,
}

impl SpectralAnalyzer {
    pub fn new(fft_size: usize, sample_rate: f32, noise_floor_factor: f32) -> Self {
        let fft_size = fft_size.max(16).next_power_of_two();
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let window = hann_window(fft_size);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        Self {
            fft,
            fft_size,
            sample_rate,
            noise_floor_factor,
            window,
            input,
            spectrum,
            magnitudes: vec![0.0; fft_size / 2 + 1],
            noise_floor: 0.0,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Current adaptive noise floor (magnitude units).
    pub fn noise_floor(&self) -> f32 {
        self.noise_floor.max(ABSOLUTE_FLOOR)
    }

    /// Hz covered by one FFT bin.
    pub fn bin_width(&self) -> f32 {
        self.sample_rate / self.fft_size as f32
    }

    /// Analyze the newest window of samples and collect up to `max_peaks`
    /// spectral peaks above the adaptive noise floor, strongest first.
    /// Windows shorter than the FFT size are zero-padded at the front.
    pub fn analyze(&mut self, samples: &[f32], max_peaks: usize, peaks: &mut Vec<SpectralPeak>) {
        peaks.clear();
        let n = self.fft_size;
        let take = samples.len().min(n);
        let pad = n - take;
        self.input[..pad].fill(0.0);
        for (dst, (&src, &w)) in self.input[pad..]
            .iter_mut()
            .zip(samples[samples.len() - take..].iter().zip(&self.window[pad..]))
        {
            *dst = src * w;
        }
        // Sizes are fixed at construction, so this cannot fail.
        self.fft.process(&mut self.input, &mut self.spectrum).unwrap();

        // 2/N for the one-sided spectrum, 2x more for the Hann coherent
        // gain of 0.5.
        let scale = 4.0 / n as f32;
        for (mag, c) in self.magnitudes.iter_mut().zip(&self.spectrum) {
            *mag = c.norm() * scale;
        }

        self.update_noise_floor();
        let floor = self.noise_floor();

        // Skip DC and Nyquist; a peak needs both neighbors.
        for bin in 1..self.magnitudes.len() - 1 {
            let m = self.magnitudes[bin];
            if m <= floor {
                continue;
            }
            let left = self.magnitudes[bin - 1];
            let right = self.magnitudes[bin + 1];
            if m > left && m >= right {
                peaks.push(self.interpolate_peak(bin, left, m, right));
            }
        }

        peaks.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
        peaks.truncate(max_peaks);
    }

    fn update_noise_floor(&mut self) {
        let mean = self.magnitudes.iter().sum::<f32>() / self.magnitudes.len() as f32;
        let target = mean * self.noise_floor_factor;
        if self.noise_floor == 0.0 {
            self.noise_floor = target;
        } else {
            self.noise_floor += FLOOR_ALPHA * (target - self.noise_floor);
        }
    }

    /// Quadratic fit across the peak bin and its neighbors refines the
    /// frequency well below bin resolution on windowed spectra.
    fn interpolate_peak(&self, bin: usize, left: f32, center: f32, right: f32) -> SpectralPeak {
        let denom = left - 2.0 * center + right;
        let delta = if denom.abs() > f32::EPSILON {
            (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        SpectralPeak {
            frequency: (bin as f32 + delta) * self.bin_width(),
            magnitude: center - 0.25 * (left - right) * delta,
            bin,
        }
    }
}

fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let x = std::f32::consts::TAU * i as f32 / len as f32;
            0.5 * (1.0 - x.cos())
        })
        .collect()
}
