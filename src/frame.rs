//! Visualization frame assembly
//!
//! Pure composition: combine the locker's smoothed offset (or the raw
//! newest window when phase lock is off), the latest tracker pool
//! snapshot, and a display-width sample window copied out of the ring
//! into one immutable frame for the renderer. No analysis happens here
//! and no lock is ever held across the two analysis sources.

use crate::phase_lock::{LockBand, PhaseLockState};
use crate::ring_buffer::RingBuffer;
use crate::tracker::{TrackerRecord, TrackerSnapshot};

/// The one bundle that crosses into the renderer: a fixed-width,
/// phase-aligned sample window, the lock quality that produced it, and
/// the active tracker records.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualizationFrame {
    pub samples: Vec<f32>,
    /// Correlation of the chosen alignment, 0.0 when phase lock is off.
    pub correlation: f32,
    pub band: LockBand,
    /// Whether the window was placed by the phase locker (as opposed to
    /// the raw newest-window fallback or the lock being disabled).
    pub phase_locked: bool,
    pub trackers: Vec<TrackerRecord>,
    /// Samples lost to ring overwrite since the previous frame.
    pub dropped_samples: u64,
}

pub struct FrameAssembler {
    ring: RingBuffer,
    display_samples: usize,
}

impl FrameAssembler {
    pub fn new(ring: RingBuffer, display_samples: usize) -> Self {
        Self {
            ring,
            display_samples,
        }
    }

    pub fn display_samples(&self) -> usize {
        self.display_samples
    }

    /// Package one frame. `lock` is `None` when phase lock is disabled,
    /// in which case the raw newest window is used (zero added latency).
    pub fn assemble(
        &self,
        lock: Option<&PhaseLockState>,
        trackers: &TrackerSnapshot,
        dropped_samples: u64,
    ) -> VisualizationFrame {
        let mut samples = Vec::with_capacity(self.display_samples);
        let (correlation, band, phase_locked) = match lock {
            Some(state) => {
                self.copy_aligned_window(state.offset, &mut samples);
                (state.correlation, state.band, state.locked)
            }
            None => {
                self.ring.snapshot_latest(self.display_samples, &mut samples);
                (0.0, LockBand::Poor, false)
            }
        };
        // Pad on the left until enough audio has been captured, so the
        // frame shape never changes.
        if samples.len() < self.display_samples {
            let pad = self.display_samples - samples.len();
            samples.splice(0..0, std::iter::repeat(0.0).take(pad));
        }

        VisualizationFrame {
            samples,
            correlation,
            band,
            phase_locked,
            trackers: trackers.trackers.clone(),
            dropped_samples,
        }
    }

    /// Map the locker's modulo-capacity offset back to the absolute index
    /// space and copy the display window starting there. The window is
    /// clamped so it always ends at or before the write cursor.
    fn copy_aligned_window(&self, offset: f32, out: &mut Vec<f32>) {
        let capacity = self.ring.capacity() as u64;
        let write = self.ring.write_index();
        let offset = (offset.round().max(0.0) as u64) % capacity;
        // Most recent absolute index congruent to `offset` mod capacity.
        let rel = (write + capacity - offset % capacity) % capacity;
        let mut start = write - rel.min(write);
        if start + self.display_samples as u64 > write {
            start = write.saturating_sub(self.display_samples as u64);
        }
        self.ring.snapshot_range(start, self.display_samples, out);
    }
}
