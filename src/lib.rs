//! # Phasescope - phase-locked audio visualization core
//!
//! The signal-processing and concurrency engine that sits between raw
//! audio capture and a waveform renderer:
//!
//! - [`ring_buffer`]: a lock-free single-producer/multi-consumer sample
//!   ring that decouples the capture thread from the analysis threads
//!   without locks or audio dropouts.
//! - [`phase_lock`]: a cross-correlation phase locker that aligns the
//!   live window against a periodically refreshed reference so the
//!   displayed waveform appears stationary.
//! - [`tracker`]: an adaptive pool of per-frequency PLLs that discovers
//!   spectral peaks and follows up to sixteen simultaneous components
//!   with confidence-based persistence.
//! - [`frame`]: the assembler that packages a phase-aligned window and a
//!   tracker snapshot into one immutable frame per render tick.
//!
//! [`engine::Visualizer`] wires these together; [`capture`] binds a cpal
//! input device to the ring producer. Rendering itself is an external
//! collaborator that consumes [`frame::VisualizationFrame`]s.
//!
//! ## Quick start
//!
//! ```no_run
//! use phasescope::capture::CaptureDevice;
//! use phasescope::config::VisualizerConfig;
//! use phasescope::engine::Visualizer;
//!
//! # fn main() -> Result<(), phasescope::capture::CaptureError> {
//! let device = CaptureDevice::open(None)?;
//! let (mut visualizer, producer) =
//!     Visualizer::new(VisualizerConfig::default(), device.sample_rate());
//! let stream = device.start(producer)?;
//!
//! // Render loop, target 240 Hz:
//! let frame = visualizer.frame();
//! assert_eq!(frame.samples.len(), 2400);
//! # drop(stream);
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod engine;
pub mod frame;
pub mod phase_lock;
pub mod ring_buffer;
pub mod spectral;
pub mod tracker;

pub use capture::{CaptureDevice, CaptureError, CaptureStream};
pub use config::VisualizerConfig;
pub use engine::{Controls, Visualizer};
pub use frame::VisualizationFrame;
pub use phase_lock::{LockBand, PhaseLockState};
pub use ring_buffer::{Producer, Reader, RingBuffer};
pub use tracker::{TrackerRecord, TrackerSnapshot};
