//! Real-time loudness, dynamic range and true-peak metering
//!
//! This crate provides:
//! - ITU-R BS.1770 / EBU R128 loudness (momentary, short-term, integrated, LRA)
//! - 4x oversampled true-peak detection with inter-sample over counting
//! - Sample peak, RMS, crest factor and clipping statistics
//! - DR score, level histogram and per-band dynamics from an FFT analyzer
//!
//! # Architecture
//!
//! ```text
//! Interleaved f32 batch
//!         │
//!         ▼
//! ┌──────────────┐   per channel  ┌──────────────┐     ┌───────────────┐
//! │  MeterCore   │ ─────────────► │ K-weighting  │ ──► │ 400ms blocks  │ ──► LoudnessGate
//! └──────────────┘                └──────────────┘     └───────────────┘
//!    │       │
//!    │       ├──► TruePeakDetector ──► LevelTracker (peak, RMS, clips)
//!    │       │
//!    │       └──► mono mix ──► LevelHistogram, BandAnalyzer (FFT)
//!    ▼
//! MeterSnapshot (immutable, serializable)
//! ```
//!
//! [`LoudnessMeter`] wraps a [`MeterCore`] in a mutex so an audio thread
//! can feed it while UI threads take snapshots.
//!
//! # Example
//!
//! ```
//! use soul_meter::{LoudnessMeter, MeterConfig};
//!
//! let meter = LoudnessMeter::new(MeterConfig::new(48000, 2))?;
//!
//! let samples = vec![0.0_f32; 48000 * 2];
//! meter.process_samples(&samples)?;
//!
//! let snapshot = meter.snapshot();
//! println!("Integrated loudness: {:.1} LUFS", snapshot.loudness.integrated_lufs);
//! println!("True peak: {:.1} dBTP", snapshot.levels.true_peak_dbtp);
//! # Ok::<(), soul_meter::MeterError>(())
//! ```

#![deny(unsafe_code)]

mod analyzer;
mod bands;
mod config;
mod error;
mod gating;
mod histogram;
mod levels;
mod meter;
mod snapshot;
mod true_peak;
mod units;
mod weighting;

pub use analyzer::{FrameBuffer, StreamingAnalyzer};
pub use bands::{BandAnalyzer, BandResult, CompressionLevel, BAND_COUNT};
pub use config::{MeterConfig, MAX_CHANNELS, MAX_SAMPLE_RATE, MIN_FFT_SIZE, MIN_SAMPLE_RATE};
pub use error::{MeterError, Result};
pub use gating::{
    channel_weight, BlockAccumulator, GateState, LoudnessGate, BLOCK_SECONDS, HOP_SECONDS,
    SHORT_TERM_BLOCKS,
};
pub use histogram::{HistogramStats, LevelHistogram, HISTOGRAM_BINS, HISTOGRAM_FLOOR_DB};
pub use levels::{LevelTracker, DEFAULT_CLIP_THRESHOLD};
pub use meter::{LoudnessMeter, MeterCore};
pub use snapshot::{
    ClippingStats, DynamicRangeReadings, LevelReadings, LoudnessReadings, MeterSnapshot,
};
pub use true_peak::{PolyphaseBank, TruePeakDetector, OVER_THRESHOLD};
pub use units::{
    amplitude_to_db, lufs_to_power, power_to_db, power_to_lufs, ABSOLUTE_GATE_LUFS, DB_FLOOR,
    LINEAR_EPSILON, LOUDNESS_OFFSET, RELATIVE_GATE_LU,
};
pub use weighting::{BiquadCoefficients, KWeightingFilter};
