//! Immutable metering results
//!
//! A [`MeterSnapshot`] is assembled on demand from the meter's state and is
//! never mutated afterwards. Field groups mirror what report renderers
//! consume (`loudness`, `levels`, `dynamicRange`, `clipping`), and every
//! type serializes with camelCase names.

use crate::bands::BandResult;
use crate::gating::GateState;
use crate::histogram::HistogramStats;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Loudness readings (LUFS)
///
/// Readings that do not exist yet (no block completed, nothing above the
/// absolute gate) hold the -120 LUFS floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoudnessReadings {
    /// Latest 400 ms block
    pub momentary_lufs: f64,
    /// Mean of the last 30 blocks
    pub short_term_lufs: f64,
    /// Two-pass gated programme loudness
    pub integrated_lufs: f64,
    /// Highest momentary reading since reset
    pub max_momentary_lufs: f64,
    /// Highest short-term reading since reset
    pub max_short_term_lufs: f64,
    /// Relative gate used by the integrated measurement
    pub relative_gate_lufs: f64,
}

/// Sample-domain and reconstructed levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelReadings {
    /// Largest sample magnitude (dBFS)
    pub peak_dbfs: f64,
    /// RMS over every sample (dBFS)
    pub rms_dbfs: f64,
    /// Largest reconstructed magnitude across channels (dBTP)
    pub true_peak_dbtp: f64,
    /// Per-channel true peak (dBTP)
    pub channel_true_peaks_dbtp: Vec<f64>,
    /// True peak minus integrated loudness (dB); 0.0 without integrated loudness
    pub peak_to_loudness_ratio_db: f64,
}

/// Dynamics readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicRangeReadings {
    /// DR score, 1..=20
    pub dr_score: u8,
    /// Loudness range (LU)
    pub loudness_range_lu: f64,
    /// Sample peak over RMS (dB)
    pub crest_factor_db: f64,
    /// Spread of the sample level distribution (dB)
    pub level_spread_db: f64,
    /// Estimated noise floor (dBFS)
    pub noise_floor_db: f64,
}

/// Clipping counters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClippingStats {
    /// Raw samples at or above the clip threshold
    pub clipped_samples: u64,
    /// Separate runs of clipped frames
    pub clip_events: u64,
    /// Longest run of consecutive clipped frames
    pub longest_clip_run: u64,
    /// Samples whose interpolated value exceeded 0 dBFS
    pub inter_sample_peaks: u64,
    /// Largest inter-sample overshoot (dB above full scale)
    pub max_inter_sample_over_db: f64,
}

/// Complete metering result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterSnapshot {
    pub loudness: LoudnessReadings,
    pub levels: LevelReadings,
    pub dynamic_range: DynamicRangeReadings,
    pub clipping: ClippingStats,
    /// Band results, lowest band first
    pub bands: Vec<BandResult>,
    pub histogram: HistogramStats,
    /// Gating engine state when the snapshot was taken
    pub gate_state: GateState,
    /// Frames (one sample per channel) processed since reset
    pub frames_processed: u64,
    /// `frames_processed` in seconds
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: usize,
}

impl MeterSnapshot {
    /// Whether applying `gain_db` would push the true peak above 0 dBTP
    pub fn will_clip_at_gain(&self, gain_db: f64) -> bool {
        self.levels.true_peak_dbtp + gain_db > 0.0
    }

    /// Largest gain that keeps the true peak at or below 0 dBTP
    pub fn max_safe_gain(&self) -> f64 {
        -self.levels.true_peak_dbtp
    }
}

impl fmt::Display for MeterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Loudness: {:.1} LUFS (M {:.1}, S {:.1}), Range: {:.1} LU, True Peak: {:.1} dBTP, \
             Peak: {:.1} dBFS, RMS: {:.1} dBFS, DR{}, Clips: {}",
            self.loudness.integrated_lufs,
            self.loudness.momentary_lufs,
            self.loudness.short_term_lufs,
            self.dynamic_range.loudness_range_lu,
            self.levels.true_peak_dbtp,
            self.levels.peak_dbfs,
            self.levels.rms_dbfs,
            self.dynamic_range.dr_score,
            self.clipping.clip_events
        )
    }
}
