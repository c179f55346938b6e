//! Sample level histogram (1 dB bins, -90..0 dBFS)
//!
//! Used for noise-floor estimation and as a cheap compression indicator:
//! heavily limited material piles most of its samples into the top few
//! bins, dynamic material spreads them out.

use crate::units::amplitude_to_db;
use serde::{Deserialize, Serialize};

/// Number of 1 dB bins
pub const HISTOGRAM_BINS: usize = 91;

/// Level of the lowest bin's lower edge (dBFS)
pub const HISTOGRAM_FLOOR_DB: f64 = -90.0;

/// Cumulative share of samples that defines the noise floor
const NOISE_FLOOR_PERCENTILE: f64 = 0.05;

/// Width of the "loud" region below the highest occupied bin
const LOUD_REGION_DB: usize = 6;

/// Statistics derived from the histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramStats {
    /// Level below which the quietest 5% of samples sit (dBFS)
    pub noise_floor_db: f64,
    /// Spread between the 10th and 95th percentile levels (dB)
    pub level_spread_db: f64,
    /// Share of samples within 6 dB of the loudest occupied bin
    pub loud_sample_ratio: f64,
    /// Samples counted
    pub total: u64,
    /// Raw bin counts, index 0 = -90 dBFS
    pub bins: Vec<u64>,
}

/// Fixed-resolution level histogram
#[derive(Debug, Clone)]
pub struct LevelHistogram {
    bins: [u64; HISTOGRAM_BINS],
    total: u64,
}

impl Default for LevelHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelHistogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        Self {
            bins: [0; HISTOGRAM_BINS],
            total: 0,
        }
    }

    /// Bin index for a sample, clamped to `[0, 90]`
    pub fn bin_index(sample: f32) -> usize {
        let db = amplitude_to_db(f64::from(sample));
        let idx = (db - HISTOGRAM_FLOOR_DB).floor();
        idx.clamp(0.0, (HISTOGRAM_BINS - 1) as f64) as usize
    }

    /// Count one sample
    #[inline]
    pub fn record(&mut self, sample: f32) {
        self.bins[Self::bin_index(sample)] += 1;
        self.total += 1;
    }

    /// Samples counted since reset
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Raw bin counts
    pub fn bins(&self) -> &[u64; HISTOGRAM_BINS] {
        &self.bins
    }

    /// Lower edge (dBFS) of the bin reached at cumulative share `p`
    ///
    /// Returns the histogram floor when empty.
    pub fn percentile_db(&self, p: f64) -> f64 {
        if self.total == 0 {
            return HISTOGRAM_FLOOR_DB;
        }
        let target = ((p.clamp(0.0, 1.0) * self.total as f64).ceil() as u64).max(1);
        let mut cumulative = 0;
        for (idx, &count) in self.bins.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return bin_level_db(idx);
            }
        }
        bin_level_db(HISTOGRAM_BINS - 1)
    }

    /// Estimated noise floor (dBFS); -90 when empty
    pub fn noise_floor_db(&self) -> f64 {
        self.percentile_db(NOISE_FLOOR_PERCENTILE)
    }

    /// 95th minus 10th percentile level (dB)
    pub fn level_spread_db(&self) -> f64 {
        self.percentile_db(0.95) - self.percentile_db(0.10)
    }

    /// Share of samples within 6 dB of the loudest occupied bin
    pub fn loud_sample_ratio(&self) -> f64 {
        let Some(top) = self.bins.iter().rposition(|&count| count > 0) else {
            return 0.0;
        };
        let start = top.saturating_sub(LOUD_REGION_DB - 1);
        let loud: u64 = self.bins[start..=top].iter().sum();
        loud as f64 / self.total as f64
    }

    /// Assemble the derived statistics
    pub fn stats(&self) -> HistogramStats {
        HistogramStats {
            noise_floor_db: self.noise_floor_db(),
            level_spread_db: self.level_spread_db(),
            loud_sample_ratio: self.loud_sample_ratio(),
            total: self.total,
            bins: self.bins.to_vec(),
        }
    }

    /// Zero every bin
    pub fn reset(&mut self) {
        self.bins = [0; HISTOGRAM_BINS];
        self.total = 0;
    }
}

fn bin_level_db(idx: usize) -> f64 {
    HISTOGRAM_FLOOR_DB + idx as f64
}
