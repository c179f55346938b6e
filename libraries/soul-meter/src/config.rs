//! Meter configuration

use crate::error::{MeterError, Result};
use crate::levels::DEFAULT_CLIP_THRESHOLD;
use serde::{Deserialize, Serialize};

/// Lowest accepted sample rate
pub const MIN_SAMPLE_RATE: u32 = 8000;

/// Highest accepted sample rate
pub const MAX_SAMPLE_RATE: u32 = 768_000;

/// Highest accepted channel count (7.1)
pub const MAX_CHANNELS: usize = 8;

/// Smallest accepted FFT frame
pub const MIN_FFT_SIZE: usize = 64;

/// Configuration for a [`LoudnessMeter`](crate::LoudnessMeter)
///
/// Sample rate and channel layout are fixed for the lifetime of the meter.
/// Missing fields fall back to their defaults when deserialized, so a
/// settings file only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Sample rate in Hz (default: 48000)
    pub sample_rate: u32,

    /// Interleaved channel count (default: 2)
    pub channels: usize,

    /// Band analyzer frame size, power of two (default: 4096)
    pub fft_size: usize,

    /// Total taps of the true-peak interpolation kernel (default: 48)
    pub true_peak_taps: usize,

    /// True-peak oversampling factor (default: 4)
    pub oversample_factor: usize,

    /// Linear level at or above which a sample counts as clipped (default: 0.9999)
    pub clip_threshold: f32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            fft_size: 4096,
            true_peak_taps: 48,
            oversample_factor: 4,
            clip_threshold: DEFAULT_CLIP_THRESHOLD,
        }
    }
}

impl MeterConfig {
    /// Create a config for the given stream layout, other fields at defaults
    #[must_use]
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
            ..Self::default()
        }
    }

    /// Set the band analyzer frame size
    #[must_use]
    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = fft_size;
        self
    }

    /// Set the true-peak filter layout
    #[must_use]
    pub fn with_true_peak(mut self, taps: usize, oversample_factor: usize) -> Self {
        self.true_peak_taps = taps;
        self.oversample_factor = oversample_factor;
        self
    }

    /// Set the clip threshold (linear)
    #[must_use]
    pub fn with_clip_threshold(mut self, threshold: f32) -> Self {
        self.clip_threshold = threshold;
        self
    }

    /// Check every field, failing on the first invalid one
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(MeterError::InvalidSampleRate(self.sample_rate));
        }
        if !(1..=MAX_CHANNELS).contains(&self.channels) {
            return Err(MeterError::InvalidChannelCount(self.channels));
        }
        if !self.fft_size.is_power_of_two() || self.fft_size < MIN_FFT_SIZE {
            return Err(MeterError::InvalidFftSize(self.fft_size));
        }
        if self.oversample_factor == 0
            || self.true_peak_taps == 0
            || self.true_peak_taps % self.oversample_factor != 0
        {
            return Err(MeterError::InvalidOversampling {
                taps: self.true_peak_taps,
                factor: self.oversample_factor,
            });
        }
        if !(self.clip_threshold > 0.0 && self.clip_threshold <= 1.0) {
            return Err(MeterError::InvalidClipThreshold(self.clip_threshold));
        }
        Ok(())
    }

    /// Number of samples held per channel by the true-peak ring buffer
    pub fn true_peak_history(&self) -> usize {
        self.true_peak_taps / self.oversample_factor.max(1)
    }
}
