//! Sample peak, RMS and clipping statistics

use crate::snapshot::ClippingStats;
use crate::true_peak::OVER_THRESHOLD;
use crate::units::amplitude_to_db;

/// Default linear clip threshold (about -0.001 dBFS)
pub const DEFAULT_CLIP_THRESHOLD: f32 = 0.9999;

/// Running peak / RMS / clipping tracker
///
/// Peak and RMS cover every raw channel sample. Clip runs are tracked per
/// frame: a frame is clipped when any of its channels is, and a clipping
/// event is counted on the first frame of every run.
#[derive(Debug, Clone)]
pub struct LevelTracker {
    clip_threshold: f32,
    /// Largest |sample| seen (linear)
    peak: f64,
    sum_squares: f64,
    sample_count: u64,
    clipped_samples: u64,
    clip_events: u64,
    current_run: u64,
    longest_run: u64,
    inter_sample_peaks: u64,
    /// Largest interpolated magnitude above [`OVER_THRESHOLD`]
    max_over: f64,
}

impl LevelTracker {
    /// Create a tracker with the given clip threshold
    pub fn new(clip_threshold: f32) -> Self {
        Self {
            clip_threshold,
            peak: 0.0,
            sum_squares: 0.0,
            sample_count: 0,
            clipped_samples: 0,
            clip_events: 0,
            current_run: 0,
            longest_run: 0,
            inter_sample_peaks: 0,
            max_over: 0.0,
        }
    }

    /// Record one raw sample; returns whether it is clipped
    #[inline]
    pub fn record_sample(&mut self, sample: f32) -> bool {
        let magnitude = sample.abs();
        let x = f64::from(sample);
        self.peak = self.peak.max(f64::from(magnitude));
        self.sum_squares += x * x;
        self.sample_count += 1;

        let clipped = magnitude >= self.clip_threshold;
        if clipped {
            self.clipped_samples += 1;
        }
        clipped
    }

    /// Close a frame, advancing the clip-run state
    #[inline]
    pub fn end_frame(&mut self, clipped: bool) {
        if clipped {
            if self.current_run == 0 {
                self.clip_events += 1;
            }
            self.current_run += 1;
            self.longest_run = self.longest_run.max(self.current_run);
        } else {
            self.current_run = 0;
        }
    }

    /// Record the largest interpolated value produced for one sample
    #[inline]
    pub fn record_interpolated(&mut self, interpolated: f64) {
        if interpolated > OVER_THRESHOLD {
            self.inter_sample_peaks += 1;
            self.max_over = self.max_over.max(interpolated);
        }
    }

    /// Sample peak (linear)
    pub fn peak(&self) -> f64 {
        self.peak
    }

    /// Sample peak in dBFS
    pub fn peak_db(&self) -> f64 {
        amplitude_to_db(self.peak)
    }

    /// RMS (linear) over every sample recorded
    pub fn rms(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        (self.sum_squares / self.sample_count as f64).sqrt()
    }

    /// RMS in dBFS
    pub fn rms_db(&self) -> f64 {
        amplitude_to_db(self.rms())
    }

    /// Peak-to-RMS ratio in dB; 0.0 before any signal
    pub fn crest_factor_db(&self) -> f64 {
        if self.peak <= 0.0 {
            return 0.0;
        }
        self.peak_db() - self.rms_db()
    }

    /// Raw samples recorded since reset
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Snapshot of the clipping counters
    pub fn clipping(&self) -> ClippingStats {
        ClippingStats {
            clipped_samples: self.clipped_samples,
            clip_events: self.clip_events,
            longest_clip_run: self.longest_run,
            inter_sample_peaks: self.inter_sample_peaks,
            max_inter_sample_over_db: if self.inter_sample_peaks > 0 {
                amplitude_to_db(self.max_over)
            } else {
                0.0
            },
        }
    }

    /// Zero every counter
    pub fn reset(&mut self) {
        *self = Self::new(self.clip_threshold);
    }
}

impl Default for LevelTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CLIP_THRESHOLD)
    }
}
