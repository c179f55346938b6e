//! True-peak detection (ITU-R BS.1770 Annex 2)
//!
//! Peaks of the reconstructed analogue signal can fall between sample
//! instants. Each channel keeps a short ring of raw samples, and every new
//! sample is interpolated at `factor` sub-sample positions by a polyphase
//! FIR bank. The reported true peak is the largest magnitude among the
//! direct samples and all interpolated values.
//!
//! # Filter design
//!
//! A windowed-sinc low-pass prototype of `taps` points is sampled at
//! `1/factor` spacing (Kaiser window, beta = 5) and split into `factor`
//! phases of `taps / factor` coefficients. Each phase is scaled so the sum
//! of its absolute coefficients is 1, which bounds every interpolated value
//! by the largest sample magnitude in the ring.
//!
//! Banks only depend on `(taps, factor)`, so they are built once per process
//! and shared between detectors.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Kaiser window shape parameter
const KAISER_BETA: f64 = 5.0;

/// Interpolated magnitude above which a sample counts as an inter-sample over
pub const OVER_THRESHOLD: f64 = 1.0;

/// Polyphase decomposition of the interpolation kernel
#[derive(Debug, Clone, PartialEq)]
pub struct PolyphaseBank {
    /// `phases[p][k]` multiplies the sample `k` steps in the past
    phases: Vec<Vec<f64>>,
    taps_per_phase: usize,
}

impl PolyphaseBank {
    /// Design a bank of `taps` total coefficients split into `factor` phases
    ///
    /// Callers must ensure `taps` is a non-zero multiple of `factor`
    /// (checked by [`MeterConfig::validate`](crate::MeterConfig::validate)).
    pub fn design(taps: usize, factor: usize) -> Self {
        let factor = factor.max(1);
        let taps_per_phase = (taps / factor).max(1);
        let total = taps_per_phase * factor;
        let center = (total as f64 - 1.0) / 2.0;

        let mut phases = vec![vec![0.0; taps_per_phase]; factor];
        for i in 0..total {
            let x = (i as f64 - center) / factor as f64;
            let value = sinc(x) * kaiser_window(i, total, KAISER_BETA);
            phases[i % factor][i / factor] = value;
        }

        for phase in &mut phases {
            let abs_sum: f64 = phase.iter().map(|h| h.abs()).sum();
            if abs_sum > 1e-12 {
                for h in phase.iter_mut() {
                    *h /= abs_sum;
                }
            }
        }

        Self {
            phases,
            taps_per_phase,
        }
    }

    /// Shared bank for `(taps, factor)`, designed on first use
    pub fn cached(taps: usize, factor: usize) -> Arc<Self> {
        static BANKS: OnceLock<Mutex<HashMap<(usize, usize), Arc<PolyphaseBank>>>> =
            OnceLock::new();

        let mut banks = BANKS
            .get_or_init(|| Mutex::new(HashMap::new()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        Arc::clone(
            banks
                .entry((taps, factor))
                .or_insert_with(|| Arc::new(Self::design(taps, factor))),
        )
    }

    /// Oversampling factor (number of phases)
    pub fn factor(&self) -> usize {
        self.phases.len()
    }

    /// Coefficients per phase, also the ring depth
    pub fn taps_per_phase(&self) -> usize {
        self.taps_per_phase
    }

    /// Coefficients of one phase
    pub fn phase(&self, index: usize) -> &[f64] {
        &self.phases[index]
    }
}

/// Ring of recent samples for one channel
#[derive(Debug, Clone)]
struct ChannelHistory {
    ring: Vec<f64>,
    write_pos: usize,
    peak: f64,
}

impl ChannelHistory {
    fn new(depth: usize) -> Self {
        Self {
            ring: vec![0.0; depth],
            write_pos: 0,
            peak: 0.0,
        }
    }

    fn clear(&mut self) {
        self.ring.fill(0.0);
        self.write_pos = 0;
        self.peak = 0.0;
    }
}

/// Per-channel true-peak detector
#[derive(Debug, Clone)]
pub struct TruePeakDetector {
    bank: Arc<PolyphaseBank>,
    channels: Vec<ChannelHistory>,
}

impl TruePeakDetector {
    /// Create a detector for `channels` channels using the shared bank
    pub fn new(channels: usize, taps: usize, factor: usize) -> Self {
        let bank = PolyphaseBank::cached(taps, factor);
        let depth = bank.taps_per_phase();
        Self {
            bank,
            channels: vec![ChannelHistory::new(depth); channels],
        }
    }

    /// Push one raw sample of `channel`
    ///
    /// Returns the largest interpolated (between-sample) magnitude produced
    /// for this sample; the running peak also includes the sample itself.
    ///
    /// # Panics
    /// Panics if `channel` is out of range.
    #[inline]
    pub fn process(&mut self, sample: f32, channel: usize) -> f64 {
        let history = &mut self.channels[channel];
        let x = f64::from(sample);
        let depth = history.ring.len();

        history.ring[history.write_pos] = x;
        let newest = history.write_pos;
        history.write_pos = (history.write_pos + 1) % depth;

        let mut interpolated = 0.0_f64;
        for phase in &self.bank.phases {
            let mut acc = 0.0;
            for (k, h) in phase.iter().enumerate() {
                acc += h * history.ring[(newest + depth - k) % depth];
            }
            interpolated = interpolated.max(acc.abs());
        }

        history.peak = history.peak.max(x.abs()).max(interpolated);
        interpolated
    }

    /// True peak (linear) of one channel
    pub fn channel_peak(&self, channel: usize) -> f64 {
        self.channels.get(channel).map_or(0.0, |h| h.peak)
    }

    /// True peak (linear) across every channel
    pub fn peak(&self) -> f64 {
        self.channels.iter().map(|h| h.peak).fold(0.0, f64::max)
    }

    /// Per-channel true peaks (linear)
    pub fn channel_peaks(&self) -> Vec<f64> {
        self.channels.iter().map(|h| h.peak).collect()
    }

    /// Clear every ring and peak
    pub fn reset(&mut self) {
        for history in &mut self.channels {
            history.clear();
        }
    }

    /// The coefficient bank in use
    pub fn bank(&self) -> &PolyphaseBank {
        &self.bank
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

/// Kaiser window value at position `n` of `length`
fn kaiser_window(n: usize, length: usize, beta: f64) -> f64 {
    if length < 2 {
        return 1.0;
    }
    let m = length as f64 - 1.0;
    let x = 2.0 * n as f64 / m - 1.0;
    let arg = beta * (1.0 - x * x).max(0.0).sqrt();
    bessel_i0(arg) / bessel_i0(beta)
}

/// Zeroth-order modified Bessel function of the first kind (power series)
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0_f64;
    let mut term = 1.0_f64;
    let half = x / 2.0;

    for k in 1..=32 {
        term *= (half / k as f64) * (half / k as f64);
        sum += term;
        if term < 1e-20 * sum {
            break;
        }
    }

    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, amplitude: f64, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (amplitude * (2.0 * PI * freq * i as f64 / 48000.0).sin()) as f32)
            .collect()
    }

    #[test]
    fn bank_layout() {
        let bank = PolyphaseBank::design(48, 4);
        assert_eq!(bank.factor(), 4);
        assert_eq!(bank.taps_per_phase(), 12);
        for p in 0..4 {
            let abs_sum: f64 = bank.phase(p).iter().map(|h| h.abs()).sum();
            assert!((abs_sum - 1.0).abs() < 1e-12, "phase {p} sums to {abs_sum}");
        }
    }

    #[test]
    fn bank_is_symmetric_across_phases() {
        // Phase p mirrors phase (factor - 1 - p) reversed
        let bank = PolyphaseBank::design(48, 4);
        for p in 0..4 {
            let forward = bank.phase(p);
            let mirrored: Vec<f64> = bank.phase(3 - p).iter().rev().copied().collect();
            for (a, b) in forward.iter().zip(&mirrored) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn cached_banks_are_shared() {
        let a = PolyphaseBank::cached(48, 4);
        let b = PolyphaseBank::cached(48, 4);
        assert!(Arc::ptr_eq(&a, &b));
        let c = PolyphaseBank::cached(64, 4);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.taps_per_phase(), 16);
    }

    #[test]
    fn bessel_known_values() {
        assert!((bessel_i0(0.0) - 1.0).abs() < 1e-12);
        assert!((bessel_i0(1.0) - 1.266065877752008).abs() < 1e-10);
    }

    #[test]
    fn silence_has_zero_peak() {
        let mut detector = TruePeakDetector::new(1, 48, 4);
        for _ in 0..1000 {
            detector.process(0.0, 0);
        }
        assert_eq!(detector.peak(), 0.0);
    }

    #[test]
    fn true_peak_never_below_sample_peak() {
        let mut detector = TruePeakDetector::new(1, 48, 4);
        let signal = sine(11025.0, 0.8, 4800);
        let sample_peak = signal.iter().map(|s| f64::from(s.abs())).fold(0.0, f64::max);
        for &s in &signal {
            detector.process(s, 0);
        }
        assert!(detector.peak() >= sample_peak);
    }

    #[test]
    fn full_scale_sine_reads_near_zero_dbtp() {
        let mut detector = TruePeakDetector::new(1, 48, 4);
        for s in sine(997.0, 1.0, 48000) {
            detector.process(s, 0);
        }
        let db = 20.0 * detector.peak().log10();
        assert!(db.abs() < 0.1, "true peak {db} dBTP");
    }

    #[test]
    fn interpolation_is_bounded_by_ring_maximum() {
        let mut detector = TruePeakDetector::new(1, 48, 4);
        let signal: Vec<f32> = (0..500).map(|i| if i % 2 == 0 { 0.9 } else { -0.9 }).collect();
        for s in signal {
            let interpolated = detector.process(s, 0);
            assert!(interpolated <= 0.9 + 1e-6);
        }
    }

    #[test]
    fn over_range_input_produces_interpolated_overs() {
        let mut detector = TruePeakDetector::new(1, 48, 4);
        let mut max_interpolated = 0.0_f64;
        for _ in 0..100 {
            max_interpolated = max_interpolated.max(detector.process(2.0, 0));
        }
        assert!(max_interpolated > OVER_THRESHOLD);
    }

    #[test]
    fn channels_are_tracked_separately() {
        let mut detector = TruePeakDetector::new(2, 48, 4);
        for _ in 0..50 {
            detector.process(0.5, 0);
            detector.process(0.1, 1);
        }
        assert!(detector.channel_peak(0) >= 0.5);
        assert!(detector.channel_peak(1) < 0.5);
        assert_eq!(detector.peak(), detector.channel_peak(0));
        assert_eq!(detector.channel_peaks().len(), 2);
    }

    #[test]
    fn reset_clears_history() {
        let mut detector = TruePeakDetector::new(1, 48, 4);
        for _ in 0..20 {
            detector.process(0.7, 0);
        }
        detector.reset();
        assert_eq!(detector.peak(), 0.0);
        assert_eq!(detector.process(0.0, 0), 0.0);
    }
}
