//! Per-band energy analysis
//!
//! The mono mix is cut into non-overlapping power-of-two frames. Every full
//! frame is Hann-windowed and transformed with a forward FFT; the squared
//! bin magnitudes are summed inside each of 8 log-spaced bands. Per band we
//! keep the cumulative energy, the largest bin magnitude, and the quietest
//! and loudest frame energies, which is enough to report level, crest
//! factor, dynamic range and a compression classification on demand.
//!
//! Levels are calibrated so that a full-scale sine centred on a bin reads
//! 0 dB peak and -3.01 dB RMS inside its band.

use crate::analyzer::FrameBuffer;
use crate::units::{amplitude_to_db, power_to_db};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

/// Number of analysis bands
pub const BAND_COUNT: usize = 8;

/// Lower edge of the lowest band (Hz)
const LOWEST_BAND_HZ: f64 = 20.0;

/// Upper edge of the highest band (Hz), capped at Nyquist
const HIGHEST_BAND_HZ: f64 = 20_000.0;

/// How hard a band appears to be compressed, judged from its crest factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Crest factor below 3 dB
    Extreme,
    /// Crest factor below 6 dB
    Heavy,
    /// Crest factor below 10 dB
    Moderate,
    /// Crest factor below 14 dB
    Light,
    /// Crest factor of 14 dB or more (or no signal)
    #[default]
    None,
}

impl CompressionLevel {
    /// Classify a crest factor in dB
    pub fn from_crest_factor(crest_db: f64) -> Self {
        if crest_db < 3.0 {
            Self::Extreme
        } else if crest_db < 6.0 {
            Self::Heavy
        } else if crest_db < 10.0 {
            Self::Moderate
        } else if crest_db < 14.0 {
            Self::Light
        } else {
            Self::None
        }
    }

    /// Lowercase name for settings and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extreme => "extreme",
            Self::Heavy => "heavy",
            Self::Moderate => "moderate",
            Self::Light => "light",
            Self::None => "none",
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result for one band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandResult {
    /// Lower band edge (Hz)
    pub low_hz: f64,
    /// Upper band edge (Hz)
    pub high_hz: f64,
    /// Mean level over all analyzed frames (dB)
    pub rms_db: f64,
    /// Largest bin magnitude seen (dB)
    pub peak_db: f64,
    /// Loudest against quietest nonzero frame energy (dB)
    pub dynamic_range_db: f64,
    /// Loudest frame energy over the mean frame energy (dB)
    pub crest_factor_db: f64,
    /// Classification of `crest_factor_db`
    pub compression: CompressionLevel,
    /// Frames analyzed
    pub frames: u64,
}

/// Running statistics for one band
#[derive(Debug, Clone, Default)]
struct BandAccumulator {
    /// FFT bins `[start, end)` belonging to the band
    bins: (usize, usize),
    low_hz: f64,
    high_hz: f64,
    energy_sum: f64,
    peak_magnitude: f64,
    min_energy: Option<f64>,
    max_energy: f64,
    frames: u64,
}

impl BandAccumulator {
    fn clear(&mut self) {
        self.energy_sum = 0.0;
        self.peak_magnitude = 0.0;
        self.min_energy = None;
        self.max_energy = 0.0;
        self.frames = 0;
    }

    fn result(&self) -> BandResult {
        let empty = BandResult {
            low_hz: self.low_hz,
            high_hz: self.high_hz,
            rms_db: 0.0,
            peak_db: 0.0,
            dynamic_range_db: 0.0,
            crest_factor_db: 0.0,
            compression: CompressionLevel::None,
            frames: self.frames,
        };
        if self.bins.0 >= self.bins.1 || self.frames == 0 || self.energy_sum <= 0.0 {
            return empty;
        }

        let rms_db = power_to_db(self.energy_sum / self.frames as f64);
        let peak_db = amplitude_to_db(self.peak_magnitude);
        let dynamic_range_db = self
            .min_energy
            .map_or(0.0, |min| power_to_db(self.max_energy) - power_to_db(min));
        let crest_factor_db = power_to_db(self.max_energy) - rms_db;

        BandResult {
            rms_db,
            peak_db,
            dynamic_range_db,
            crest_factor_db,
            compression: CompressionLevel::from_crest_factor(crest_factor_db),
            ..empty
        }
    }
}

/// Windowed FFT and band bookkeeping for complete frames
struct SpectrumEngine {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    /// Converts summed |X|^2 into the mean square of a full-scale sine
    energy_scale: f64,
    /// Converts |X| into sine amplitude
    magnitude_scale: f64,
    bands: Vec<BandAccumulator>,
    frames_analyzed: u64,
}

impl SpectrumEngine {
    fn new(sample_rate: u32, fft_size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        let window = hann_window(fft_size);
        let window_sum: f64 = window.iter().map(|&w| f64::from(w)).sum();
        let window_power: f64 = window.iter().map(|&w| f64::from(w) * f64::from(w)).sum();

        Self {
            fft,
            window,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
            energy_scale: 2.0 / (fft_size as f64 * window_power),
            magnitude_scale: 2.0 / window_sum,
            bands: band_layout(sample_rate, fft_size),
            frames_analyzed: 0,
        }
    }

    fn analyze(&mut self, frame: &[f32]) {
        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(frame).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        for band in &mut self.bands {
            let (start, end) = band.bins;
            if start >= end {
                continue;
            }

            let mut energy = 0.0_f64;
            let mut peak = 0.0_f64;
            for bin in &self.buffer[start..end] {
                let magnitude_sq = f64::from(bin.norm_sqr());
                energy += magnitude_sq;
                peak = peak.max(magnitude_sq.sqrt());
            }

            let energy = energy * self.energy_scale;
            band.energy_sum += energy;
            band.peak_magnitude = band.peak_magnitude.max(peak * self.magnitude_scale);
            band.max_energy = band.max_energy.max(energy);
            if energy > 0.0 {
                band.min_energy = Some(band.min_energy.map_or(energy, |m| m.min(energy)));
            }
            band.frames += 1;
        }

        self.frames_analyzed += 1;
        tracing::trace!(frame = self.frames_analyzed, "Analyzed spectrum frame");
    }
}

/// Band energy analyzer fed with mono samples
pub struct BandAnalyzer {
    frames: FrameBuffer,
    engine: SpectrumEngine,
}

impl fmt::Debug for BandAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BandAnalyzer")
            .field("fft_size", &self.frames.frame_size())
            .field("frames_analyzed", &self.engine.frames_analyzed)
            .finish_non_exhaustive()
    }
}

impl BandAnalyzer {
    /// Create an analyzer with `fft_size`-sample frames
    ///
    /// `fft_size` must be a power of two (checked by
    /// [`MeterConfig::validate`](crate::MeterConfig::validate)).
    pub fn new(sample_rate: u32, fft_size: usize) -> Self {
        Self {
            frames: FrameBuffer::new(fft_size, fft_size),
            engine: SpectrumEngine::new(sample_rate, fft_size),
        }
    }

    /// Push one mono sample, analyzing the frame when it fills
    #[inline]
    pub fn push(&mut self, sample: f32) {
        if let Some(frame) = self.frames.push(sample) {
            self.engine.analyze(frame);
        }
    }

    /// Complete frames analyzed since reset
    pub fn frames_analyzed(&self) -> u64 {
        self.engine.frames_analyzed
    }

    /// Per-band results, lowest band first
    pub fn results(&self) -> Vec<BandResult> {
        self.engine.bands.iter().map(BandAccumulator::result).collect()
    }

    /// Drop the partial frame and every band statistic
    pub fn reset(&mut self) {
        self.frames.clear();
        for band in &mut self.engine.bands {
            band.clear();
        }
        self.engine.frames_analyzed = 0;
    }
}

/// Periodic Hann window
fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / size as f32).cos())
        .collect()
}

/// 8 log-spaced bands between 20 Hz and min(20 kHz, Nyquist)
fn band_layout(sample_rate: u32, fft_size: usize) -> Vec<BandAccumulator> {
    let nyquist = f64::from(sample_rate) / 2.0;
    let top = HIGHEST_BAND_HZ.min(nyquist);
    let ratio = (top / LOWEST_BAND_HZ).powf(1.0 / BAND_COUNT as f64);
    let bin_hz = f64::from(sample_rate) / fft_size as f64;
    let last_bin = fft_size / 2 + 1;

    (0..BAND_COUNT)
        .map(|i| {
            let low_hz = LOWEST_BAND_HZ * ratio.powi(i as i32);
            let high_hz = if i + 1 == BAND_COUNT {
                top
            } else {
                LOWEST_BAND_HZ * ratio.powi(i as i32 + 1)
            };
            let start = ((low_hz / bin_hz).ceil() as usize).min(last_bin);
            let end = if i + 1 == BAND_COUNT {
                ((high_hz / bin_hz).floor() as usize + 1).min(last_bin)
            } else {
                ((high_hz / bin_hz).ceil() as usize).min(last_bin)
            };
            BandAccumulator {
                bins: (start, end.max(start)),
                low_hz,
                high_hz,
                ..BandAccumulator::default()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_sine(analyzer: &mut BandAnalyzer, freq: f32, amplitude: f32, n: usize) {
        for i in 0..n {
            let s = amplitude * (2.0 * PI * freq * i as f32 / 48000.0).sin();
            analyzer.push(s);
        }
    }

    #[test]
    fn layout_is_contiguous_and_log_spaced() {
        let bands = band_layout(48000, 4096);
        assert_eq!(bands.len(), BAND_COUNT);
        assert!((bands[0].low_hz - 20.0).abs() < 1e-9);
        assert!((bands[7].high_hz - 20000.0).abs() < 1e-6);
        for pair in bands.windows(2) {
            assert!((pair[0].high_hz - pair[1].low_hz).abs() < 1e-6);
            assert_eq!(pair[0].bins.1, pair[1].bins.0);
        }
    }

    #[test]
    fn top_band_capped_at_nyquist() {
        let bands = band_layout(16000, 1024);
        assert!((bands[7].high_hz - 8000.0).abs() < 1e-9);
        assert_eq!(bands[7].bins.1, 513);
    }

    #[test]
    fn small_fft_leaves_empty_low_bands() {
        let mut analyzer = BandAnalyzer::new(48000, 64);
        for _ in 0..640 {
            analyzer.push(0.5);
        }
        let results = analyzer.results();
        assert_eq!(results[0].rms_db, 0.0);
        assert_eq!(results[0].peak_db, 0.0);
        assert_eq!(results[0].compression, CompressionLevel::None);
    }

    #[test]
    fn frames_are_counted_per_fill() {
        let mut analyzer = BandAnalyzer::new(48000, 1024);
        feed_sine(&mut analyzer, 1000.0, 0.5, 1024 * 3 + 100);
        assert_eq!(analyzer.frames_analyzed(), 3);
    }

    #[test]
    fn bin_centred_sine_is_calibrated() {
        // 750 Hz is exactly bin 64 of a 4096-point FFT at 48 kHz
        let mut analyzer = BandAnalyzer::new(48000, 4096);
        feed_sine(&mut analyzer, 750.0, 1.0, 4096 * 4);

        let results = analyzer.results();
        let band = results
            .iter()
            .find(|b| b.low_hz <= 750.0 && b.high_hz > 750.0)
            .unwrap();
        assert!((band.peak_db).abs() < 0.05, "peak {}", band.peak_db);
        assert!((band.rms_db + 3.01).abs() < 0.05, "rms {}", band.rms_db);
        // Steady tone: every frame is as loud as the mean
        assert!(band.crest_factor_db.abs() < 0.01, "crest {}", band.crest_factor_db);
        assert_eq!(band.compression, CompressionLevel::Extreme);
        assert!(band.dynamic_range_db.abs() < 0.1);
        assert_eq!(band.frames, 4);
    }

    #[test]
    fn crest_factor_is_independent_of_bandwidth() {
        // The same noise burst in one frame out of five, so every band sees
        // identical dynamics whatever its width
        let mut seed: u64 = 7;
        let burst: Vec<f32> = (0..4096)
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
                (seed >> 33) as f32 / (1u64 << 31) as f32 - 0.5
            })
            .collect();

        let mut analyzer = BandAnalyzer::new(48000, 4096);
        for _ in 0..20 {
            for &s in &burst {
                analyzer.push(s);
            }
            for _ in 0..4096 * 4 {
                analyzer.push(0.0);
            }
        }

        let expected = 10.0 * 5.0_f64.log10();
        for band in analyzer.results() {
            assert_eq!(band.frames, 100);
            assert!(
                (band.crest_factor_db - expected).abs() < 1e-6,
                "{:.0}-{:.0} Hz crest {}",
                band.low_hz,
                band.high_hz,
                band.crest_factor_db
            );
            assert_eq!(band.compression, CompressionLevel::Moderate);
        }
    }

    #[test]
    fn silence_gives_zero_metrics() {
        let mut analyzer = BandAnalyzer::new(48000, 1024);
        for _ in 0..4096 {
            analyzer.push(0.0);
        }
        for band in analyzer.results() {
            assert_eq!(band.rms_db, 0.0);
            assert_eq!(band.dynamic_range_db, 0.0);
            assert_eq!(band.frames, 4);
        }
    }

    #[test]
    fn crest_factor_classification() {
        assert_eq!(CompressionLevel::from_crest_factor(2.0), CompressionLevel::Extreme);
        assert_eq!(CompressionLevel::from_crest_factor(3.0), CompressionLevel::Heavy);
        assert_eq!(CompressionLevel::from_crest_factor(7.5), CompressionLevel::Moderate);
        assert_eq!(CompressionLevel::from_crest_factor(12.0), CompressionLevel::Light);
        assert_eq!(CompressionLevel::from_crest_factor(20.0), CompressionLevel::None);
    }

    #[test]
    fn reset_clears_statistics() {
        let mut analyzer = BandAnalyzer::new(48000, 1024);
        feed_sine(&mut analyzer, 1000.0, 0.5, 3000);
        analyzer.reset();
        assert_eq!(analyzer.frames_analyzed(), 0);
        assert!(analyzer.results().iter().all(|b| b.frames == 0));
    }
}
