//! Metering facade
//!
//! [`MeterCore`] owns every accumulator and feeds them frame by frame;
//! [`LoudnessMeter`] puts one core behind a single mutex so one thread can
//! push audio while others pull snapshots.

use crate::analyzer::StreamingAnalyzer;
use crate::bands::BandAnalyzer;
use crate::config::MeterConfig;
use crate::error::{MeterError, Result};
use crate::gating::{channel_weight, BlockAccumulator, GateState, LoudnessGate};
use crate::histogram::LevelHistogram;
use crate::levels::LevelTracker;
use crate::snapshot::{DynamicRangeReadings, LevelReadings, LoudnessReadings, MeterSnapshot};
use crate::true_peak::TruePeakDetector;
use crate::units::{amplitude_to_db, DB_FLOOR};
use crate::weighting::KWeightingFilter;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

/// Single-threaded metering engine
///
/// Every sample of a batch updates the weighting filter, block window,
/// true-peak rings, level and clipping counters, histogram and FFT frame
/// before [`process_samples`](Self::process_samples) returns.
///
/// # Example
///
/// ```
/// use soul_meter::{MeterConfig, MeterCore};
///
/// let mut meter = MeterCore::new(MeterConfig::new(48000, 1)).unwrap();
/// let tone: Vec<f32> = (0..48000)
///     .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 48000.0).sin())
///     .collect();
/// meter.process_samples(&tone).unwrap();
///
/// let snapshot = meter.snapshot();
/// assert!((snapshot.loudness.integrated_lufs + 3.0).abs() < 0.2);
/// ```
#[derive(Debug)]
pub struct MeterCore {
    config: MeterConfig,
    weighting: KWeightingFilter,
    /// BS.1770 weight per channel
    channel_weights: Vec<f64>,
    blocks: BlockAccumulator,
    gate: LoudnessGate,
    true_peak: TruePeakDetector,
    levels: LevelTracker,
    bands: BandAnalyzer,
    histogram: LevelHistogram,
    frames_processed: u64,
    /// NaN or infinite samples replaced with silence since reset
    non_finite_samples: u64,
}

impl MeterCore {
    /// Create an engine, validating the configuration first
    pub fn new(config: MeterConfig) -> Result<Self> {
        config.validate()?;

        let channels = config.channels;
        debug!(
            sample_rate = config.sample_rate,
            channels,
            fft_size = config.fft_size,
            true_peak_taps = config.true_peak_taps,
            oversample_factor = config.oversample_factor,
            "Creating meter"
        );

        Ok(Self {
            weighting: KWeightingFilter::new(config.sample_rate, channels),
            channel_weights: (0..channels).map(|ch| channel_weight(ch, channels)).collect(),
            blocks: BlockAccumulator::new(config.sample_rate),
            gate: LoudnessGate::new(),
            true_peak: TruePeakDetector::new(
                channels,
                config.true_peak_taps,
                config.oversample_factor,
            ),
            levels: LevelTracker::new(config.clip_threshold),
            bands: BandAnalyzer::new(config.sample_rate, config.fft_size),
            histogram: LevelHistogram::new(),
            frames_processed: 0,
            non_finite_samples: 0,
            config,
        })
    }

    /// Feed an interleaved batch
    ///
    /// # Errors
    /// Returns [`MeterError::PartialFrame`] if the batch does not hold a
    /// whole number of frames; nothing is processed in that case.
    pub fn process_samples(&mut self, samples: &[f32]) -> Result<()> {
        let channels = self.config.channels;
        if samples.len() % channels != 0 {
            return Err(MeterError::PartialFrame {
                samples: samples.len(),
                channels,
            });
        }

        for frame in samples.chunks_exact(channels) {
            self.process_frame(frame);
        }
        Ok(())
    }

    /// Feed an interleaved batch, checking the caller's channel count
    ///
    /// # Errors
    /// Returns [`MeterError::ChannelMismatch`] if `channel_count` differs
    /// from the configured layout.
    pub fn process_samples_with_channels(
        &mut self,
        samples: &[f32],
        channel_count: usize,
    ) -> Result<()> {
        if channel_count != self.config.channels {
            return Err(MeterError::ChannelMismatch {
                expected: self.config.channels,
                actual: channel_count,
            });
        }
        self.process_samples(samples)
    }

    fn process_frame(&mut self, frame: &[f32]) {
        let mut weighted_power = 0.0_f64;
        let mut mono = 0.0_f32;
        let mut clipped = false;

        for (channel, &raw) in frame.iter().enumerate() {
            let sample = self.sanitize(raw, channel);
            let weighted = self.weighting.process(f64::from(sample), channel);
            weighted_power += self.channel_weights[channel] * weighted * weighted;

            clipped |= self.levels.record_sample(sample);
            let interpolated = self.true_peak.process(sample, channel);
            self.levels.record_interpolated(interpolated);

            mono += sample;
        }
        self.levels.end_frame(clipped);

        let mono = mono / frame.len() as f32;
        self.histogram.record(mono);
        self.bands.push(mono);

        if let Some(block_power) = self.blocks.push(weighted_power) {
            self.gate.push_block(block_power);
            trace!(
                block = self.gate.block_count(),
                power = block_power,
                "Completed loudness block"
            );
        }

        self.frames_processed += 1;
    }

    /// Replace a NaN or infinite sample with silence
    ///
    /// A single non-finite value would otherwise stay in the filter and
    /// true-peak state for good.
    #[inline]
    fn sanitize(&mut self, sample: f32, channel: usize) -> f32 {
        if sample.is_finite() {
            return sample;
        }
        if self.non_finite_samples == 0 {
            warn!(
                channel,
                frame = self.frames_processed,
                "Non-finite sample in input, treating as silence"
            );
        }
        self.non_finite_samples += 1;
        0.0
    }

    /// Assemble a result from the current state
    pub fn snapshot(&self) -> MeterSnapshot {
        let integrated = self.gate.integrated_lufs();
        let true_peak_dbtp = amplitude_to_db(self.true_peak.peak());
        let histogram = self.histogram.stats();

        MeterSnapshot {
            loudness: LoudnessReadings {
                momentary_lufs: self.gate.momentary_lufs().unwrap_or(DB_FLOOR),
                short_term_lufs: self.gate.short_term_lufs().unwrap_or(DB_FLOOR),
                integrated_lufs: integrated.unwrap_or(DB_FLOOR),
                max_momentary_lufs: self.gate.max_momentary_lufs().unwrap_or(DB_FLOOR),
                max_short_term_lufs: self.gate.max_short_term_lufs().unwrap_or(DB_FLOOR),
                relative_gate_lufs: self.gate.relative_gate_lufs().unwrap_or(DB_FLOOR),
            },
            levels: LevelReadings {
                peak_dbfs: self.levels.peak_db(),
                rms_dbfs: self.levels.rms_db(),
                true_peak_dbtp,
                channel_true_peaks_dbtp: self
                    .true_peak
                    .channel_peaks()
                    .into_iter()
                    .map(amplitude_to_db)
                    .collect(),
                peak_to_loudness_ratio_db: integrated.map_or(0.0, |lufs| true_peak_dbtp - lufs),
            },
            dynamic_range: DynamicRangeReadings {
                dr_score: self.gate.dr_score(),
                loudness_range_lu: self.gate.loudness_range_lu(),
                crest_factor_db: self.levels.crest_factor_db(),
                level_spread_db: histogram.level_spread_db,
                noise_floor_db: histogram.noise_floor_db,
            },
            clipping: self.levels.clipping(),
            bands: self.bands.results(),
            histogram,
            gate_state: self.gate.state(),
            frames_processed: self.frames_processed,
            duration_seconds: self.frames_processed as f64 / f64::from(self.config.sample_rate),
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
        }
    }

    /// Zero every accumulator, ring buffer and filter state
    pub fn reset(&mut self) {
        debug!(frames = self.frames_processed, "Resetting meter");
        self.weighting.reset();
        self.blocks.reset();
        self.gate.reset();
        self.true_peak.reset();
        self.levels.reset();
        self.bands.reset();
        self.histogram.reset();
        self.frames_processed = 0;
        self.non_finite_samples = 0;
    }

    /// The validated configuration
    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    /// Gating engine lifecycle state
    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    /// Frames processed since construction or the last reset
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }
}

impl StreamingAnalyzer for MeterCore {
    type Snapshot = MeterSnapshot;

    fn process_batch(&mut self, samples: &[f32]) -> Result<()> {
        self.process_samples(samples)
    }

    fn snapshot(&self) -> MeterSnapshot {
        MeterCore::snapshot(self)
    }

    fn reset(&mut self) {
        MeterCore::reset(self);
    }
}

/// Thread-safe meter: one producer, any number of snapshot readers
///
/// All state lives in one [`MeterCore`] behind one mutex, held for the
/// whole of each call, so a snapshot never mixes fields from before and
/// after a batch.
///
/// # Example
///
/// ```
/// use soul_meter::{LoudnessMeter, MeterConfig};
/// use std::sync::Arc;
///
/// let meter = Arc::new(LoudnessMeter::new(MeterConfig::new(44100, 2)).unwrap());
/// let reader = Arc::clone(&meter);
///
/// meter.process_samples(&vec![0.25_f32; 44100 * 2]).unwrap();
/// let snapshot = std::thread::spawn(move || reader.snapshot()).join().unwrap();
/// assert_eq!(snapshot.frames_processed, 44100);
/// ```
#[derive(Debug)]
pub struct LoudnessMeter {
    core: Mutex<MeterCore>,
}

impl LoudnessMeter {
    /// Create a meter, validating the configuration first
    pub fn new(config: MeterConfig) -> Result<Self> {
        Ok(Self {
            core: Mutex::new(MeterCore::new(config)?),
        })
    }

    /// Feed an interleaved batch (see [`MeterCore::process_samples`])
    pub fn process_samples(&self, samples: &[f32]) -> Result<()> {
        self.lock().process_samples(samples)
    }

    /// Feed a batch, checking the caller's channel count
    pub fn process_samples_with_channels(&self, samples: &[f32], channel_count: usize) -> Result<()> {
        self.lock()
            .process_samples_with_channels(samples, channel_count)
    }

    /// Assemble a result reflecting every batch processed so far
    pub fn snapshot(&self) -> MeterSnapshot {
        self.lock().snapshot()
    }

    /// Return to the freshly constructed state
    pub fn reset(&self) {
        self.lock().reset();
    }

    /// Copy of the configuration
    pub fn config(&self) -> MeterConfig {
        self.lock().config().clone()
    }

    /// Gating engine lifecycle state
    pub fn gate_state(&self) -> GateState {
        self.lock().gate_state()
    }

    /// Frames processed since construction or the last reset
    pub fn frames_processed(&self) -> u64 {
        self.lock().frames_processed()
    }

    /// Take the lock, recovering from a panic in another holder
    ///
    /// The core is plain numeric state, so a poisoned lock still guards
    /// usable data.
    fn lock(&self) -> MutexGuard<'_, MeterCore> {
        self.core.lock().unwrap_or_else(|poisoned| {
            warn!("Meter lock was poisoned, recovering state");
            poisoned.into_inner()
        })
    }
}

impl From<MeterCore> for LoudnessMeter {
    fn from(core: MeterCore) -> Self {
        Self {
            core: Mutex::new(core),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_creation() {
        assert!(MeterCore::new(MeterConfig::new(44100, 2)).is_ok());
        assert!(MeterCore::new(MeterConfig::new(48000, 1)).is_ok());
        assert!(MeterCore::new(MeterConfig::new(96000, 6)).is_ok());

        assert!(MeterCore::new(MeterConfig::new(100, 2)).is_err());
        assert!(MeterCore::new(MeterConfig::new(44100, 0)).is_err());
        assert!(MeterCore::new(MeterConfig::new(44100, 2).with_fft_size(3000)).is_err());
    }

    #[test]
    fn partial_frame_is_rejected_untouched() {
        let mut meter = MeterCore::new(MeterConfig::new(44100, 2)).unwrap();
        let err = meter.process_samples(&[0.1; 5]).unwrap_err();
        assert_eq!(
            err,
            MeterError::PartialFrame {
                samples: 5,
                channels: 2
            }
        );
        assert_eq!(meter.frames_processed(), 0);
    }

    #[test]
    fn channel_count_must_match() {
        let mut meter = MeterCore::new(MeterConfig::new(44100, 2)).unwrap();
        assert!(matches!(
            meter.process_samples_with_channels(&[0.0; 4], 1),
            Err(MeterError::ChannelMismatch {
                expected: 2,
                actual: 1
            })
        ));
        assert!(meter.process_samples_with_channels(&[0.0; 4], 2).is_ok());
        assert_eq!(meter.frames_processed(), 2);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let mut meter = MeterCore::new(MeterConfig::default()).unwrap();
        meter.process_samples(&[]).unwrap();
        assert_eq!(meter.frames_processed(), 0);
        assert_eq!(meter.gate_state(), GateState::Warming);
    }

    #[test]
    fn gate_becomes_active_after_first_block() {
        let mut meter = MeterCore::new(MeterConfig::new(48000, 1)).unwrap();
        meter.process_samples(&vec![0.1; 19199]).unwrap();
        assert_eq!(meter.gate_state(), GateState::Warming);
        meter.process_samples(&[0.1]).unwrap();
        assert_eq!(meter.gate_state(), GateState::Active);

        meter.reset();
        assert_eq!(meter.gate_state(), GateState::Warming);
    }

    #[test]
    fn stereo_identical_channels_add_3db() {
        let tone = |channels: usize| -> Vec<f32> {
            (0..48000 * 2)
                .flat_map(|i| {
                    let s = 0.5 * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 48000.0).sin();
                    std::iter::repeat(s).take(channels)
                })
                .collect()
        };

        let mut mono = MeterCore::new(MeterConfig::new(48000, 1)).unwrap();
        mono.process_samples(&tone(1)).unwrap();
        let mut stereo = MeterCore::new(MeterConfig::new(48000, 2)).unwrap();
        stereo.process_samples(&tone(2)).unwrap();

        let difference =
            stereo.snapshot().loudness.integrated_lufs - mono.snapshot().loudness.integrated_lufs;
        assert!((difference - 3.01).abs() < 0.01, "difference {difference}");
    }

    #[test]
    fn lfe_channel_is_ignored_by_loudness() {
        let mut meter = MeterCore::new(MeterConfig::new(48000, 6)).unwrap();
        let mut samples = vec![0.0_f32; 48000 * 6];
        for frame in samples.chunks_exact_mut(6) {
            frame[3] = 0.9;
        }
        meter.process_samples(&samples).unwrap();

        let snapshot = meter.snapshot();
        assert_eq!(snapshot.loudness.integrated_lufs, DB_FLOOR);
        // Peak meters still see it
        assert!((snapshot.levels.peak_dbfs - amplitude_to_db(f64::from(0.9_f32))).abs() < 1e-9);
    }

    #[test]
    fn non_finite_samples_do_not_poison_loudness() {
        let tone: Vec<f32> = (0..48000 * 5)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 997.0 * i as f32 / 48000.0).sin())
            .collect();

        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let mut meter = MeterCore::new(MeterConfig::new(48000, 1)).unwrap();
            meter.process_samples(&[bad]).unwrap();
            meter.process_samples(&tone).unwrap();

            let snapshot = meter.snapshot();
            // Half-scale 997 Hz sine: -3.01 - 6.02 LUFS
            for lufs in [
                snapshot.loudness.momentary_lufs,
                snapshot.loudness.short_term_lufs,
                snapshot.loudness.integrated_lufs,
            ] {
                assert!((lufs + 9.03).abs() < 0.1, "{bad}: {lufs}");
            }
            assert!((snapshot.levels.true_peak_dbtp + 6.02).abs() < 0.05);
            assert!(snapshot.levels.rms_dbfs.is_finite());
            assert_eq!(snapshot.histogram.total, 48000 * 5 + 1);
            assert_eq!(meter.non_finite_samples, 1);
        }
    }

    #[test]
    fn streaming_analyzer_contract() {
        fn drive<A: StreamingAnalyzer>(analyzer: &mut A, batch: &[f32]) -> A::Snapshot {
            analyzer.process_batch(batch).unwrap();
            analyzer.snapshot()
        }

        let mut meter = MeterCore::new(MeterConfig::new(48000, 1)).unwrap();
        let snapshot = drive(&mut meter, &vec![0.5; 4800]);
        assert_eq!(snapshot.frames_processed, 4800);
        StreamingAnalyzer::reset(&mut meter);
        assert_eq!(meter.frames_processed(), 0);
    }

    #[test]
    fn shared_meter_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LoudnessMeter>();
    }

    #[test]
    fn shared_meter_delegates() {
        let meter = LoudnessMeter::new(MeterConfig::new(48000, 2)).unwrap();
        meter.process_samples(&[0.5; 960]).unwrap();
        assert_eq!(meter.frames_processed(), 480);
        assert_eq!(meter.config().channels, 2);
        assert!(meter.process_samples_with_channels(&[0.5; 4], 4).is_err());

        meter.reset();
        assert_eq!(meter.snapshot().frames_processed, 0);
    }
}
