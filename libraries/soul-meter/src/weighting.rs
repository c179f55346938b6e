//! K-weighting filter (ITU-R BS.1770)
//!
//! Two cascaded biquads turn raw samples into perceptually weighted samples:
//! a high shelf modelling the acoustic effect of the head (about +4 dB above
//! ~1.7 kHz) followed by the "RLB" high pass (about 38 Hz).
//!
//! Coefficients are derived from the sample rate with the bilinear
//! transform, so any supported rate works. At 48 kHz the result matches the
//! coefficient table printed in the recommendation.

use std::f64::consts::PI;

/// Shelf corner frequency (Hz)
const SHELF_FREQUENCY: f64 = 1681.974450955533;
/// Shelf gain (dB)
const SHELF_GAIN_DB: f64 = 3.999843853973347;
/// Shelf quality factor
const SHELF_Q: f64 = 0.7071752369554196;
/// Exponent mapping the shelf gain to the band-edge gain
const SHELF_BAND_EXPONENT: f64 = 0.4996667741545416;

/// High-pass corner frequency (Hz)
const HIGHPASS_FREQUENCY: f64 = 38.13547087602444;
/// High-pass quality factor
const HIGHPASS_Q: f64 = 0.5003270373238773;

/// Normalized biquad coefficients (a0 = 1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoefficients {
    /// Stage 1: high shelf
    pub fn high_shelf(sample_rate: f64) -> Self {
        let k = (PI * SHELF_FREQUENCY / sample_rate).tan();
        let vh = 10.0_f64.powf(SHELF_GAIN_DB / 20.0);
        let vb = vh.powf(SHELF_BAND_EXPONENT);
        let a0 = 1.0 + k / SHELF_Q + k * k;

        Self {
            b0: (vh + vb * k / SHELF_Q + k * k) / a0,
            b1: 2.0 * (k * k - vh) / a0,
            b2: (vh - vb * k / SHELF_Q + k * k) / a0,
            a1: 2.0 * (k * k - 1.0) / a0,
            a2: (1.0 - k / SHELF_Q + k * k) / a0,
        }
    }

    /// Stage 2: high pass
    ///
    /// The numerator stays at `[1, -2, 1]`, as in the published table; the
    /// resulting passband gain of ~1.0 is absorbed by the -0.691 offset.
    pub fn high_pass(sample_rate: f64) -> Self {
        let k = (PI * HIGHPASS_FREQUENCY / sample_rate).tan();
        let a0 = 1.0 + k / HIGHPASS_Q + k * k;

        Self {
            b0: 1.0,
            b1: -2.0,
            b2: 1.0,
            a1: 2.0 * (k * k - 1.0) / a0,
            a2: (1.0 - k / HIGHPASS_Q + k * k) / a0,
        }
    }

    /// Magnitude response at `frequency` Hz
    pub fn magnitude(&self, frequency: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * frequency / sample_rate;
        let (cos_w, sin_w) = (w.cos(), w.sin());
        let (cos_2w, sin_2w) = ((2.0 * w).cos(), (2.0 * w).sin());

        let num_re = self.b0 + self.b1 * cos_w + self.b2 * cos_2w;
        let num_im = -self.b1 * sin_w - self.b2 * sin_2w;
        let den_re = 1.0 + self.a1 * cos_w + self.a2 * cos_2w;
        let den_im = -self.a1 * sin_w - self.a2 * sin_2w;

        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

/// Delay registers for one biquad on one channel (transposed direct form II)
#[derive(Debug, Clone, Copy, Default)]
struct SectionState {
    z1: f64,
    z2: f64,
}

impl SectionState {
    #[inline]
    fn tick(&mut self, c: &BiquadCoefficients, input: f64) -> f64 {
        let output = c.b0 * input + self.z1;
        self.z1 = c.b1 * input - c.a1 * output + self.z2;
        self.z2 = c.b2 * input - c.a2 * output;
        output
    }
}

/// Two-stage K-weighting filter with independent state per channel
#[derive(Debug, Clone)]
pub struct KWeightingFilter {
    shelf: BiquadCoefficients,
    high_pass: BiquadCoefficients,
    /// `[shelf, high_pass]` registers per channel
    state: Vec<[SectionState; 2]>,
}

impl KWeightingFilter {
    /// Create a filter for `channels` channels at `sample_rate` Hz
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let fs = f64::from(sample_rate);
        Self {
            shelf: BiquadCoefficients::high_shelf(fs),
            high_pass: BiquadCoefficients::high_pass(fs),
            state: vec![[SectionState::default(); 2]; channels],
        }
    }

    /// Filter one sample of `channel`
    ///
    /// # Panics
    /// Panics if `channel` is out of range.
    #[inline]
    pub fn process(&mut self, sample: f64, channel: usize) -> f64 {
        let [shelf_state, hp_state] = &mut self.state[channel];
        let shelved = shelf_state.tick(&self.shelf, sample);
        hp_state.tick(&self.high_pass, shelved)
    }

    /// Zero every delay register
    pub fn reset(&mut self) {
        for channel in &mut self.state {
            *channel = [SectionState::default(); 2];
        }
    }

    /// Combined magnitude response of both stages at `frequency` Hz
    pub fn magnitude(&self, frequency: f64, sample_rate: f64) -> f64 {
        self.shelf.magnitude(frequency, sample_rate)
            * self.high_pass.magnitude(frequency, sample_rate)
    }

    /// Shelf stage coefficients
    pub fn shelf_coefficients(&self) -> BiquadCoefficients {
        self.shelf
    }

    /// High-pass stage coefficients
    pub fn high_pass_coefficients(&self) -> BiquadCoefficients {
        self.high_pass
    }

    /// Number of channels the filter holds state for
    pub fn channels(&self) -> usize {
        self.state.len()
    }
}
