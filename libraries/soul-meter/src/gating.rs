//! Block power accumulation and loudness gating (ITU-R BS.1770 / EBU R128)
//!
//! [`BlockAccumulator`] turns K-weighted frames into 400 ms mean-square
//! block powers, one every 100 ms. [`LoudnessGate`] files every block into
//! a 0.1 LU loudness histogram and derives every loudness statistic from it:
//!
//! - momentary loudness: the latest block
//! - short-term loudness: mean power of the last 30 blocks (3 s)
//! - integrated loudness: two-pass gated mean (-70 LUFS absolute, -10 LU relative)
//! - loudness range: 10th to 95th percentile spread of gated block loudness
//! - DR score: loudest 20% of blocks against the overall mean power
//!
//! Short-term loudness is an un-weighted rolling average of the last 30
//! block powers rather than a mean re-derived from 3 s of samples. With a
//! 400 ms block every 100 ms the window actually spans 3.3 s of audio, with
//! the inner samples counted up to four times.
//!
//! Each histogram bin keeps the exact power sum of its blocks, so means are
//! exact. Only decisions that fall inside a single bin (the relative gate
//! threshold, a percentile rank, the 20% cut) use the bin's mean power, the
//! same trade-off as the histogram mode of libebur128. Snapshot cost is
//! fixed by the bin count, not by the stream length.

use crate::units::{power_to_lufs, ABSOLUTE_GATE_LUFS, DB_FLOOR, RELATIVE_GATE_LU};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Block length in seconds
pub const BLOCK_SECONDS: f64 = 0.4;

/// Hop between consecutive blocks in seconds
pub const HOP_SECONDS: f64 = 0.1;

/// Number of blocks averaged for short-term loudness
pub const SHORT_TERM_BLOCKS: usize = 30;

/// Hops per block
const HOPS_PER_BLOCK: usize = 4;

/// Width of one block histogram bin (LU)
const BLOCK_BIN_LU: f64 = 0.1;

/// Upper edge of the block histogram (LUFS); louder blocks share the top bin
const BLOCK_HISTOGRAM_TOP_LUFS: f64 = 30.0;

/// Lower percentile used for loudness range
const LRA_LOW_PERCENTILE: f64 = 0.10;

/// Upper percentile used for loudness range
const LRA_HIGH_PERCENTILE: f64 = 0.95;

/// Share of the loudest blocks used by the DR score
const DR_TOP_SHARE: f64 = 0.2;

/// BS.1770 channel weight for `channel` of a `channels`-wide interleaved layout
///
/// Layouts follow the usual ordering (L R C LFE Ls Rs ...). Surround
/// channels get +1.5 dB, the LFE channel is excluded.
pub fn channel_weight(channel: usize, channels: usize) -> f64 {
    match (channels, channel) {
        (5, 3 | 4) => 1.41,
        (6..=8, 3) => 0.0,
        (6..=8, 4..) => 1.41,
        _ => 1.0,
    }
}

/// Sliding 400 ms window over per-frame weighted power
#[derive(Debug, Clone)]
pub struct BlockAccumulator {
    /// Per-frame weighted power (ring)
    window: Vec<f64>,
    /// Next write position in `window`
    write_pos: usize,
    /// Frames seen since the last reset, saturating at the window length
    filled: usize,
    /// Frames seen since the last emitted block
    since_hop: usize,
    /// Frames per hop
    hop_len: usize,
}

impl BlockAccumulator {
    /// Create an accumulator for `sample_rate` Hz
    pub fn new(sample_rate: u32) -> Self {
        let fs = f64::from(sample_rate);
        let hop_len = ((fs * HOP_SECONDS).round() as usize).max(1);
        let block_len = hop_len * HOPS_PER_BLOCK;

        Self {
            window: vec![0.0; block_len],
            write_pos: 0,
            filled: 0,
            since_hop: 0,
            hop_len,
        }
    }

    /// Push the weighted power of one frame
    ///
    /// Returns a block power once the first full window is available and on
    /// every hop boundary after that.
    pub fn push(&mut self, frame_power: f64) -> Option<f64> {
        self.window[self.write_pos] = frame_power;
        self.write_pos = (self.write_pos + 1) % self.window.len();
        self.filled = (self.filled + 1).min(self.window.len());
        self.since_hop += 1;

        if self.since_hop < self.hop_len {
            return None;
        }
        // Hops stay aligned to the start of the stream, even while warming up
        self.since_hop = 0;
        if self.filled < self.window.len() {
            return None;
        }

        let sum: f64 = self.window.iter().sum();
        Some(sum / self.window.len() as f64)
    }

    /// Frames per 400 ms block
    pub fn block_len(&self) -> usize {
        self.window.len()
    }

    /// Frames per 100 ms hop
    pub fn hop_len(&self) -> usize {
        self.hop_len
    }

    /// Clear the window
    pub fn reset(&mut self) {
        self.window.fill(0.0);
        self.write_pos = 0;
        self.filled = 0;
        self.since_hop = 0;
    }
}

/// Lifecycle of the gating engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    /// No block has completed yet
    #[default]
    Warming,
    /// At least one block exists
    Active,
}

/// Block loudness histogram with exact per-bin power sums
#[derive(Debug, Clone)]
struct BlockHistogram {
    counts: Vec<u64>,
    power_sums: Vec<f64>,
    total: u64,
    power_sum: f64,
}

impl BlockHistogram {
    fn new() -> Self {
        let bins = ((BLOCK_HISTOGRAM_TOP_LUFS - DB_FLOOR) / BLOCK_BIN_LU).round() as usize;
        Self {
            counts: vec![0; bins],
            power_sums: vec![0.0; bins],
            total: 0,
            power_sum: 0.0,
        }
    }

    fn bin_index(&self, lufs: f64) -> usize {
        let idx = ((lufs - DB_FLOOR) / BLOCK_BIN_LU).floor();
        idx.clamp(0.0, (self.counts.len() - 1) as f64) as usize
    }

    fn insert(&mut self, power: f64) {
        let idx = self.bin_index(power_to_lufs(power));
        self.counts[idx] += 1;
        self.power_sums[idx] += power;
        self.total += 1;
        self.power_sum += power;
    }

    fn mean_power(&self) -> Option<f64> {
        (self.total > 0).then(|| self.power_sum / self.total as f64)
    }

    fn bin_mean(&self, idx: usize) -> f64 {
        self.power_sums[idx] / self.counts[idx] as f64
    }

    /// Occupied bins, lowest first
    fn occupied(&self) -> impl DoubleEndedIterator<Item = usize> + '_ {
        (0..self.counts.len()).filter(move |&idx| self.counts[idx] > 0)
    }

    /// Mean power of the blocks at or above `threshold_lufs`
    fn mean_power_above(&self, threshold_lufs: f64) -> Option<f64> {
        let (sum, count) = self
            .occupied()
            .filter(|&idx| power_to_lufs(self.bin_mean(idx)) >= threshold_lufs)
            .fold((0.0, 0u64), |(sum, count), idx| {
                (sum + self.power_sums[idx], count + self.counts[idx])
            });
        (count > 0).then(|| sum / count as f64)
    }

    /// Loudness of the block at 0-based ascending `rank`
    fn loudness_at_rank(&self, rank: u64) -> f64 {
        let mut cumulative = 0;
        for idx in self.occupied() {
            cumulative += self.counts[idx];
            if cumulative > rank {
                return power_to_lufs(self.bin_mean(idx));
            }
        }
        DB_FLOOR
    }

    /// Mean power of the loudest `count` blocks
    fn top_mean_power(&self, count: u64) -> f64 {
        let mut remaining = count;
        let mut sum = 0.0;
        for idx in self.occupied().rev() {
            let taken = self.counts[idx].min(remaining);
            sum += if taken == self.counts[idx] {
                self.power_sums[idx]
            } else {
                self.bin_mean(idx) * taken as f64
            };
            remaining -= taken;
            if remaining == 0 {
                break;
            }
        }
        sum / count.max(1) as f64
    }

    fn clear(&mut self) {
        self.counts.fill(0);
        self.power_sums.fill(0.0);
        self.total = 0;
        self.power_sum = 0.0;
    }
}

/// Block statistics and the loudness readings derived from them
#[derive(Debug, Clone)]
pub struct LoudnessGate {
    /// Latest block power
    latest: Option<f64>,
    /// Last [`SHORT_TERM_BLOCKS`] block powers
    short_term: VecDeque<f64>,
    /// Every block since reset
    blocks: BlockHistogram,
    /// Blocks above the absolute gate
    gated: BlockHistogram,
    /// Highest momentary loudness seen
    max_momentary: Option<f64>,
    /// Highest short-term loudness seen
    max_short_term: Option<f64>,
}

impl Default for LoudnessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl LoudnessGate {
    /// Create an empty gate
    pub fn new() -> Self {
        Self {
            latest: None,
            short_term: VecDeque::with_capacity(SHORT_TERM_BLOCKS),
            blocks: BlockHistogram::new(),
            gated: BlockHistogram::new(),
            max_momentary: None,
            max_short_term: None,
        }
    }

    /// Append one block power (mean square of K-weighted samples)
    pub fn push_block(&mut self, power: f64) {
        let power = power.max(0.0);
        self.latest = Some(power);
        self.blocks.insert(power);

        if self.short_term.len() == SHORT_TERM_BLOCKS {
            self.short_term.pop_front();
        }
        self.short_term.push_back(power);

        let momentary = power_to_lufs(power);
        if momentary > ABSOLUTE_GATE_LUFS {
            self.gated.insert(power);
        }

        self.max_momentary = Some(self.max_momentary.map_or(momentary, |m| m.max(momentary)));
        if let Some(short_term) = self.short_term_lufs() {
            self.max_short_term =
                Some(self.max_short_term.map_or(short_term, |m| m.max(short_term)));
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> GateState {
        if self.latest.is_none() {
            GateState::Warming
        } else {
            GateState::Active
        }
    }

    /// Number of blocks since reset
    pub fn block_count(&self) -> usize {
        self.blocks.total as usize
    }

    /// Number of blocks that passed the absolute gate
    pub fn gated_block_count(&self) -> usize {
        self.gated.total as usize
    }

    /// Loudness of the latest block
    pub fn momentary_lufs(&self) -> Option<f64> {
        self.latest.map(power_to_lufs)
    }

    /// Loudness of the mean power over the short-term window
    pub fn short_term_lufs(&self) -> Option<f64> {
        if self.short_term.is_empty() {
            return None;
        }
        let mean = self.short_term.iter().sum::<f64>() / self.short_term.len() as f64;
        Some(power_to_lufs(mean))
    }

    /// Highest momentary loudness since reset
    pub fn max_momentary_lufs(&self) -> Option<f64> {
        self.max_momentary
    }

    /// Highest short-term loudness since reset
    pub fn max_short_term_lufs(&self) -> Option<f64> {
        self.max_short_term
    }

    /// Integrated (programme) loudness
    ///
    /// Pass one averages every block above the absolute gate; pass two drops
    /// blocks more than 10 LU below that result and averages again.
    pub fn integrated_lufs(&self) -> Option<f64> {
        let ungated = self.gated.mean_power()?;
        let relative_gate = power_to_lufs(ungated) + RELATIVE_GATE_LU;
        let gated = self.gated.mean_power_above(relative_gate).unwrap_or(ungated);
        Some(power_to_lufs(gated))
    }

    /// Relative gate threshold (LUFS) derived from the first gating pass
    pub fn relative_gate_lufs(&self) -> Option<f64> {
        self.gated
            .mean_power()
            .map(|ungated| power_to_lufs(ungated) + RELATIVE_GATE_LU)
    }

    /// Loudness range in LU; 0.0 with fewer than two usable blocks
    pub fn loudness_range_lu(&self) -> f64 {
        let count = self.gated.total;
        if count < 2 {
            return 0.0;
        }

        let rank = |p: f64| ((count - 1) as f64 * p).round() as u64;
        let low = self.gated.loudness_at_rank(rank(LRA_LOW_PERCENTILE));
        let high = self.gated.loudness_at_rank(rank(LRA_HIGH_PERCENTILE));
        (high - low).max(0.0)
    }

    /// DR score (1..=20): loudest 20% of blocks against the overall mean
    pub fn dr_score(&self) -> u8 {
        let Some(overall) = self.blocks.mean_power() else {
            return 1;
        };
        if overall <= 0.0 {
            return 1;
        }

        let top_count = ((self.blocks.total as f64 * DR_TOP_SHARE) as u64).max(1);
        let top = self.blocks.top_mean_power(top_count);

        let ratio = top.sqrt() / overall.sqrt();
        let dr = (20.0 * ratio.log10()).round();
        dr.clamp(1.0, 20.0) as u8
    }

    /// Forget every block
    pub fn reset(&mut self) {
        self.latest = None;
        self.short_term.clear();
        self.blocks.clear();
        self.gated.clear();
        self.max_momentary = None;
        self.max_short_term = None;
    }
}
