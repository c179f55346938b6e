//! Error types for the metering engine

use thiserror::Error;

/// Result type for metering operations
pub type Result<T> = std::result::Result<T, MeterError>;

/// Errors that can occur while configuring or feeding the meter
///
/// All of these are precondition violations caught before any sample is
/// processed. Per-sample processing itself never fails.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeterError {
    /// Invalid sample rate
    #[error("Invalid sample rate: {0} Hz (must be between 8000 and 768000)")]
    InvalidSampleRate(u32),

    /// Invalid channel count
    #[error("Invalid channel count: {0} (must be 1-8)")]
    InvalidChannelCount(usize),

    /// FFT frame size is not a usable power of two
    #[error("Invalid FFT size: {0} (must be a power of two, at least 64)")]
    InvalidFftSize(usize),

    /// True-peak filter layout cannot be split into polyphase branches
    #[error("Invalid oversampling: {taps} taps cannot be split into {factor} phases")]
    InvalidOversampling { taps: usize, factor: usize },

    /// Clip threshold outside (0, 1]
    #[error("Invalid clip threshold: {0} (must be in (0, 1])")]
    InvalidClipThreshold(f32),

    /// Buffer does not hold a whole number of frames
    #[error("Sample count {samples} is not divisible by channel count {channels}")]
    PartialFrame { samples: usize, channels: usize },

    /// Caller passed a channel count different from the configured one
    #[error("Channel count mismatch: meter configured for {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
}
