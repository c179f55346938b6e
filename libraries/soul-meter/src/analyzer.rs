//! Streaming analyzer contract
//!
//! Analyzers that consume audio in batches speak the same three-call
//! protocol. [`FrameBuffer`] handles frame/hop accumulation for the ones
//! that work on fixed-size frames (the band analyzer).

use crate::error::Result;

/// An analyzer fed with interleaved sample batches
///
/// `process_batch` must account for every sample before it returns, and
/// `snapshot` must not mutate analysis state.
pub trait StreamingAnalyzer: Send {
    /// Immutable result produced on demand
    type Snapshot;

    /// Feed one interleaved batch
    fn process_batch(&mut self, samples: &[f32]) -> Result<()>;

    /// Build a result from the current state
    fn snapshot(&self) -> Self::Snapshot;

    /// Return to the freshly constructed state
    fn reset(&mut self);
}

/// Fixed-size frame accumulator with a configurable hop
///
/// Samples are pushed one at a time; once `frame_size` samples are held,
/// [`push`](Self::push) returns the full frame and the buffer slides forward
/// by `hop` samples (keeping `frame_size - hop` samples of overlap).
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    buffer: Vec<f32>,
    frame_size: usize,
    hop: usize,
}

impl FrameBuffer {
    /// Create a buffer of `frame_size` samples advancing by `hop`
    ///
    /// `hop` is clamped to `1..=frame_size`.
    pub fn new(frame_size: usize, hop: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(frame_size),
            frame_size,
            hop: hop.clamp(1, frame_size.max(1)),
        }
    }

    /// Append one sample; returns the completed frame when one is ready
    ///
    /// The returned slice is only valid until the next call.
    pub fn push(&mut self, sample: f32) -> Option<&[f32]> {
        if self.buffer.len() == self.frame_size {
            self.buffer.drain(..self.hop);
        }
        self.buffer.push(sample);
        if self.buffer.len() == self.frame_size {
            Some(self.buffer.as_slice())
        } else {
            None
        }
    }

    /// Samples currently buffered
    pub fn len(&self) -> usize {
        if self.buffer.len() == self.frame_size {
            // A completed frame is consumed; only the overlap carries over
            self.frame_size - self.hop
        } else {
            self.buffer.len()
        }
    }

    /// Whether no partial frame is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame size in samples
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Drop any partial frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_overlapping_frames() {
        let mut frames = FrameBuffer::new(4, 4);
        let mut completed = Vec::new();
        for i in 0..10 {
            if let Some(frame) = frames.push(i as f32) {
                completed.push(frame.to_vec());
            }
        }
        assert_eq!(
            completed,
            vec![vec![0.0, 1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0, 7.0]]
        );
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn overlapping_frames() {
        let mut frames = FrameBuffer::new(4, 2);
        let mut completed = Vec::new();
        for i in 0..8 {
            if let Some(frame) = frames.push(i as f32) {
                completed.push(frame.to_vec());
            }
        }
        assert_eq!(
            completed,
            vec![
                vec![0.0, 1.0, 2.0, 3.0],
                vec![2.0, 3.0, 4.0, 5.0],
                vec![4.0, 5.0, 6.0, 7.0],
            ]
        );
    }

    #[test]
    fn clear_drops_partial_frame() {
        let mut frames = FrameBuffer::new(8, 8);
        for _ in 0..5 {
            frames.push(1.0);
        }
        assert_eq!(frames.len(), 5);
        frames.clear();
        assert!(frames.is_empty());
    }
}
