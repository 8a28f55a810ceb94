//! Frame providers for the calibration pipeline.
//!
//! The engine never touches instrument files itself; a front end supplies an
//! `ImageSource` that resolves frame numbers to raw chip pairs. An in-memory
//! implementation ships for tests and harnesses.

use ndarray::Array2;
use std::collections::HashMap;
use thiserror::Error;

/// Immutable pair of raw chip exposures with acquisition metadata.
#[derive(Debug, Clone)]
pub struct RawFramePair {
    /// Raw pixel data, one array per chip
    pub chips: [Array2<f64>; 2],
    /// Base frame number of the exposure (chip 2 is frame_base + 1)
    pub frame_base: u32,
    /// Telescope altitude at exposure, degrees; NaN when unknown
    pub altitude: f64,
}

impl RawFramePair {
    /// Build a pair from two chip arrays with unknown altitude.
    pub fn new(frame_base: u32, chip1: Array2<f64>, chip2: Array2<f64>) -> Self {
        Self {
            chips: [chip1, chip2],
            frame_base,
            altitude: f64::NAN,
        }
    }
}

/// Errors raised while resolving frames.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameSourceError {
    /// One or both frames of the pair could not be found.
    #[error("frames {frames:?} not found under {search_dir}")]
    NotFound {
        /// The frame numbers that failed to resolve
        frames: Vec<u32>,
        /// Where the source looked, verbatim
        search_dir: String,
    },
}

/// Provider of raw frame pairs by base frame number.
pub trait ImageSource: Send + Sync {
    /// Resolve `frame_base` (and its companion chip frame) to a raw pair.
    fn load_frame_pair(&self, frame_base: u32) -> Result<RawFramePair, FrameSourceError>;
}

/// In-memory frame source for tests and harnesses.
#[derive(Debug, Default)]
pub struct MemoryImageSource {
    frames: HashMap<u32, RawFramePair>,
}

impl MemoryImageSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a frame pair under its base frame number.
    pub fn insert(&mut self, pair: RawFramePair) {
        self.frames.insert(pair.frame_base, pair);
    }
}

impl ImageSource for MemoryImageSource {
    fn load_frame_pair(&self, frame_base: u32) -> Result<RawFramePair, FrameSourceError> {
        self.frames
            .get(&frame_base)
            .cloned()
            .ok_or_else(|| FrameSourceError::NotFound {
                frames: vec![frame_base, frame_base + 1],
                search_dir: "<memory>".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_round_trip() {
        let mut source = MemoryImageSource::new();
        source.insert(RawFramePair::new(
            140,
            Array2::zeros((4, 4)),
            Array2::zeros((4, 4)),
        ));

        let pair = source.load_frame_pair(140).unwrap();
        assert_eq!(pair.frame_base, 140);
        assert!(pair.altitude.is_nan());
    }

    #[test]
    fn test_missing_frame_names_the_pair() {
        let source = MemoryImageSource::new();
        let err = source.load_frame_pair(8).unwrap_err();

        assert_eq!(
            err,
            FrameSourceError::NotFound {
                frames: vec![8, 9],
                search_dir: "<memory>".to_string(),
            }
        );
    }
}
