//! Bad pixel maps for the chip blending stage.
//!
//! Each chip ships a fixed defect list generated offline from dark-frame
//! analysis. The stitcher consults the rasterized masks to decide which chip
//! supplies each mosaic pixel.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bad pixel map for one detector chip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadPixelMap {
    /// Detector/chip identifier
    pub detector_id: String,
    /// List of bad pixel coordinates (x, y)
    pub pixels: Vec<(usize, usize)>,
}

impl BadPixelMap {
    /// Create an empty map for the given chip.
    pub fn new(detector_id: String) -> Self {
        Self {
            detector_id,
            pixels: Vec::new(),
        }
    }

    /// An empty map with no chip association.
    pub fn empty() -> Self {
        Self::new(String::new())
    }

    /// Add a bad pixel to the map
    pub fn add_pixel(&mut self, x: usize, y: usize) {
        self.pixels.push((x, y));
    }

    /// Get total number of bad pixels
    pub fn num_bad_pixels(&self) -> usize {
        self.pixels.len()
    }

    /// Rasterize to a boolean mask of the given chip shape; `true` = bad.
    ///
    /// Out-of-range entries are dropped rather than panicking, so a map
    /// generated for a larger readout still applies.
    pub fn to_mask(&self, height: usize, width: usize) -> Array2<bool> {
        let mut mask = Array2::from_elem((height, width), false);
        for &(x, y) in &self.pixels {
            if y < height && x < width {
                mask[[y, x]] = true;
            }
        }
        mask
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
