//! Per-chip polynomial distortion correction.
//!
//! Each detector chip carries a fixed coefficient set determined offline and
//! shipped as a JSON calibration resource. Coefficients are immutable value
//! objects: loaded once at session start and passed by reference into the
//! frame pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Cubic bivariate basis: {1, x, y, x², xy, y², x³, x²y, xy², y³}.
fn cubic_basis(x: f64, y: f64) -> [f64; 10] {
    [
        1.0,
        x,
        y,
        x * x,
        x * y,
        y * y,
        x * x * x,
        x * x * y,
        x * y * y,
        y * y * y,
    ]
}

/// Polynomial coefficients for one chip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChipCoefficients {
    /// Linear x' terms: a + b·x + c·y
    pub linear_x: [f64; 3],
    /// Linear y' terms: d + e·x + f·y
    pub linear_y: [f64; 3],
    /// Cubic correction terms for x', over the bivariate basis
    pub cubic_x: [f64; 10],
    /// Cubic correction terms for y', over the bivariate basis
    pub cubic_y: [f64; 10],
}

impl ChipCoefficients {
    /// Coefficients of the identity mapping (no distortion).
    pub fn identity() -> Self {
        Self {
            linear_x: [0.0, 1.0, 0.0],
            linear_y: [0.0, 0.0, 1.0],
            cubic_x: [0.0; 10],
            cubic_y: [0.0; 10],
        }
    }
}

/// Distortion calibration resource for a two-chip detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistortionCoefficients {
    /// Detector model name
    pub detector: String,
    /// Chip width in pixels
    pub width: usize,
    /// Chip height in pixels
    pub height: usize,
    /// One coefficient set per chip
    pub chips: [ChipCoefficients; 2],
}

impl DistortionCoefficients {
    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Corrector for one chip. Panics only on a chip index other than 0/1.
    pub fn map_for_chip(&self, chip: usize) -> DistortionMap {
        DistortionMap {
            coeffs: self.chips[chip].clone(),
            width: self.width,
            height: self.height,
        }
    }

    /// Identity resource for the given chip geometry.
    pub fn identity(detector: &str, width: usize, height: usize) -> Self {
        Self {
            detector: detector.to_string(),
            width,
            height,
            chips: [ChipCoefficients::identity(), ChipCoefficients::identity()],
        }
    }
}

/// Immutable pixel-coordinate corrector for one chip.
#[derive(Debug, Clone)]
pub struct DistortionMap {
    coeffs: ChipCoefficients,
    width: usize,
    height: usize,
}

impl DistortionMap {
    /// Map a raw pixel coordinate to its corrected position.
    ///
    /// Linear term plus the fixed cubic bivariate correction; the output is
    /// clipped to [0, width-1] x [0, height-1] so it always indexes the chip.
    pub fn correct(&self, x: f64, y: f64) -> (f64, f64) {
        let basis = cubic_basis(x, y);

        let mut cx = self.coeffs.linear_x[0] + self.coeffs.linear_x[1] * x + self.coeffs.linear_x[2] * y;
        let mut cy = self.coeffs.linear_y[0] + self.coeffs.linear_y[1] * x + self.coeffs.linear_y[2] * y;
        for (i, &b) in basis.iter().enumerate() {
            cx += self.coeffs.cubic_x[i] * b;
            cy += self.coeffs.cubic_y[i] * b;
        }

        (
            cx.clamp(0.0, (self.width - 1) as f64),
            cy.clamp(0.0, (self.height - 1) as f64),
        )
    }

    /// Chip width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Chip height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }
}
