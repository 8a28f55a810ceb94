//! Synthetic frame generation for pipeline validation.
//!
//! Renders Gaussian spots on a flat background. This is not meant to be a
//! realistic exposure; it exists so the centroiding and alignment algorithms
//! can be exercised without instrument data.

use ndarray::Array2;

/// Parameters for one synthetic Gaussian spot.
#[derive(Debug, Clone, Copy)]
pub struct SpotParams {
    /// Center x-coordinate (column)
    pub x: f64,
    /// Center y-coordinate (row)
    pub y: f64,
    /// Peak intensity above background
    pub peak: f64,
    /// Full width at half maximum in pixels
    pub fwhm: f64,
}

impl SpotParams {
    /// Create a spot with the given center, peak, and FWHM.
    pub fn new(x: f64, y: f64, peak: f64, fwhm: f64) -> Self {
        Self { x, y, peak, fwhm }
    }
}

/// Render spots over a flat background.
///
/// Each spot is evaluated out to three sigma; beyond that the contribution
/// is below any threshold the pipeline applies.
pub fn render_spots(
    height: usize,
    width: usize,
    background: f64,
    spots: &[SpotParams],
) -> Array2<f64> {
    let mut image = Array2::from_elem((height, width), background);

    for spot in spots {
        // FWHM = 2.355 * sigma
        let sigma = spot.fwhm / 2.355;
        let sigma2 = sigma * sigma;
        let extent = (3.0 * sigma).ceil() as isize;

        let center_row = spot.y.round() as isize;
        let center_col = spot.x.round() as isize;

        for dr in -extent..=extent {
            for dc in -extent..=extent {
                let row = center_row + dr;
                let col = center_col + dc;
                if row < 0 || col < 0 || row >= height as isize || col >= width as isize {
                    continue;
                }
                let dy = row as f64 - spot.y;
                let dx = col as f64 - spot.x;
                image[[row as usize, col as usize]] +=
                    spot.peak * (-(dx * dx + dy * dy) / (2.0 * sigma2)).exp();
            }
        }
    }

    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spot_peak_lands_at_center() {
        let image = render_spots(32, 32, 0.0, &[SpotParams::new(16.0, 12.0, 500.0, 4.0)]);

        let mut peak = (0, 0);
        let mut peak_value = f64::MIN;
        for ((r, c), &v) in image.indexed_iter() {
            if v > peak_value {
                peak_value = v;
                peak = (r, c);
            }
        }

        assert_eq!(peak, (12, 16));
        assert!((peak_value - 500.0).abs() < 1.0);
    }

    #[test]
    fn test_background_level() {
        let image = render_spots(16, 16, 42.0, &[]);
        assert!(image.iter().all(|&v| v == 42.0));
    }
}
