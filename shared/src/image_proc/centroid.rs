//! Iterative shrinking-aperture centroiding for mask-alignment objects.
//!
//! Computes sub-pixel object centers and sizes inside an operator-adjustable
//! search box. The aperture starts wide to tolerate pointing error, then
//! halves repeatedly so the final estimate is dominated by pixels near the
//! object core. Unresolvable objects come back as a NaN sentinel rather than
//! an error so the pipeline can continue with the remaining objects.

use ndarray::{s, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelFlag;
use crate::image_proc::aabb::AABB;
use crate::image_proc::mask::{composite_mask, DragMask};

/// Sigma multiplier for the local background threshold.
pub const CENTROID_THRESHOLD_SIGMA: f64 = 3.0;

/// Center-of-mass movement below which an aperture pass has converged.
const CONVERGENCE_PX: f64 = 0.5;

/// Guard on the center-of-mass iteration inside a single aperture pass.
const MAX_COM_ITERATIONS: usize = 50;

/// Measured object center and size in full-image pixel coordinates.
///
/// An unresolved measurement is the NaN triple; check `is_unresolved` before
/// using the values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CentroidMeasure {
    /// Centroid x-coordinate (column)
    pub x: f64,
    /// Centroid y-coordinate (row)
    pub y: f64,
    /// Effective object radius from the thresholded pixel area
    pub radius: f64,
}

impl CentroidMeasure {
    /// The NaN sentinel marking an object that could not be measured.
    pub fn unresolved() -> Self {
        Self {
            x: f64::NAN,
            y: f64::NAN,
            radius: f64::NAN,
        }
    }

    /// True for the NaN sentinel.
    pub fn is_unresolved(&self) -> bool {
        self.x.is_nan() || self.y.is_nan() || self.radius.is_nan()
    }
}

/// Result of a `locate` call.
#[derive(Debug, Clone, Copy)]
pub enum LocateOutcome {
    /// The measurement, possibly the NaN sentinel
    Measured(CentroidMeasure),
    /// Cancellation observed at a radius-shrink boundary
    Interrupted,
}

impl LocateOutcome {
    /// The measurement, treating interruption as unresolved.
    pub fn measure_or_unresolved(&self) -> CentroidMeasure {
        match self {
            LocateOutcome::Measured(m) => *m,
            LocateOutcome::Interrupted => CentroidMeasure::unresolved(),
        }
    }
}

/// Locate one object inside `search_box`.
///
/// The aperture radius starts at half the box half-width. Each pass admits
/// pixels inside the aperture that survive the drag history, subtracts a
/// `mean + 3·sigma` local threshold, clips negatives to zero, and walks the
/// discrete center of mass until it moves less than half a pixel. The
/// effective radius is derived from the thresholded area, the aperture is
/// halved, and the process repeats until the aperture drops below
/// `min_radius`. The cancel flag is polled once per aperture pass.
///
/// Returns the NaN sentinel if the box is fully masked or the thresholded
/// flux reaches zero.
pub fn locate(
    image: &ArrayView2<'_, f64>,
    search_box: AABB,
    drags: &[DragMask],
    min_radius: f64,
    cancel: &CancelFlag,
) -> LocateOutcome {
    let window = image.slice(s![
        search_box.min_row..=search_box.max_row,
        search_box.min_col..=search_box.max_col
    ]);
    let admitted = composite_mask(search_box, drags);

    if !admitted.iter().any(|&a| a) {
        return LocateOutcome::Measured(CentroidMeasure::unresolved());
    }

    let (rows, cols) = window.dim();
    // Local coordinates; promoted to image coordinates only at the end
    let mut cx = (cols - 1) as f64 / 2.0;
    let mut cy = (rows - 1) as f64 / 2.0;

    let half_width = rows.min(cols) as f64 / 2.0;
    let mut aperture = half_width / 2.0;
    let mut result = CentroidMeasure::unresolved();

    // Threshold from the full admitted box so it stays stable across
    // aperture shrinks
    let (mut sum, mut sum_sq, mut count) = (0.0, 0.0, 0usize);
    for ((r, c), &keep) in admitted.indexed_iter() {
        if keep {
            let v = window[[r, c]];
            sum += v;
            sum_sq += v * v;
            count += 1;
        }
    }
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    let threshold = mean + CENTROID_THRESHOLD_SIGMA * variance.sqrt();

    loop {
        if cancel.is_cancelled() {
            return LocateOutcome::Interrupted;
        }

        // Walk the discrete center of mass until it settles
        let mut flux = 0.0;
        let mut area = 0usize;
        for _ in 0..MAX_COM_ITERATIONS {
            let (mut m00, mut m10, mut m01) = (0.0, 0.0, 0.0);
            area = 0;
            for ((r, c), &keep) in admitted.indexed_iter() {
                if keep && in_aperture(r, c, cx, cy, aperture) {
                    let v = (window[[r, c]] - threshold).max(0.0);
                    if v > 0.0 {
                        area += 1;
                    }
                    m00 += v;
                    m10 += c as f64 * v;
                    m01 += r as f64 * v;
                }
            }

            flux = m00;
            if flux <= 0.0 {
                return LocateOutcome::Measured(CentroidMeasure::unresolved());
            }

            let new_cx = m10 / m00;
            let new_cy = m01 / m00;
            let moved = ((new_cx - cx).powi(2) + (new_cy - cy).powi(2)).sqrt();
            cx = new_cx;
            cy = new_cy;
            if moved < CONVERGENCE_PX {
                break;
            }
        }

        if flux <= 0.0 {
            return LocateOutcome::Measured(CentroidMeasure::unresolved());
        }

        result = CentroidMeasure {
            x: search_box.min_col as f64 + cx,
            y: search_box.min_row as f64 + cy,
            radius: (area as f64 / std::f64::consts::PI).sqrt(),
        };

        aperture /= 2.0;
        if aperture < min_radius {
            break;
        }
    }

    LocateOutcome::Measured(result)
}

fn in_aperture(row: usize, col: usize, cx: f64, cy: f64, radius: f64) -> bool {
    let dx = col as f64 - cx;
    let dy = row as f64 - cy;
    dx * dx + dy * dy <= radius * radius
}
