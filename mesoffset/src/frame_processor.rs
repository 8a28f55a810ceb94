//! Frame pipeline: raw chip pair to centroid-ready mosaic.
//!
//! Stages run in a fixed order: background subtraction, per-chip distortion
//! correction, stitching onto the shared canvas, bad-pixel blending,
//! reorientation with a keep-out crop, and a final denoise blur. The cancel
//! flag is polled between stages only; a cancelled run reports Interrupted
//! and never a partial mosaic.

use ndarray::Array2;

use shared::bad_pixel_map::BadPixelMap;
use shared::cancel::CancelFlag;
use shared::distortion::DistortionCoefficients;
use shared::frame_source::RawFramePair;
use shared::image_proc::convolve2d::gaussian_blur;

use crate::error::PhaseError;

/// Denoise blur sigma applied before centroiding, pixels.
pub const BLUR_SIGMA: f64 = 1.0;
/// Canvas placement of chip 2 relative to chip 1: (row, col) shift.
pub const CHIP2_SHIFT: (usize, usize) = (2, 6);
/// Keep-out margin cropped from every mosaic edge, pixels.
pub const KEEP_OUT_MARGIN_PX: usize = 8;

/// Header carried alongside the stitched mosaic data.
#[derive(Debug, Clone)]
pub struct MosaicHeader {
    /// Base frame number the mosaic was built from
    pub frame_base: u32,
    /// Telescope altitude at exposure, degrees; NaN when unknown
    pub altitude: f64,
}

/// One stitched, oriented, denoised frame. Owned by its phase and discarded
/// on phase advance.
#[derive(Debug, Clone)]
pub struct MosaicImage {
    /// Mosaic pixel data
    pub data: Array2<f64>,
    /// Acquisition header
    pub header: MosaicHeader,
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// The finished mosaic
    Mosaic(MosaicImage),
    /// Cancellation observed at a stage boundary
    Interrupted,
}

/// Best-effort sink for intermediate pipeline arrays.
///
/// Failures are logged and otherwise ignored; dumping exists purely for
/// debugging and never affects the pipeline result.
pub trait DebugSink: Send + Sync {
    /// Persist one intermediate stage image.
    fn dump(&self, stage: &str, image: &Array2<f64>) -> anyhow::Result<()>;
}

/// Stitches raw chip pairs into centroid-ready mosaics.
///
/// Immutable once constructed; clones share nothing mutable, so workers can
/// snapshot it freely.
#[derive(Debug, Clone)]
pub struct FrameProcessor {
    distortion: DistortionCoefficients,
    bad_pixel_masks: [Array2<bool>; 2],
}

impl FrameProcessor {
    /// Build a processor from loaded calibration resources.
    pub fn new(distortion: DistortionCoefficients, bad_pixels: [&BadPixelMap; 2]) -> Self {
        let (h, w) = (distortion.height, distortion.width);
        let bad_pixel_masks = [bad_pixels[0].to_mask(h, w), bad_pixels[1].to_mask(h, w)];
        Self {
            distortion,
            bad_pixel_masks,
        }
    }

    /// Load calibration resources from disk and build a processor.
    ///
    /// A missing or corrupt resource is fatal for the phase; the error names
    /// the path verbatim.
    pub fn from_resources(
        coefficients_path: &std::path::Path,
        bad_pixel_paths: Option<&[std::path::PathBuf; 2]>,
    ) -> Result<Self, PhaseError> {
        let distortion =
            DistortionCoefficients::load_from_file(coefficients_path).map_err(|_| {
                PhaseError::Resource {
                    path: coefficients_path.display().to_string(),
                }
            })?;

        let bad_pixels = match bad_pixel_paths {
            Some(paths) => {
                let chip1 =
                    BadPixelMap::load_from_file(&paths[0]).map_err(|_| PhaseError::Resource {
                        path: paths[0].display().to_string(),
                    })?;
                let chip2 =
                    BadPixelMap::load_from_file(&paths[1]).map_err(|_| PhaseError::Resource {
                        path: paths[1].display().to_string(),
                    })?;
                [chip1, chip2]
            }
            None => [BadPixelMap::empty(), BadPixelMap::empty()],
        };

        Ok(Self::new(distortion, [&bad_pixels[0], &bad_pixels[1]]))
    }

    /// Chip dimensions (height, width) the processor expects.
    pub fn chip_dim(&self) -> (usize, usize) {
        (self.distortion.height, self.distortion.width)
    }

    /// Final mosaic dimensions (height, width) after orientation and crop.
    pub fn mosaic_dim(&self) -> (usize, usize) {
        let canvas_h = self.distortion.height + CHIP2_SHIFT.0;
        let canvas_w = self.distortion.width + CHIP2_SHIFT.1;
        // Rotation swaps the axes before the crop
        (
            canvas_w - 2 * KEEP_OUT_MARGIN_PX,
            canvas_h - 2 * KEEP_OUT_MARGIN_PX,
        )
    }

    /// Run the full pipeline on one raw pair.
    pub fn process(
        &self,
        pair: &RawFramePair,
        background: Option<&RawFramePair>,
        cancel: &CancelFlag,
        debug_sink: Option<&dyn DebugSink>,
    ) -> Result<ProcessOutcome, PhaseError> {
        let (chip_h, chip_w) = self.chip_dim();
        for chip in &pair.chips {
            let (h, w) = chip.dim();
            if (h, w) != (chip_h, chip_w) {
                return Err(PhaseError::DimensionMismatch {
                    expected_height: chip_h,
                    expected_width: chip_w,
                    height: h,
                    width: w,
                });
            }
        }

        // Stage 1: background subtraction
        let mut chips = [pair.chips[0].clone(), pair.chips[1].clone()];
        if let Some(bg) = background {
            for (chip, sky) in chips.iter_mut().zip(bg.chips.iter()) {
                if chip.dim() == sky.dim() {
                    *chip -= sky;
                } else {
                    log::warn!("background pair has mismatched dimensions, skipping subtraction");
                }
            }
        }
        if cancel.is_cancelled() {
            return Ok(ProcessOutcome::Interrupted);
        }

        // Stage 2: per-chip distortion correction (inverse indexing)
        let corrected = [
            self.correct_chip(&chips[0], 0),
            self.correct_chip(&chips[1], 1),
        ];
        dump_stage(debug_sink, "corrected_chip1", &corrected[0]);
        dump_stage(debug_sink, "corrected_chip2", &corrected[1]);
        if cancel.is_cancelled() {
            return Ok(ProcessOutcome::Interrupted);
        }

        // Stages 3+4: stitch onto the shared canvas with bad-pixel blending
        let canvas = self.stitch(&corrected);
        dump_stage(debug_sink, "canvas", &canvas);
        if cancel.is_cancelled() {
            return Ok(ProcessOutcome::Interrupted);
        }

        // Stage 5: rotate to physical orientation and crop the keep-out margin
        let oriented = orient(&canvas);
        dump_stage(debug_sink, "oriented", &oriented);
        if cancel.is_cancelled() {
            return Ok(ProcessOutcome::Interrupted);
        }

        // Stage 6: denoise ahead of centroiding
        let data = gaussian_blur(&oriented, BLUR_SIGMA);

        Ok(ProcessOutcome::Mosaic(MosaicImage {
            data,
            header: MosaicHeader {
                frame_base: pair.frame_base,
                altitude: pair.altitude,
            },
        }))
    }

    /// Resample one chip through its distortion map, nearest-neighbor.
    fn correct_chip(&self, chip: &Array2<f64>, index: usize) -> Array2<f64> {
        let map = self.distortion.map_for_chip(index);
        let (h, w) = chip.dim();

        Array2::from_shape_fn((h, w), |(row, col)| {
            let (sx, sy) = map.correct(col as f64, row as f64);
            chip[[sy.round() as usize, sx.round() as usize]]
        })
    }

    /// Place both chips on the canvas and blend where they overlap.
    ///
    /// Overlap rules: both good takes the mean; bad in one chip takes the
    /// other; bad in both is filled afterwards from the local median.
    fn stitch(&self, chips: &[Array2<f64>; 2]) -> Array2<f64> {
        let (chip_h, chip_w) = self.chip_dim();
        let (dr, dc) = CHIP2_SHIFT;
        let canvas_h = chip_h + dr;
        let canvas_w = chip_w + dc;

        let mut canvas = Array2::zeros((canvas_h, canvas_w));
        let mut unfilled: Vec<(usize, usize)> = Vec::new();

        for row in 0..canvas_h {
            for col in 0..canvas_w {
                let from_chip1 = row < chip_h && col < chip_w;
                let from_chip2 = row >= dr && col >= dc;

                let good1 = from_chip1 && !self.bad_pixel_masks[0][[row, col]];
                let good2 = from_chip2 && !self.bad_pixel_masks[1][[row - dr, col - dc]];

                canvas[[row, col]] = match (good1, good2) {
                    (true, true) => (chips[0][[row, col]] + chips[1][[row - dr, col - dc]]) / 2.0,
                    (true, false) => chips[0][[row, col]],
                    (false, true) => chips[1][[row - dr, col - dc]],
                    (false, false) => {
                        unfilled.push((row, col));
                        f64::NAN
                    }
                };
            }
        }

        fill_local_median(&mut canvas, &unfilled);
        canvas
    }
}

fn dump_stage(sink: Option<&dyn DebugSink>, stage: &str, image: &Array2<f64>) {
    if let Some(sink) = sink {
        if let Err(e) = sink.dump(stage, image) {
            log::warn!("debug dump of stage {stage} failed: {e}");
        }
    }
}

/// Replace each listed pixel with the median of its finite 3x3 neighbors.
fn fill_local_median(canvas: &mut Array2<f64>, unfilled: &[(usize, usize)]) {
    let (rows, cols) = canvas.dim();
    let mut filled = Vec::with_capacity(unfilled.len());

    for &(row, col) in unfilled {
        let mut neighbors = Vec::with_capacity(8);
        for dr in -1isize..=1 {
            for dc in -1isize..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let r = row as isize + dr;
                let c = col as isize + dc;
                if r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols {
                    let v = canvas[[r as usize, c as usize]];
                    if v.is_finite() {
                        neighbors.push(v);
                    }
                }
            }
        }
        neighbors.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = if neighbors.is_empty() {
            0.0
        } else {
            neighbors[neighbors.len() / 2]
        };
        filled.push(((row, col), median));
    }

    for ((row, col), value) in filled {
        canvas[[row, col]] = value;
    }
}

/// Rotate the canvas a quarter turn counter-clockwise, then crop the fixed
/// keep-out margin from every edge.
fn orient(canvas: &Array2<f64>) -> Array2<f64> {
    let (rows, cols) = canvas.dim();
    let rotated = Array2::from_shape_fn((cols, rows), |(r, c)| canvas[[c, cols - 1 - r]]);

    let m = KEEP_OUT_MARGIN_PX;
    let (rot_rows, rot_cols) = rotated.dim();
    rotated
        .slice(ndarray::s![m..rot_rows - m, m..rot_cols - m])
        .to_owned()
}

/// Position a chip-1 pixel lands at in the final mosaic.
///
/// Mirrors the canvas placement, rotation, and crop; exposed so front ends
/// and tests can map design coordinates without running the pipeline.
pub fn mosaic_position(chip_x: f64, chip_y: f64, chip_w: usize) -> (f64, f64) {
    let canvas_w = (chip_w + CHIP2_SHIFT.1) as f64;
    let m = KEEP_OUT_MARGIN_PX as f64;
    (chip_y - m, canvas_w - 1.0 - chip_x - m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use shared::distortion::DistortionCoefficients;
    use shared::image_proc::test_patterns::{render_spots, SpotParams};

    fn identity_processor(height: usize, width: usize) -> FrameProcessor {
        FrameProcessor::new(
            DistortionCoefficients::identity("TESTDET", width, height),
            [&BadPixelMap::empty(), &BadPixelMap::empty()],
        )
    }

    /// Split a canvas-sized field into the two overlapping chip windows.
    fn split_field(field: &Array2<f64>, chip_h: usize, chip_w: usize) -> RawFramePair {
        let (dr, dc) = CHIP2_SHIFT;
        let chip1 = field.slice(ndarray::s![0..chip_h, 0..chip_w]).to_owned();
        let chip2 = field
            .slice(ndarray::s![dr..chip_h + dr, dc..chip_w + dc])
            .to_owned();
        RawFramePair::new(100, chip1, chip2)
    }

    #[test]
    fn test_stitch_reconstructs_shared_field() {
        let (chip_h, chip_w) = (64, 64);
        let field = render_spots(
            chip_h + CHIP2_SHIFT.0,
            chip_w + CHIP2_SHIFT.1,
            100.0,
            &[SpotParams::new(30.0, 30.0, 2000.0, 3.0)],
        );
        let processor = identity_processor(chip_h, chip_w);
        let pair = split_field(&field, chip_h, chip_w);

        let outcome = processor
            .process(&pair, None, &CancelFlag::new(), None)
            .unwrap();
        let mosaic = match outcome {
            ProcessOutcome::Mosaic(m) => m,
            ProcessOutcome::Interrupted => panic!("unexpected interruption"),
        };

        assert_eq!(mosaic.data.dim(), processor.mosaic_dim());

        // The spot must land where the geometry helper says it does
        let (mx, my) = mosaic_position(30.0, 30.0, chip_w);
        let peak = mosaic.data[[my.round() as usize, mx.round() as usize]];
        assert!(
            peak > 1000.0,
            "expected bright pixel at ({mx:.0}, {my:.0}), got {peak}"
        );
    }

    #[test]
    fn test_background_subtraction_levels_the_field() {
        let (chip_h, chip_w) = (32, 32);
        let field = render_spots(chip_h + CHIP2_SHIFT.0, chip_w + CHIP2_SHIFT.1, 250.0, &[]);
        let processor = identity_processor(chip_h, chip_w);
        let pair = split_field(&field, chip_h, chip_w);
        let sky = split_field(&field, chip_h, chip_w);

        let outcome = processor
            .process(&pair, Some(&sky), &CancelFlag::new(), None)
            .unwrap();
        let mosaic = match outcome {
            ProcessOutcome::Mosaic(m) => m,
            ProcessOutcome::Interrupted => panic!("unexpected interruption"),
        };

        for &v in mosaic.data.iter() {
            assert_relative_eq!(v, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_bad_pixel_in_one_chip_taken_from_other() {
        let (chip_h, chip_w) = (32, 32);
        let field = render_spots(chip_h + CHIP2_SHIFT.0, chip_w + CHIP2_SHIFT.1, 50.0, &[]);

        // Poison one chip-1 pixel well inside the overlap region
        let mut bad1 = BadPixelMap::new("chip1".to_string());
        bad1.add_pixel(20, 20);
        let processor = FrameProcessor::new(
            DistortionCoefficients::identity("TESTDET", chip_w, chip_h),
            [&bad1, &BadPixelMap::empty()],
        );

        let mut pair = split_field(&field, chip_h, chip_w);
        pair.chips[0][[20, 20]] = 90000.0;

        let outcome = processor
            .process(&pair, None, &CancelFlag::new(), None)
            .unwrap();
        let mosaic = match outcome {
            ProcessOutcome::Mosaic(m) => m,
            ProcessOutcome::Interrupted => panic!("unexpected interruption"),
        };

        // The hot value must not leak into the mosaic
        assert!(mosaic.data.iter().all(|&v| v < 1000.0));
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let processor = identity_processor(32, 32);
        let pair = RawFramePair::new(100, Array2::zeros((16, 16)), Array2::zeros((16, 16)));

        let result = processor.process(&pair, None, &CancelFlag::new(), None);

        assert!(matches!(
            result,
            Err(PhaseError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_cancelled_process_reports_interrupted() {
        let (chip_h, chip_w) = (32, 32);
        let field = render_spots(chip_h + CHIP2_SHIFT.0, chip_w + CHIP2_SHIFT.1, 10.0, &[]);
        let processor = identity_processor(chip_h, chip_w);
        let pair = split_field(&field, chip_h, chip_w);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let outcome = processor.process(&pair, None, &cancel, None).unwrap();

        assert!(matches!(outcome, ProcessOutcome::Interrupted));
    }
}
