//! Common utilities for mesoffset integration tests

use mesoffset::frame_processor::{CHIP2_SHIFT, KEEP_OUT_MARGIN_PX};
use ndarray::{s, Array2};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use shared::frame_source::RawFramePair;
use shared::image_proc::test_patterns::{render_spots, SpotParams};

/// Chip geometry used by the synthetic exposures.
pub const CHIP_H: usize = 128;
pub const CHIP_W: usize = 128;

/// Map a desired final-mosaic position back to chip-1 coordinates.
///
/// Inverse of `frame_processor::mosaic_position` for the identity-distortion
/// pipeline used in these tests.
pub fn chip_from_mosaic(mosaic_x: f64, mosaic_y: f64) -> (f64, f64) {
    let canvas_w = (CHIP_W + CHIP2_SHIFT.1) as f64;
    let m = KEEP_OUT_MARGIN_PX as f64;
    let chip_y = mosaic_x + m;
    let chip_x = canvas_w - 1.0 - m - mosaic_y;
    (chip_x, chip_y)
}

/// Build a synthetic exposure pair whose holes land at the given mosaic
/// positions after stitching and reorientation.
///
/// Both chips window the same underlying field (with shared read noise), so
/// the blend stage reconstructs it exactly.
pub fn make_pair(frame_base: u32, mosaic_positions: &[(f64, f64)], seed: u64) -> RawFramePair {
    let (dr, dc) = CHIP2_SHIFT;
    let canvas_h = CHIP_H + dr;
    let canvas_w = CHIP_W + dc;

    let spots: Vec<SpotParams> = mosaic_positions
        .iter()
        .map(|&(mx, my)| {
            let (cx, cy) = chip_from_mosaic(mx, my);
            SpotParams::new(cx, cy, 3000.0, 3.5)
        })
        .collect();

    let mut field = render_spots(canvas_h, canvas_w, 100.0, &spots);

    // Light read noise, seeded for repeatability
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for value in field.iter_mut() {
        *value += rng.gen_range(-2.0..2.0);
    }

    let chip1 = field.slice(s![0..CHIP_H, 0..CHIP_W]).to_owned();
    let chip2 = field
        .slice(s![dr..CHIP_H + dr, dc..CHIP_W + dc])
        .to_owned();
    RawFramePair::new(frame_base, chip1, chip2)
}

/// Mosaic positions for an anchor plus the standard test offsets.
pub fn grid_positions(anchor: (f64, f64), offsets: &[(f64, f64)]) -> Vec<(f64, f64)> {
    offsets
        .iter()
        .map(|&(dx, dy)| (anchor.0 + dx, anchor.1 + dy))
        .collect()
}
