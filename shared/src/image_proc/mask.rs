//! Operator drag rectangles and admission-mask compositing.
//!
//! A front end produces rectangles by dragging over the mosaic; this module
//! only consumes the resulting geometry. Each drag either blocks the covered
//! pixels (`Mask`) or restricts centroiding to the covered pixels (`Crop`).

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::image_proc::aabb::AABB;

/// How a drag rectangle constrains centroiding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskKind {
    /// Pixels outside the rectangle are excluded
    Crop,
    /// Pixels inside the rectangle are excluded
    Mask,
}

/// One operator drag: a rectangle in full-mosaic coordinates plus its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DragMask {
    /// Rectangle in full-image (row, col) coordinates
    pub rect: AABB,
    /// Whether the rectangle admits or excludes its interior
    pub kind: MaskKind,
}

impl DragMask {
    /// A drag that excludes the pixels it covers.
    pub fn mask(rect: AABB) -> Self {
        Self {
            rect,
            kind: MaskKind::Mask,
        }
    }

    /// A drag that restricts centroiding to the pixels it covers.
    pub fn crop(rect: AABB) -> Self {
        Self {
            rect,
            kind: MaskKind::Crop,
        }
    }
}

/// Replay an ordered drag history into a per-pixel admission mask for the
/// given window.
///
/// The returned array has shape (window.height, window.width); `true` means
/// the pixel may participate in centroiding. Drags are applied in insertion
/// order: a `Mask` drag clears the pixels it covers, a `Crop` drag clears
/// everything it does not cover.
pub fn composite_mask(window: AABB, drags: &[DragMask]) -> Array2<bool> {
    let mut admitted = Array2::from_elem((window.height(), window.width()), true);

    for drag in drags {
        for ((r, c), value) in admitted.indexed_iter_mut() {
            let row = window.min_row + r;
            let col = window.min_col + c;
            let inside = drag.rect.contains(row, col);
            match drag.kind {
                MaskKind::Mask if inside => *value = false,
                MaskKind::Crop if !inside => *value = false,
                _ => {}
            }
        }
    }

    admitted
}
