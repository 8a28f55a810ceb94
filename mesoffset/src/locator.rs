//! Object location across the expected-position sequence.
//!
//! Walks the ordered expected positions, building a search box for each from
//! the measured anchor plus the design offset, replaying that object's drag
//! history, and centroiding. The locator itself is a value: workers run it on
//! an immutable snapshot, and only the control thread mutates histories,
//! skips, and recorded measurements.

use ndarray::ArrayView2;
use thiserror::Error;

use shared::cancel::CancelFlag;
use shared::expected_positions::ExpectedPosition;
use shared::image_proc::aabb::AABB;
use shared::image_proc::centroid::{locate, CentroidMeasure, LocateOutcome};
use shared::image_proc::mask::DragMask;

/// Search-box half-width as a multiple of the expected radius.
const SEARCH_BOX_SCALE: f64 = 2.0;
/// Floor on the search-box half-width, pixels.
const MIN_BOX_HALF_WIDTH: f64 = 8.0;
/// Floor on the centroider's final aperture, pixels.
const MIN_APERTURE_PX: f64 = 1.0;

/// Errors from interactive locator operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocatorError {
    /// The anchor object cannot be skipped.
    #[error("object 0 is the anchor and cannot be skipped")]
    AnchorSkip,

    /// Object index outside the expected-position sequence.
    #[error("object index {index} out of range (sequence length {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Ordered drag history for one object, with a redo stack.
#[derive(Debug, Clone, Default)]
struct MaskHistory {
    applied: Vec<DragMask>,
    undone: Vec<DragMask>,
}

impl MaskHistory {
    fn push(&mut self, drag: DragMask) {
        self.applied.push(drag);
        self.undone.clear();
    }

    fn undo(&mut self) -> bool {
        match self.applied.pop() {
            Some(drag) => {
                self.undone.push(drag);
                true
            }
            None => false,
        }
    }

    fn redo(&mut self) -> bool {
        match self.undone.pop() {
            Some(drag) => {
                self.applied.push(drag);
                true
            }
            None => false,
        }
    }
}

/// Result of a full locate pass.
#[derive(Debug, Clone)]
pub enum LocateAllOutcome {
    /// One measurement per expected position, in sequence order
    Measured(Vec<CentroidMeasure>),
    /// Cancellation observed mid-pass
    Interrupted,
}

/// Drives the centroider across the expected-position sequence.
#[derive(Debug, Clone)]
pub struct ObjectLocator {
    expected: Vec<ExpectedPosition>,
    anchor_xy: (f64, f64),
    histories: Vec<MaskHistory>,
    skipped: Vec<bool>,
    measures: Vec<CentroidMeasure>,
}

impl ObjectLocator {
    /// Create a locator over the expected sequence, anchored at the
    /// operator-designated position on the mosaic.
    pub fn new(expected: Vec<ExpectedPosition>, anchor_xy: (f64, f64)) -> Self {
        let n = expected.len();
        Self {
            expected,
            anchor_xy,
            histories: vec![MaskHistory::default(); n],
            skipped: vec![false; n],
            measures: vec![CentroidMeasure::unresolved(); n],
        }
    }

    /// Re-designate the anchor position; histories and skips are kept.
    pub fn set_anchor(&mut self, anchor_xy: (f64, f64)) {
        self.anchor_xy = anchor_xy;
    }

    /// Number of objects in the sequence.
    pub fn len(&self) -> usize {
        self.expected.len()
    }

    /// True when the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }

    /// Recorded measurements, one per expected position.
    pub fn measures(&self) -> &[CentroidMeasure] {
        &self.measures
    }

    /// Applied drag history for one object, in insertion order.
    pub fn masks(&self, index: usize) -> &[DragMask] {
        &self.histories[index].applied
    }

    /// Append a drag to an object's history. Clears that object's redo stack.
    pub fn add_mask(&mut self, index: usize, drag: DragMask) -> Result<(), LocatorError> {
        self.check_index(index)?;
        self.histories[index].push(drag);
        Ok(())
    }

    /// Undo the most recent drag on an object's history.
    pub fn undo(&mut self, index: usize) -> Result<bool, LocatorError> {
        self.check_index(index)?;
        Ok(self.histories[index].undo())
    }

    /// Re-apply the most recently undone drag on an object's history.
    pub fn redo(&mut self, index: usize) -> Result<bool, LocatorError> {
        self.check_index(index)?;
        Ok(self.histories[index].redo())
    }

    /// Force an object to the unresolved sentinel. Forbidden for the anchor.
    pub fn skip(&mut self, index: usize) -> Result<(), LocatorError> {
        self.check_index(index)?;
        if index == 0 {
            return Err(LocatorError::AnchorSkip);
        }
        self.skipped[index] = true;
        self.measures[index] = CentroidMeasure::unresolved();
        Ok(())
    }

    /// Record a completed pass.
    pub fn apply_measures(&mut self, measures: Vec<CentroidMeasure>) {
        debug_assert_eq!(measures.len(), self.measures.len());
        self.measures = measures;
    }

    /// Record a single re-measured object.
    pub fn apply_measure(&mut self, index: usize, measure: CentroidMeasure) {
        if index < self.measures.len() {
            self.skipped[index] = false;
            self.measures[index] = measure;
        }
    }

    /// Reference (expected) positions on the mosaic.
    ///
    /// Always based on the designated anchor, never the measured one: the
    /// fitted translation must include the anchor's own displacement, or the
    /// whole offset would be absorbed before fitting.
    pub fn reference_positions(&self) -> Vec<(f64, f64)> {
        self.expected
            .iter()
            .map(|e| (self.anchor_xy.0 + e.dx, self.anchor_xy.1 + e.dy))
            .collect()
    }

    /// Run the full pass over an immutable snapshot.
    ///
    /// Object 0 anchors the sequence; if it comes back unresolved every
    /// downstream object is auto-skipped and the caller decides whether that
    /// is fatal. Skipped objects stay at the sentinel without centroiding.
    pub fn locate_all(
        &self,
        image: &ArrayView2<'_, f64>,
        cancel: &CancelFlag,
    ) -> LocateAllOutcome {
        let n = self.expected.len();
        let mut out = Vec::with_capacity(n);

        // Anchor first; everything else is positioned off its measurement
        match self.locate_one(image, 0, self.anchor_xy, cancel) {
            LocateOutcome::Interrupted => return LocateAllOutcome::Interrupted,
            LocateOutcome::Measured(anchor) => {
                out.push(anchor);
                if anchor.is_unresolved() {
                    log::warn!("anchor object unresolved; auto-skipping remaining objects");
                    out.resize(n, CentroidMeasure::unresolved());
                    return LocateAllOutcome::Measured(out);
                }

                let base = (anchor.x, anchor.y);
                for index in 1..n {
                    if self.skipped[index] {
                        out.push(CentroidMeasure::unresolved());
                        continue;
                    }
                    let expected = &self.expected[index];
                    let center = (base.0 + expected.dx, base.1 + expected.dy);
                    match self.locate_one(image, index, center, cancel) {
                        LocateOutcome::Interrupted => return LocateAllOutcome::Interrupted,
                        LocateOutcome::Measured(m) => out.push(m),
                    }
                }
            }
        }

        LocateAllOutcome::Measured(out)
    }

    /// Re-measure a single object during review.
    ///
    /// Uses the same box geometry as the full pass, so mask edits replay
    /// against identical pixels. Clears any skip on a successful application
    /// via `apply_measure`.
    pub fn relocate(
        &self,
        image: &ArrayView2<'_, f64>,
        index: usize,
        cancel: &CancelFlag,
    ) -> Result<LocateOutcome, LocatorError> {
        self.check_index(index)?;
        let center = if index == 0 {
            self.anchor_xy
        } else {
            let base = self.base_position();
            (
                base.0 + self.expected[index].dx,
                base.1 + self.expected[index].dy,
            )
        };
        Ok(self.locate_one(image, index, center, cancel))
    }

    fn locate_one(
        &self,
        image: &ArrayView2<'_, f64>,
        index: usize,
        center: (f64, f64),
        cancel: &CancelFlag,
    ) -> LocateOutcome {
        let expected = &self.expected[index];
        let half_width = (expected.radius * SEARCH_BOX_SCALE).max(MIN_BOX_HALF_WIDTH);
        let (height, width) = image.dim();
        let search_box = AABB::around(center.0, center.1, half_width, height, width);
        let min_radius = (expected.radius / 2.0).max(MIN_APERTURE_PX);

        locate(
            image,
            search_box,
            self.masks(index),
            min_radius,
            cancel,
        )
    }

    /// Base for downstream search boxes: the measured anchor when it
    /// resolved, the designated anchor otherwise.
    fn base_position(&self) -> (f64, f64) {
        let anchor = &self.measures[0];
        if anchor.is_unresolved() {
            self.anchor_xy
        } else {
            (anchor.x, anchor.y)
        }
    }

    fn check_index(&self, index: usize) -> Result<(), LocatorError> {
        if index >= self.expected.len() {
            return Err(LocatorError::IndexOutOfRange {
                index,
                len: self.expected.len(),
            });
        }
        Ok(())
    }
}
