use std::sync::Arc;

use mes_math::RigidTransform;
use shared::image_proc::CentroidMeasure;

use crate::state::CalibrationPhase;

/// Events emitted to the presentation layer.
#[derive(Debug, Clone)]
pub enum AlignmentEvent {
    /// The phase mosaic finished building
    MosaicReady {
        phase: CalibrationPhase,
        frame_base: u32,
    },
    /// One object was measured (or re-measured during review)
    ObjectMeasured {
        phase: CalibrationPhase,
        index: usize,
        measure: CentroidMeasure,
        /// False for the NaN sentinel; drives the unresolved marker style
        resolved: bool,
    },
    /// The fit changed: fresh solve, pair toggled, or outliers pruned
    FitUpdated {
        phase: CalibrationPhase,
        transform: RigidTransform,
        /// Per-pair (x, y) residuals backing the residual plot
        residuals: Vec<(f64, f64)>,
        /// True when the active set could not constrain the fit
        degenerate: bool,
    },
    /// The phase offset was accepted and logged
    PhaseCompleted {
        phase: CalibrationPhase,
        transform: RigidTransform,
    },
    /// The phase hit an unrecoverable error
    PhaseFailed {
        phase: CalibrationPhase,
        reason: String,
    },
}

/// Callback ID for registration/deregistration
pub type CallbackId = u64;

/// Callback function type
pub type AlignmentCallback = Arc<dyn Fn(&AlignmentEvent) + Send + Sync>;
