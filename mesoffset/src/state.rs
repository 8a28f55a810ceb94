use serde::{Deserialize, Serialize};

/// The three ordered calibration phases of a session.
///
/// The refined phase loops on itself with an updated mask frame until the
/// operator ends the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationPhase {
    /// Coarse offset from the star field alone
    Star,
    /// Offset from stars seen through the mask holes
    StarHole,
    /// Repeatable refinement with a fresh mask exposure
    RefinedStarHole,
}

impl CalibrationPhase {
    /// Log tag for records produced by this phase.
    pub fn label(&self) -> &'static str {
        match self {
            CalibrationPhase::Star => "MES Offset 1",
            CalibrationPhase::StarHole => "MES Offset 2",
            CalibrationPhase::RefinedStarHole => "MES Offset 3",
        }
    }

    /// The phase that follows this one.
    pub fn next(&self) -> CalibrationPhase {
        match self {
            CalibrationPhase::Star => CalibrationPhase::StarHole,
            CalibrationPhase::StarHole => CalibrationPhase::RefinedStarHole,
            CalibrationPhase::RefinedStarHole => CalibrationPhase::RefinedStarHole,
        }
    }

    /// Index into per-phase parameter tables.
    pub fn index(&self) -> usize {
        match self {
            CalibrationPhase::Star => 0,
            CalibrationPhase::StarHole => 1,
            CalibrationPhase::RefinedStarHole => 2,
        }
    }
}

/// Substates of one calibration phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseState {
    /// Waiting for / running the frame processor
    Processing,
    /// Mosaic ready; waiting for / running object location
    Locating,
    /// Measurements ready; operator corrections permitted
    Reviewing,
    /// Fit computed or being computed; operator may prune pairs
    Fitting,
    /// Offset accepted and logged
    Done,
    /// Unrecoverable error; manual retry required
    Failed {
        /// Human-readable failure description
        reason: String,
    },
}
