use thiserror::Error;

/// Unrecoverable errors that mark a phase Failed.
///
/// Degenerate fits are deliberately not here: they are tagged values on the
/// fit result, and the phase stays in Reviewing. Cancellation is not here
/// either; it is a distinguished worker status, not an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhaseError {
    /// A calibration resource or frame could not be loaded.
    #[error("resource unavailable: {path}")]
    Resource {
        /// The path or frame description, verbatim
        path: String,
    },

    /// Chip dimensions do not match the calibration geometry.
    #[error("frame dimensions mismatch: expected {expected_height}x{expected_width}, got {height}x{width}")]
    DimensionMismatch {
        expected_height: usize,
        expected_width: usize,
        height: usize,
        width: usize,
    },

    /// The anchor object (index 0) could not be resolved.
    #[error("anchor object unresolved")]
    AnchorUnresolved,

    /// A background worker panicked or died without a result.
    #[error("worker failed: {0}")]
    Worker(String),
}
