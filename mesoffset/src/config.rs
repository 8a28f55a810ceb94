use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Frame selection and processing controls for one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseFrames {
    /// Base frame number of the exposure pair (chip 2 is frame_base + 1)
    pub frame_base: u32,
    /// Optional sky exposure pair to subtract before stitching
    pub background_base: Option<u32>,
    /// Reuse the phase's existing mosaic instead of recomputing it
    pub reuse_mosaic: bool,
}

impl PhaseFrames {
    /// Frames for a fresh exposure with no sky subtraction.
    pub fn fresh(frame_base: u32) -> Self {
        Self {
            frame_base,
            background_base: None,
            reuse_mosaic: false,
        }
    }
}

/// Configuration for a calibration session.
///
/// The front end owns persistence of this struct; the engine only consumes
/// it. Frame bases are starting suggestions: completing a phase advances the
/// next phase's frame parameter past them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Frame selection for the star phase
    pub star: PhaseFrames,
    /// Frame selection for the star-hole phase
    pub star_hole: PhaseFrames,
    /// Frame selection for the refined star-hole phase
    pub refined_star_hole: PhaseFrames,
    /// Path of the distortion-coefficient calibration resource
    pub coefficients_path: PathBuf,
    /// Paths of the per-chip bad-pixel maps, when available
    pub bad_pixel_paths: Option<[PathBuf; 2]>,
}
