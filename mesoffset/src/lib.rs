//! mesoffset - instrument mask-alignment calibration engine
//!
//! Computes the rigid offset (dx, dy, dtheta) that registers an instrument's
//! physical mask with the stars it must observe. A session runs three ordered
//! phases (star, star-hole, refined star-hole); each one stitches a guide
//! exposure pair into a mosaic, locates the expected objects with operator
//! corrections, fits the rigid transform over the surviving correspondence
//! pairs, and appends the accepted offset to the session log.
//!
//! The engine owns no I/O: frames, telemetry, and log persistence arrive
//! through the `shared` crate's seams, and a presentation layer observes
//! progress through registered callbacks.

pub mod callback;
pub mod config;
pub mod error;
pub mod frame_processor;
pub mod locator;
pub mod offset_log;
pub mod session;
pub mod state;
pub mod worker;

// Re-export commonly used types for external use
pub use crate::callback::{AlignmentEvent, CallbackId};
pub use crate::config::{PhaseFrames, SessionConfig};
pub use crate::error::PhaseError;
pub use crate::frame_processor::{FrameProcessor, MosaicImage, ProcessOutcome};
pub use crate::locator::{LocateAllOutcome, LocatorError, ObjectLocator};
pub use crate::offset_log::{LogSink, VecLogSink};
pub use crate::session::CalibrationSession;
pub use crate::state::{CalibrationPhase, PhaseState};
