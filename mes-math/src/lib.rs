//! mes-math - Geometry for instrument mask-alignment calibration
//!
//! This crate provides the pure-math pieces of the mask-alignment pipeline:
//!
//! - **Rigid fitting** - Kabsch-style 2D rigid transform estimation over
//!   correspondence pairs, with per-pair activation flags and outlier pruning
//! - **Matrix** - small 2D transformation matrix helpers
//!
//! # Example
//!
//! ```text
//! use mes_math::{CorrespondencePair, TransformFitter};
//!
//! let pairs = vec![
//!     CorrespondencePair::new(0.0, 0.0, 3.0, -2.0),
//!     CorrespondencePair::new(10.0, 0.0, 13.0, -2.0),
//!     CorrespondencePair::new(0.0, 10.0, 3.0, 8.0),
//! ];
//! let fitter = TransformFitter::new(pairs);
//! let transform = fitter.fit().transform;
//! ```

pub mod matrix2;
pub mod rigid;

// Re-export commonly used types
pub use matrix2::rotation_matrix;
pub use rigid::{CorrespondencePair, RigidFit, RigidTransform, TransformFitter};
