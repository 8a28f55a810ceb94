//! Expected object positions from the mask-design file.
//!
//! The mask designer emits flat whitespace-separated records, one element per
//! line. Only `center` records describe alignment holes; every other kind is
//! ignored. Design coordinates are mapped into the sensor pixel convention by
//! a fixed affine (the x axis is mirrored between the two conventions), then
//! re-expressed as offsets from the first center record, which serves as the
//! anchor for the whole sequence.

use thiserror::Error;

/// Affine x offset, pixels: x' = X_OFFSET_PX - raw_x * PLATE_SCALE
const X_OFFSET_PX: f64 = 1088.5;
/// Affine y offset, pixels: y' = Y_OFFSET_PX + raw_y * PLATE_SCALE
const Y_OFFSET_PX: f64 = 910.0;
/// Plate scale, pixels per design unit
const PLATE_SCALE: f64 = 8.465;
/// Hole radius when a record has no usable size field, pixels
const DEFAULT_RADIUS_PX: f64 = 10.0;

/// One expected object, relative to the anchor (record index 0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpectedPosition {
    /// Offset from the anchor in x, pixels
    pub dx: f64,
    /// Offset from the anchor in y, pixels
    pub dy: f64,
    /// Expected object radius, pixels
    pub radius: f64,
}

/// Errors raised while reading a mask-design position file.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionFileError {
    /// The file held no center records at all.
    #[error("no center records in position file")]
    Empty,

    /// A center record had missing or unparseable coordinate fields.
    #[error("malformed center record on line {line}: {reason}")]
    Malformed {
        /// 1-based line number
        line: usize,
        /// What failed to parse
        reason: String,
    },
}

/// Parse the flat record text into anchor-relative expected positions.
///
/// Blank lines and `#` comments are skipped. A center record is
/// `center <x> <y> [<diameter> ...]`; trailing fields beyond the diameter are
/// ignored. The returned order is file order, with index 0 the anchor at
/// offset (0, 0).
pub fn parse_expected_positions(text: &str) -> Result<Vec<ExpectedPosition>, PositionFileError> {
    let mut mapped: Vec<(f64, f64, f64)> = Vec::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields[0] != "center" {
            continue;
        }
        if fields.len() < 3 {
            return Err(PositionFileError::Malformed {
                line: index + 1,
                reason: format!("expected at least 3 fields, got {}", fields.len()),
            });
        }

        let raw_x: f64 = fields[1].parse().map_err(|_| PositionFileError::Malformed {
            line: index + 1,
            reason: format!("bad x field {:?}", fields[1]),
        })?;
        let raw_y: f64 = fields[2].parse().map_err(|_| PositionFileError::Malformed {
            line: index + 1,
            reason: format!("bad y field {:?}", fields[2]),
        })?;

        let x = X_OFFSET_PX - raw_x * PLATE_SCALE;
        let y = Y_OFFSET_PX + raw_y * PLATE_SCALE;
        let radius = fields
            .get(3)
            .and_then(|f| f.parse::<f64>().ok())
            .map(|diameter| diameter * PLATE_SCALE / 2.0)
            .unwrap_or(DEFAULT_RADIUS_PX);

        mapped.push((x, y, radius));
    }

    let &(anchor_x, anchor_y, _) = mapped.first().ok_or(PositionFileError::Empty)?;

    Ok(mapped
        .into_iter()
        .map(|(x, y, radius)| ExpectedPosition {
            dx: x - anchor_x,
            dy: y - anchor_y,
            radius,
        })
        .collect())
}
