//! 2x2 matrix utilities using nalgebra

use nalgebra::Matrix2;

/// Create a 2x2 rotation matrix
///
/// # Arguments
/// * `angle_rad` - Rotation angle in radians (counter-clockwise)
///
/// # Returns
/// Rotation matrix
pub fn rotation_matrix(angle_rad: f64) -> Matrix2<f64> {
    let c = angle_rad.cos();
    let s = angle_rad.sin();
    Matrix2::new(c, -s, s, c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;
    use std::f64::consts::PI;

    #[test]
    fn test_rotation_90_degrees() {
        let matrix = rotation_matrix(PI / 2.0);
        let input = Vector2::new(1.0, 0.0);

        let output = matrix * input;

        assert_relative_eq!(output.x, 0.0, epsilon = 1e-10);
        assert_relative_eq!(output.y, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_rotation_preserves_length() {
        let matrix = rotation_matrix(0.3);
        let input = Vector2::new(3.0, 4.0);

        let output = matrix * input;

        assert_relative_eq!(output.norm(), 5.0, epsilon = 1e-10);
    }
}
