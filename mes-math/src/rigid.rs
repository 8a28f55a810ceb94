//! Rigid 2D transform estimation over mask-alignment correspondence pairs
//!
//! Solves for the rotation and translation that carry the reference point set
//! onto the measured point set using the Kabsch/SVD construction. Pairs carry
//! an activation flag so outliers can be excluded without losing their slot in
//! the correspondence table, and pruning removes one worst pair at a time.

use nalgebra::{Matrix2, Vector2};

/// Singular values of the cross-covariance below this are treated as
/// zero spread (all active points coincident).
const SPREAD_EPSILON: f64 = 1e-9;

/// One reference point matched to one measured point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrespondencePair {
    /// Reference (expected) x-coordinate in mosaic pixels
    pub ref_x: f64,
    /// Reference (expected) y-coordinate in mosaic pixels
    pub ref_y: f64,
    /// Measured x-coordinate in mosaic pixels
    pub meas_x: f64,
    /// Measured y-coordinate in mosaic pixels
    pub meas_y: f64,
    /// Deactivated pairs are excluded from the fit but keep their index
    pub active: bool,
}

impl CorrespondencePair {
    /// Create an active pair from reference and measured coordinates.
    pub fn new(ref_x: f64, ref_y: f64, meas_x: f64, meas_y: f64) -> Self {
        Self {
            ref_x,
            ref_y,
            meas_x,
            meas_y,
            active: true,
        }
    }

    fn reference(&self) -> Vector2<f64> {
        Vector2::new(self.ref_x, self.ref_y)
    }

    fn measured(&self) -> Vector2<f64> {
        Vector2::new(self.meas_x, self.meas_y)
    }
}

/// Rigid transform (rotation + translation, no scale or shear).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    /// Translation in x, pixels
    pub dx: f64,
    /// Translation in y, pixels
    pub dy: f64,
    /// Rotation angle in radians, counter-clockwise
    pub theta: f64,
}

impl RigidTransform {
    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self {
            dx: 0.0,
            dy: 0.0,
            theta: 0.0,
        }
    }

    /// Rotation angle in degrees.
    pub fn theta_degrees(&self) -> f64 {
        self.theta.to_degrees()
    }
}

/// Result of a rigid fit over the active correspondence set.
///
/// Residuals are evaluated against the exact rotation matrix from the SVD,
/// not one reconstructed from the reported angle, so an exact correspondence
/// set yields exactly zero residuals.
#[derive(Debug, Clone)]
pub struct RigidFit {
    /// Derived (dx, dy, theta) summary of the fit
    pub transform: RigidTransform,
    /// True when the active set could not constrain a fit (<2 active pairs
    /// or zero point spread); the transform is then the identity
    pub degenerate: bool,
    rotation: Matrix2<f64>,
    translation: Vector2<f64>,
}

impl RigidFit {
    fn identity() -> Self {
        Self {
            transform: RigidTransform::identity(),
            degenerate: true,
            rotation: Matrix2::identity(),
            translation: Vector2::zeros(),
        }
    }

    /// Apply the fitted transform to a reference point.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let p = self.rotation * Vector2::new(x, y) + self.translation;
        (p.x, p.y)
    }
}

/// Rigid 2D least-squares fitter with per-pair activation and pruning.
#[derive(Debug, Clone)]
pub struct TransformFitter {
    pairs: Vec<CorrespondencePair>,
    fit: RigidFit,
}

impl TransformFitter {
    /// Build a fitter over the given pairs and solve immediately.
    pub fn new(pairs: Vec<CorrespondencePair>) -> Self {
        let fit = fit_pairs(&pairs);
        Self { pairs, fit }
    }

    /// The current fit for the active pair set.
    pub fn fit(&self) -> &RigidFit {
        &self.fit
    }

    /// All pairs, in correspondence order, including deactivated ones.
    pub fn pairs(&self) -> &[CorrespondencePair] {
        &self.pairs
    }

    /// Number of pairs currently participating in the fit.
    pub fn active_count(&self) -> usize {
        self.pairs.iter().filter(|p| p.active).count()
    }

    /// Activate or deactivate a pair and re-solve.
    ///
    /// Out-of-range indices are ignored.
    pub fn set_active(&mut self, index: usize, active: bool) {
        if let Some(pair) = self.pairs.get_mut(index) {
            if pair.active != active {
                pair.active = active;
                self.fit = fit_pairs(&self.pairs);
            }
        }
    }

    /// Per-pair (x, y) residuals against the current fit.
    ///
    /// Every pair gets a slot, deactivated ones included, so residual plots
    /// keep stable indices across pruning.
    pub fn residuals(&self) -> Vec<(f64, f64)> {
        self.pairs
            .iter()
            .map(|pair| {
                let (px, py) = self.fit.apply(pair.ref_x, pair.ref_y);
                (pair.meas_x - px, pair.meas_y - py)
            })
            .collect()
    }

    /// Deactivate outlier pairs one at a time until no active residual
    /// magnitude exceeds `threshold` or no active pairs remain.
    ///
    /// Removing a single worst pair and refitting before looking again avoids
    /// over-pruning when one bad point inflates several residuals. Returns the
    /// indices deactivated, in removal order.
    pub fn outlier_prune(&mut self, threshold: f64) -> Vec<usize> {
        let mut removed = Vec::new();

        for _ in 0..self.pairs.len() {
            let residuals = self.residuals();
            let worst = self
                .pairs
                .iter()
                .enumerate()
                .filter(|(_, p)| p.active)
                .map(|(i, _)| {
                    let (rx, ry) = residuals[i];
                    (i, (rx * rx + ry * ry).sqrt())
                })
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            match worst {
                Some((index, magnitude)) if magnitude > threshold => {
                    self.pairs[index].active = false;
                    self.fit = fit_pairs(&self.pairs);
                    removed.push(index);
                }
                _ => break,
            }
        }

        removed
    }
}

/// Solve the rigid fit over the active subset of `pairs`.
///
/// Kabsch construction: center both point sets on their centroids, build the
/// 2x2 cross-covariance, and extract the rotation from its SVD with a
/// reflection correction so the determinant is +1. Degenerate inputs produce
/// an identity fit with the flag set rather than an error.
pub fn fit_pairs(pairs: &[CorrespondencePair]) -> RigidFit {
    let active: Vec<&CorrespondencePair> = pairs.iter().filter(|p| p.active).collect();
    if active.len() < 2 {
        return RigidFit::identity();
    }

    let n = active.len() as f64;
    let ref_centroid: Vector2<f64> = active.iter().map(|p| p.reference()).sum::<Vector2<f64>>() / n;
    let meas_centroid: Vector2<f64> = active.iter().map(|p| p.measured()).sum::<Vector2<f64>>() / n;

    // Cross-covariance of the centered point sets
    let mut h = Matrix2::zeros();
    for pair in &active {
        let p = pair.reference() - ref_centroid;
        let q = pair.measured() - meas_centroid;
        h += p * q.transpose();
    }

    let svd = h.svd(true, true);
    if svd.singular_values.max() < SPREAD_EPSILON {
        // All active points coincide; rotation is unconstrained
        return RigidFit::identity();
    }

    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        // nalgebra computes both factors when requested; treat a refusal
        // like an unconstrained fit
        _ => return RigidFit::identity(),
    };

    let mut rotation = v_t.transpose() * u.transpose();
    if rotation.determinant() < 0.0 {
        let mut v_t_fixed = v_t;
        v_t_fixed[(1, 0)] = -v_t_fixed[(1, 0)];
        v_t_fixed[(1, 1)] = -v_t_fixed[(1, 1)];
        rotation = v_t_fixed.transpose() * u.transpose();
    }

    let translation = meas_centroid - rotation * ref_centroid;

    // Angle summary averages the two estimators; the rotation matrix itself
    // stays the source of truth for residual evaluation
    let cos_angle = rotation[(0, 0)].clamp(-1.0, 1.0).acos();
    let sin_angle = rotation[(1, 0)].clamp(-1.0, 1.0).asin();
    let theta = 0.5 * (cos_angle + sin_angle);

    RigidFit {
        transform: RigidTransform {
            dx: translation.x,
            dy: translation.y,
            theta,
        },
        degenerate: false,
        rotation,
        translation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix2::rotation_matrix;
    use approx::assert_relative_eq;

    fn transformed_pairs(points: &[(f64, f64)], dx: f64, dy: f64, theta: f64) -> Vec<CorrespondencePair> {
        let r = rotation_matrix(theta);
        points
            .iter()
            .map(|&(x, y)| {
                let p = r * Vector2::new(x, y) + Vector2::new(dx, dy);
                CorrespondencePair::new(x, y, p.x, p.y)
            })
            .collect()
    }

    const TEST_POINTS: [(f64, f64); 6] = [
        (100.0, 100.0),
        (700.0, 120.0),
        (400.0, 500.0),
        (150.0, 800.0),
        (650.0, 780.0),
        (420.0, 260.0),
    ];

    #[test]
    fn test_recovers_known_transform() {
        let theta = 5.0_f64.to_radians();
        let pairs = transformed_pairs(&TEST_POINTS, 3.0, -2.0, theta);

        let fitter = TransformFitter::new(pairs);
        let fit = fitter.fit();

        assert!(!fit.degenerate);
        assert_relative_eq!(fit.transform.dx, 3.0, epsilon = 1e-6);
        assert_relative_eq!(fit.transform.dy, -2.0, epsilon = 1e-6);
        assert_relative_eq!(fit.transform.theta, theta, epsilon = 1e-6);

        for (rx, ry) in fitter.residuals() {
            assert_relative_eq!(rx, 0.0, epsilon = 1e-6);
            assert_relative_eq!(ry, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_pure_translation() {
        let pairs = transformed_pairs(&TEST_POINTS, -12.5, 7.25, 0.0);

        let fit = TransformFitter::new(pairs).fit().clone();

        assert!(!fit.degenerate);
        assert_relative_eq!(fit.transform.dx, -12.5, epsilon = 1e-9);
        assert_relative_eq!(fit.transform.dy, 7.25, epsilon = 1e-9);
        // acos is ill-conditioned at zero rotation; only micro-radian accuracy
        // is meaningful here
        assert_relative_eq!(fit.transform.theta, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_single_pair_is_degenerate() {
        let pairs = vec![CorrespondencePair::new(1.0, 2.0, 3.0, 4.0)];

        let fit = TransformFitter::new(pairs).fit().clone();

        assert!(fit.degenerate);
        assert_eq!(fit.transform, RigidTransform::identity());
    }

    #[test]
    fn test_zero_spread_is_degenerate() {
        let pairs = vec![
            CorrespondencePair::new(5.0, 5.0, 8.0, 3.0),
            CorrespondencePair::new(5.0, 5.0, 8.0, 3.0),
            CorrespondencePair::new(5.0, 5.0, 8.0, 3.0),
        ];

        let fit = TransformFitter::new(pairs).fit().clone();

        assert!(fit.degenerate);
        assert_eq!(fit.transform, RigidTransform::identity());
    }

    #[test]
    fn test_deactivation_refits() {
        let mut pairs = transformed_pairs(&TEST_POINTS, 1.0, 1.0, 0.0);
        // Corrupt the last measurement
        pairs[5].meas_x += 40.0;

        let mut fitter = TransformFitter::new(pairs);
        fitter.set_active(5, false);

        let fit = fitter.fit();
        assert!(!fit.degenerate);
        assert_relative_eq!(fit.transform.dx, 1.0, epsilon = 1e-9);
        assert_relative_eq!(fit.transform.dy, 1.0, epsilon = 1e-9);
        assert_eq!(fitter.active_count(), 5);
    }

    #[test]
    fn test_outlier_prune_removes_displaced_pair() {
        let mut pairs = transformed_pairs(&TEST_POINTS, 0.0, 0.0, 0.0);
        // Displace one point by 5 px; threshold 2 px should remove exactly it
        pairs[2].meas_x += 3.0;
        pairs[2].meas_y += 4.0;

        let mut fitter = TransformFitter::new(pairs);
        let removed = fitter.outlier_prune(2.0);

        assert_eq!(removed, vec![2]);
        assert!(!fitter.pairs()[2].active);

        let max_residual = fitter
            .pairs()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.active)
            .map(|(i, _)| {
                let (rx, ry) = fitter.residuals()[i];
                (rx * rx + ry * ry).sqrt()
            })
            .fold(0.0_f64, f64::max);
        assert!(max_residual < 2.0, "max residual {max_residual} >= 2.0");
    }

    #[test]
    fn test_outlier_prune_clean_set_removes_nothing() {
        let pairs = transformed_pairs(&TEST_POINTS, 2.0, -1.0, 0.01);

        let mut fitter = TransformFitter::new(pairs);
        let removed = fitter.outlier_prune(2.0);

        assert!(removed.is_empty());
        assert_eq!(fitter.active_count(), TEST_POINTS.len());
    }
}
