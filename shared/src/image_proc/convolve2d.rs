//! Gaussian convolution for mosaic denoising.
//!
//! The blur runs as two separable 1D passes with zero padding, which is
//! cheap enough to sit inside the frame pipeline. The keep-out margin crop
//! happens before the blur, so edge dimming from the zero padding never
//! reaches the centroider.

use ndarray::Array2;

/// Build a normalized 1D Gaussian kernel for the given sigma.
///
/// Kernel extent is three sigma on each side, always odd.
pub fn gaussian_kernel1d(sigma: f64) -> Vec<f64> {
    let half = (3.0 * sigma).ceil().max(1.0) as usize;
    let mut kernel = Vec::with_capacity(2 * half + 1);

    let mut sum = 0.0;
    for i in 0..(2 * half + 1) {
        let x = i as f64 - half as f64;
        let value = (-x * x / (2.0 * sigma * sigma)).exp();
        kernel.push(value);
        sum += value;
    }
    for value in &mut kernel {
        *value /= sum;
    }

    kernel
}

/// Blur an image with a separable Gaussian of the given sigma.
///
/// Zero padding at the edges; output has the input's shape.
pub fn gaussian_blur(image: &Array2<f64>, sigma: f64) -> Array2<f64> {
    let kernel = gaussian_kernel1d(sigma);
    let half = kernel.len() / 2;
    let (rows, cols) = image.dim();

    // Horizontal pass
    let mut horizontal = Array2::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            let mut sum = 0.0;
            for (k, &weight) in kernel.iter().enumerate() {
                let cc = c as isize + k as isize - half as isize;
                if cc >= 0 && (cc as usize) < cols {
                    sum += image[[r, cc as usize]] * weight;
                }
            }
            horizontal[[r, c]] = sum;
        }
    }

    // Vertical pass
    let mut output = Array2::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            let mut sum = 0.0;
            for (k, &weight) in kernel.iter().enumerate() {
                let rr = r as isize + k as isize - half as isize;
                if rr >= 0 && (rr as usize) < rows {
                    sum += horizontal[[rr as usize, c]] * weight;
                }
            }
            output[[r, c]] = sum;
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_kernel_is_normalized_and_odd() {
        for sigma in [0.5, 1.0, 2.5] {
            let kernel = gaussian_kernel1d(sigma);
            assert_eq!(kernel.len() % 2, 1);
            assert_relative_eq!(kernel.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_blur_preserves_flux_away_from_edges() {
        let mut image = Array2::<f64>::zeros((31, 31));
        image[[15, 15]] = 100.0;

        let blurred = gaussian_blur(&image, 1.5);

        // The impulse is far from every edge, so no flux leaks into padding
        assert_relative_eq!(blurred.sum(), 100.0, epsilon = 1e-9);
        // Peak stays at the impulse location
        let mut peak = (0, 0);
        let mut peak_value = f64::MIN;
        for ((r, c), &v) in blurred.indexed_iter() {
            if v > peak_value {
                peak_value = v;
                peak = (r, c);
            }
        }
        assert_eq!(peak, (15, 15));
    }

    #[test]
    fn test_blur_is_symmetric() {
        let mut image = Array2::<f64>::zeros((21, 21));
        image[[10, 10]] = 50.0;

        let blurred = gaussian_blur(&image, 1.0);

        assert_relative_eq!(blurred[[10, 7]], blurred[[10, 13]], epsilon = 1e-12);
        assert_relative_eq!(blurred[[7, 10]], blurred[[13, 10]], epsilon = 1e-12);
        assert_relative_eq!(blurred[[8, 10]], blurred[[10, 8]], epsilon = 1e-12);
    }
}
