//! Fourier-domain kernel estimator.
//!
//! Solves, in the gradient domain,
//! `argmin_k ||grad u (*) k - grad v||^2 + gamma ||k||^2`
//! with circular convolution: an elementwise Tikhonov quotient over the
//! gradient spectra, followed by an inverse transform, a centered shift,
//! a crop to the requested support, and kernel post-processing.

use ndarray::{Array2, ArrayView2};

use crate::estimation::EstimateConfig;
use crate::float_trait::DeblurFloat;
use crate::kernel::post_process;
use crate::transforms::{fft2, fftshift, ifft2_real};
use crate::utils::{gradient_x, gradient_y};

/// Estimator instance tied to one blurry image; the gradient spectra
/// precomputed here are invalidated when the image changes, so a new
/// estimator is created per scale.
pub struct FourierKernelEstimator<F: DeblurFloat> {
    ks: usize,
    fgx: Array2<rustfft::num_complex::Complex<F>>,
    fgy: Array2<rustfft::num_complex::Complex<F>>,
}

impl<F: DeblurFloat> FourierKernelEstimator<F> {
    pub fn new(v: ArrayView2<F>, ks: usize) -> Self {
        Self {
            ks,
            fgx: fft2(gradient_x(v).view()),
            fgy: fft2(gradient_y(v).view()),
        }
    }

    /// Estimate the kernel from the current sharp estimate.
    pub fn estimate(&self, u: ArrayView2<F>, config: &EstimateConfig<F>) -> Array2<F> {
        let (height, width) = u.dim();
        let fgu_x = fft2(gradient_x(u).view());
        let fgu_y = fft2(gradient_y(u).view());

        let spectrum = Array2::from_shape_fn((height, width), |i| {
            let num = fgu_x[i].conj() * self.fgx[i] + fgu_y[i].conj() * self.fgy[i];
            let denom = fgu_x[i].norm_sqr() + fgu_y[i].norm_sqr() + config.gamma;
            num / denom
        });

        let spatial = fftshift(ifft2_real(&spectrum).view());

        // crop the centered (ks, ks) window; cells outside the image are
        // zero, which only happens on degenerate coarse levels
        let ks = self.ks;
        let top = height as isize / 2 - ks as isize / 2;
        let left = width as isize / 2 - ks as isize / 2;
        let mut kernel = Array2::from_shape_fn((ks, ks), |(y, x)| {
            let sy = top + y as isize;
            let sx = left + x as isize;
            if sy >= 0 && (sy as usize) < height && sx >= 0 && (sx as usize) < width {
                spatial[[sy as usize, sx as usize]]
            } else {
                F::zero()
            }
        });

        post_process(&mut kernel, config.kernel_threshold_max, config.remove_isolated);
        kernel
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    // Piecewise-constant image of random binary 8x8 blocks: broadband
    // gradient spectrum without the comb structure of a periodic pattern.
    fn blocky_image(size: usize, seed: u64) -> Array2<f32> {
        let blocks = size / 8;
        let mut state = seed;
        let mut levels = vec![0.0f32; blocks * blocks];
        for level in levels.iter_mut() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            *level = if state >> 63 == 0 { 0.0 } else { 1.0 };
        }
        Array2::from_shape_fn((size, size), |(y, x)| levels[(y / 8) * blocks + x / 8])
    }

    fn config(ks: usize) -> EstimateConfig<f32> {
        EstimateConfig::new(ks)
    }

    fn kernel_centroid(kernel: &Array2<f32>) -> (f32, f32) {
        let sum: f32 = kernel.sum();
        let mut cx = 0.0;
        let mut cy = 0.0;
        for ((y, x), v) in kernel.indexed_iter() {
            cx += v * x as f32;
            cy += v * y as f32;
        }
        (cx / sum, cy / sum)
    }

    #[test]
    fn test_unblurred_image_gives_centered_delta() {
        let v = blocky_image(64, 12345);
        let estimator = FourierKernelEstimator::new(v.view(), 5);
        let kernel = estimator.estimate(v.view(), &config(5));

        assert_eq!(kernel.dim(), (5, 5));
        assert!((kernel.sum() - 1.0).abs() < 1e-5);
        assert!(
            kernel[[2, 2]] > 0.99,
            "identical u and v must yield a delta, got center {}",
            kernel[[2, 2]]
        );
    }

    #[test]
    fn test_translated_image_recentered() {
        // u is v translated by one pixel: the raw estimate is an off-center
        // delta, and post-processing moves it back onto the central pixel
        let v = blocky_image(64, 12345);
        let u = Array2::from_shape_fn((64, 64), |(y, x)| v[[y, (x + 1) % 64]]);
        let estimator = FourierKernelEstimator::new(v.view(), 7);
        let kernel = estimator.estimate(u.view(), &config(7));

        assert_eq!(kernel.dim(), (7, 7));
        assert!(kernel.iter().all(|&k| k >= 0.0));
        assert!((kernel.sum() - 1.0).abs() < 1e-5);
        let (cx, cy) = kernel_centroid(&kernel);
        assert!((cx - 3.0).abs() <= 0.5);
        assert!((cy - 3.0).abs() <= 0.5);
    }

    #[test]
    fn test_constant_image_gives_degenerate_kernel() {
        // constant images have no gradients anywhere, so the quotient is
        // zero and the degenerate kernel is preserved without division
        let v = Array2::from_elem((32, 32), 0.5f32);
        let estimator = FourierKernelEstimator::new(v.view(), 5);
        let kernel = estimator.estimate(v.view(), &config(5));

        assert_eq!(kernel.sum(), 0.0);
    }

    #[test]
    fn test_crop_window_exceeding_image_is_defined() {
        let v = Array2::from_shape_fn((2, 2), |(y, x)| (y * 2 + x) as f32 * 0.1);
        let estimator = FourierKernelEstimator::new(v.view(), 5);
        let kernel = estimator.estimate(v.view(), &config(5));

        assert_eq!(kernel.dim(), (5, 5));
        assert!(kernel.iter().all(|k| k.is_finite()));
    }
}
