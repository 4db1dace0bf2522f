//! Image resampling: bilinear/nearest cell interpolation with constant
//! border extension, Gaussian prefiltered downsampling, and plain
//! upsampling.
//!
//! The downscale prefilter sigma follows
//! `MAGIC_SIGMA * sqrt((fx * fy - 1) / 3)` where `fx`, `fy` are the
//! per-axis resampling ratios, so the effective frequency cutoff matches
//! the Nyquist of the target grid. `MAGIC_SIGMA` (default 1.6) and an
//! optional `PRESMOOTH` pass are overridable through the environment.

use ndarray::{Array2, ArrayView2};
use std::sync::OnceLock;

use crate::float_trait::DeblurFloat;

// =============================================================================
// Constants
// =============================================================================

/// Gaussian kernels are truncated at this many standard deviations; the
/// tail mass beyond 4 sigma is below 1e-4 of the total.
const GAUSSIAN_TRUNCATE: f64 = 4.0;

// =============================================================================
// Environment parameters
// =============================================================================

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Base sigma of the downscale prefilter (`MAGIC_SIGMA`, default 1.6).
pub fn magic_sigma() -> f64 {
    static VALUE: OnceLock<f64> = OnceLock::new();
    *VALUE.get_or_init(|| env_f64("MAGIC_SIGMA", 1.6))
}

/// Sigma of an optional presmoothing pass before downscaling
/// (`PRESMOOTH`, default 0 = disabled).
pub fn presmooth_sigma() -> f64 {
    static VALUE: OnceLock<f64> = OnceLock::new();
    *VALUE.get_or_init(|| env_f64("PRESMOOTH", 0.0))
}

// =============================================================================
// Interpolation
// =============================================================================

/// Cell interpolation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Bilinear,
}

/// Constant (clamp-to-edge) pixel extension.
fn extend_constant<F: DeblurFloat>(img: ArrayView2<F>, y: isize, x: isize) -> F {
    let (height, width) = img.dim();
    let yy = y.clamp(0, height as isize - 1) as usize;
    let xx = x.clamp(0, width as isize - 1) as usize;
    img[[yy, xx]]
}

/// Interpolate within the unit cell spanned by the four samples
/// a = (x0, y0), b = (x0, y1), c = (x1, y0), d = (x1, y1).
fn cell_interpolate<F: DeblurFloat>(
    a: F,
    b: F,
    c: F,
    d: F,
    fx: F,
    fy: F,
    method: Interpolation,
) -> F {
    match method {
        Interpolation::Nearest => {
            let half = F::from_f64_c(0.5);
            if fx < half {
                if fy < half {
                    a
                } else {
                    b
                }
            } else if fy < half {
                c
            } else {
                d
            }
        }
        Interpolation::Bilinear => {
            let one = F::one();
            a * (one - fx) * (one - fy) + b * (one - fx) * fy + c * fx * (one - fy) + d * fx * fy
        }
    }
}

/// Sample the image at fractional coordinates with clamp extension.
fn sample<F: DeblurFloat>(img: ArrayView2<F>, x: F, y: F, method: Interpolation) -> F {
    let xi = x.floor().to_isize().unwrap_or(0);
    let yi = y.floor().to_isize().unwrap_or(0);
    let a = extend_constant(img, yi, xi);
    let b = extend_constant(img, yi + 1, xi);
    let c = extend_constant(img, yi, xi + 1);
    let d = extend_constant(img, yi + 1, xi + 1);
    cell_interpolate(
        a,
        b,
        c,
        d,
        x - F::isize_as(xi),
        y - F::isize_as(yi),
        method,
    )
}

// =============================================================================
// Gaussian blur
// =============================================================================

fn gaussian_kernel_1d<F: DeblurFloat>(sigma: F) -> Vec<F> {
    let radius = (F::from_f64_c(GAUSSIAN_TRUNCATE) * sigma)
        .ceil()
        .to_usize()
        .unwrap_or(1)
        .max(1);
    let width = 2 * radius + 1;
    let neg_half = F::from_f64_c(-0.5);

    let mut kernel = Vec::with_capacity(width);
    let mut sum = F::zero();
    for i in 0..width {
        let x = F::usize_as(i) - F::usize_as(radius);
        let t = x / sigma;
        let value = (neg_half * t * t).exp();
        kernel.push(value);
        sum += value;
    }
    for value in &mut kernel {
        *value = *value / sum;
    }
    kernel
}

/// Separable Gaussian blur with clamp extension. A non-positive sigma is a
/// no-op.
pub fn gaussian_blur<F: DeblurFloat>(input: ArrayView2<F>, sigma: F) -> Array2<F> {
    if sigma <= F::zero() {
        return input.to_owned();
    }
    let kernel = gaussian_kernel_1d(sigma);
    let radius = kernel.len() / 2;
    let (height, width) = input.dim();

    let mut horizontal = Array2::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut acc = F::zero();
            for (k, &weight) in kernel.iter().enumerate() {
                let sx = (x as isize + k as isize - radius as isize)
                    .clamp(0, width as isize - 1) as usize;
                acc += input[[y, sx]] * weight;
            }
            horizontal[[y, x]] = acc;
        }
    }

    let mut output = Array2::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut acc = F::zero();
            for (k, &weight) in kernel.iter().enumerate() {
                let sy = (y as isize + k as isize - radius as isize)
                    .clamp(0, height as isize - 1) as usize;
                acc += horizontal[[sy, x]] * weight;
            }
            output[[y, x]] = acc;
        }
    }
    output
}

// =============================================================================
// Resampling
// =============================================================================

/// Resample to the target dimensions by direct grid sampling.
pub fn upsample<F: DeblurFloat>(
    input: ArrayView2<F>,
    target_height: usize,
    target_width: usize,
    method: Interpolation,
) -> Array2<F> {
    let (height, width) = input.dim();
    let fx = F::usize_as(width) / F::usize_as(target_width);
    let fy = F::usize_as(height) / F::usize_as(target_height);
    Array2::from_shape_fn((target_height, target_width), |(j, i)| {
        sample(input, F::usize_as(i) * fx, F::usize_as(j) * fy, method)
    })
}

/// Downsample by `factor >= 1`: Gaussian prefilter matched to the ratio,
/// then bilinear sampling. Output dimensions are `ceil(input / factor)`.
pub fn gaussian_downsample<F: DeblurFloat>(input: ArrayView2<F>, factor: F) -> Array2<F> {
    if factor == F::one() {
        return input.to_owned();
    }
    let (height, width) = input.dim();
    let factor_f64 = factor.to_f64().unwrap_or(1.0);
    let out_h = ((height as f64 / factor_f64).ceil() as usize).max(1);
    let out_w = ((width as f64 / factor_f64).ceil() as usize).max(1);

    let fx = F::usize_as(width) / F::usize_as(out_w);
    let fy = F::usize_as(height) / F::usize_as(out_h);

    let mut work = input.to_owned();
    let pre = F::from_f64_c(presmooth_sigma());
    if pre > F::zero() {
        work = gaussian_blur(work.view(), pre);
    }
    if out_w < width || out_h < height {
        let three = F::from_f64_c(3.0);
        let sigma = F::from_f64_c(magic_sigma()) * ((fx * fy - F::one()) / three).sqrt();
        work = gaussian_blur(work.view(), sigma);
    }

    Array2::from_shape_fn((out_h, out_w), |(j, i)| {
        sample(
            work.view(),
            F::usize_as(i) * fx,
            F::usize_as(j) * fy,
            Interpolation::Bilinear,
        )
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_cell_interpolate_bilinear_corners() {
        let r = cell_interpolate(1.0f32, 2.0, 3.0, 4.0, 0.0, 0.0, Interpolation::Bilinear);
        assert_eq!(r, 1.0);
        let r = cell_interpolate(1.0f32, 2.0, 3.0, 4.0, 1.0, 1.0, Interpolation::Bilinear);
        assert_eq!(r, 4.0);
        let r = cell_interpolate(1.0f32, 2.0, 3.0, 4.0, 0.5, 0.5, Interpolation::Bilinear);
        assert_eq!(r, 2.5);
    }

    #[test]
    fn test_cell_interpolate_nearest() {
        let r = cell_interpolate(1.0f32, 2.0, 3.0, 4.0, 0.4, 0.6, Interpolation::Nearest);
        assert_eq!(r, 2.0);
        let r = cell_interpolate(1.0f32, 2.0, 3.0, 4.0, 0.6, 0.4, Interpolation::Nearest);
        assert_eq!(r, 3.0);
    }

    #[test]
    fn test_upsample_identity_when_same_size() {
        let input = Array2::from_shape_fn((5, 7), |(y, x)| (y * 7 + x) as f32);
        let out = upsample(input.view(), 5, 7, Interpolation::Bilinear);
        for (a, b) in input.iter().zip(out.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_upsample_dimensions_and_range() {
        let input = Array2::from_shape_fn((8, 8), |(y, x)| ((y + x) % 2) as f32);
        let out = upsample(input.view(), 16, 16, Interpolation::Bilinear);
        assert_eq!(out.dim(), (16, 16));
        assert!(out.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_downsample_dimensions_ceil() {
        let input = Array2::<f32>::zeros((9, 13));
        let out = gaussian_downsample(input.view(), 2.0);
        assert_eq!(out.dim(), (5, 7));
    }

    #[test]
    fn test_downsample_constant_preserved() {
        let input = Array2::from_elem((16, 16), 0.4f32);
        let out = gaussian_downsample(input.view(), 2.0);
        assert_eq!(out.dim(), (8, 8));
        for &v in out.iter() {
            assert!((v - 0.4).abs() < 1e-5);
        }
    }

    #[test]
    fn test_downsample_factor_one_identity() {
        let input = Array2::from_shape_fn((6, 6), |(y, x)| (y * 6 + x) as f32);
        let out = gaussian_downsample(input.view(), 1.0);
        for (a, b) in input.iter().zip(out.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_gaussian_blur_preserves_mean_of_constant() {
        let input = Array2::from_elem((10, 10), 2.5f32);
        let out = gaussian_blur(input.view(), 1.6);
        for &v in out.iter() {
            assert!((v - 2.5).abs() < 1e-5);
        }
    }

    #[test]
    fn test_gaussian_blur_smooths_impulse() {
        let mut input = Array2::<f32>::zeros((15, 15));
        input[[7, 7]] = 1.0;
        let out = gaussian_blur(input.view(), 1.0);
        assert!(out[[7, 7]] < 1.0);
        assert!(out[[7, 8]] > 0.0);
        assert!((out.sum() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_downsample_tiny_image() {
        let input = Array2::from_elem((2, 1), 1.0f32);
        let out = gaussian_downsample(input.view(), 2.0);
        assert_eq!(out.dim(), (1, 1));
        assert!((out[[0, 0]] - 1.0).abs() < 1e-5);
    }
}
