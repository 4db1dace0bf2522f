//! Edge tapering: blend the borders of an image with a blurred copy so the
//! result is approximately periodic and circular convolution does not ring.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::float_trait::DeblurFloat;
use crate::transforms::{fft2_planar, ifft2_real_planar, psf2otf};

/// Squared-sine taper weight along one axis: 1 in the interior, a smooth
/// ramp within one kernel extent of each border.
fn axis_weight<F: DeblurFloat>(i: usize, n: usize, k: usize) -> F {
    let period = F::usize_as(2 * k - 1);
    if i < k {
        let t = F::usize_as(i) * F::PI() / period;
        t.sin().powi(2)
    } else if i + k > n {
        let t = F::usize_as(n - 1 - i) * F::PI() / period;
        t.sin().powi(2)
    } else {
        F::one()
    }
}

fn taper_weights<F: DeblurFloat>(
    height: usize,
    width: usize,
    kernel_height: usize,
    kernel_width: usize,
) -> Array2<F> {
    Array2::from_shape_fn((height, width), |(y, x)| {
        axis_weight::<F>(y, height, kernel_height) * axis_weight::<F>(x, width, kernel_width)
    })
}

/// Blend a planar image towards its circular blur near the borders.
///
/// For each pass, computes blurred = ifft(fft(out) * OTF(kernel)) per
/// channel and replaces out with `w * out + (1 - w) * blurred`, where the
/// single-channel weight mask is 1 in the interior and tapers near the
/// sides.
pub fn edgetaper<F: DeblurFloat>(
    input: ArrayView3<F>,
    kernel: ArrayView2<F>,
    iterations: usize,
) -> Array3<F> {
    let (depth, height, width) = input.dim();
    let (kh, kw) = kernel.dim();
    let weights = taper_weights::<F>(height, width, kh, kw);
    let kernel_otf = psf2otf(kernel, height, width);

    let mut out = input.to_owned();
    for _ in 0..iterations {
        let mut spectrum = fft2_planar(out.view());
        for channel in 0..depth {
            let mut plane = spectrum.index_axis_mut(Axis(0), channel);
            plane.zip_mut_with(&kernel_otf, |s, k| *s = *s * *k);
        }
        let blurred = ifft2_real_planar(&spectrum);

        for channel in 0..depth {
            for y in 0..height {
                for x in 0..width {
                    let w = weights[[y, x]];
                    out[[channel, y, x]] =
                        w * out[[channel, y, x]] + (F::one() - w) * blurred[[channel, y, x]];
                }
            }
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
