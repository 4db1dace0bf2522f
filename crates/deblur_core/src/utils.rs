//! Discrete differential operators and border padding.

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3};

use crate::float_trait::DeblurFloat;

/// Forward-difference gradients with wrap-around at the borders.
pub fn circular_gradients<F: DeblurFloat>(input: ArrayView2<F>) -> (Array2<F>, Array2<F>) {
    let (height, width) = input.dim();
    let gx = Array2::from_shape_fn((height, width), |(y, x)| {
        input[[y, (x + 1) % width]] - input[[y, x]]
    });
    let gy = Array2::from_shape_fn((height, width), |(y, x)| {
        input[[(y + 1) % height, x]] - input[[y, x]]
    });
    (gx, gy)
}

/// Backward-difference divergence with wrap-around at the borders, the
/// adjoint pairing of [`circular_gradients`].
pub fn circular_divergence<F: DeblurFloat>(gx: ArrayView2<F>, gy: ArrayView2<F>) -> Array2<F> {
    let (height, width) = gx.dim();
    Array2::from_shape_fn((height, width), |(y, x)| {
        gx[[y, x]] - gx[[y, (x + width - 1) % width]] + gy[[y, x]]
            - gy[[(y + height - 1) % height, x]]
    })
}

/// Horizontal forward difference, zero in the last column.
pub fn gradient_x<F: DeblurFloat>(input: ArrayView2<F>) -> Array2<F> {
    let (height, width) = input.dim();
    Array2::from_shape_fn((height, width), |(y, x)| {
        if x + 1 < width {
            input[[y, x + 1]] - input[[y, x]]
        } else {
            F::zero()
        }
    })
}

/// Vertical forward difference, zero in the last row.
pub fn gradient_y<F: DeblurFloat>(input: ArrayView2<F>) -> Array2<F> {
    let (height, width) = input.dim();
    Array2::from_shape_fn((height, width), |(y, x)| {
        if y + 1 < height {
            input[[y + 1, x]] - input[[y, x]]
        } else {
            F::zero()
        }
    })
}

/// Grow a planar image by (kernel_width - 1, kernel_height - 1) with the
/// original content centered and the margins mirrored from the interior.
pub fn add_padding<F: DeblurFloat>(
    input: ArrayView3<F>,
    kernel_width: usize,
    kernel_height: usize,
) -> Array3<F> {
    let (depth, height, width) = input.dim();
    let px = kernel_width / 2;
    let py = kernel_height / 2;
    let out_h = height + 2 * py;
    let out_w = width + 2 * px;
    let mut out = Array3::zeros((depth, out_h, out_w));

    for l in 0..depth {
        for y in 0..height {
            for x in 0..width {
                out[[l, y + py, x + px]] = input[[l, y, x]];
            }
        }
    }

    for l in 0..depth {
        for y in 0..py {
            for x in 0..out_w {
                out[[l, y, x]] = out[[l, 2 * py - y, x]];
                out[[l, out_h - 1 - y, x]] = out[[l, out_h - 1 - 2 * py + y, x]];
            }
        }
        for y in 0..out_h {
            for x in 0..px {
                out[[l, y, x]] = out[[l, y, 2 * px - x]];
                out[[l, y, out_w - 1 - x]] = out[[l, y, out_w - 1 - 2 * px + x]];
            }
        }
    }

    out
}

/// Crop the margins added by [`add_padding`]. The horizontal kernel margin
/// is used on both axes.
pub fn remove_padding<F: DeblurFloat>(
    input: ArrayView3<F>,
    kernel_width: usize,
    _kernel_height: usize,
) -> Array3<F> {
    let (_, height, width) = input.dim();
    let m = kernel_width / 2;
    input
        .slice(s![.., m..height - m, m..width - m])
        .to_owned()
}

// =============================================================================
// Tests
// =============================================================================
