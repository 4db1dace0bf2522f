//! Kernel post-processing applied after every kernel estimate.
//!
//! The stages run in a fixed order: clamp negatives, relative thresholding,
//! isolated-component pruning, centroid re-centering, unit-sum
//! normalization. A kernel whose total mass is zero passes through the
//! mass-dependent stages untouched; degenerate kernels are never
//! renormalized.

use ndarray::Array2;

use crate::float_trait::DeblurFloat;
use crate::labeling::{component_sums, label_components};

// =============================================================================
// Constants
// =============================================================================

/// Connected components whose mass fraction is below this floor are zeroed.
const COMPONENT_MASS_FLOOR: f64 = 0.1;

// =============================================================================
// Stages
// =============================================================================

/// Clamp negative entries to zero.
pub fn clamp_nonnegative<F: DeblurFloat>(kernel: &mut Array2<F>) {
    kernel.mapv_inplace(|v| v.max(F::zero()));
}

/// Zero every entry below `ratio * max(kernel)`.
pub fn threshold_relative<F: DeblurFloat>(kernel: &mut Array2<F>, ratio: F) {
    let max = kernel
        .iter()
        .copied()
        .fold(F::neg_infinity(), |a, b| if b > a { b } else { a });
    let tau = max * ratio;
    kernel.mapv_inplace(|v| if v < tau { F::zero() } else { v });
}

/// Normalize to unit mass, label the 8-connected support, and zero the
/// components whose mass is below the floor.
pub fn remove_isolated_components<F: DeblurFloat>(kernel: &mut Array2<F>) {
    let sum = kernel.sum();
    if sum <= F::zero() {
        return;
    }
    kernel.mapv_inplace(|v| v / sum);

    let (labels, count) = label_components(kernel.view());
    let sums = component_sums(&labels, kernel.view(), count);
    let floor = F::from_f64_c(COMPONENT_MASS_FLOOR);
    for (label, value) in labels.iter().zip(kernel.iter_mut()) {
        if sums[*label] < floor {
            *value = F::zero();
        }
    }
}

/// Translate the kernel so its intensity centroid (rounded to the nearest
/// integer) lies on the central pixel. Content shifted out is discarded and
/// vacated cells are zero.
pub fn center_kernel<F: DeblurFloat>(kernel: &mut Array2<F>) {
    let sum = kernel.sum();
    if sum <= F::zero() {
        return;
    }
    let (height, width) = kernel.dim();

    let mut cx = F::zero();
    let mut cy = F::zero();
    for ((y, x), value) in kernel.indexed_iter() {
        cx += *value * F::usize_as(x);
        cy += *value * F::usize_as(y);
    }
    let dx = (cx / sum).round().to_isize().unwrap_or(0);
    let dy = (cy / sum).round().to_isize().unwrap_or(0);

    let copy = kernel.clone();
    kernel.fill(F::zero());
    for y in 0..height {
        for x in 0..width {
            let sx = x as isize + dx - (width / 2) as isize;
            let sy = y as isize + dy - (height / 2) as isize;
            if sx >= 0 && (sx as usize) < width && sy >= 0 && (sy as usize) < height {
                kernel[[y, x]] = copy[[sy as usize, sx as usize]];
            }
        }
    }
}

/// Divide through so the kernel sums to one; a zero-mass kernel is left
/// unchanged.
pub fn normalize<F: DeblurFloat>(kernel: &mut Array2<F>) {
    let sum = kernel.sum();
    if sum > F::zero() {
        kernel.mapv_inplace(|v| v / sum);
    }
}

/// Run the full post-processing chain on a fresh kernel estimate.
pub fn post_process<F: DeblurFloat>(
    kernel: &mut Array2<F>,
    kernel_threshold_max: F,
    remove_isolated: bool,
) {
    clamp_nonnegative(kernel);
    if kernel_threshold_max > F::zero() {
        threshold_relative(kernel, kernel_threshold_max);
    }
    if remove_isolated {
        remove_isolated_components(kernel);
    }
    center_kernel(kernel);
    normalize(kernel);
}

// =============================================================================
// Tests
// =============================================================================
