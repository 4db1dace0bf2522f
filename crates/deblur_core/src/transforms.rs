//! FFT transforms, plan caching, and frequency-domain helpers.
//!
//! 2D transforms are composed from cached 1D row/column plans. The plan
//! cache is process-wide and keyed by (width, height, depth); plan synthesis
//! is serialized by a mutex while plan execution is freely concurrent.
//!
//! The convention is an unnormalized forward transform with the
//! 1/(width*height) factor applied on inverse.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, ArrayViewMut2, Axis};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::float_trait::DeblurFloat;

// =============================================================================
// Constants
// =============================================================================

/// Upper bound (inclusive) of the 7-smooth size table.
const OPTIMAL_TABLE_MAX: usize = 4096;

// =============================================================================
// Plan cache
// =============================================================================

/// Row/column 1D plans composing a 2D transform of a fixed size.
pub struct Plans2d<F: DeblurFloat> {
    row_forward: Arc<dyn Fft<F>>,
    row_inverse: Arc<dyn Fft<F>>,
    col_forward: Arc<dyn Fft<F>>,
    col_inverse: Arc<dyn Fft<F>>,
}

/// Process-wide FFT plan cache keyed by (width, height, depth).
///
/// Plans are created on first use and never evicted. Creation is guarded by
/// a mutex; the returned plan set is shareable for concurrent execution.
pub struct PlanCache<F: DeblurFloat> {
    plans: Mutex<HashMap<(usize, usize, usize), Arc<Plans2d<F>>>>,
}

impl<F: DeblurFloat> PlanCache<F> {
    pub fn new() -> Self {
        Self {
            plans: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the plan set for the given dimensions, synthesizing it on
    /// first use.
    pub fn get(&self, width: usize, height: usize, depth: usize) -> Arc<Plans2d<F>> {
        let mut cache = self.plans.lock().expect("fft plan cache poisoned");
        cache
            .entry((width, height, depth))
            .or_insert_with(|| {
                let mut planner = FftPlanner::new();
                Arc::new(Plans2d {
                    row_forward: planner.plan_fft_forward(width),
                    row_inverse: planner.plan_fft_inverse(width),
                    col_forward: planner.plan_fft_forward(height),
                    col_inverse: planner.plan_fft_inverse(height),
                })
            })
            .clone()
    }
}

impl<F: DeblurFloat> Default for PlanCache<F> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// 2D transforms
// =============================================================================

/// Run 1D plans over the rows and then the columns of a plane, in place.
fn transform_plane<F: DeblurFloat>(
    plane: &mut ArrayViewMut2<Complex<F>>,
    row_plan: &Arc<dyn Fft<F>>,
    col_plan: &Arc<dyn Fft<F>>,
) {
    let (height, width) = plane.dim();

    {
        let slice = plane.as_slice_mut().expect("contiguous spectrum buffer");
        slice
            .par_chunks_exact_mut(width)
            .for_each(|row| row_plan.process(row));
    }

    // Columns become rows of the transposed copy.
    let mut transposed = plane.t().as_standard_layout().to_owned();
    {
        let slice = transposed
            .as_slice_mut()
            .expect("contiguous spectrum buffer");
        slice
            .par_chunks_exact_mut(height)
            .for_each(|col| col_plan.process(col));
    }
    plane.assign(&transposed.t());
}

/// Forward 2D FFT of a real image. Returns the unnormalized spectrum.
pub fn fft2<F: DeblurFloat>(input: ArrayView2<F>) -> Array2<Complex<F>> {
    let (height, width) = input.dim();
    let plans = F::plan_cache().get(width, height, 1);
    let mut out = input.mapv(|v| Complex::new(v, F::zero()));
    transform_plane(&mut out.view_mut(), &plans.row_forward, &plans.col_forward);
    out
}

/// Forward 2D FFT of a complex image. Returns the unnormalized spectrum.
pub fn fft2_c2c<F: DeblurFloat>(input: &Array2<Complex<F>>) -> Array2<Complex<F>> {
    let (height, width) = input.dim();
    let plans = F::plan_cache().get(width, height, 1);
    let mut out = input.clone();
    transform_plane(&mut out.view_mut(), &plans.row_forward, &plans.col_forward);
    out
}

/// Inverse 2D FFT of a complex spectrum, normalized by 1/(width*height).
pub fn ifft2_c2c<F: DeblurFloat>(input: &Array2<Complex<F>>) -> Array2<Complex<F>> {
    let (height, width) = input.dim();
    let plans = F::plan_cache().get(width, height, 1);
    let mut out = input.clone();
    transform_plane(&mut out.view_mut(), &plans.row_inverse, &plans.col_inverse);
    let norm = F::one() / F::usize_as(width * height);
    out.mapv_inplace(|c| c * norm);
    out
}

/// Inverse 2D FFT returning the real part of the normalized result.
pub fn ifft2_real<F: DeblurFloat>(input: &Array2<Complex<F>>) -> Array2<F> {
    ifft2_c2c(input).mapv(|c| c.re)
}

/// Forward 2D FFT of every channel of a planar (depth, height, width) image.
pub fn fft2_planar<F: DeblurFloat>(input: ArrayView3<F>) -> Array3<Complex<F>> {
    let (depth, height, width) = input.dim();
    let plans = F::plan_cache().get(width, height, depth);
    let mut out = input.mapv(|v| Complex::new(v, F::zero()));
    for channel in 0..depth {
        let mut plane = out.index_axis_mut(Axis(0), channel);
        transform_plane(&mut plane, &plans.row_forward, &plans.col_forward);
    }
    out
}

/// Inverse 2D FFT of every channel of a planar spectrum, returning the
/// normalized real parts.
pub fn ifft2_real_planar<F: DeblurFloat>(input: &Array3<Complex<F>>) -> Array3<F> {
    let (depth, height, width) = input.dim();
    let plans = F::plan_cache().get(width, height, depth);
    let mut work = input.clone();
    for channel in 0..depth {
        let mut plane = work.index_axis_mut(Axis(0), channel);
        transform_plane(&mut plane, &plans.row_inverse, &plans.col_inverse);
    }
    let norm = F::one() / F::usize_as(width * height);
    work.mapv(|c| c.re * norm)
}

// =============================================================================
// Shifts and kernel placement
// =============================================================================

/// Cyclic shift moving the DC sample from (0, 0) to
/// (height / 2, width / 2).
pub fn fftshift<T: Clone>(input: ArrayView2<T>) -> Array2<T> {
    let (height, width) = input.dim();
    let sy = height / 2;
    let sx = width / 2;
    Array2::from_shape_fn((height, width), |(y, x)| {
        input[[(y + height - sy) % height, (x + width - sx) % width]].clone()
    })
}

/// Inverse of [`fftshift`]; their composition is the identity.
pub fn ifftshift<T: Clone>(input: ArrayView2<T>) -> Array2<T> {
    let (height, width) = input.dim();
    let sy = height.div_ceil(2);
    let sx = width.div_ceil(2);
    Array2::from_shape_fn((height, width), |(y, x)| {
        input[[(y + height - sy) % height, (x + width - sx) % width]].clone()
    })
}

/// Place a kernel into a (height, width) image with wrap-around so its
/// geometric center cell lands on index (0, 0).
///
/// Indices wrap modularly, so the placement stays defined even when the
/// kernel exceeds the target; overlapping cells keep the last write.
pub fn padcirc<F: DeblurFloat>(kernel: ArrayView2<F>, height: usize, width: usize) -> Array2<F> {
    let (kh, kw) = kernel.dim();
    let hh = (kh / 2) as isize;
    let ww = (kw / 2) as isize;
    let mut out = Array2::zeros((height, width));
    for y in 0..kh {
        for x in 0..kw {
            let oy = (y as isize - hh).rem_euclid(height as isize) as usize;
            let ox = (x as isize - ww).rem_euclid(width as isize) as usize;
            out[[oy, ox]] = kernel[[y, x]];
        }
    }
    out
}

/// Optical transfer function of a kernel on a (height, width) grid:
/// wrap-around placement followed by a forward FFT.
pub fn psf2otf<F: DeblurFloat>(
    kernel: ArrayView2<F>,
    height: usize,
    width: usize,
) -> Array2<Complex<F>> {
    fft2(padcirc(kernel, height, width).view())
}

/// Spectrum of the forward-difference gradient operators on a
/// (height, width) grid: |F(dx)|^2 + |F(dy)|^2.
pub fn gradient_operator_spectrum<F: DeblurFloat>(height: usize, width: usize) -> Array2<F> {
    let mut dx = Array2::<F>::zeros((3, 3));
    dx[[1, 1]] = -F::one();
    dx[[1, 2]] = F::one();
    let mut dy = Array2::<F>::zeros((3, 3));
    dy[[1, 1]] = -F::one();
    dy[[2, 1]] = F::one();

    let dx_otf = psf2otf(dx.view(), height, width);
    let dy_otf = psf2otf(dy.view(), height, width);
    Array2::from_shape_fn((height, width), |i| {
        dx_otf[i].norm_sqr() + dy_otf[i].norm_sqr()
    })
}

// =============================================================================
// FFT-friendly sizes
// =============================================================================

static OPTIMAL_TABLE: OnceLock<Vec<bool>> = OnceLock::new();

/// Membership table of 7-smooth integers (2^a * 3^b * 5^c * 7^d) up to
/// `OPTIMAL_TABLE_MAX` inclusive.
fn seven_smooth_table() -> &'static [bool] {
    OPTIMAL_TABLE.get_or_init(|| {
        let mut table = vec![false; OPTIMAL_TABLE_MAX + 1];
        let mut e2 = 1usize;
        while e2 <= OPTIMAL_TABLE_MAX {
            let mut e3 = e2;
            while e3 <= OPTIMAL_TABLE_MAX {
                let mut e5 = e3;
                while e5 <= OPTIMAL_TABLE_MAX {
                    let mut e7 = e5;
                    while e7 <= OPTIMAL_TABLE_MAX {
                        table[e7] = true;
                        e7 *= 7;
                    }
                    e5 *= 5;
                }
                e3 *= 3;
            }
            e2 *= 2;
        }
        table
    })
}

/// Largest 7-smooth integer not greater than `size`, falling back to the
/// (clamped) input when none exists in range.
pub fn optimal_size_down(size: usize) -> usize {
    let table = seven_smooth_table();
    let mut s = size.min(OPTIMAL_TABLE_MAX);
    while s > 0 {
        if table[s] {
            return s;
        }
        s -= 1;
    }
    size
}

/// Smallest 7-smooth integer not less than `size`, falling back to the
/// input when none exists in range.
pub fn optimal_size_up(size: usize) -> usize {
    let table = seven_smooth_table();
    for s in size..=OPTIMAL_TABLE_MAX {
        if table[s] {
            return s;
        }
    }
    size
}

// =============================================================================
// Tests
// =============================================================================
