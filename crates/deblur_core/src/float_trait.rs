//! Scalar abstraction for the numerical kernels.
//!
//! Every routine in this crate is generic over [`DeblurFloat`], which pins
//! the engine to the two precisions it supports (f32 and f64) at
//! monomorphization time instead of dispatching dynamically on a scalar.
//! The trait also hands out the per-precision FFT plan cache, so f32 and
//! f64 pipelines never share or duplicate plans.

use num_traits::float::FloatConst;
use num_traits::{Float, FromPrimitive, NumAssign};
use rustfft::FftNum;
use std::fmt::Debug;
use std::iter::Sum;
use std::sync::OnceLock;

use crate::transforms::PlanCache;

/// Scalar type of all images, spectra, and kernels.
///
/// The supertraits collect exactly what the numerical code consumes:
/// ordinary float arithmetic (`Float`, `NumAssign`, `Sum`), the circle
/// constant for the taper windows (`FloatConst`), FFT sample compatibility
/// (`FftNum`), and casts from the index domain (`FromPrimitive`). The
/// conversion helpers below are defaulted on top of `FromPrimitive`; both
/// supported precisions admit total casts from f64/usize/isize, so the
/// zero fallback is unreachable in practice.
pub trait DeblurFloat:
    Float + FloatConst + FftNum + FromPrimitive + NumAssign + Sum + Debug + Send + Sync + 'static
{
    /// Narrow an f64 constant to this precision.
    #[inline]
    fn from_f64_c(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::zero)
    }

    /// Lift a pixel count or index.
    #[inline]
    fn usize_as(value: usize) -> Self {
        Self::from_usize(value).unwrap_or_else(Self::zero)
    }

    /// Lift a signed offset.
    #[inline]
    fn isize_as(value: isize) -> Self {
        Self::from_isize(value).unwrap_or_else(Self::zero)
    }

    /// The process-wide FFT plan cache for this precision.
    ///
    /// Plans are synthesized on first use for a (width, height, depth)
    /// key and live for the remainder of the process.
    fn plan_cache() -> &'static PlanCache<Self>;
}

static PLAN_CACHE_F32: OnceLock<PlanCache<f32>> = OnceLock::new();
static PLAN_CACHE_F64: OnceLock<PlanCache<f64>> = OnceLock::new();

impl DeblurFloat for f32 {
    fn plan_cache() -> &'static PlanCache<f32> {
        PLAN_CACHE_F32.get_or_init(PlanCache::new)
    }
}

impl DeblurFloat for f64 {
    fn plan_cache() -> &'static PlanCache<f64> {
        PLAN_CACHE_F64.get_or_init(PlanCache::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_conversions() {
        assert_eq!(<f32 as DeblurFloat>::usize_as(42), 42.0f32);
        assert_eq!(<f64 as DeblurFloat>::usize_as(42), 42.0f64);
        assert_eq!(<f32 as DeblurFloat>::isize_as(-5), -5.0f32);
        assert_eq!(<f64 as DeblurFloat>::isize_as(-5), -5.0f64);
    }

    #[test]
    fn test_constant_narrowing_rounds_to_nearest() {
        let narrow: f32 = DeblurFloat::from_f64_c(std::f64::consts::PI);
        assert_eq!(narrow, std::f32::consts::PI);

        let wide: f64 = DeblurFloat::from_f64_c(std::f64::consts::PI);
        assert_eq!(wide, std::f64::consts::PI);
    }

    #[test]
    fn test_circle_constant_comes_from_float_const() {
        assert_eq!(<f32 as FloatConst>::PI(), std::f32::consts::PI);
        assert_eq!(<f64 as FloatConst>::PI(), std::f64::consts::PI);
    }

    #[test]
    fn test_plan_caches_are_per_precision_singletons() {
        let first = f32::plan_cache() as *const PlanCache<f32>;
        let second = f32::plan_cache() as *const PlanCache<f32>;
        assert_eq!(first, second, "plan cache must be process-wide");

        let other = f64::plan_cache() as *const PlanCache<f64>;
        assert_ne!(first as usize, other as usize, "precisions never share plans");
    }
}
