//! Sharp-image predictor with an L0 gradient prior.
//!
//! Solves, in the Fourier domain, an approximation of
//! `argmin_u ||K * u - v||^2 + lambda * card{ |grad u| > 0 }`
//! by half-quadratic splitting: an auxiliary gradient field is
//! hard-thresholded, and the quadratic coupling weight beta grows
//! geometrically until it reaches its ceiling.

use ndarray::{Array2, ArrayView2};
use rustfft::num_complex::Complex;

use crate::float_trait::DeblurFloat;
use crate::transforms::{fft2, gradient_operator_spectrum, ifft2_real, psf2otf};
use crate::utils::{circular_divergence, circular_gradients};

/// Predictor instance tied to one blurry image; the spectra precomputed
/// here are invalidated when the image changes, so a new predictor is
/// created per scale.
pub struct L0ImagePredictor<F: DeblurFloat> {
    fv: Array2<Complex<F>>,
    dtd: Array2<F>,
    v: Array2<F>,
}

impl<F: DeblurFloat> L0ImagePredictor<F> {
    pub fn new(v: ArrayView2<F>) -> Self {
        let (height, width) = v.dim();
        Self {
            fv: fft2(v),
            dtd: gradient_operator_spectrum(height, width),
            v: v.to_owned(),
        }
    }

    /// Run the half-quadratic continuation for one kernel and weight
    /// schedule. The estimate always restarts from the blurry image.
    pub fn predict(
        &self,
        kernel: ArrayView2<F>,
        lambda: F,
        beta_init: F,
        beta_rate: F,
        beta_max: F,
    ) -> Result<Array2<F>, String> {
        let (kh, kw) = kernel.dim();
        if kw % 2 == 0 || kh % 2 == 0 {
            return Err(format!(
                "predictor requires an odd-sized kernel, got {}x{}",
                kw, kh
            ));
        }

        let (height, width) = self.v.dim();
        let k_otf = psf2otf(kernel, height, width);
        let ktf = Array2::from_shape_fn((height, width), |i| k_otf[i].conj() * self.fv[i]);
        let ktk = k_otf.mapv(|c| c.norm_sqr());

        let mut u = self.v.clone();
        let mut beta = beta_init;
        while beta < beta_max {
            let (mut gx, mut gy) = circular_gradients(u.view());

            // hard-thresholding on the squared gradient magnitude
            let threshold = lambda / beta;
            for (px, py) in gx.iter_mut().zip(gy.iter_mut()) {
                let n = *px * *px + *py * *py;
                if n < threshold {
                    *px = F::zero();
                    *py = F::zero();
                }
            }

            let divergence = circular_divergence(gx.view(), gy.view());
            let adj = fft2(divergence.view());

            let spectrum = Array2::from_shape_fn((height, width), |i| {
                let num = ktf[i] - adj[i] * beta;
                let denom = ktk[i] + self.dtd[i] * beta;
                if denom > F::zero() {
                    num / denom
                } else {
                    Complex::new(F::zero(), F::zero())
                }
            });
            u = ifft2_real(&spectrum);

            beta = beta * beta_rate;
        }

        Ok(u)
    }
}

// =============================================================================
// Tests
// =============================================================================
