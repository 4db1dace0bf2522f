//! Blind kernel estimation: configuration, the alternating inner loop, and
//! input preprocessing.
//!
//! The inner loop alternates between the Fourier kernel estimator and the
//! L0 sharp-image predictor while decaying the sparsity weight. The kernel
//! is estimated first at each outer step using the current sharp estimate.

use ndarray::{s, Array2, ArrayView3, Axis};

use crate::edgetaper::edgetaper;
use crate::estimator::FourierKernelEstimator;
use crate::float_trait::DeblurFloat;
use crate::predictor::L0ImagePredictor;
use crate::transforms::optimal_size_down;

// =============================================================================
// Constants
// =============================================================================

/// Default L0 regularization weight
const DEFAULT_LAMBDA: f64 = 4e-3;

/// Default per-iteration decay factor of the L0 weight
const DEFAULT_LAMBDA_RATIO: f64 = 1.0 / 1.1;

/// Default floor for the L0 weight
const DEFAULT_LAMBDA_MIN: f64 = 1e-4;

/// Default kernel Tikhonov weight
const DEFAULT_GAMMA: f64 = 20.0;

/// Default number of outer iterations per scale
const DEFAULT_ITERATIONS: usize = 5;

/// Default per-level downsampling ratio
const DEFAULT_SCALEFACTOR: f64 = 0.5;

/// Default relative kernel threshold
const DEFAULT_KERNEL_THRESHOLD_MAX: f64 = 0.05;

/// Growth rate of the predictor's half-quadratic penalty
const BETA_RATE: f64 = 2.0;

/// Ceiling of the predictor's half-quadratic penalty
const BETA_MAX: f64 = 1e5;

// =============================================================================
// Types
// =============================================================================

/// Configuration for blind kernel estimation.
///
/// `lambda` and `ks` are updated in place while the estimation runs: the
/// L0 weight decays across outer iterations (and carries across scales),
/// and the kernel size follows the pyramid schedule.
#[derive(Debug, Clone)]
pub struct EstimateConfig<F: DeblurFloat> {
    /// Target kernel size (odd, >= 3).
    pub ks: usize,
    /// L0 regularization weight. Default: 4e-3
    pub lambda: F,
    /// Per-iteration decay factor of lambda. Default: 1/1.1
    pub lambda_ratio: F,
    /// Floor for lambda. Default: 1e-4
    pub lambda_min: F,
    /// Kernel Tikhonov weight. Default: 20
    pub gamma: F,
    /// Outer iterations per scale. Default: 5
    pub iterations: usize,
    /// Enable the coarse-to-fine pyramid. Default: true
    pub multiscale: bool,
    /// Downsampling ratio per pyramid level. Default: 0.5
    pub scalefactor: F,
    /// Relative kernel threshold in [0, 1). Default: 0.05
    pub kernel_threshold_max: F,
    /// Prune isolated kernel components. Default: true
    pub remove_isolated: bool,
}

impl<F: DeblurFloat> EstimateConfig<F> {
    /// Create a configuration for the given kernel size with default
    /// values for everything else.
    pub fn new(ks: usize) -> Self {
        Self {
            ks,
            lambda: F::from_f64_c(DEFAULT_LAMBDA),
            lambda_ratio: F::from_f64_c(DEFAULT_LAMBDA_RATIO),
            lambda_min: F::from_f64_c(DEFAULT_LAMBDA_MIN),
            gamma: F::from_f64_c(DEFAULT_GAMMA),
            iterations: DEFAULT_ITERATIONS,
            multiscale: true,
            scalefactor: F::from_f64_c(DEFAULT_SCALEFACTOR),
            kernel_threshold_max: F::from_f64_c(DEFAULT_KERNEL_THRESHOLD_MAX),
            remove_isolated: true,
        }
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.ks < 3 || self.ks % 2 == 0 {
            return Err(format!("ks must be odd and >= 3, got {}", self.ks));
        }
        if self.lambda <= F::zero() {
            return Err("lambda must be > 0".to_string());
        }
        if self.lambda_ratio <= F::zero() || self.lambda_ratio > F::one() {
            return Err("lambda_ratio must be in (0, 1]".to_string());
        }
        if self.lambda_min <= F::zero() {
            return Err("lambda_min must be > 0".to_string());
        }
        if self.gamma <= F::zero() {
            return Err("gamma must be > 0".to_string());
        }
        if self.iterations == 0 {
            return Err("iterations must be >= 1".to_string());
        }
        if self.scalefactor <= F::zero() || self.scalefactor >= F::one() {
            return Err("scalefactor must be in (0, 1)".to_string());
        }
        if self.kernel_threshold_max < F::zero() || self.kernel_threshold_max >= F::one() {
            return Err("kernel_threshold_max must be in [0, 1)".to_string());
        }
        Ok(())
    }
}

/// Observer of the alternating loop, called once per outer iteration.
///
/// Callers that need a monotone index across scales keep their own
/// counter in the implementing type.
pub trait IterationObserver<F: DeblurFloat> {
    fn record(
        &mut self,
        iteration: usize,
        lambda: F,
        kernel: &Array2<F>,
        sharp: &Array2<F>,
        blurry: &Array2<F>,
    );
}

// =============================================================================
// Alternating inner loop
// =============================================================================

/// Estimate the kernel and sharp image from a blurry image and an initial
/// sharp estimate at a single scale.
///
/// `config.lambda` is decayed in place, so consecutive calls continue the
/// schedule where the previous scale left off.
pub fn blind_estimation<F: DeblurFloat>(
    v: &Array2<F>,
    init_u: &Array2<F>,
    config: &mut EstimateConfig<F>,
    mut observer: Option<&mut dyn IterationObserver<F>>,
) -> Result<(Array2<F>, Array2<F>), String> {
    config.validate()?;

    let predictor = L0ImagePredictor::new(v.view());
    let estimator = FourierKernelEstimator::new(v.view(), config.ks);

    let mut u = init_u.clone();
    let mut kernel = Array2::zeros((config.ks, config.ks));

    // in case the caller lowered lambda below its floor
    config.lambda = config.lambda.max(config.lambda_min);

    let two = F::from_f64_c(2.0);
    for iteration in 0..config.iterations {
        log::debug!(
            "iteration {}/{}: lambda={:?}",
            iteration + 1,
            config.iterations,
            config.lambda
        );

        kernel = estimator.estimate(u.view(), config);
        u = predictor.predict(
            kernel.view(),
            config.lambda,
            two * config.lambda,
            F::from_f64_c(BETA_RATE),
            F::from_f64_c(BETA_MAX),
        )?;

        config.lambda = (config.lambda * config.lambda_ratio).max(config.lambda_min);

        if let Some(obs) = observer.as_deref_mut() {
            obs.record(iteration + 1, config.lambda, &kernel, &u, v);
        }
    }

    Ok((kernel, u))
}

// =============================================================================
// Preprocessing
// =============================================================================

/// Prepare a raw planar image for blind estimation: grayscale by channel
/// mean, min-max normalization to [0, 1], center crop to FFT-friendly
/// (7-smooth) dimensions, and one edgetaper pass with a constant box
/// kernel of side `ks`.
pub fn preprocess_image<F: DeblurFloat>(
    input: ArrayView3<F>,
    config: &EstimateConfig<F>,
) -> Result<Array2<F>, String> {
    config.validate()?;

    let (depth, height, width) = input.dim();
    if depth == 0 || height == 0 || width == 0 {
        return Err("empty input image".to_string());
    }

    // grayscale by channel mean
    let mut v = Array2::<F>::zeros((height, width));
    for channel in 0..depth {
        for y in 0..height {
            for x in 0..width {
                v[[y, x]] += input[[channel, y, x]];
            }
        }
    }
    let depth_f = F::usize_as(depth);
    v.mapv_inplace(|x| x / depth_f);

    // min-max normalize to [0, 1]
    let min = v
        .iter()
        .copied()
        .fold(F::infinity(), |a, b| if b < a { b } else { a });
    v.mapv_inplace(|x| x - min);
    let max = v
        .iter()
        .copied()
        .fold(F::neg_infinity(), |a, b| if b > a { b } else { a });
    if max > F::zero() {
        v.mapv_inplace(|x| x / max);
    }

    v = crop_to_optimal_size(v);

    // edgetaper with a constant box kernel
    let value = F::one() / F::usize_as(config.ks * config.ks);
    let box_kernel = Array2::from_elem((config.ks, config.ks), value);
    let tapered = edgetaper(v.view().insert_axis(Axis(0)), box_kernel.view(), 1);
    Ok(tapered.index_axis(Axis(0), 0).to_owned())
}

/// Center crop to the largest 7-smooth dimensions not exceeding the
/// input's, so transforms at the finest scale hit fast FFT lengths. Both
/// axes shrink independently and never grow.
fn crop_to_optimal_size<F: DeblurFloat>(v: Array2<F>) -> Array2<F> {
    let (height, width) = v.dim();
    let nw = optimal_size_down(width);
    let nh = optimal_size_down(height);
    if nw == width && nh == height {
        return v;
    }
    let offx = (width - nw) / 2;
    let offy = (height - nh) / 2;
    log::info!(
        "blurry image cropped from {}x{} to {}x{}",
        width,
        height,
        nw,
        nh
    );
    v.slice(s![offy..offy + nh, offx..offx + nw]).to_owned()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    // Piecewise-constant image of random binary 8x8 blocks.
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

    struct LambdaTrace {
        lambdas: Vec<f32>,
    }

    impl IterationObserver<f32> for LambdaTrace {
        fn record(
            &mut self,
            _iteration: usize,
            lambda: f32,
            _kernel: &Array2<f32>,
            _sharp: &Array2<f32>,
            _blurry: &Array2<f32>,
        ) {
            self.lambdas.push(lambda);
        }
    }

    // ==================== Config Tests ====================

    #[test]
    fn test_default_config() {
        let config: EstimateConfig<f32> = EstimateConfig::new(15);
        assert_eq!(config.ks, 15);
        assert!((config.lambda - 4e-3).abs() < 1e-9);
        assert!((config.lambda_ratio - 1.0 / 1.1).abs() < 1e-6);
        assert!((config.lambda_min - 1e-4).abs() < 1e-9);
        assert!((config.gamma - 20.0).abs() < 1e-6);
        assert_eq!(config.iterations, 5);
        assert!(config.multiscale);
        assert!((config.scalefactor - 0.5).abs() < 1e-6);
        assert!((config.kernel_threshold_max - 0.05).abs() < 1e-6);
        assert!(config.remove_isolated);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_even_ks() {
        let config: EstimateConfig<f32> = EstimateConfig::new(8);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_tiny_ks() {
        let config: EstimateConfig<f32> = EstimateConfig::new(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_bad_ranges() {
        let mut config: EstimateConfig<f32> = EstimateConfig::new(5);
        config.lambda = 0.0;
        assert!(config.validate().is_err());

        let mut config: EstimateConfig<f32> = EstimateConfig::new(5);
        config.scalefactor = 1.0;
        assert!(config.validate().is_err());

        let mut config: EstimateConfig<f32> = EstimateConfig::new(5);
        config.kernel_threshold_max = 1.0;
        assert!(config.validate().is_err());

        let mut config: EstimateConfig<f32> = EstimateConfig::new(5);
        config.lambda_ratio = 0.0;
        assert!(config.validate().is_err());
    }

    // ==================== Lambda Schedule Tests ====================

    #[test]
    fn test_lambda_schedule_hits_floor() {
        let v = blocky_image(32, 4242);
        let mut config: EstimateConfig<f32> = EstimateConfig::new(3);
        config.lambda = 1e-2;
        config.lambda_ratio = 0.5;
        config.lambda_min = 1e-3;
        config.iterations = 10;
        config.multiscale = false;

        let mut trace = LambdaTrace { lambdas: Vec::new() };
        let result = blind_estimation(&v, &v, &mut config, Some(&mut trace));
        assert!(result.is_ok());

        // 1e-2 -> 5e-3 -> 2.5e-3 -> 1.25e-3 -> floor
        assert_eq!(trace.lambdas.len(), 10);
        assert!(trace.lambdas[2] > 1e-3);
        assert!((trace.lambdas[3] - 1e-3).abs() < 1e-9, "floor hit at iteration 4");
        assert!((config.lambda - 1e-3).abs() < 1e-9);
        for &l in &trace.lambdas[3..] {
            assert!((l - 1e-3).abs() < 1e-9);
        }
    }

    // ==================== Identity Scenario ====================

    #[test]
    fn test_identity_deblurring_single_scale() {
        // sharp input, one scale, one iteration: the estimator sees
        // identical u and v and must return a unit-mass centered delta,
        // and the predictor must reproduce the input
        let v = blocky_image(64, 777);
        let mut config: EstimateConfig<f32> = EstimateConfig::new(5);
        config.iterations = 1;
        config.multiscale = false;

        let (kernel, u) = blind_estimation(&v, &v, &mut config, None).unwrap();

        assert_eq!(kernel.dim(), (5, 5));
        assert!((kernel.sum() - 1.0).abs() < 1e-5);
        assert!(kernel[[2, 2]] > 0.99);

        let rms = (v
            .iter()
            .zip(u.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            / (64.0 * 64.0))
            .sqrt();
        assert!(rms < 1e-3, "identity deconvolution rms = {}", rms);
    }

    // ==================== Preprocessing Tests ====================

    #[test]
    fn test_preprocess_grayscale_and_range() {
        let input = Array3::from_shape_fn((3, 32, 32), |(l, y, x)| {
            (l as f32 + 1.0) * ((y * 32 + x) as f32 / 1024.0)
        });
        let config: EstimateConfig<f32> = EstimateConfig::new(5);
        let v = preprocess_image(input.view(), &config).unwrap();

        assert_eq!(v.dim(), (32, 32));
        let min = v.iter().cloned().fold(f32::MAX, f32::min);
        let max = v.iter().cloned().fold(f32::MIN, f32::max);
        assert!(min >= -1e-6);
        assert!(max <= 1.0 + 1e-6);
    }

    #[test]
    fn test_preprocess_crops_to_seven_smooth() {
        let input = Array3::<f32>::from_elem((1, 97, 101), 0.5);
        let config: EstimateConfig<f32> = EstimateConfig::new(5);
        let v = preprocess_image(input.view(), &config).unwrap();

        // largest 7-smooth sizes below the inputs
        assert_eq!(v.dim(), (96, 100));
    }

    #[test]
    fn test_crop_4097x4095_hits_the_size_table_edge() {
        // 4097 sits just past the table's 4096 = 2^12; 4095 = 3^2 * 5 * 7 * 13
        // is not 7-smooth and the largest usable size below it is 4050
        let v = Array2::<f32>::zeros((4095, 4097));
        let cropped = crop_to_optimal_size(v);
        assert_eq!(cropped.dim(), (4050, 4096));
    }

    #[test]
    fn test_crop_keeps_center_content() {
        let v = Array2::from_shape_fn((13, 11), |(y, x)| (y * 11 + x) as f32);
        let cropped = crop_to_optimal_size(v.clone());

        // 12 and 10 are the nearest 7-smooth sizes; the odd leftover row
        // and column are shaved from the bottom-right
        assert_eq!(cropped.dim(), (12, 10));
        assert_eq!(cropped[[0, 0]], v[[0, 0]]);
        assert_eq!(cropped[[11, 9]], v[[11, 9]]);
    }

    #[test]
    fn test_preprocess_constant_image_defined() {
        let input = Array3::<f32>::from_elem((1, 32, 32), 3.5);
        let config: EstimateConfig<f32> = EstimateConfig::new(5);
        let v = preprocess_image(input.view(), &config).unwrap();
        assert!(v.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_preprocess_rejects_invalid_config() {
        let input = Array3::<f32>::from_elem((1, 16, 16), 0.5);
        let config: EstimateConfig<f32> = EstimateConfig::new(4);
        assert!(preprocess_image(input.view(), &config).is_err());
    }
}
