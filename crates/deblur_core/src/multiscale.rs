//! Coarse-to-fine multiscale driver.
//!
//! Builds a Gaussian pyramid of the blurry input, runs the alternating
//! estimation at each scale from coarsest to finest, and propagates the
//! sharp-image estimate across scales by bilinear upsampling. The kernel
//! is re-estimated from scratch at every level; only the sharp image
//! carries over.

use ndarray::Array2;

use crate::estimation::{blind_estimation, EstimateConfig, IterationObserver};
use crate::float_trait::DeblurFloat;
use crate::resample::{gaussian_downsample, upsample, Interpolation};

// =============================================================================
// Types
// =============================================================================

/// One pyramid level: the downsampled blurry image and the kernel size to
/// estimate at this scale.
pub struct PyramidLevel<F: DeblurFloat> {
    pub image: Array2<F>,
    pub kernel_size: usize,
}

// =============================================================================
// Pyramid
// =============================================================================

/// Smallest odd integer not less than `value`.
fn round_up_to_odd<F: DeblurFloat>(value: F) -> usize {
    let c = value.ceil().to_usize().unwrap_or(0);
    if c % 2 == 0 {
        c + 1
    } else {
        c
    }
}

/// Build the multiscale pyramid, level 0 = finest.
///
/// Each level's dimensions are `ceil(prev * scalefactor)` and its kernel
/// size is the previous one scaled and rounded up to the next odd integer.
/// Construction stops after a level whose width or height is 1, when the
/// next kernel size would fall below 3, or when the next level would be a
/// single pixel (a 1x1 level has exactly constant content, which would
/// feed zero gradients to every finer scale).
pub fn build_pyramid<F: DeblurFloat>(
    v: &Array2<F>,
    config: &EstimateConfig<F>,
) -> Result<Vec<PyramidLevel<F>>, String> {
    config.validate()?;

    let mut levels = Vec::new();
    let mut image = v.clone();
    let mut ks = config.ks;
    let inverse_factor = F::one() / config.scalefactor;

    loop {
        let (height, width) = image.dim();
        if height <= 1 || width <= 1 {
            levels.push(PyramidLevel {
                image,
                kernel_size: ks,
            });
            break;
        }

        let next_ks = round_up_to_odd(F::usize_as(ks) * config.scalefactor);
        if next_ks < 3 {
            levels.push(PyramidLevel {
                image,
                kernel_size: ks,
            });
            break;
        }

        let next_image = gaussian_downsample(image.view(), inverse_factor);
        let (next_height, next_width) = next_image.dim();
        levels.push(PyramidLevel {
            image,
            kernel_size: ks,
        });
        if next_height <= 1 && next_width <= 1 {
            break;
        }
        image = next_image;
        ks = next_ks;
    }

    Ok(levels)
}

// =============================================================================
// Driver
// =============================================================================

/// Blind kernel estimation over the full pyramid.
///
/// With `config.multiscale` disabled this is a single call to the inner
/// loop seeded with the blurry image itself.
pub fn multiscale_blind_estimation<F: DeblurFloat>(
    v: &Array2<F>,
    config: &mut EstimateConfig<F>,
    mut observer: Option<&mut dyn IterationObserver<F>>,
) -> Result<(Array2<F>, Array2<F>), String> {
    if !config.multiscale {
        return blind_estimation(v, v, config, observer);
    }

    let levels = build_pyramid(v, config)?;
    let scales = levels.len();

    let mut u = levels[scales - 1].image.clone();
    let mut kernel = Array2::zeros((config.ks, config.ks));

    for s in (0..scales).rev() {
        let level = &levels[s];
        let (height, width) = level.image.dim();
        log::debug!(
            "estimation at scale {}x{}, kernel size={}",
            width,
            height,
            level.kernel_size
        );

        config.ks = level.kernel_size;
        let observer_reborrow: Option<&mut dyn IterationObserver<F>> = match observer {
            Some(ref mut o) => Some(&mut **o),
            None => None,
        };
        let (k, sharp) = blind_estimation(&level.image, &u, config, observer_reborrow)?;
        kernel = k;
        u = sharp;

        if s > 0 {
            let (target_h, target_w) = levels[s - 1].image.dim();
            u = upsample(u.view(), target_h, target_w, Interpolation::Bilinear);
        }
    }

    Ok((kernel, u))
}

// =============================================================================
// Tests
// =============================================================================
