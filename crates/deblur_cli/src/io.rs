//! Image and kernel file I/O.
//!
//! Rasters are exchanged with the core as planar (channels, height, width)
//! f32 arrays in [0, 1]. Kernels travel either as images or as a
//! whitespace-separated text matrix: rows on lines, entries separated by
//! whitespace, `#` starting a line comment, all rows with equal column
//! counts.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use std::fs;
use std::path::Path;

use crate::CliResult;

/// Extensions treated as the text kernel format.
const TEXT_KERNEL_EXTENSIONS: [&str; 3] = ["txt", "asc", "dat"];

fn is_text_kernel_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            TEXT_KERNEL_EXTENSIONS.iter().any(|&t| t == lower)
        })
        .unwrap_or(true)
}

// =============================================================================
// Rasters
// =============================================================================

/// Load a raster as a planar f32 array in [0, 1]. Grayscale files keep one
/// channel; everything else is converted to three.
pub fn load_image(path: &Path) -> CliResult<Array3<f32>> {
    let img = image::open(path)?;

    if img.color().has_color() {
        let rgb = img.to_rgb32f();
        let (width, height) = (rgb.width() as usize, rgb.height() as usize);
        let mut out = Array3::zeros((3, height, width));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for channel in 0..3 {
                out[[channel, y as usize, x as usize]] = pixel.0[channel];
            }
        }
        Ok(out)
    } else {
        let gray = img.to_luma32f();
        let (width, height) = (gray.width() as usize, gray.height() as usize);
        let mut out = Array3::zeros((1, height, width));
        for (x, y, pixel) in gray.enumerate_pixels() {
            out[[0, y as usize, x as usize]] = pixel.0[0];
        }
        Ok(out)
    }
}

/// Save a planar array as an 8-bit raster, clamping to [0, 1].
pub fn save_image(path: &Path, image: ArrayView3<f32>) -> CliResult<()> {
    let (depth, height, width) = image.dim();
    let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;

    match depth {
        1 => {
            let buffer = image::GrayImage::from_fn(width as u32, height as u32, |x, y| {
                image::Luma([quantize(image[[0, y as usize, x as usize]])])
            });
            buffer.save(path)?;
        }
        3 => {
            let buffer = image::RgbImage::from_fn(width as u32, height as u32, |x, y| {
                image::Rgb([
                    quantize(image[[0, y as usize, x as usize]]),
                    quantize(image[[1, y as usize, x as usize]]),
                    quantize(image[[2, y as usize, x as usize]]),
                ])
            });
            buffer.save(path)?;
        }
        _ => return Err(format!("unsupported channel count {}", depth).into()),
    }
    Ok(())
}

/// Save a single-channel array as an 8-bit raster, normalizing by its
/// maximum so small-valued kernels remain visible.
pub fn save_gray_normalized(path: &Path, image: ArrayView2<f32>) -> CliResult<()> {
    let (height, width) = image.dim();
    let max = image.iter().cloned().fold(f32::MIN, f32::max);
    let scale = if max > 0.0 { 1.0 / max } else { 1.0 };
    let buffer = image::GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let v = (image[[y as usize, x as usize]] * scale).clamp(0.0, 1.0);
        image::Luma([(v * 255.0).round() as u8])
    });
    buffer.save(path)?;
    Ok(())
}

// =============================================================================
// Kernels
// =============================================================================

/// Parse the text kernel format.
pub fn parse_kernel_text(content: &str) -> CliResult<Array2<f32>> {
    let mut rows: Vec<Vec<f32>> = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("");
        let entries: Vec<f32> = line
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f32>()
                    .map_err(|e| format!("line {}: bad entry {:?}: {}", line_no + 1, token, e))
            })
            .collect::<Result<_, _>>()?;
        if entries.is_empty() {
            continue;
        }
        if let Some(first) = rows.first() {
            if entries.len() != first.len() {
                return Err(format!(
                    "line {}: expected {} columns, got {}",
                    line_no + 1,
                    first.len(),
                    entries.len()
                )
                .into());
            }
        }
        rows.push(entries);
    }

    if rows.is_empty() {
        return Err("kernel file contains no data".into());
    }
    let height = rows.len();
    let width = rows[0].len();
    Ok(Array2::from_shape_fn((height, width), |(y, x)| rows[y][x]))
}

/// Serialize a kernel to the text format.
pub fn format_kernel_text(kernel: ArrayView2<f32>) -> String {
    let (height, width) = kernel.dim();
    let mut out = String::new();
    for y in 0..height {
        for x in 0..width {
            if x > 0 {
                out.push(' ');
            }
            out.push_str(&format!("{:e}", kernel[[y, x]]));
        }
        out.push('\n');
    }
    out
}

/// Read a kernel from a text matrix or an image file, normalized to unit
/// mass.
pub fn load_kernel(path: &Path) -> CliResult<Array2<f32>> {
    let mut kernel = if is_text_kernel_path(path) {
        parse_kernel_text(&fs::read_to_string(path)?)?
    } else {
        let planar = load_image(path)?;
        let (depth, height, width) = planar.dim();
        let depth_f = depth as f32;
        Array2::from_shape_fn((height, width), |(y, x)| {
            (0..depth).map(|l| planar[[l, y, x]]).sum::<f32>() / depth_f
        })
    };

    let sum: f32 = kernel.sum();
    if sum <= 0.0 {
        return Err("kernel has no mass".into());
    }
    kernel.mapv_inplace(|v| v / sum);
    Ok(kernel)
}

/// Write a kernel as text or, for image extensions, as a max-normalized
/// 8-bit raster.
pub fn save_kernel(path: &Path, kernel: ArrayView2<f32>) -> CliResult<()> {
    if is_text_kernel_path(path) {
        fs::write(path, format_kernel_text(kernel))?;
        Ok(())
    } else {
        save_gray_normalized(path, kernel)
    }
}

// =============================================================================
// Tests
// =============================================================================
