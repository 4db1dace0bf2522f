//! Blind kernel estimation tool: estimates the blur kernel (and optionally
//! the sharp latent image) of a single blurry photograph.

use clap::Parser;
use ndarray::Array2;
use std::path::{Path, PathBuf};

use deblur_cli::{io, CliResult};
use deblur_core::{
    multiscale_blind_estimation, preprocess_image, EstimateConfig, IterationObserver,
};

#[derive(Parser)]
#[command(name = "estimate-kernel")]
#[command(about = "Estimate the blur kernel of a single blurry image")]
#[command(version)]
struct Cli {
    /// Blur kernel size (odd, >= 3).
    ks: usize,

    /// Input blurry image file.
    input: PathBuf,

    /// Kernel output file.
    output: PathBuf,

    /// L0 regularization weight.
    #[arg(long, default_value_t = 4e-3)]
    lambda: f32,

    /// Decay of lambda per outer iteration.
    #[arg(long = "lambda-ratio", default_value_t = 1.0 / 1.1)]
    lambda_ratio: f32,

    /// Minimum value of the L0 regularization weight.
    #[arg(long = "lambda-min", default_value_t = 1e-4)]
    lambda_min: f32,

    /// Kernel regularization weight.
    #[arg(long, default_value_t = 20.0)]
    gamma: f32,

    /// Number of iterations per scale.
    #[arg(long, default_value_t = 5)]
    iterations: usize,

    /// Disable the multiscale scheme.
    #[arg(long = "no-multiscale")]
    no_multiscale: bool,

    /// Downsampling factor.
    #[arg(long = "scale-factor", default_value_t = 0.5)]
    scale_factor: f32,

    /// Threshold the kernel at max(kernel) * kernel-threshold-max.
    #[arg(long = "kernel-threshold-max", default_value_t = 0.05)]
    kernel_threshold_max: f32,

    /// Remove isolated connected components of the kernel.
    #[arg(
        long = "remove-isolated",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    remove_isolated: bool,

    /// Output the sharp image to file.
    #[arg(long = "output-sharp")]
    output_sharp: Option<PathBuf>,

    /// Output all kernels, sharp and blurry images to this directory.
    #[arg(long)]
    debug: Option<PathBuf>,

    /// Output more information.
    #[arg(long)]
    verbose: bool,
}

/// Dumps the per-iteration state to a directory, numbering the files with
/// its own monotone counter across scales.
struct DebugDumper {
    dir: PathBuf,
    index: usize,
}

impl IterationObserver<f32> for DebugDumper {
    fn record(
        &mut self,
        _iteration: usize,
        _lambda: f32,
        kernel: &Array2<f32>,
        sharp: &Array2<f32>,
        blurry: &Array2<f32>,
    ) {
        self.index += 1;
        let dump = |name: &str, img: &Array2<f32>| {
            let path = self.dir.join(format!("{}_{:03}.png", name, self.index));
            if let Err(e) = io::save_gray_normalized(&path, img.view()) {
                log::warn!("failed to write {}: {}", path.display(), e);
            }
        };
        dump("u", sharp);
        dump("v", blurry);
        let kernel_path = self.dir.join(format!("k_{:03}.txt", self.index));
        if let Err(e) = io::save_kernel(&kernel_path, kernel.view()) {
            log::warn!("failed to write {}: {}", kernel_path.display(), e);
        }
    }
}

fn run(cli: &Cli) -> CliResult<()> {
    let image = io::load_image(&cli.input)?;

    let mut config = EstimateConfig::<f32>::new(cli.ks);
    config.lambda = cli.lambda;
    config.lambda_ratio = cli.lambda_ratio;
    config.lambda_min = cli.lambda_min;
    config.gamma = cli.gamma;
    config.iterations = cli.iterations;
    config.multiscale = !cli.no_multiscale;
    config.scalefactor = cli.scale_factor;
    config.kernel_threshold_max = cli.kernel_threshold_max;
    config.remove_isolated = cli.remove_isolated;
    config.validate()?;

    let v = preprocess_image(image.view(), &config)?;

    let mut dumper = match &cli.debug {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            Some(DebugDumper {
                dir: dir.clone(),
                index: 0,
            })
        }
        None => None,
    };
    let observer = dumper
        .as_mut()
        .map(|d| d as &mut dyn IterationObserver<f32>);

    let (kernel, sharp) = multiscale_blind_estimation(&v, &mut config, observer)?;

    io::save_kernel(&cli.output, kernel.view())?;
    if let Some(path) = &cli.output_sharp {
        save_sharp(path, &sharp)?;
    }
    Ok(())
}

fn save_sharp(path: &Path, sharp: &Array2<f32>) -> CliResult<()> {
    io::save_image(path, sharp.view().insert_axis(ndarray::Axis(0)))
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
