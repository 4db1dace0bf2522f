//! Non-blind deconvolution tool: restores an image given its blur kernel
//! using split-Bregman total-variation deconvolution.

use clap::Parser;
use std::path::PathBuf;

use deblur_cli::{io, CliResult};
use deblur_core::{deconvolve, TvDeconvConfig};

#[derive(Parser)]
#[command(name = "deconvolve")]
#[command(about = "Deconvolve an image with a known blur kernel")]
#[command(version)]
struct Cli {
    /// Input blurry image file.
    input: PathBuf,

    /// Input kernel file (image or text matrix).
    input_kernel: PathBuf,

    /// Deconvolution output file.
    output: PathBuf,

    /// Total variation regularization weight.
    #[arg(long, default_value_t = 3000.0)]
    alpha: f32,

    /// Split Bregman weight.
    #[arg(long, default_value_t = 30.0)]
    beta: f32,

    /// Number of iterations.
    #[arg(long, default_value_t = 7)]
    iterations: usize,
}

fn run(cli: &Cli) -> CliResult<()> {
    let image = io::load_image(&cli.input)?;
    let kernel = io::load_kernel(&cli.input_kernel)?;

    let config = TvDeconvConfig::<f32> {
        lambda: cli.alpha,
        gamma1: cli.beta,
        iterations: cli.iterations,
        ..Default::default()
    };
    config.validate()?;

    let restored = deconvolve(image.view(), kernel.view(), &config)?;
    io::save_image(&cli.output, restored.view())?;
    Ok(())
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
        .filter_level(log::LevelFilter::Warn)
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
