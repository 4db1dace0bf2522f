//! Shared plumbing for the deblurring command-line tools: raster and
//! kernel file I/O on top of the core's planar array convention.

pub mod io;

pub type CliError = Box<dyn std::error::Error>;
pub type CliResult<T> = Result<T, CliError>;
