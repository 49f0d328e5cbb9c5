use astro_psf::region::Region;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "astro-psf")]
#[command(about = "Differential PSF photometry of a target and a comparison star", long_about = None)]
pub struct Cli {
    /// JSON configuration file; command-line flags override its values
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (table, json, csv)
    #[arg(short, long, global = true, default_value = "table")]
    pub format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Detect stars inside a rectangular region
    Detect {
        /// FITS file to analyze
        fits_path: PathBuf,

        /// Region as x,y,width,height in pixels
        #[arg(short, long)]
        region: Region,

        /// Role assigned to the detections (target or comparison)
        #[arg(long, default_value = "target")]
        role: String,

        #[command(flatten)]
        detection: DetectionOptions,
    },

    /// Estimate the FWHM of one star from its horizontal and vertical profiles
    Fwhm {
        /// FITS file to analyze
        fits_path: PathBuf,

        #[arg(short, long)]
        x: f64,

        #[arg(short, long)]
        y: f64,

        /// Odd profile patch size in pixels
        #[arg(long)]
        size: Option<usize>,
    },

    /// Fit target and comparison stars and compute the target magnitude
    Photometry {
        /// FITS file to analyze
        fits_path: PathBuf,

        /// Target star position as x,y (repeatable; the first one is used for the magnitude)
        #[arg(long = "target", value_parser = parse_point)]
        targets: Vec<(f64, f64)>,

        /// Comparison star position as x,y (repeatable)
        #[arg(long = "comparison", value_parser = parse_point)]
        comparisons: Vec<(f64, f64)>,

        /// Detect the target stars in this region instead (x,y,width,height)
        #[arg(long, conflicts_with = "targets")]
        target_region: Option<Region>,

        /// Detect the comparison stars in this region instead (x,y,width,height)
        #[arg(long, conflicts_with = "comparisons")]
        comparison_region: Option<Region>,

        /// Known magnitude of the comparison star
        #[arg(long, allow_hyphen_values = true)]
        comp_mag: Option<f64>,

        /// Fit the local background instead of holding it fixed
        #[arg(long)]
        fit_background: bool,

        /// Odd profile patch size for the FWHM estimate
        #[arg(long)]
        profile_size: Option<usize>,

        #[command(flatten)]
        detection: DetectionOptions,
    },

    /// Compute a differential magnitude from two fluxes
    Magnitude {
        #[arg(long, allow_hyphen_values = true)]
        target_flux: f64,

        #[arg(long, allow_hyphen_values = true)]
        comp_flux: f64,

        /// Known magnitude of the comparison star
        #[arg(long, allow_hyphen_values = true)]
        comp_mag: Option<f64>,
    },
}

#[derive(Parser, Debug, Clone)]
pub struct DetectionOptions {
    /// Expected FWHM of the stars in pixels
    #[arg(long)]
    pub fwhm: Option<f64>,

    /// Detection threshold in units of the background noise sigma
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Sigma clipping factor for the background statistics
    #[arg(long)]
    pub sigma_clip: Option<f64>,
}

fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("Expected x,y but got: {}", s))?;
    let x = x
        .trim()
        .parse()
        .map_err(|_| format!("Invalid x coordinate in: {}", s))?;
    let y = y
        .trim()
        .parse()
        .map_err(|_| format!("Invalid y coordinate in: {}", s))?;
    Ok((x, y))
}
