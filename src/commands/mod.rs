pub mod detect;
pub mod fwhm;
pub mod magnitude;
pub mod photometry;

pub use detect::detect_region;
pub use fwhm::estimate_fwhm;
pub use magnitude::compute_magnitude;
pub use photometry::run_photometry;

use crate::cli::DetectionOptions;
use anyhow::{Context, Result};
use astro_psf::config::PhotometryConfig;
use astro_psf::image::Image;
use std::path::Path;

/// Configuration from an optional JSON file, defaults otherwise
pub fn load_config(path: Option<&Path>) -> Result<PhotometryConfig> {
    match path {
        Some(path) => PhotometryConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display())),
        None => Ok(PhotometryConfig::default()),
    }
}

/// Override detection settings with the values given on the command line
pub fn apply_detection_options(config: &mut PhotometryConfig, options: &DetectionOptions) -> Result<()> {
    if let Some(fwhm) = options.fwhm {
        config.set_fwhm_seed(fwhm)?;
    }
    if let Some(threshold) = options.threshold {
        config.set_threshold(threshold)?;
    }
    if let Some(sigma_clip) = options.sigma_clip {
        config.set_sigma_clip(sigma_clip)?;
    }
    Ok(())
}

pub fn load_image(path: &Path) -> Result<Image> {
    let image = Image::from_fits(path)
        .with_context(|| format!("Failed to read FITS file: {}", path.display()))?;
    tracing::info!("Loaded {} ({}x{})", path.display(), image.width(), image.height());
    Ok(image)
}

/// Render a float for CSV/table output; non-finite values become empty / "-"
fn fmt_value(value: f64, precision: usize, missing: &str) -> String {
    if value.is_finite() {
        format!("{:.*}", precision, value)
    } else {
        missing.to_string()
    }
}
