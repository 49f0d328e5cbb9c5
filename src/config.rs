//! User-adjustable pipeline settings

use crate::error::{PhotometryError, Result};
use crate::star_detection::DetectionParams;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotometryConfig {
    /// PSF width guess in pixels, used for detection and until re-estimated
    pub fwhm_seed: f64,
    /// Detection significance in units of the clipped noise sigma
    pub threshold: f64,
    pub sigma_clip: f64,
    /// Known magnitude of the comparison star
    pub comparison_magnitude: f64,
    /// Patch size of the FWHM profile fits
    pub profile_size: usize,
    /// Fit the local background instead of holding it at the annulus estimate
    pub fit_background: bool,
    pub max_iterations: usize,
}

impl Default for PhotometryConfig {
    fn default() -> Self {
        Self {
            fwhm_seed: 5.0,
            threshold: 5.0,
            sigma_clip: 3.0,
            comparison_magnitude: 10.0,
            profile_size: 31,
            fit_background: false,
            max_iterations: 200,
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(PhotometryError::InvalidConfig {
            name,
            value: value.to_string(),
            reason: "must be finite and > 0",
        })
    }
}

/// Log a rejected value; the caller keeps its previous setting
fn rejected<T>(result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        tracing::warn!("Keeping previous setting: {}", e);
    }
    result
}

impl PhotometryConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::debug!("Loaded configuration from {}: {:?}", path.as_ref().display(), config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        positive("fwhm_seed", self.fwhm_seed)?;
        positive("threshold", self.threshold)?;
        positive("sigma_clip", self.sigma_clip)?;
        check_magnitude(self.comparison_magnitude)?;
        check_profile_size(self.profile_size)?;
        if self.max_iterations == 0 {
            return Err(PhotometryError::InvalidConfig {
                name: "max_iterations",
                value: "0".to_string(),
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    pub fn set_fwhm_seed(&mut self, value: f64) -> Result<()> {
        self.fwhm_seed = rejected(positive("fwhm_seed", value))?;
        Ok(())
    }

    pub fn set_threshold(&mut self, value: f64) -> Result<()> {
        self.threshold = rejected(positive("threshold", value))?;
        Ok(())
    }

    pub fn set_sigma_clip(&mut self, value: f64) -> Result<()> {
        self.sigma_clip = rejected(positive("sigma_clip", value))?;
        Ok(())
    }

    pub fn set_comparison_magnitude(&mut self, value: f64) -> Result<()> {
        self.comparison_magnitude = rejected(check_magnitude(value))?;
        Ok(())
    }

    pub fn set_profile_size(&mut self, value: usize) -> Result<()> {
        self.profile_size = rejected(check_profile_size(value))?;
        Ok(())
    }

    /// Detection parameters seeded from this configuration
    pub fn detection_params(&self) -> DetectionParams {
        DetectionParams::new(self.fwhm_seed, self.threshold, self.sigma_clip)
    }
}

fn check_magnitude(value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PhotometryError::InvalidConfig {
            name: "comparison_magnitude",
            value: value.to_string(),
            reason: "must be finite",
        })
    }
}

fn check_profile_size(value: usize) -> Result<usize> {
    if value >= 5 && value % 2 == 1 {
        Ok(value)
    } else {
        Err(PhotometryError::InvalidConfig {
            name: "profile_size",
            value: value.to_string(),
            reason: "must be odd and >= 5",
        })
    }
}
