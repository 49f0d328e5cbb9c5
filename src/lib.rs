pub mod config;
pub mod error;
pub mod fwhm_profile;
pub mod image;
pub mod least_squares;
pub mod local_background;
pub mod magnitude;
pub mod noise_stats;
pub mod psf_fitting;
pub mod region;
pub mod session;
pub mod star_detection;

#[cfg(test)]
mod test_photometry;

// Re-export commonly used items
pub use config::PhotometryConfig;
pub use error::{FitError, PhotometryError, Result};
pub use image::Image;
pub use region::{Region, StarCandidate, StarRole};
pub use session::{PhotometryReport, PhotometrySession};
