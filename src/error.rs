//! Error types for the photometry pipeline

use crate::region::StarRole;
use thiserror::Error;

/// Errors that stop a single pipeline call.
///
/// Fit failures of one axis or one star are not represented here; they are
/// carried as [`FitError`] inside the per-axis and per-star results so that
/// sibling fits keep running.
#[derive(Error, Debug)]
pub enum PhotometryError {
    /// Profile patch would extend past the image edge
    #[error(
        "patch of size {size} centered at ({x}, {y}) extends outside the {width}x{height} image"
    )]
    PatchOutOfBounds {
        x: i64,
        y: i64,
        size: usize,
        width: usize,
        height: usize,
    },

    /// Profile patch size must be odd and large enough to fit four parameters
    #[error("patch size must be an odd number >= 5, got {0}")]
    InvalidPatchSize(usize),

    /// Region is empty or not contained in the image
    #[error("region {width}x{height} at ({x0}, {y0}) is not inside the {image_width}x{image_height} image")]
    InvalidRegion {
        x0: usize,
        y0: usize,
        width: usize,
        height: usize,
        image_width: usize,
        image_height: usize,
    },

    /// No coordinates were selected for a role
    #[error("no {role} star coordinates have been selected")]
    MissingStar { role: StarRole },

    #[error("comparison flux must be finite and strictly positive, got {flux}")]
    NonPositiveComparisonFlux { flux: f64 },

    #[error("target flux must be strictly positive, got {flux}")]
    NonPositiveTargetFlux { flux: f64 },

    #[error("{role} flux is not finite ({flux})")]
    NonFiniteFlux { role: StarRole, flux: f64 },

    #[error("comparison magnitude must be finite, got {0}")]
    NonFiniteMagnitude(f64),

    /// A star's PSF fit is not usable for magnitude math
    #[error("PSF fit for {role} star #{index} failed: {reason}")]
    StarFitFailed {
        role: StarRole,
        index: usize,
        reason: String,
    },

    /// Every FWHM axis fit failed
    #[error("FWHM estimation failed: {details}")]
    FwhmEstimationFailed { details: String },

    /// Configuration value rejected at the boundary
    #[error("invalid configuration: {name} = {value} ({reason})")]
    InvalidConfig {
        name: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("image data size mismatch: expected {expected} pixels, got {actual}")]
    ImageSize { expected: usize, actual: usize },

    #[error("FITS error: {0}")]
    Fits(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for photometry operations
pub type Result<T> = std::result::Result<T, PhotometryError>;

/// Reasons a single nonlinear least-squares fit was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("not enough data points: {points} points for {params} parameters")]
    NotEnoughData { points: usize, params: usize },

    #[error("did not converge within {iterations} iterations")]
    NotConverged { iterations: usize },

    #[error("singular Jacobian, parameters are not constrained by the data")]
    SingularJacobian,

    #[error("fit produced non-finite parameters")]
    NonFinite,
}
