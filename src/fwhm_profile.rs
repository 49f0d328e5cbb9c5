/// FWHM estimation from 1D brightness cross-sections
/// A Gaussian-plus-offset is fitted independently to the horizontal and the
/// vertical profile through the star; each axis succeeds or fails on its own.
use crate::error::{FitError, PhotometryError, Result};
use crate::least_squares::{LevenbergMarquardt, ModelFunction};
use crate::region::StarRole;
use ndarray::{s, ArrayView1, ArrayView2};
use serde::Serialize;

/// FWHM = GAUSSIAN_FWHM_FACTOR * sigma
pub const GAUSSIAN_FWHM_FACTOR: f64 = 2.3548;

/// Initial sigma guess in pixels
const INITIAL_SIGMA: f64 = 3.0;

/// `A * exp(-(t - mu)^2 / (2 sigma^2)) + C`, params `[A, mu, sigma, C]`
pub struct Gaussian1D;

impl ModelFunction for Gaussian1D {
    type Coord = f64;

    fn value(&self, t: f64, params: &[f64]) -> f64 {
        let (a, mu, sigma, c) = (params[0], params[1], params[2], params[3]);
        let d = t - mu;
        a * (-d * d / (2.0 * sigma * sigma)).exp() + c
    }

    fn gradient(&self, t: f64, params: &[f64], grad: &mut [f64]) {
        let (a, mu, sigma) = (params[0], params[1], params[2]);
        let d = t - mu;
        let s2 = sigma * sigma;
        let e = (-d * d / (2.0 * s2)).exp();
        grad[0] = e;
        grad[1] = a * e * d / s2;
        grad[2] = a * e * d * d / (s2 * sigma);
        grad[3] = 1.0;
    }
}

/// Fit outcome for one profile axis. Invalid axes carry `NaN` values.
#[derive(Debug, Clone, Serialize)]
pub struct AxisFit {
    pub fwhm: f64,
    pub sigma: f64,
    pub amplitude: f64,
    /// Fitted centre in patch pixels
    pub mean: f64,
    pub offset: f64,
    pub success: bool,
    #[serde(skip)]
    pub error: Option<FitError>,
}

impl AxisFit {
    fn failed(error: FitError) -> Self {
        Self {
            fwhm: f64::NAN,
            sigma: f64::NAN,
            amplitude: f64::NAN,
            mean: f64::NAN,
            offset: f64::NAN,
            success: false,
            error: Some(error),
        }
    }

    /// FWHM when the fit succeeded with a finite value
    pub fn valid_fwhm(&self) -> Option<f64> {
        (self.success && self.fwhm.is_finite()).then_some(self.fwhm)
    }

    pub fn failure_reason(&self) -> String {
        match &self.error {
            Some(e) => e.to_string(),
            None => "invalid result".to_string(),
        }
    }
}

/// Per-axis FWHM estimates around one star
#[derive(Debug, Clone, Serialize)]
pub struct FwhmProfile {
    /// Integer pixel the patch is centred on
    pub center_x: i64,
    pub center_y: i64,
    pub size: usize,
    pub x: AxisFit,
    pub y: AxisFit,
}

impl FwhmProfile {
    pub fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
        [&self.x, &self.y].into_iter().filter_map(|axis| axis.valid_fwhm())
    }
}

/// Estimate the FWHM of the star at (`x0`, `y0`) from two perpendicular profiles.
///
/// The centre is rounded to the nearest pixel and the `size` x `size` patch
/// around it must lie entirely inside the image, otherwise
/// [`PhotometryError::PatchOutOfBounds`] is returned. Fit failures never
/// produce an error; they mark the affected axis invalid.
pub fn estimate_fwhm_1d_profile(
    image: &ArrayView2<f64>,
    x0: f64,
    y0: f64,
    size: usize,
) -> Result<FwhmProfile> {
    estimate_fwhm_with(image, x0, y0, size, &LevenbergMarquardt::default())
}

pub fn estimate_fwhm_with(
    image: &ArrayView2<f64>,
    x0: f64,
    y0: f64,
    size: usize,
    fitter: &LevenbergMarquardt,
) -> Result<FwhmProfile> {
    if size < 5 || size % 2 == 0 {
        return Err(PhotometryError::InvalidPatchSize(size));
    }

    let (height, width) = image.dim();
    let half = (size / 2) as f64;
    let cx = x0.round_ties_even();
    let cy = y0.round_ties_even();

    // Bounds are checked in f64 so huge coordinates cannot overflow the casts
    let inside = cx.is_finite()
        && cy.is_finite()
        && cx - half >= 0.0
        && cy - half >= 0.0
        && cx + half < width as f64
        && cy + half < height as f64;
    if !inside {
        return Err(PhotometryError::PatchOutOfBounds {
            x: cx as i64,
            y: cy as i64,
            size,
            width,
            height,
        });
    }

    let (cxu, cyu, halfu) = (cx as usize, cy as usize, size / 2);
    let (cx, cy) = (cxu as i64, cyu as i64);
    let profile_x = image.slice(s![cyu, cxu - halfu..=cxu + halfu]);
    let profile_y = image.slice(s![cyu - halfu..=cyu + halfu, cxu]);

    let x = fit_profile(&profile_x, fitter);
    let y = fit_profile(&profile_y, fitter);

    for (axis_name, axis) in [("x", &x), ("y", &y)] {
        match axis.valid_fwhm() {
            Some(fwhm) => tracing::debug!(
                "FWHM_{} at ({}, {}): {:.3} px (sigma {:.3})",
                axis_name,
                cx,
                cy,
                fwhm,
                axis.sigma
            ),
            None => tracing::warn!(
                "FWHM_{} fit at ({}, {}) failed: {}",
                axis_name,
                cx,
                cy,
                axis.failure_reason()
            ),
        }
    }

    Ok(FwhmProfile {
        center_x: cx,
        center_y: cy,
        size,
        x,
        y,
    })
}

fn fit_profile(profile: &ArrayView1<f64>, fitter: &LevenbergMarquardt) -> AxisFit {
    let values: Vec<f64> = profile.iter().copied().collect();
    let coords: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();

    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let initial = [max - min, (values.len() / 2) as f64, INITIAL_SIGMA, min];

    match fitter.fit(&Gaussian1D, &coords, &values, &initial, None) {
        Ok(fit) => {
            let sigma = fit.params[2].abs();
            AxisFit {
                fwhm: GAUSSIAN_FWHM_FACTOR * sigma,
                sigma,
                amplitude: fit.params[0],
                mean: fit.params[1],
                offset: fit.params[3],
                success: true,
                error: None,
            }
        }
        Err(e) => AxisFit::failed(e),
    }
}

/// Mean of every valid axis estimate across the given stars.
///
/// Fails when no axis produced a usable value; the error names each failed
/// axis so the caller can report which star and axis went wrong.
pub fn combine_fwhm(profiles: &[(StarRole, &FwhmProfile)]) -> Result<f64> {
    let values: Vec<f64> = profiles
        .iter()
        .flat_map(|(_, profile)| profile.valid_values())
        .collect();

    if values.is_empty() {
        let details = profiles
            .iter()
            .flat_map(|(role, profile)| {
                [("x", &profile.x), ("y", &profile.y)]
                    .into_iter()
                    .map(move |(axis_name, axis)| {
                        format!("{} FWHM_{}: {}", role, axis_name, axis.failure_reason())
                    })
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Err(PhotometryError::FwhmEstimationFailed {
            details: if details.is_empty() {
                "no stars supplied".to_string()
            } else {
                details
            },
        });
    }

    Ok(values.iter().sum::<f64>() / values.len() as f64)
}
