//! PSF photometry with a fixed-width circular Gaussian
//!
//! Each star is fitted on its own window: position and flux are free, the
//! local sky comes from an annulus and is optionally refined by the fit.

use crate::config::PhotometryConfig;
use crate::error::{FitError, PhotometryError, Result};
use crate::fwhm_profile::GAUSSIAN_FWHM_FACTOR;
use crate::image::clipped_span;
use crate::least_squares::{LevenbergMarquardt, ModelFunction};
use crate::local_background::LocalBackground;
use crate::region::StarRole;
use ndarray::ArrayView2;
use rayon::prelude::*;
use serde::Serialize;
use std::f64::consts::PI;

/// Fit window was clipped by the image edge
pub const FLAG_PARTIAL_WINDOW: u32 = 1;
/// Least-squares fit did not converge
pub const FLAG_NOT_CONVERGED: u32 = 2;
/// Fitted centre left the fit window
pub const FLAG_OUTSIDE_WINDOW: u32 = 4;
/// Fitted flux is zero or negative
pub const FLAG_NEGATIVE_FLUX: u32 = 8;
/// Annulus held no pixel to estimate the local background from
pub const FLAG_NO_BACKGROUND: u32 = 16;

/// Unit-volume circular Gaussian, params `[x0, y0, flux]` or `[x0, y0, flux, background]`.
/// With three parameters the background is the fixed `background` field.
#[derive(Debug, Clone, Copy)]
pub struct CircularGaussianPsf {
    pub sigma: f64,
    pub background: f64,
}

impl CircularGaussianPsf {
    pub fn from_fwhm(fwhm: f64) -> Self {
        Self {
            sigma: fwhm / GAUSSIAN_FWHM_FACTOR,
            background: 0.0,
        }
    }

    fn with_background(self, background: f64) -> Self {
        Self { background, ..self }
    }

    fn profile(&self, x: f64, y: f64, x0: f64, y0: f64) -> f64 {
        let s2 = self.sigma * self.sigma;
        let dx = x - x0;
        let dy = y - y0;
        (-(dx * dx + dy * dy) / (2.0 * s2)).exp() / (2.0 * PI * s2)
    }
}

impl ModelFunction for CircularGaussianPsf {
    type Coord = (f64, f64);

    fn value(&self, (x, y): (f64, f64), params: &[f64]) -> f64 {
        let background = params.get(3).copied().unwrap_or(self.background);
        params[2] * self.profile(x, y, params[0], params[1]) + background
    }

    fn gradient(&self, (x, y): (f64, f64), params: &[f64], grad: &mut [f64]) {
        let (x0, y0, flux) = (params[0], params[1], params[2]);
        let s2 = self.sigma * self.sigma;
        let g = self.profile(x, y, x0, y0);

        grad[0] = flux * g * (x - x0) / s2;
        grad[1] = flux * g * (y - y0) / s2;
        grad[2] = g;
        if let Some(slot) = grad.get_mut(3) {
            *slot = 1.0;
        }
    }
}

/// Fit outcome for one star. Failed fits carry `NaN` in the fitted fields.
#[derive(Debug, Clone, Serialize)]
pub struct PhotometryResult {
    /// 1-based position in the input list
    pub id: usize,
    pub role: StarRole,
    pub x_init: f64,
    pub y_init: f64,
    /// Background-subtracted aperture sum used to seed the fit
    pub flux_init: f64,
    pub x_fit: f64,
    pub y_fit: f64,
    pub flux_fit: f64,
    pub local_bkg: f64,
    pub npixfit: usize,
    pub iterations: usize,
    /// Sum of absolute residuals over the fitted flux
    pub qfit: f64,
    pub flags: u32,
    pub success: bool,
    pub error: Option<String>,
}

impl PhotometryResult {
    /// Human-readable reason the result is unusable
    pub fn failure_reason(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        let names = [
            (FLAG_NOT_CONVERGED, "fit did not converge"),
            (FLAG_OUTSIDE_WINDOW, "fitted centre left the fit window"),
            (FLAG_NEGATIVE_FLUX, "fitted flux is not positive"),
            (FLAG_NO_BACKGROUND, "no local background pixels"),
        ];
        let reasons: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.flags & flag != 0)
            .map(|(_, name)| *name)
            .collect();
        if reasons.is_empty() {
            "unknown failure".to_string()
        } else {
            reasons.join(", ")
        }
    }
}

/// Integer pixel window `[x_min, x_max) x [y_min, y_max)` clipped to the image
#[derive(Debug, Clone, Copy, PartialEq)]
struct FitWindow {
    x_min: usize,
    x_max: usize,
    y_min: usize,
    y_max: usize,
    clipped: bool,
}

impl FitWindow {
    fn around(x: f64, y: f64, size: usize, width: usize, height: usize) -> Self {
        let (x_min, x_max) = clipped_span(x, size / 2, width);
        let (y_min, y_max) = clipped_span(y, size / 2, height);

        Self {
            x_min,
            x_max,
            y_min,
            y_max,
            clipped: x_max - x_min < size || y_max - y_min < size,
        }
    }

    fn is_empty(&self) -> bool {
        self.x_min == self.x_max || self.y_min == self.y_max
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_min as f64 - 0.5
            && x <= self.x_max as f64 - 0.5
            && y >= self.y_min as f64 - 0.5
            && y <= self.y_max as f64 - 0.5
    }

    fn samples(&self, image: &ArrayView2<f64>) -> (Vec<(f64, f64)>, Vec<f64>) {
        let mut coords = Vec::new();
        let mut values = Vec::new();
        for y in self.y_min..self.y_max {
            for x in self.x_min..self.x_max {
                coords.push((x as f64, y as f64));
                values.push(image[[y, x]]);
            }
        }
        (coords, values)
    }
}

/// Per-run photometry engine sharing one PSF width across all stars
#[derive(Debug, Clone)]
pub struct PsfPhotometry {
    psf: CircularGaussianPsf,
    fwhm: f64,
    fit_size: usize,
    aperture_radius: f64,
    background: LocalBackground,
    fit_background: bool,
    fitter: LevenbergMarquardt,
}

impl PsfPhotometry {
    pub fn new(fwhm: f64, config: &PhotometryConfig) -> Result<Self> {
        if !(fwhm.is_finite() && fwhm > 0.0) {
            return Err(PhotometryError::InvalidConfig {
                name: "fwhm",
                value: fwhm.to_string(),
                reason: "must be finite and > 0",
            });
        }

        let mut fit_size = (6.0 * fwhm).round_ties_even() as usize;
        if fit_size % 2 == 0 {
            fit_size += 1;
        }

        Ok(Self {
            psf: CircularGaussianPsf::from_fwhm(fwhm),
            fwhm,
            fit_size,
            aperture_radius: 2.0 * fwhm,
            background: LocalBackground::from_fwhm(fwhm),
            fit_background: config.fit_background,
            fitter: LevenbergMarquardt::with_max_iterations(config.max_iterations),
        })
    }

    pub fn fwhm(&self) -> f64 {
        self.fwhm
    }

    pub fn fit_size(&self) -> usize {
        self.fit_size
    }

    pub fn aperture_radius(&self) -> f64 {
        self.aperture_radius
    }

    pub fn local_background(&self) -> &LocalBackground {
        &self.background
    }

    /// Fit every position independently; output order matches `positions`
    pub fn fit_stars(
        &self,
        image: &ArrayView2<f64>,
        role: StarRole,
        positions: &[(f64, f64)],
    ) -> Vec<PhotometryResult> {
        positions
            .par_iter()
            .enumerate()
            .map(|(index, &(x, y))| self.fit_star(image, role, index + 1, x, y))
            .collect()
    }

    pub fn fit_star(
        &self,
        image: &ArrayView2<f64>,
        role: StarRole,
        id: usize,
        x: f64,
        y: f64,
    ) -> PhotometryResult {
        let (height, width) = image.dim();
        let window = FitWindow::around(x, y, self.fit_size, width, height);
        let mut flags = if window.clipped { FLAG_PARTIAL_WINDOW } else { 0 };

        let background = self.background.estimate(image, x, y);
        let local_bkg = match background {
            Some(estimate) => estimate.value,
            None => {
                flags |= FLAG_NO_BACKGROUND;
                0.0
            }
        };

        let flux_init = self.aperture_flux(image, x, y, local_bkg);
        let (coords, values) = window.samples(image);

        let mut result = PhotometryResult {
            id,
            role,
            x_init: x,
            y_init: y,
            flux_init,
            x_fit: f64::NAN,
            y_fit: f64::NAN,
            flux_fit: f64::NAN,
            local_bkg: if background.is_some() { local_bkg } else { f64::NAN },
            npixfit: values.len(),
            iterations: 0,
            qfit: f64::NAN,
            flags,
            success: false,
            error: None,
        };

        let psf = self.psf.with_background(local_bkg);
        let initial: Vec<f64> = if self.fit_background {
            vec![x, y, flux_init, local_bkg]
        } else {
            vec![x, y, flux_init]
        };

        if window.is_empty() {
            result.flags |= FLAG_OUTSIDE_WINDOW;
            result.error = Some(format!("position ({}, {}) is outside the image", x, y));
        } else {
            match self.fitter.fit(&psf, &coords, &values, &initial, None) {
                Ok(fit) => {
                    let (x_fit, y_fit, flux_fit) = (fit.params[0], fit.params[1], fit.params[2]);
                    if self.fit_background {
                        result.local_bkg = fit.params[3];
                    }
                    result.x_fit = x_fit;
                    result.y_fit = y_fit;
                    result.flux_fit = flux_fit;
                    result.iterations = fit.iterations;
                    result.qfit = coords
                        .iter()
                        .zip(&values)
                        .map(|(&at, &v)| (v - psf.value(at, &fit.params)).abs())
                        .sum::<f64>()
                        / flux_fit;

                    if !window.contains(x_fit, y_fit) {
                        result.flags |= FLAG_OUTSIDE_WINDOW;
                    }
                    if flux_fit <= 0.0 {
                        result.flags |= FLAG_NEGATIVE_FLUX;
                    }
                }
                Err(e) => {
                    if let FitError::NotConverged { iterations } = e {
                        result.iterations = iterations;
                    }
                    result.flags |= FLAG_NOT_CONVERGED;
                    result.error = Some(e.to_string());
                }
            }
        }

        let blocking = FLAG_NOT_CONVERGED | FLAG_OUTSIDE_WINDOW | FLAG_NEGATIVE_FLUX | FLAG_NO_BACKGROUND;
        result.success = result.flags & blocking == 0 && result.flux_fit.is_finite();

        if result.success {
            tracing::info!(
                "{} star #{}: flux={:.3} at ({:.3}, {:.3}), bkg={:.3}, qfit={:.4}",
                role,
                id,
                result.flux_fit,
                result.x_fit,
                result.y_fit,
                result.local_bkg,
                result.qfit
            );
        } else {
            tracing::warn!(
                "{} star #{} at ({:.2}, {:.2}): PSF fit failed ({}), flags={}",
                role,
                id,
                x,
                y,
                result.failure_reason(),
                result.flags
            );
        }

        result
    }

    /// Background-subtracted sum over a circular aperture of pixel centres
    fn aperture_flux(&self, image: &ArrayView2<f64>, x: f64, y: f64, background: f64) -> f64 {
        let (height, width) = image.dim();
        let reach = self.aperture_radius.ceil() as usize;
        let (x_min, x_max) = clipped_span(x, reach, width);
        let (y_min, y_max) = clipped_span(y, reach, height);
        let r2 = self.aperture_radius * self.aperture_radius;

        let mut sum = 0.0;
        for py in y_min..y_max {
            for px in x_min..x_max {
                let dx = px as f64 - x;
                let dy = py as f64 - y;
                if dx * dx + dy * dy <= r2 {
                    sum += image[[py, px]] - background;
                }
            }
        }
        sum
    }
}
