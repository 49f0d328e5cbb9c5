//! Per-star sky background from a circular annulus.
//!
//! Pixels whose centres fall between the inner and outer radius are sigma
//! clipped and reduced with the MMM mode estimator `3 * median - 2 * mean`.

use crate::image::clipped_span;
use crate::noise_stats::{sigma_clipped_stats, SigmaClip};
use ndarray::ArrayView2;
use serde::Serialize;

/// Annulus geometry and clipping used for the local background
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalBackground {
    pub inner_radius: f64,
    pub outer_radius: f64,
    pub sigma_clip: SigmaClip,
}

/// Background estimate for one star
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BackgroundEstimate {
    pub value: f64,
    /// Annulus pixels before clipping
    pub n_pixels: usize,
    /// Pixels that survived clipping
    pub n_used: usize,
}

impl LocalBackground {
    pub fn new(inner_radius: f64, outer_radius: f64) -> Self {
        Self {
            inner_radius,
            outer_radius,
            sigma_clip: SigmaClip {
                sigma: 3.0,
                max_iterations: 10,
            },
        }
    }

    /// Annulus from 2x to 4x the FWHM, rounded to whole pixels
    pub fn from_fwhm(fwhm: f64) -> Self {
        Self::new((fwhm * 2.0).round_ties_even(), (fwhm * 4.0).round_ties_even())
    }

    /// Values of the pixels whose centres lie in the annulus, clipped to the image
    pub fn annulus_pixels(&self, image: &ArrayView2<f64>, x: f64, y: f64) -> Vec<f64> {
        let (height, width) = image.dim();
        let reach = self.outer_radius.ceil() as usize;
        let (x_min, x_max) = clipped_span(x, reach, width);
        let (y_min, y_max) = clipped_span(y, reach, height);

        let mut pixels = Vec::new();
        for py in y_min..y_max {
            for px in x_min..x_max {
                let dx = px as f64 - x;
                let dy = py as f64 - y;
                let r = (dx * dx + dy * dy).sqrt();
                if r >= self.inner_radius && r <= self.outer_radius {
                    pixels.push(image[[py, px]]);
                }
            }
        }
        pixels
    }

    /// MMM background at (`x`, `y`); `None` when the annulus holds no pixel
    pub fn estimate(&self, image: &ArrayView2<f64>, x: f64, y: f64) -> Option<BackgroundEstimate> {
        let pixels = self.annulus_pixels(image, x, y);
        if pixels.is_empty() {
            return None;
        }
        let stats = sigma_clipped_stats(&pixels, &self.sigma_clip);
        if stats.n_samples == 0 {
            return None;
        }
        Some(BackgroundEstimate {
            value: 3.0 * stats.median - 2.0 * stats.mean,
            n_pixels: pixels.len(),
            n_used: stats.n_samples,
        })
    }
}
