/// Photometry session state and the end-to-end pipeline
/// Star lists per role and the last estimated FWHM persist across calls
/// until cleared; the image itself is only ever borrowed.
use crate::config::PhotometryConfig;
use crate::error::{PhotometryError, Result};
use crate::fwhm_profile::{combine_fwhm, estimate_fwhm_1d_profile, FwhmProfile};
use crate::image::Image;
use crate::magnitude::{magnitude_from_results, MagnitudeResult};
use crate::psf_fitting::{PhotometryResult, PsfPhotometry};
use crate::region::{Region, StarCandidate, StarRole};
use crate::star_detection::detect_stars;
use serde::Serialize;

/// Per-axis profiles of the active star pair and their combined FWHM
#[derive(Debug, Clone, Serialize)]
pub struct FwhmReport {
    pub target: FwhmProfile,
    pub comparison: FwhmProfile,
    pub fwhm: f64,
}

/// Outcome of one photometry run.
/// Fluxes are kept even when the magnitude could not be computed.
#[derive(Debug)]
pub struct PhotometryReport {
    pub fwhm_report: FwhmReport,
    pub targets: Vec<PhotometryResult>,
    pub comparisons: Vec<PhotometryResult>,
    pub magnitude: std::result::Result<MagnitudeResult, PhotometryError>,
}

#[derive(Debug, Clone, Default)]
pub struct PhotometrySession {
    config: PhotometryConfig,
    targets: Vec<StarCandidate>,
    comparisons: Vec<StarCandidate>,
    fwhm: Option<f64>,
}

impl PhotometrySession {
    pub fn new(config: PhotometryConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &PhotometryConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PhotometryConfig {
        &mut self.config
    }

    fn list_mut(&mut self, role: StarRole) -> &mut Vec<StarCandidate> {
        match role {
            StarRole::Target => &mut self.targets,
            StarRole::Comparison => &mut self.comparisons,
        }
    }

    pub fn stars(&self, role: StarRole) -> &[StarCandidate] {
        match role {
            StarRole::Target => &self.targets,
            StarRole::Comparison => &self.comparisons,
        }
    }

    /// Append a manually placed star
    pub fn add_star(&mut self, role: StarRole, x: f64, y: f64) {
        tracing::debug!("Added {} star at ({:.2}, {:.2})", role, x, y);
        self.list_mut(role).push(StarCandidate::manual(x, y, role));
    }

    /// Replace the list of `role` with manual positions
    pub fn set_stars(&mut self, role: StarRole, coords: &[(f64, f64)]) {
        let stars = coords
            .iter()
            .map(|&(x, y)| StarCandidate::manual(x, y, role))
            .collect();
        *self.list_mut(role) = stars;
    }

    pub fn clear(&mut self, role: StarRole) {
        self.list_mut(role).clear();
    }

    /// Forget both star lists and the cached FWHM
    pub fn reset(&mut self) {
        self.targets.clear();
        self.comparisons.clear();
        self.fwhm = None;
        tracing::debug!("Session reset");
    }

    /// Last combined FWHM, if one has been estimated
    pub fn fwhm(&self) -> Option<f64> {
        self.fwhm
    }

    /// Detect stars in `region` and make them the `role` list
    pub fn detect_in_region(
        &mut self,
        image: &Image,
        role: StarRole,
        region: &Region,
    ) -> Result<&[StarCandidate]> {
        let params = self.config.detection_params();
        let candidates = detect_stars(image, region, &params, role)?;
        *self.list_mut(role) = candidates;
        Ok(self.stars(role))
    }

    fn active_pair(&self) -> Result<(StarCandidate, StarCandidate)> {
        let target = self.targets.first().ok_or(PhotometryError::MissingStar {
            role: StarRole::Target,
        })?;
        let comparison = self.comparisons.first().ok_or(PhotometryError::MissingStar {
            role: StarRole::Comparison,
        })?;
        Ok((*target, *comparison))
    }

    /// Profile FWHM of the first target and comparison star; caches the mean
    pub fn estimate_fwhm(&mut self, image: &Image) -> Result<FwhmReport> {
        let (target, comparison) = self.active_pair()?;
        let view = image.view();
        let size = self.config.profile_size;

        let target_profile = estimate_fwhm_1d_profile(&view, target.x, target.y, size)?;
        let comparison_profile = estimate_fwhm_1d_profile(&view, comparison.x, comparison.y, size)?;

        for (role, profile) in [
            (StarRole::Target, &target_profile),
            (StarRole::Comparison, &comparison_profile),
        ] {
            tracing::info!(
                "{} FWHM_x: {:.3}, FWHM_y: {:.3}",
                role,
                profile.x.fwhm,
                profile.y.fwhm
            );
        }

        let fwhm = combine_fwhm(&[
            (StarRole::Target, &target_profile),
            (StarRole::Comparison, &comparison_profile),
        ])?;
        self.fwhm = Some(fwhm);
        tracing::info!("Combined FWHM: {:.3} px", fwhm);

        Ok(FwhmReport {
            target: target_profile,
            comparison: comparison_profile,
            fwhm,
        })
    }

    /// Estimate the FWHM, fit every selected star, and derive the target
    /// magnitude from the first star of each list
    pub fn run_photometry(&mut self, image: &Image) -> Result<PhotometryReport> {
        let fwhm_report = self.estimate_fwhm(image)?;
        let photometry = PsfPhotometry::new(fwhm_report.fwhm, &self.config)?;
        let view = image.view();

        let positions = |stars: &[StarCandidate]| -> Vec<(f64, f64)> {
            stars.iter().map(StarCandidate::position).collect()
        };
        let targets = photometry.fit_stars(&view, StarRole::Target, &positions(&self.targets));
        let comparisons =
            photometry.fit_stars(&view, StarRole::Comparison, &positions(&self.comparisons));

        let magnitude = match (targets.first(), comparisons.first()) {
            (Some(target), Some(comparison)) => {
                magnitude_from_results(target, comparison, self.config.comparison_magnitude)
            }
            (None, _) => Err(PhotometryError::MissingStar {
                role: StarRole::Target,
            }),
            (_, None) => Err(PhotometryError::MissingStar {
                role: StarRole::Comparison,
            }),
        };

        if let Err(e) = &magnitude {
            tracing::warn!("Target magnitude unavailable: {}", e);
        }

        Ok(PhotometryReport {
            fwhm_report,
            targets,
            comparisons,
            magnitude,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn two_star_image() -> Image {
        let sigma: f64 = 2.0;
        let stars = [(30.0, 30.0, 6000.0), (90.0, 70.0, 6000.0)];
        let data = Array2::from_shape_fn((100, 120), |(y, x)| {
            100.0 + ((7 * x + 13 * y) % 5) as f64 * 0.5
                + stars
                    .iter()
                    .map(|&(sx, sy, flux)| {
                        let r2 = (x as f64 - sx).powi(2) + (y as f64 - sy).powi(2);
                        flux / (2.0 * std::f64::consts::PI * sigma * sigma)
                            * (-r2 / (2.0 * sigma * sigma)).exp()
                    })
                    .sum::<f64>()
        });
        Image::from_array(data)
    }

    #[test]
    fn test_star_lists_per_role() {
        let mut session = PhotometrySession::default();
        session.add_star(StarRole::Target, 1.0, 2.0);
        session.add_star(StarRole::Target, 3.0, 4.0);
        session.set_stars(StarRole::Comparison, &[(5.0, 6.0)]);

        assert_eq!(session.stars(StarRole::Target).len(), 2);
        assert_eq!(session.stars(StarRole::Comparison)[0].position(), (5.0, 6.0));
        assert_eq!(session.stars(StarRole::Comparison)[0].role, StarRole::Comparison);

        session.clear(StarRole::Target);
        assert!(session.stars(StarRole::Target).is_empty());
        assert_eq!(session.stars(StarRole::Comparison).len(), 1);

        session.reset();
        assert!(session.stars(StarRole::Comparison).is_empty());
        assert_eq!(session.fwhm(), None);
    }

    #[test]
    fn test_missing_star_is_reported_before_work() {
        let image = two_star_image();
        let mut session = PhotometrySession::default();
        assert!(matches!(
            session.run_photometry(&image),
            Err(PhotometryError::MissingStar { role: StarRole::Target })
        ));

        session.add_star(StarRole::Target, 30.0, 30.0);
        assert!(matches!(
            session.estimate_fwhm(&image),
            Err(PhotometryError::MissingStar { role: StarRole::Comparison })
        ));
        assert_eq!(session.fwhm(), None);
    }

    #[test]
    fn test_region_detection_replaces_role_list() {
        let image = two_star_image();
        let mut session = PhotometrySession::default();
        session.add_star(StarRole::Comparison, 1.0, 1.0);
        session.add_star(StarRole::Comparison, 2.0, 2.0);

        let found = session
            .detect_in_region(&image, StarRole::Comparison, &Region::new(60, 40, 60, 60))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!((found[0].x - 90.0).abs() < 0.5);
        assert!((found[0].y - 70.0).abs() < 0.5);
        assert!(found[0].metrics.is_some());
        assert_eq!(session.stars(StarRole::Comparison).len(), 1);

        assert!(session
            .detect_in_region(&image, StarRole::Target, &Region::new(100, 90, 40, 40))
            .is_err());
    }

    #[test]
    fn test_equal_stars_give_comparison_magnitude() {
        let image = two_star_image();
        let mut config = PhotometryConfig::default();
        config.set_comparison_magnitude(12.5).unwrap();
        let mut session = PhotometrySession::new(config);
        session.add_star(StarRole::Target, 30.2, 29.9);
        session.add_star(StarRole::Comparison, 89.8, 70.1);

        let report = session.run_photometry(&image).unwrap();
        let expected_fwhm = 2.3548 * 2.0;
        assert!((report.fwhm_report.fwhm - expected_fwhm).abs() / expected_fwhm < 0.02);
        assert_eq!(session.fwhm(), Some(report.fwhm_report.fwhm));

        let magnitude = report.magnitude.unwrap();
        assert!((magnitude.flux_ratio - 1.0).abs() < 0.01);
        assert!((magnitude.target_magnitude - 12.5).abs() < 0.01);
    }

    #[test]
    fn test_failed_star_keeps_partial_results() {
        let image = two_star_image();
        let mut session = PhotometrySession::default();
        session.add_star(StarRole::Target, 30.0, 30.0);
        session.add_star(StarRole::Comparison, 90.0, 70.0);
        // A second comparison far off the image fails on its own
        session.add_star(StarRole::Comparison, -400.0, -400.0);

        let report = session.run_photometry(&image).unwrap();
        assert_eq!(report.comparisons.len(), 2);
        assert!(report.comparisons[0].success);
        assert!(!report.comparisons[1].success);
        assert!(report.magnitude.is_ok());
    }
}
