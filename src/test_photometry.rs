// Pipeline scenarios on synthetic frames: Gaussian stars on a flat sky with
// seeded uniform noise, so every run sees the same pixels.

#[cfg(test)]
mod tests {
    use crate::config::PhotometryConfig;
    use crate::error::PhotometryError;
    use crate::fwhm_profile::GAUSSIAN_FWHM_FACTOR;
    use crate::image::Image;
    use crate::region::{Region, StarRole};
    use crate::session::PhotometrySession;
    use crate::star_detection::{detect_stars, DetectionParams};
    use ndarray::Array2;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    struct SyntheticStar {
        x: f64,
        y: f64,
        flux: f64,
        sigma: f64,
    }

    /// Flat background plus point-sampled circular Gaussians
    struct SyntheticImage {
        width: usize,
        height: usize,
        background: f64,
        noise_level: f64,
        stars: Vec<SyntheticStar>,
    }

    impl SyntheticImage {
        fn new(width: usize, height: usize, background: f64, noise_level: f64) -> Self {
            Self {
                width,
                height,
                background,
                noise_level,
                stars: Vec::new(),
            }
        }

        fn with_star(mut self, x: f64, y: f64, flux: f64, sigma: f64) -> Self {
            self.stars.push(SyntheticStar { x, y, flux, sigma });
            self
        }

        fn render(&self, seed: u64) -> Image {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut data = Array2::from_elem((self.height, self.width), self.background);

            for ((y, x), value) in data.indexed_iter_mut() {
                *value += (rng.gen::<f64>() - 0.5) * self.noise_level;
                for star in &self.stars {
                    let s2 = star.sigma * star.sigma;
                    let r2 = (x as f64 - star.x).powi(2) + (y as f64 - star.y).powi(2);
                    *value += star.flux / (2.0 * std::f64::consts::PI * s2) * (-r2 / (2.0 * s2)).exp();
                }
            }

            Image::from_array(data)
        }
    }

    fn two_star_scenario() -> Image {
        SyntheticImage::new(200, 200, 100.0, 2.0)
            .with_star(50.0, 50.0, 10000.0, 2.0)
            .with_star(150.0, 150.0, 5000.0, 2.0)
            .render(42)
    }

    #[test]
    fn test_end_to_end_two_stars() {
        let image = two_star_scenario();
        let mut session = PhotometrySession::default();
        session.add_star(StarRole::Target, 50.0, 50.0);
        session.add_star(StarRole::Comparison, 150.0, 150.0);

        let report = session.run_photometry(&image).unwrap();

        let expected_fwhm = GAUSSIAN_FWHM_FACTOR * 2.0;
        let fwhm = report.fwhm_report.fwhm;
        assert!((fwhm - expected_fwhm).abs() < 0.05, "fwhm = {}", fwhm);

        let target = &report.targets[0];
        let comparison = &report.comparisons[0];
        assert!(target.success && comparison.success);
        assert!((target.x_fit - 50.0).abs() < 0.05);
        assert!((comparison.y_fit - 150.0).abs() < 0.05);
        assert!((target.local_bkg - 100.0).abs() < 0.5);

        let magnitude = report.magnitude.unwrap();
        assert!((magnitude.flux_ratio - 2.0).abs() < 0.02, "ratio = {}", magnitude.flux_ratio);
        let expected = 10.0 - 2.5 * 2.0_f64.log10();
        assert!(
            (magnitude.target_magnitude - expected).abs() < 0.01,
            "magnitude = {}",
            magnitude.target_magnitude
        );
    }

    #[test]
    fn test_region_mode_feeds_photometry() {
        let image = two_star_scenario();
        let mut session = PhotometrySession::default();

        let targets = session
            .detect_in_region(&image, StarRole::Target, &Region::from_corners(80.0, 80.0, 20.0, 20.0))
            .unwrap();
        assert_eq!(targets.len(), 1);
        assert!((targets[0].x - 50.0).abs() < 0.5 && (targets[0].y - 50.0).abs() < 0.5);

        let comparisons = session
            .detect_in_region(&image, StarRole::Comparison, &Region::new(120, 120, 60, 60))
            .unwrap();
        assert_eq!(comparisons.len(), 1);

        let report = session.run_photometry(&image).unwrap();
        let magnitude = report.magnitude.unwrap();
        assert!((magnitude.flux_ratio - 2.0).abs() < 0.02);
    }

    #[test]
    fn test_equal_flux_pair() {
        let image = SyntheticImage::new(160, 120, 250.0, 4.0)
            .with_star(40.0, 60.0, 8000.0, 1.8)
            .with_star(115.3, 58.6, 8000.0, 1.8)
            .render(7);

        let mut config = PhotometryConfig::default();
        config.set_comparison_magnitude(13.2).unwrap();
        let mut session = PhotometrySession::new(config);
        session.add_star(StarRole::Target, 40.0, 60.0);
        session.add_star(StarRole::Comparison, 115.0, 59.0);

        let report = session.run_photometry(&image).unwrap();
        let magnitude = report.magnitude.unwrap();
        assert!((magnitude.flux_ratio - 1.0).abs() < 0.01);
        assert!((magnitude.target_magnitude - 13.2).abs() < 0.01);
    }

    #[test]
    fn test_constant_image_detects_nothing() {
        let image = Image::from_array(Array2::from_elem((64, 64), 321.0));
        let stars = detect_stars(
            &image,
            &Region::new(0, 0, 64, 64),
            &DetectionParams::default(),
            StarRole::Target,
        )
        .unwrap();
        assert!(stars.is_empty());
    }

    #[test]
    fn test_star_near_edge_fails_fwhm_precondition() {
        let image = two_star_scenario();
        let mut session = PhotometrySession::default();
        session.add_star(StarRole::Target, 10.0, 100.0);
        session.add_star(StarRole::Comparison, 150.0, 150.0);

        assert!(matches!(
            session.run_photometry(&image),
            Err(PhotometryError::PatchOutOfBounds { x: 10, y: 100, size: 31, .. })
        ));
    }

    #[test]
    fn test_empty_sky_reports_fwhm_failure() {
        let image = SyntheticImage::new(100, 100, 50.0, 0.0).render(1);
        let mut session = PhotometrySession::default();
        session.add_star(StarRole::Target, 30.0, 30.0);
        session.add_star(StarRole::Comparison, 70.0, 70.0);

        let err = session.run_photometry(&image).unwrap_err();
        assert!(matches!(err, PhotometryError::FwhmEstimationFailed { .. }));
        assert_eq!(session.fwhm(), None);
    }

    #[test]
    fn test_random_field_detection() {
        let mut rng = StdRng::seed_from_u64(2024);
        let mut synthetic = SyntheticImage::new(256, 256, 500.0, 6.0);
        let mut expected = Vec::new();
        // One star per 64x64 cell
        for cell_y in 0..4 {
            for cell_x in 0..4 {
                let x = cell_x as f64 * 64.0 + rng.gen_range(20.0..44.0);
                let y = cell_y as f64 * 64.0 + rng.gen_range(20.0..44.0);
                let flux = rng.gen_range(6000.0..20000.0);
                synthetic = synthetic.with_star(x, y, flux, 2.0);
                expected.push((x, y));
            }
        }
        let image = synthetic.render(99);

        let found = detect_stars(
            &image,
            &Region::new(0, 0, 256, 256),
            &DetectionParams::new(4.7, 5.0, 3.0),
            StarRole::Target,
        )
        .unwrap();

        assert_eq!(found.len(), expected.len());
        for (ex, ey) in expected {
            let nearest = found
                .iter()
                .map(|s| ((s.x - ex).powi(2) + (s.y - ey).powi(2)).sqrt())
                .fold(f64::INFINITY, f64::min);
            assert!(nearest < 0.6, "star at ({:.1}, {:.1}) missed by {:.2}", ex, ey, nearest);
        }
    }
}
