/// Point-source detection in a user-selected region
/// IRAF-style finder: background-subtracted data is correlated with a
/// zero-sum Gaussian kernel, local maxima above a noise-relative threshold
/// are kept and refined to sub-pixel centroids with image moments.
use crate::error::{PhotometryError, Result};
use crate::fwhm_profile::GAUSSIAN_FWHM_FACTOR;
use crate::image::Image;
use crate::noise_stats::{sigma_clipped_stats_2d, NoiseStats, SigmaClip};
use crate::region::{DetectionMetrics, Region, StarCandidate, StarRole};
use ndarray::{s, Array2, ArrayView2};

/// Star detection parameters
#[derive(Debug, Clone)]
pub struct DetectionParams {
    /// Expected FWHM of point sources in pixels
    pub fwhm: f64,
    /// Detection threshold in units of the clipped noise sigma
    pub threshold: f64,
    /// Sigma clipping factor for the noise statistics
    pub sigma_clip: f64,
    /// Kernel truncation radius in units of the Gaussian sigma
    pub sigma_radius: f64,
    /// Minimum peak separation in units of FWHM
    pub minsep_fwhm: f64,
    pub sharplo: f64,
    pub sharphi: f64,
    pub roundlo: f64,
    pub roundhi: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            fwhm: 5.0,
            threshold: 5.0,
            sigma_clip: 3.0,
            sigma_radius: 1.5,
            minsep_fwhm: 2.5,
            sharplo: 0.5,
            sharphi: 2.0,
            roundlo: 0.0,
            roundhi: 0.2,
        }
    }
}

impl DetectionParams {
    pub fn new(fwhm: f64, threshold: f64, sigma_clip: f64) -> Self {
        Self {
            fwhm,
            threshold,
            sigma_clip,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        let checks = [
            ("fwhm", self.fwhm),
            ("threshold", self.threshold),
            ("sigma_clip", self.sigma_clip),
            ("sigma_radius", self.sigma_radius),
        ];
        for (name, value) in checks {
            if !(value.is_finite() && value > 0.0) {
                return Err(PhotometryError::InvalidConfig {
                    name,
                    value: value.to_string(),
                    reason: "must be finite and > 0",
                });
            }
        }
        Ok(())
    }
}

/// Creation-time constants of a finder
pub struct StarFinder {
    params: DetectionParams,
    kernel: DetectionKernel,
    footprint_radius: usize,
}

/// Detection outcome for one region, in region-local coordinates
#[derive(Debug, Clone)]
pub struct RegionDetection {
    pub stats: NoiseStats,
    pub threshold: f64,
    /// `(x, y, metrics)` relative to the region origin
    pub sources: Vec<(f64, f64, DetectionMetrics)>,
}

impl StarFinder {
    pub fn new(params: DetectionParams) -> Result<Self> {
        params.validate()?;
        let kernel = DetectionKernel::new(params.fwhm, params.sigma_radius);
        let footprint_radius = ((params.fwhm * params.minsep_fwhm + 0.5).floor() as usize).max(2);
        Ok(Self {
            params,
            kernel,
            footprint_radius,
        })
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Detect sources in `data`. Returns coordinates relative to `data`.
    pub fn find(&self, data: &ArrayView2<f64>) -> RegionDetection {
        let stats = sigma_clipped_stats_2d(data, &SigmaClip::new(self.params.sigma_clip));
        let threshold = self.params.threshold * stats.stddev;

        if !stats.has_contrast() {
            tracing::warn!(
                "Region {}x{} has no usable contrast (stddev={}), no stars detected",
                data.ncols(),
                data.nrows(),
                stats.stddev
            );
            return RegionDetection {
                stats,
                threshold,
                sources: Vec::new(),
            };
        }

        let background_subtracted = data.mapv(|v| v - stats.median);
        let convolved = correlate2d(&background_subtracted.view(), &self.kernel.data.view());
        let peaks = self.find_peaks(&convolved.view(), threshold);

        tracing::debug!(
            "Detection: median={:.3}, stddev={:.3}, threshold={:.3}, {} peaks",
            stats.median,
            stats.stddev,
            threshold,
            peaks.len()
        );

        let sources: Vec<_> = peaks
            .into_iter()
            .filter_map(|(x, y)| self.measure(&background_subtracted.view(), x, y))
            .filter(|(_, _, m)| self.passes_filters(m))
            .collect();

        tracing::debug!("Detection: {} sources passed shape filters", sources.len());

        RegionDetection {
            stats,
            threshold,
            sources,
        }
    }

    /// Strict local maxima of the correlated image above `threshold`, in scan order
    fn find_peaks(&self, convolved: &ArrayView2<f64>, threshold: f64) -> Vec<(usize, usize)> {
        let (ny, nx) = convolved.dim();
        let r = self.footprint_radius as isize;
        let mut peaks = Vec::new();

        for y in 0..ny {
            for x in 0..nx {
                let value = convolved[[y, x]];
                if value <= threshold {
                    continue;
                }

                let mut is_peak = true;
                'footprint: for dy in -r..=r {
                    for dx in -r..=r {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let py = y as isize + dy;
                        let px = x as isize + dx;
                        if py < 0 || px < 0 || py >= ny as isize || px >= nx as isize {
                            continue;
                        }
                        if convolved[[py as usize, px as usize]] >= value {
                            is_peak = false;
                            break 'footprint;
                        }
                    }
                }

                if is_peak {
                    peaks.push((x, y));
                }
            }
        }

        peaks
    }

    /// Moment-based centroid and shape in a kernel-sized cutout around a peak.
    /// `None` when the cutout would leave the data or holds no positive flux.
    fn measure(&self, data: &ArrayView2<f64>, x: usize, y: usize) -> Option<(f64, f64, DetectionMetrics)> {
        let cutout = extract_centered(data, x, y, self.kernel.data.dim())?;
        let sky = self.kernel.sky(&cutout);

        let (kh, kw) = cutout.dim();
        let mut m00 = 0.0;
        let mut m10 = 0.0;
        let mut m01 = 0.0;
        let mut peak = f64::NEG_INFINITY;
        let mut npix = 0usize;
        let mut skysub = Array2::<f64>::zeros((kh, kw));

        for ((cy, cx), &value) in cutout.indexed_iter() {
            if !self.kernel.mask[[cy, cx]] {
                continue;
            }
            let v = (value - sky).max(0.0);
            skysub[[cy, cx]] = v;
            if v > 0.0 {
                m00 += v;
                m10 += cx as f64 * v;
                m01 += cy as f64 * v;
                npix += 1;
            }
            peak = peak.max(v);
        }

        if m00 <= 0.0 || npix <= 1 {
            return None;
        }

        let xc = m10 / m00;
        let yc = m01 / m00;
        if !xc.is_finite() || !yc.is_finite() {
            return None;
        }

        let mut mu20 = 0.0;
        let mut mu02 = 0.0;
        let mut mu11 = 0.0;
        for ((cy, cx), &v) in skysub.indexed_iter() {
            if v > 0.0 {
                let dx = cx as f64 - xc;
                let dy = cy as f64 - yc;
                mu20 += dx * dx * v;
                mu02 += dy * dy * v;
                mu11 += dx * dy * v;
            }
        }
        mu20 /= m00;
        mu02 /= m00;
        mu11 /= m00;

        let mu_sum = mu20 + mu02;
        let mu_diff = mu02 - mu20;
        let fwhm = 2.0 * (2.0_f64.ln() * mu_sum).sqrt();
        let roundness = if mu_sum > 0.0 {
            (mu_diff * mu_diff + 4.0 * mu11 * mu11).sqrt() / mu_sum
        } else {
            0.0
        };

        let x_centroid = x as f64 - self.kernel.radius as f64 + xc;
        let y_centroid = y as f64 - self.kernel.radius as f64 + yc;

        Some((
            x_centroid,
            y_centroid,
            DetectionMetrics {
                peak,
                flux: m00,
                sharpness: fwhm / self.params.fwhm,
                roundness,
                fwhm,
            },
        ))
    }

    fn passes_filters(&self, m: &DetectionMetrics) -> bool {
        m.sharpness >= self.params.sharplo
            && m.sharpness <= self.params.sharphi
            && m.roundness >= self.params.roundlo
            && m.roundness <= self.params.roundhi
            && m.flux.is_finite()
    }
}

/// Detect stars inside `region` of `image` and tag them with `role`.
///
/// An empty result is not an error. Coordinates are in image pixels.
pub fn detect_stars(
    image: &Image,
    region: &Region,
    params: &DetectionParams,
    role: StarRole,
) -> Result<Vec<StarCandidate>> {
    let view = image.region_view(region)?;
    let finder = StarFinder::new(params.clone())?;
    let detection = finder.find(&view);

    let candidates: Vec<StarCandidate> = detection
        .sources
        .into_iter()
        .map(|(x, y, metrics)| StarCandidate {
            x: region.x0 as f64 + x,
            y: region.y0 as f64 + y,
            role,
            metrics: Some(metrics),
        })
        .collect();

    if candidates.is_empty() {
        tracing::warn!("No {} stars detected in region {:?}", role, region);
    } else {
        tracing::info!("Detected {} {} star(s) in region {:?}", candidates.len(), role, region);
    }

    Ok(candidates)
}

/// Zero-sum circular Gaussian kernel normalised so the correlation response
/// approximates the amplitude of a matching source
#[derive(Debug, Clone)]
struct DetectionKernel {
    data: Array2<f64>,
    mask: Array2<bool>,
    radius: usize,
}

impl DetectionKernel {
    fn new(fwhm: f64, sigma_radius: f64) -> Self {
        let sigma = fwhm / GAUSSIAN_FWHM_FACTOR;
        // exp(-a r^2) with a = 1 / (2 sigma^2), truncated at a r^2 <= f
        let a = 1.0 / (2.0 * sigma * sigma);
        let f = sigma_radius * sigma_radius / 2.0;
        let radius = ((f / a).sqrt() as usize).max(2);
        let n = 2 * radius + 1;

        let mut mask = Array2::<bool>::from_elem((n, n), false);
        let mut gaussian = Array2::<f64>::zeros((n, n));
        for y in 0..n {
            for x in 0..n {
                let dx = x as f64 - radius as f64;
                let dy = y as f64 - radius as f64;
                let r2 = dx * dx + dy * dy;
                if a * r2 <= f || r2.sqrt() <= 2.0 {
                    mask[[y, x]] = true;
                    gaussian[[y, x]] = (-a * r2).exp();
                }
            }
        }

        let npixels = mask.iter().filter(|&&m| m).count() as f64;
        let sum: f64 = gaussian.iter().sum();
        let sum2: f64 = gaussian.iter().map(|g| g * g).sum();
        let variance = sum2 - sum * sum / npixels;
        let mean = sum / npixels;

        let mut data = Array2::<f64>::zeros((n, n));
        for ((y, x), &m) in mask.indexed_iter() {
            if m {
                data[[y, x]] = (gaussian[[y, x]] - mean) / variance;
            }
        }

        Self { data, mask, radius }
    }

    /// Mean of the cutout pixels outside the kernel footprint
    fn sky(&self, cutout: &ArrayView2<f64>) -> f64 {
        let outside: Vec<f64> = cutout
            .indexed_iter()
            .filter(|(idx, _)| !self.mask[*idx])
            .map(|(_, &v)| v)
            .collect();
        if outside.is_empty() {
            0.0
        } else {
            outside.iter().sum::<f64>() / outside.len() as f64
        }
    }
}

/// Correlation with zero padding outside `data`
fn correlate2d(data: &ArrayView2<f64>, kernel: &ArrayView2<f64>) -> Array2<f64> {
    let (h, w) = data.dim();
    let (kh, kw) = kernel.dim();
    let (ph, pw) = ((kh / 2) as isize, (kw / 2) as isize);
    let mut result = Array2::<f64>::zeros((h, w));

    for y in 0..h {
        for x in 0..w {
            let mut sum = 0.0;
            for ky in 0..kh {
                let sy = y as isize + ky as isize - ph;
                if sy < 0 || sy >= h as isize {
                    continue;
                }
                for kx in 0..kw {
                    let sx = x as isize + kx as isize - pw;
                    if sx < 0 || sx >= w as isize {
                        continue;
                    }
                    sum += data[[sy as usize, sx as usize]] * kernel[[ky, kx]];
                }
            }
            result[[y, x]] = sum;
        }
    }

    result
}

/// Cutout of `shape` centred on (x, y); `None` when it would leave `data`
fn extract_centered<'a>(
    data: &'a ArrayView2<f64>,
    x: usize,
    y: usize,
    shape: (usize, usize),
) -> Option<ArrayView2<'a, f64>> {
    let (h, w) = shape;
    let (data_h, data_w) = data.dim();
    let (half_h, half_w) = (h / 2, w / 2);

    if y < half_h || y + half_h >= data_h || x < half_w || x + half_w >= data_w {
        return None;
    }

    Some(data.slice(s![y - half_h..y - half_h + h, x - half_w..x - half_w + w]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star_field(width: usize, height: usize, stars: &[(f64, f64, f64)], sigma: f64) -> Array2<f64> {
        Array2::from_shape_fn((height, width), |(y, x)| {
            let mut value = 50.0 + ((x * 7 + y * 13) % 5) as f64 * 0.5;
            for &(sx, sy, flux) in stars {
                let dx = x as f64 - sx;
                let dy = y as f64 - sy;
                value += flux / (2.0 * std::f64::consts::PI * sigma * sigma)
                    * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            }
            value
        })
    }

    #[test]
    fn test_kernel_is_zero_sum_with_unit_response() {
        let kernel = DetectionKernel::new(4.0, 1.5);
        assert_eq!(kernel.data.dim(), (5, 5));
        let sum: f64 = kernel.data.iter().sum();
        assert!(sum.abs() < 1e-9);

        // Response to the un-normalised Gaussian it was built from is 1
        let sigma = 4.0 / GAUSSIAN_FWHM_FACTOR;
        let mut response = 0.0;
        for ((y, x), &k) in kernel.data.indexed_iter() {
            let dx = x as f64 - 2.0;
            let dy = y as f64 - 2.0;
            response += k * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
        }
        assert!((response - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_kernel_truncation_radius_does_not_scale_with_fwhm() {
        let params = DetectionParams::new(8.0, 5.0, 3.0);
        assert_eq!(params.sigma_radius, 1.5);

        // 1.5 sigma of an 8 px FWHM is 5.1 px; fwhm / 2.3548 sigmas would give 11
        let kernel = DetectionKernel::new(params.fwhm, params.sigma_radius);
        assert_eq!(kernel.radius, 5);
        assert_eq!(kernel.data.dim(), (11, 11));
    }

    #[test]
    fn test_constant_region_yields_no_candidates() {
        let data = Array2::from_elem((40, 40), 123.0);
        let finder = StarFinder::new(DetectionParams::default()).unwrap();
        let detection = finder.find(&data.view());
        assert!(detection.sources.is_empty());
        assert!(!detection.stats.has_contrast());
    }

    #[test]
    fn test_single_star_centroid() {
        let data = star_field(60, 60, &[(30.3, 27.6, 8000.0)], 2.0);
        let finder = StarFinder::new(DetectionParams::new(4.7, 5.0, 3.0)).unwrap();
        let detection = finder.find(&data.view());

        assert_eq!(detection.sources.len(), 1);
        let (x, y, metrics) = detection.sources[0];
        assert!((x - 30.3).abs() < 0.35, "x = {}", x);
        assert!((y - 27.6).abs() < 0.35, "y = {}", y);
        assert!(metrics.sharpness > 0.5 && metrics.sharpness < 1.0);
    }

    #[test]
    fn test_stars_are_reported_in_scan_order() {
        let stars = [(60.0, 15.0, 3000.0), (20.0, 40.0, 9000.0), (70.0, 70.0, 5000.0)];
        let data = star_field(90, 90, &stars, 2.0);
        let finder = StarFinder::new(DetectionParams::new(5.0, 5.0, 3.0)).unwrap();
        let detection = finder.find(&data.view());

        assert_eq!(detection.sources.len(), 3);
        for ((x, y, _), (sx, sy, _)) in detection.sources.iter().zip(&stars) {
            assert!((x - sx).abs() < 0.5 && (y - sy).abs() < 0.5);
        }
    }

    #[test]
    fn test_star_near_region_edge_is_discarded() {
        let data = star_field(40, 40, &[(1.0, 20.0, 8000.0), (20.0, 20.0, 8000.0)], 2.0);
        let finder = StarFinder::new(DetectionParams::new(5.0, 5.0, 3.0)).unwrap();
        let detection = finder.find(&data.view());
        assert_eq!(detection.sources.len(), 1);
        assert!((detection.sources[0].0 - 20.0).abs() < 0.5);
    }

    #[test]
    fn test_detect_stars_offsets_to_image_coordinates() {
        let data = star_field(100, 80, &[(70.0, 50.0, 8000.0)], 2.0);
        let image = Image::from_array(data);
        let region = Region::new(50, 30, 40, 40);
        let stars = detect_stars(&image, &region, &DetectionParams::new(5.0, 5.0, 3.0), StarRole::Comparison)
            .unwrap();

        assert_eq!(stars.len(), 1);
        assert_eq!(stars[0].role, StarRole::Comparison);
        assert!((stars[0].x - 70.0).abs() < 0.3);
        assert!((stars[0].y - 50.0).abs() < 0.3);
        assert!(stars[0].metrics.is_some());
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        assert!(StarFinder::new(DetectionParams::new(0.0, 5.0, 3.0)).is_err());
        assert!(StarFinder::new(DetectionParams::new(5.0, -1.0, 3.0)).is_err());
        assert!(StarFinder::new(DetectionParams::new(5.0, 5.0, f64::NAN)).is_err());
    }
}
