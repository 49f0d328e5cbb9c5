use crate::error::{PhotometryError, Result};
use crate::region::Region;
use fitrs::{Fits, FitsData, FitsDataArray, HeaderValue};
use ndarray::{s, Array2, ArrayView2};
use std::path::Path;

/// Value substituted for NaN/Inf pixels before they reach the pipeline
pub const NON_FINITE_SENTINEL: f64 = 0.0;

/// Immutable 2D intensity array, indexed `[[y, x]]`
#[derive(Debug, Clone)]
pub struct Image {
    data: Array2<f64>,
}

impl Image {
    /// Build an image from row-major pixels
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != width * height {
            return Err(PhotometryError::ImageSize {
                expected: width * height,
                actual: data.len(),
            });
        }
        let array = Array2::from_shape_vec((height, width), data).map_err(|_| {
            PhotometryError::ImageSize {
                expected: width * height,
                actual: 0,
            }
        })?;
        Ok(Self::from_array(array))
    }

    pub fn from_array(mut data: Array2<f64>) -> Self {
        let mut replaced = 0usize;
        data.mapv_inplace(|v| {
            if v.is_finite() {
                v
            } else {
                replaced += 1;
                NON_FINITE_SENTINEL
            }
        });
        if replaced > 0 {
            tracing::debug!("Replaced {} non-finite pixels with {}", replaced, NON_FINITE_SENTINEL);
        }
        Self { data }
    }

    /// Load the primary HDU of a FITS file using fitrs.
    /// BZERO/BSCALE are applied so pixels are in physical units.
    pub fn from_fits(path: &Path) -> Result<Self> {
        let fits = Fits::open(path).map_err(|e| {
            PhotometryError::Fits(format!("Failed to open FITS file {}: {}", path.display(), e))
        })?;

        let hdu = fits
            .get(0)
            .ok_or_else(|| PhotometryError::Fits("No primary HDU found in FITS file".to_string()))?;

        let naxis = header_integer(&hdu, "NAXIS")?;
        if naxis < 2 {
            return Err(PhotometryError::Fits(format!(
                "FITS file does not contain 2D image data (NAXIS={})",
                naxis
            )));
        }
        let width = header_integer(&hdu, "NAXIS1")? as usize;
        let height = header_integer(&hdu, "NAXIS2")? as usize;
        let bzero = header_real(&hdu, "BZERO").unwrap_or(0.0);
        let bscale = header_real(&hdu, "BSCALE").unwrap_or(1.0);

        let scale = |raw: f64| raw * bscale + bzero;
        let data: Vec<f64> = match hdu.read_data() {
            FitsData::Characters(_) => {
                return Err(PhotometryError::Fits(
                    "FITS file contains character data, not image data".to_string(),
                ));
            }
            FitsData::IntegersI32(FitsDataArray { data, .. }) => data
                .into_iter()
                .map(|v| v.map_or(f64::NAN, |raw| scale(raw as f64)))
                .collect(),
            FitsData::IntegersU32(FitsDataArray { data, .. }) => data
                .into_iter()
                .map(|v| v.map_or(f64::NAN, |raw| scale(raw as f64)))
                .collect(),
            FitsData::FloatingPoint32(FitsDataArray { data, .. }) => {
                data.into_iter().map(|v| scale(v as f64)).collect()
            }
            FitsData::FloatingPoint64(FitsDataArray { data, .. }) => {
                data.into_iter().map(scale).collect()
            }
        };

        // Only the first image plane of a cube is used
        let plane = width * height;
        if data.len() < plane {
            return Err(PhotometryError::ImageSize {
                expected: plane,
                actual: data.len(),
            });
        }
        let mut data = data;
        data.truncate(plane);

        tracing::debug!("Loaded {}x{} FITS image from {}", width, height, path.display());
        Self::new(width, height, data)
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Borrow a validated sub-rectangle
    pub fn region_view(&self, region: &Region) -> Result<ArrayView2<'_, f64>> {
        region.validate(self.width(), self.height())?;
        Ok(self.data.slice(s![
            region.y0..region.y0 + region.height,
            region.x0..region.x0 + region.width
        ]))
    }
}

/// Pixel indices `[lo, hi)` within `reach` of the rounded `centre`, clipped
/// to `0..limit`. Bounds are computed in f64, so a huge or non-finite centre
/// gives an empty span instead of overflowing.
pub fn clipped_span(centre: f64, reach: usize, limit: usize) -> (usize, usize) {
    let c = centre.round_ties_even();
    if !c.is_finite() {
        return (0, 0);
    }
    let lo = (c - reach as f64).clamp(0.0, limit as f64) as usize;
    let hi = (c + reach as f64 + 1.0).clamp(0.0, limit as f64) as usize;
    (lo, hi)
}

fn header_integer(hdu: &fitrs::Hdu, key: &str) -> Result<i64> {
    match hdu.value(key) {
        Some(HeaderValue::IntegerNumber(n)) => Ok(*n as i64),
        Some(_) => Err(PhotometryError::Fits(format!("{} is not an integer", key))),
        None => Err(PhotometryError::Fits(format!("Missing {} header", key))),
    }
}

fn header_real(hdu: &fitrs::Hdu, key: &str) -> Option<f64> {
    match hdu.value(key) {
        Some(HeaderValue::IntegerNumber(n)) => Some(*n as f64),
        Some(HeaderValue::RealFloatingNumber(f)) => Some(*f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_pixels_are_replaced() {
        let image = Image::new(2, 2, vec![1.0, f64::NAN, f64::INFINITY, 4.0]).unwrap();
        let view = image.view();
        assert_eq!(view[[0, 0]], 1.0);
        assert_eq!(view[[0, 1]], NON_FINITE_SENTINEL);
        assert_eq!(view[[1, 0]], NON_FINITE_SENTINEL);
        assert_eq!(view[[1, 1]], 4.0);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        assert!(Image::new(3, 3, vec![0.0; 8]).is_err());
    }

    #[test]
    fn test_region_view_is_row_major() {
        let data: Vec<f64> = (0..20).map(|v| v as f64).collect();
        let image = Image::new(5, 4, data).unwrap();
        assert_eq!(image.width(), 5);
        assert_eq!(image.height(), 4);

        let view = image.region_view(&Region::new(1, 2, 3, 2)).unwrap();
        assert_eq!(view.dim(), (2, 3));
        assert_eq!(view[[0, 0]], 11.0);
        assert_eq!(view[[1, 2]], 18.0);

        assert!(image.region_view(&Region::new(3, 0, 3, 1)).is_err());
    }

    #[test]
    fn test_clipped_span() {
        assert_eq!(clipped_span(10.0, 3, 50), (7, 14));
        assert_eq!(clipped_span(1.0, 3, 50), (0, 5));
        assert_eq!(clipped_span(48.0, 3, 50), (45, 50));
        // 2.5 rounds to 2
        assert_eq!(clipped_span(2.5, 1, 50), (1, 4));
        assert_eq!(clipped_span(1e19, 3, 50), (50, 50));
        assert_eq!(clipped_span(-1e19, 3, 50), (0, 0));
        assert_eq!(clipped_span(f64::NAN, 3, 50), (0, 0));
    }
}
