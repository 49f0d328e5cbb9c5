use crate::error::{PhotometryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the two designated stars a coordinate belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StarRole {
    /// Star whose magnitude is being measured
    Target,
    /// Reference star with a known magnitude
    Comparison,
}

impl StarRole {
    pub fn label(&self) -> &'static str {
        match self {
            StarRole::Target => "target",
            StarRole::Comparison => "comparison",
        }
    }
}

impl fmt::Display for StarRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl std::str::FromStr for StarRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "target" => Ok(StarRole::Target),
            "comp" | "comparison" => Ok(StarRole::Comparison),
            _ => Err(format!("Unknown star role: {}", s)),
        }
    }
}

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
}

impl Region {
    pub fn new(x0: usize, y0: usize, width: usize, height: usize) -> Self {
        Self {
            x0,
            y0,
            width,
            height,
        }
    }

    /// Build a region from two opposite corners of a dragged rectangle.
    /// Corners may come in any order; coordinates are truncated to whole pixels.
    pub fn from_corners(xa: f64, ya: f64, xb: f64, yb: f64) -> Self {
        let x_min = xa.min(xb).max(0.0);
        let y_min = ya.min(yb).max(0.0);
        let x_max = xa.max(xb).max(0.0);
        let y_max = ya.max(yb).max(0.0);
        let x0 = x_min as usize;
        let y0 = y_min as usize;
        Self {
            x0,
            y0,
            width: (x_max as usize).saturating_sub(x0),
            height: (y_max as usize).saturating_sub(y0),
        }
    }

    /// Check the region is non-empty and fully inside an image
    pub fn validate(&self, image_width: usize, image_height: usize) -> Result<()> {
        let within = |start: usize, len: usize, limit: usize| {
            start.checked_add(len).is_some_and(|end| end <= limit)
        };
        let fits = self.width > 0
            && self.height > 0
            && within(self.x0, self.width, image_width)
            && within(self.y0, self.height, image_height);
        if fits {
            Ok(())
        } else {
            Err(PhotometryError::InvalidRegion {
                x0: self.x0,
                y0: self.y0,
                width: self.width,
                height: self.height,
                image_width,
                image_height,
            })
        }
    }
}

impl std::str::FromStr for Region {
    type Err = String;

    /// Parse `x,y,width,height`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
        if parts.len() != 4 {
            return Err(format!("Expected x,y,width,height but got: {}", s));
        }
        let mut values = [0usize; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .parse()
                .map_err(|_| format!("Invalid region component '{}' in: {}", part, s))?;
        }
        Ok(Region::new(values[0], values[1], values[2], values[3]))
    }
}

/// Shape measurements attached to a detected star
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionMetrics {
    /// Peak sky-subtracted value inside the kernel footprint
    pub peak: f64,
    /// Sum of sky-subtracted pixels inside the kernel footprint
    pub flux: f64,
    /// Measured FWHM divided by the kernel FWHM
    pub sharpness: f64,
    /// 0 for a round source
    pub roundness: f64,
    /// Moment-based FWHM estimate
    pub fwhm: f64,
}

/// A detected or manually placed star position, in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StarCandidate {
    pub x: f64,
    pub y: f64,
    pub role: StarRole,
    /// `None` for manual picks
    pub metrics: Option<DetectionMetrics>,
}

impl StarCandidate {
    pub fn manual(x: f64, y: f64, role: StarRole) -> Self {
        Self {
            x,
            y,
            role,
            metrics: None,
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("target".parse::<StarRole>(), Ok(StarRole::Target));
        assert_eq!("COMP".parse::<StarRole>(), Ok(StarRole::Comparison));
        assert_eq!("comparison".parse::<StarRole>(), Ok(StarRole::Comparison));
        assert!("sky".parse::<StarRole>().is_err());
        assert_eq!(StarRole::Comparison.to_string(), "comparison");
    }

    #[test]
    fn test_region_from_corners_any_order() {
        let a = Region::from_corners(30.7, 40.2, 10.1, 5.9);
        assert_eq!(a, Region::new(10, 5, 20, 35));
        let b = Region::from_corners(10.1, 5.9, 30.7, 40.2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_region_validate() {
        assert!(Region::new(0, 0, 100, 100).validate(100, 100).is_ok());
        assert!(Region::new(1, 0, 100, 100).validate(100, 100).is_err());
        assert!(Region::new(10, 10, 0, 5).validate(100, 100).is_err());
        assert!(Region::new(90, 90, 10, 11).validate(100, 100).is_err());
    }

    #[test]
    fn test_region_validate_rejects_overflowing_extent() {
        let region: Region = "18446744073709551615,0,1,1".parse().unwrap();
        assert!(matches!(
            region.validate(100, 100),
            Err(PhotometryError::InvalidRegion { x0: usize::MAX, .. })
        ));
        assert!(Region::new(0, 5, 10, usize::MAX).validate(100, 100).is_err());
    }

    #[test]
    fn test_region_parse() {
        assert_eq!("1, 2,3,4".parse::<Region>(), Ok(Region::new(1, 2, 3, 4)));
        assert!("1,2,3".parse::<Region>().is_err());
        assert!("a,2,3,4".parse::<Region>().is_err());
    }
}
