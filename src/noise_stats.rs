//! Robust location/scale statistics with iterative sigma clipping

use bumpalo::Bump;
use ndarray::ArrayView2;
use serde::Serialize;

/// Sigma clipping parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaClip {
    /// Samples further than `sigma * stddev` from the median are rejected
    pub sigma: f64,
    /// Upper bound on clipping passes
    pub max_iterations: usize,
}

impl Default for SigmaClip {
    fn default() -> Self {
        Self {
            sigma: 3.0,
            max_iterations: 5,
        }
    }
}

impl SigmaClip {
    pub fn new(sigma: f64) -> Self {
        Self {
            sigma,
            ..Default::default()
        }
    }
}

/// Statistics of the samples that survived clipping
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoiseStats {
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
    pub n_samples: usize,
}

impl NoiseStats {
    fn empty() -> Self {
        Self {
            mean: 0.0,
            median: 0.0,
            stddev: 0.0,
            n_samples: 0,
        }
    }

    /// False for constant or near-empty input, which callers must treat as "no usable contrast"
    pub fn has_contrast(&self) -> bool {
        self.n_samples >= 2 && self.stddev > 0.0
    }
}

/// Median of a slice, sorting it in place
pub fn median_in_place(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let len = values.len();
    if len % 2 == 0 {
        (values[len / 2 - 1] + values[len / 2]) / 2.0
    } else {
        values[len / 2]
    }
}

fn mean_and_stddev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Sigma-clipped mean, median and population standard deviation.
///
/// Each pass computes the median and standard deviation of the surviving
/// samples and discards those outside `median ± sigma * stddev`. Clipping
/// stops when a pass rejects nothing or after `max_iterations` passes.
pub fn sigma_clipped_stats(values: &[f64], clip: &SigmaClip) -> NoiseStats {
    if values.is_empty() {
        return NoiseStats::empty();
    }

    // Scratch buffers for the clipping passes
    let arena = Bump::new();
    let mut current = bumpalo::vec![in &arena];
    current.extend(values.iter().copied().filter(|v| v.is_finite()));
    let mut sorted = bumpalo::vec![in &arena];

    for iteration in 0..clip.max_iterations {
        if current.len() < 2 {
            break;
        }
        sorted.clear();
        sorted.extend_from_slice(&current);
        let median = median_in_place(&mut sorted);
        let (_, stddev) = mean_and_stddev(&current);
        if stddev == 0.0 {
            break;
        }

        let lower = median - clip.sigma * stddev;
        let upper = median + clip.sigma * stddev;
        let before = current.len();
        current.retain(|v| *v >= lower && *v <= upper);

        tracing::trace!(
            "Sigma clip pass {}: median={:.4}, stddev={:.4}, kept {}/{}",
            iteration + 1,
            median,
            stddev,
            current.len(),
            before
        );

        if current.len() == before {
            break;
        }
    }

    if current.is_empty() {
        return NoiseStats::empty();
    }

    let (mean, stddev) = mean_and_stddev(&current);
    sorted.clear();
    sorted.extend_from_slice(&current);
    let median = median_in_place(&mut sorted);
    let n_samples = current.len();

    NoiseStats {
        mean,
        median,
        stddev: if n_samples < 2 { 0.0 } else { stddev },
        n_samples,
    }
}

/// Sigma-clipped statistics over every pixel of a 2D view
pub fn sigma_clipped_stats_2d(data: &ArrayView2<f64>, clip: &SigmaClip) -> NoiseStats {
    let values: Vec<f64> = data.iter().copied().collect();
    sigma_clipped_stats(&values, clip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_median() {
        assert_eq!(median_in_place(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median_in_place(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median_in_place(&mut []), 0.0);
    }

    #[test]
    fn test_outlier_is_rejected() {
        let mut values: Vec<f64> = (0..100).map(|i| 10.0 + (i % 5) as f64 * 0.1).collect();
        values.push(1000.0);
        let stats = sigma_clipped_stats(&values, &SigmaClip::default());

        assert_eq!(stats.n_samples, 100);
        assert!((stats.median - 10.2).abs() < 1e-9);
        assert!((stats.mean - 10.2).abs() < 1e-9);
        assert!(stats.stddev > 0.0 && stats.stddev < 0.2);
        assert!(stats.has_contrast());
    }

    #[test]
    fn test_constant_input_has_no_contrast() {
        let data = Array2::from_elem((10, 10), 42.0);
        let stats = sigma_clipped_stats_2d(&data.view(), &SigmaClip::default());
        assert_eq!(stats.median, 42.0);
        assert_eq!(stats.mean, 42.0);
        assert_eq!(stats.stddev, 0.0);
        assert!(!stats.has_contrast());
    }

    #[test]
    fn test_empty_and_single_sample() {
        let empty = sigma_clipped_stats(&[], &SigmaClip::default());
        assert_eq!(empty.n_samples, 0);
        assert!(!empty.has_contrast());

        let single = sigma_clipped_stats(&[5.0], &SigmaClip::default());
        assert_eq!(single.n_samples, 1);
        assert_eq!(single.median, 5.0);
        assert_eq!(single.stddev, 0.0);
        assert!(!single.has_contrast());
    }

    #[test]
    fn test_iteration_cap_is_respected() {
        // A geometric tail keeps losing its largest sample on every pass
        let values: Vec<f64> = (0..40).map(|i| 1.3_f64.powi(i)).collect();
        let one_pass = sigma_clipped_stats(
            &values,
            &SigmaClip {
                sigma: 1.0,
                max_iterations: 1,
            },
        );
        let many_passes = sigma_clipped_stats(
            &values,
            &SigmaClip {
                sigma: 1.0,
                max_iterations: 20,
            },
        );
        assert!(one_pass.n_samples > many_passes.n_samples);
    }
}
