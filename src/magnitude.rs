//! Differential magnitude from a target/comparison flux pair

use crate::error::{PhotometryError, Result};
use crate::psf_fitting::PhotometryResult;
use crate::region::StarRole;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MagnitudeResult {
    pub target_magnitude: f64,
    /// Reference magnitude the result was computed against
    pub comparison_magnitude: f64,
    /// `flux_target / flux_comp`
    pub flux_ratio: f64,
}

/// `m_target = m_comp - 2.5 * log10(flux_target / flux_comp)`
///
/// The comparison flux is checked first so that a non-positive comparison is
/// always reported as such, whatever the target flux.
pub fn differential_magnitude(flux_target: f64, flux_comp: f64, comp_mag: f64) -> Result<MagnitudeResult> {
    if !(flux_comp.is_finite() && flux_comp > 0.0) {
        return Err(PhotometryError::NonPositiveComparisonFlux { flux: flux_comp });
    }
    if !flux_target.is_finite() {
        return Err(PhotometryError::NonFiniteFlux {
            role: StarRole::Target,
            flux: flux_target,
        });
    }
    if flux_target <= 0.0 {
        return Err(PhotometryError::NonPositiveTargetFlux { flux: flux_target });
    }
    if !comp_mag.is_finite() {
        return Err(PhotometryError::NonFiniteMagnitude(comp_mag));
    }

    let flux_ratio = flux_target / flux_comp;
    let target_magnitude = comp_mag - 2.5 * flux_ratio.log10();

    tracing::info!(
        "Target magnitude {:.3} (comparison {:.3}, flux ratio {:.5})",
        target_magnitude,
        comp_mag,
        flux_ratio
    );

    Ok(MagnitudeResult {
        target_magnitude,
        comparison_magnitude: comp_mag,
        flux_ratio,
    })
}

/// `-2.5 * log10(flux)`, `None` unless the flux is finite and positive
pub fn instrumental_magnitude(flux: f64) -> Option<f64> {
    (flux.is_finite() && flux > 0.0).then(|| -2.5 * flux.log10())
}

/// Magnitude from two PSF fits; unusable fits are reported with their role and id
pub fn magnitude_from_results(
    target: &PhotometryResult,
    comparison: &PhotometryResult,
    comp_mag: f64,
) -> Result<MagnitudeResult> {
    for result in [comparison, target] {
        if !result.success {
            return Err(PhotometryError::StarFitFailed {
                role: result.role,
                index: result.id,
                reason: result.failure_reason(),
            });
        }
    }
    differential_magnitude(target.flux_fit, comparison.flux_fit, comp_mag)
}
