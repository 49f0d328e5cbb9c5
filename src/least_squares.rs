/// Nonlinear least-squares fitting shared by the profile and PSF fits
/// Levenberg-Marquardt with Marquardt diagonal damping and optional box bounds
use crate::error::FitError;
use nalgebra::{DMatrix, DVector};

/// A parametric model evaluated at sample coordinates
pub trait ModelFunction: Sync {
    /// Sample coordinate type (a scalar for profiles, a pixel position for images)
    type Coord: Copy;

    /// Model value at `at`
    fn value(&self, at: Self::Coord, params: &[f64]) -> f64;

    /// Partial derivatives of the model value with respect to each parameter
    fn gradient(&self, at: Self::Coord, params: &[f64], grad: &mut [f64]);
}

/// Per-parameter box constraints
#[derive(Debug, Clone)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    fn clamp(&self, params: &mut [f64]) {
        for ((p, lo), hi) in params.iter_mut().zip(&self.lower).zip(&self.upper) {
            *p = p.max(*lo).min(*hi);
        }
    }
}

/// Converged fit
#[derive(Debug, Clone)]
pub struct LeastSquaresFit {
    pub params: Vec<f64>,
    /// Sum of squared residuals at `params`
    pub cost: f64,
    pub iterations: usize,
}

#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    pub max_iterations: usize,
    /// Relative cost reduction treated as converged
    pub ftol: f64,
    /// Relative parameter step treated as converged
    pub xtol: f64,
    pub initial_lambda: f64,
    pub lambda_factor: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            initial_lambda: 1e-3,
            lambda_factor: 10.0,
        }
    }
}

const MAX_LAMBDA: f64 = 1e16;
const MAX_CONDITION: f64 = 1e14;

impl LevenbergMarquardt {
    pub fn with_max_iterations(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..Default::default()
        }
    }

    /// Fit `model` to `values` observed at `coords`, starting from `initial`
    pub fn fit<M: ModelFunction>(
        &self,
        model: &M,
        coords: &[M::Coord],
        values: &[f64],
        initial: &[f64],
        bounds: Option<&Bounds>,
    ) -> Result<LeastSquaresFit, FitError> {
        let n_params = initial.len();
        let n_points = coords.len().min(values.len());
        if n_points < n_params || n_params == 0 {
            return Err(FitError::NotEnoughData {
                points: n_points,
                params: n_params,
            });
        }

        let mut params = initial.to_vec();
        if let Some(b) = bounds {
            b.clamp(&mut params);
        }

        let mut jacobian = DMatrix::<f64>::zeros(n_points, n_params);
        let mut residuals = DVector::<f64>::zeros(n_points);
        let mut gradient = vec![0.0; n_params];
        let mut trial = vec![0.0; n_params];

        let mut cost = self.cost(model, coords, values, &params);
        if !cost.is_finite() {
            return Err(FitError::NonFinite);
        }

        let mut lambda = self.initial_lambda;
        let mut converged = false;
        let mut iterations = 0;

        'outer: for iter in 0..self.max_iterations {
            iterations = iter + 1;

            if cost == 0.0 {
                converged = true;
                break;
            }

            // Jacobian of the model; residual = observed - predicted
            for (i, (&at, &observed)) in coords.iter().zip(values).take(n_points).enumerate() {
                residuals[i] = observed - model.value(at, &params);
                model.gradient(at, &params, &mut gradient);
                for (j, &g) in gradient.iter().enumerate() {
                    jacobian[(i, j)] = g;
                }
            }

            let jt = jacobian.transpose();
            let jtj = &jt * &jacobian;
            let jtr = &jt * &residuals;

            loop {
                let mut h = jtj.clone();
                for k in 0..n_params {
                    h[(k, k)] = jtj[(k, k)] * (1.0 + lambda);
                }

                match h.lu().solve(&jtr) {
                    Some(delta) if delta.iter().all(|d| d.is_finite()) => {
                        for k in 0..n_params {
                            trial[k] = params[k] + delta[k];
                        }
                        if let Some(b) = bounds {
                            b.clamp(&mut trial);
                        }

                        let new_cost = self.cost(model, coords, values, &trial);
                        if new_cost.is_finite() && new_cost < cost {
                            let reduction = (cost - new_cost) / cost;
                            let step_small = trial.iter().zip(&params).all(|(t, p)| {
                                (t - p).abs() <= self.xtol * (p.abs() + self.xtol)
                            });
                            params.copy_from_slice(&trial);
                            cost = new_cost;
                            lambda = (lambda / self.lambda_factor).max(1e-12);
                            if reduction <= self.ftol || step_small {
                                converged = true;
                                break 'outer;
                            }
                            break;
                        }
                    }
                    _ => {}
                }

                lambda *= self.lambda_factor;
                if lambda > MAX_LAMBDA {
                    // No damped step lowers the cost: stationary point
                    converged = true;
                    break 'outer;
                }
            }
        }

        if !converged {
            return Err(FitError::NotConverged { iterations });
        }
        if params.iter().any(|p| !p.is_finite()) {
            return Err(FitError::NonFinite);
        }
        if !self.well_conditioned(model, coords, &params, n_points) {
            return Err(FitError::SingularJacobian);
        }

        Ok(LeastSquaresFit {
            params,
            cost,
            iterations,
        })
    }

    fn cost<M: ModelFunction>(
        &self,
        model: &M,
        coords: &[M::Coord],
        values: &[f64],
        params: &[f64],
    ) -> f64 {
        coords
            .iter()
            .zip(values)
            .map(|(&at, &observed)| {
                let r = observed - model.value(at, params);
                r * r
            })
            .sum()
    }

    /// Undamped normal matrix at the solution must be invertible for the
    /// parameters to be determined by the data
    fn well_conditioned<M: ModelFunction>(
        &self,
        model: &M,
        coords: &[M::Coord],
        params: &[f64],
        n_points: usize,
    ) -> bool {
        let n_params = params.len();
        let mut jacobian = DMatrix::<f64>::zeros(n_points, n_params);
        let mut gradient = vec![0.0; n_params];
        for (i, &at) in coords.iter().take(n_points).enumerate() {
            model.gradient(at, params, &mut gradient);
            for (j, &g) in gradient.iter().enumerate() {
                jacobian[(i, j)] = g;
            }
        }

        // Column scaling so that parameters with different units compare fairly
        for j in 0..n_params {
            let norm = jacobian.column(j).norm();
            if norm == 0.0 || !norm.is_finite() {
                return false;
            }
            for i in 0..n_points {
                jacobian[(i, j)] /= norm;
            }
        }

        let singular_values = jacobian.svd(false, false).singular_values;
        let max = singular_values.max();
        let min = singular_values.min();
        min > 0.0 && max / min < MAX_CONDITION.sqrt()
    }
}
