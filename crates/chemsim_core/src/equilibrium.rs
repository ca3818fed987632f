use crate::traits::VectorField;
use anyhow::{anyhow, bail, Context, Result};
use nalgebra::{Complex, DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub damping: f64,
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            damping: 1.0,
            tolerance: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexNumber {
    pub re: f64,
    pub im: f64,
}

impl From<Complex<f64>> for ComplexNumber {
    fn from(value: Complex<f64>) -> Self {
        Self {
            re: value.re,
            im: value.im,
        }
    }
}

/// Linear stability of a fixed point, read off the Jacobian eigenvalues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    /// Every eigenvalue has negative real part.
    Stable,
    /// Every eigenvalue has positive real part.
    Unstable,
    /// Eigenvalues with real parts of both signs.
    Saddle,
    /// Purely imaginary eigenvalues.
    Center,
    /// A zero eigenvalue alongside others; linearization is inconclusive.
    Degenerate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquilibriumResult {
    pub state: Vec<f64>,
    pub residual_norm: f64,
    pub iterations: usize,
    /// Row-major.
    pub jacobian: Vec<f64>,
    pub eigenvalues: Vec<ComplexNumber>,
    pub stability: Stability,
}

const REAL_PART_EPS: f64 = 1e-9;

/// Finds a state where the vector field vanishes by damped Newton iteration
/// from `initial_guess`, then classifies its stability.
///
/// The field is evaluated at t = 0; the Jacobian is estimated by central
/// differences.
pub fn solve_equilibrium<F: VectorField + ?Sized>(
    field: &F,
    initial_guess: &[f64],
    settings: NewtonSettings,
) -> Result<EquilibriumResult> {
    let dim = field.dimension();
    if dim == 0 {
        bail!("System has zero dimension.");
    }
    if initial_guess.len() != dim {
        bail!(
            "Initial guess dimension mismatch. Expected {}, got {}.",
            dim,
            initial_guess.len()
        );
    }
    if settings.max_steps == 0 {
        bail!("max_steps must be greater than zero.");
    }
    if settings.damping <= 0.0 {
        bail!("damping must be positive.");
    }
    if settings.tolerance <= 0.0 {
        bail!("tolerance must be positive.");
    }

    let mut state = initial_guess.to_vec();
    let mut residual = vec![0.0; dim];
    field.apply(0.0, &state, &mut residual);
    let mut residual_norm = l2_norm(&residual);
    let mut iterations = 0usize;

    loop {
        if !residual_norm.is_finite() {
            bail!(
                "Newton iteration produced a non-finite residual after {} steps.",
                iterations
            );
        }
        if residual_norm <= settings.tolerance {
            break;
        }

        if iterations >= settings.max_steps {
            bail!(
                "Newton solver failed to converge in {} steps (‖f(x)‖ = {}).",
                settings.max_steps,
                residual_norm
            );
        }

        let jacobian = compute_jacobian(field, &state);
        let delta = solve_linear_system(dim, &jacobian, &residual)
            .context("Failed to solve linear system during Newton iteration.")?;

        for i in 0..dim {
            state[i] -= settings.damping * delta[i];
        }

        iterations += 1;
        field.apply(0.0, &state, &mut residual);
        residual_norm = l2_norm(&residual);
        debug!(iterations, residual_norm, "newton step");
    }

    let jacobian = compute_jacobian(field, &state);
    let eigenvalues = DMatrix::from_row_slice(dim, dim, &jacobian).complex_eigenvalues();
    let stability = classify(eigenvalues.as_slice());
    if stability == Stability::Degenerate {
        warn!(?state, "equilibrium has a zero eigenvalue; linear stability is inconclusive");
    }

    Ok(EquilibriumResult {
        state,
        residual_norm,
        iterations,
        jacobian,
        eigenvalues: eigenvalues.iter().copied().map(ComplexNumber::from).collect(),
        stability,
    })
}

fn compute_jacobian<F: VectorField + ?Sized>(field: &F, state: &[f64]) -> Vec<f64> {
    let dim = state.len();
    let mut jacobian = vec![0.0; dim * dim];
    let mut probe = state.to_vec();
    let mut forward = vec![0.0; dim];
    let mut backward = vec![0.0; dim];

    for j in 0..dim {
        let h = 1e-6 * state[j].abs().max(1.0);
        probe[j] = state[j] + h;
        field.apply(0.0, &probe, &mut forward);
        probe[j] = state[j] - h;
        field.apply(0.0, &probe, &mut backward);
        probe[j] = state[j];
        for i in 0..dim {
            jacobian[i * dim + j] = (forward[i] - backward[i]) / (2.0 * h);
        }
    }

    jacobian
}

fn solve_linear_system(dim: usize, jacobian: &[f64], residual: &[f64]) -> Result<Vec<f64>> {
    let j_matrix = DMatrix::from_row_slice(dim, dim, jacobian);
    let rhs = DVector::from_column_slice(residual);
    j_matrix
        .lu()
        .solve(&rhs)
        .map(|v| v.iter().cloned().collect())
        .ok_or_else(|| anyhow!("Jacobian is singular."))
}

fn classify(eigenvalues: &[Complex<f64>]) -> Stability {
    let negative = eigenvalues.iter().filter(|l| l.re < -REAL_PART_EPS).count();
    let positive = eigenvalues.iter().filter(|l| l.re > REAL_PART_EPS).count();
    let neutral = eigenvalues.len() - negative - positive;

    if neutral == 0 {
        match (negative, positive) {
            (_, 0) => Stability::Stable,
            (0, _) => Stability::Unstable,
            _ => Stability::Saddle,
        }
    } else if negative == 0
        && positive == 0
        && eigenvalues.iter().all(|l| l.im.abs() > REAL_PART_EPS)
    {
        Stability::Center
    } else {
        Stability::Degenerate
    }
}

fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}
