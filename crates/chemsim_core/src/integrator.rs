//! Integrators turn a vector field, an initial state and a time grid into a
//! [`Trajectory`] sampled exactly at the requested times.
//!
//! Both integrators allocate their work buffers per call and keep nothing
//! between calls, so a single instance can serve any number of callers.

use crate::error::{FailureReason, SimResult, SimulationError};
use crate::grid::validate_time_grid;
use crate::solvers::{Tsit5, RK4};
use crate::traits::{Steppable, VectorField};
use crate::trajectory::Trajectory;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Produces the state of `field` at every entry of `times`, starting from
/// `initial` at `times[0]`.
pub trait Integrator {
    fn integrate<F: VectorField + ?Sized>(
        &self,
        field: &F,
        initial: &[f64],
        times: &[f64],
    ) -> SimResult<Trajectory>;
}

/// Error control and step limits for [`AdaptiveTsit5`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub rel_tol: f64,
    pub abs_tol: f64,
    /// First trial step; estimated from the initial slope when absent.
    pub initial_step: Option<f64>,
    pub min_step: f64,
    pub max_step: Option<f64>,
    /// Attempted steps allowed between two consecutive output times.
    pub max_steps_per_interval: usize,
    pub safety: f64,
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            rel_tol: 1.49012e-8,
            abs_tol: 1.49012e-8,
            initial_step: None,
            min_step: 1e-12,
            max_step: None,
            max_steps_per_interval: 50_000,
            safety: 0.9,
            min_factor: 0.2,
            max_factor: 5.0,
        }
    }
}

impl IntegratorSettings {
    pub fn validate(&self) -> SimResult<()> {
        if !self.rel_tol.is_finite() || self.rel_tol < 0.0 {
            return Err(SimulationError::invalid_settings(
                "rel_tol must be finite and non-negative",
            ));
        }
        if !self.abs_tol.is_finite() || self.abs_tol <= 0.0 {
            return Err(SimulationError::invalid_settings(
                "abs_tol must be finite and positive",
            ));
        }
        if !self.min_step.is_finite() || self.min_step <= 0.0 {
            return Err(SimulationError::invalid_settings(
                "min_step must be finite and positive",
            ));
        }
        if let Some(h) = self.initial_step {
            if !h.is_finite() || h <= 0.0 {
                return Err(SimulationError::invalid_settings(
                    "initial_step must be finite and positive",
                ));
            }
        }
        if let Some(h) = self.max_step {
            if h.is_nan() || h < self.min_step {
                return Err(SimulationError::invalid_settings(
                    "max_step must be positive and at least min_step",
                ));
            }
        }
        if self.max_steps_per_interval == 0 {
            return Err(SimulationError::invalid_settings(
                "max_steps_per_interval must be greater than zero",
            ));
        }
        if !(self.safety > 0.0 && self.safety <= 1.0) {
            return Err(SimulationError::invalid_settings(
                "safety must lie in (0, 1]",
            ));
        }
        if !(self.min_factor > 0.0 && self.min_factor < 1.0) {
            return Err(SimulationError::invalid_settings(
                "min_factor must lie in (0, 1)",
            ));
        }
        if !(self.max_factor > 1.0) || !self.max_factor.is_finite() {
            return Err(SimulationError::invalid_settings(
                "max_factor must be finite and greater than 1",
            ));
        }
        Ok(())
    }

    fn step_factor(&self, error: f64) -> f64 {
        if error == 0.0 {
            return self.max_factor;
        }
        let exponent = 1.0 / (Tsit5::ERROR_ORDER as f64 + 1.0);
        (self.safety * error.powf(-exponent)).clamp(self.min_factor, self.max_factor)
    }

    fn clamp_step(&self, h: f64) -> f64 {
        let h = h.max(self.min_step);
        match self.max_step {
            Some(max) => h.min(max),
            None => h,
        }
    }
}

/// Adaptive Tsitouras 5(4) integration with embedded error control.
///
/// Steps never cross an output time: the step that would overshoot is
/// shortened to land on it, so every row is a true solver state rather than
/// an interpolant.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AdaptiveTsit5 {
    pub settings: IntegratorSettings,
}

impl AdaptiveTsit5 {
    pub fn new(settings: IntegratorSettings) -> Self {
        Self { settings }
    }

    fn initial_step<F: VectorField + ?Sized>(&self, field: &F, t0: f64, state: &[f64]) -> f64 {
        if let Some(h) = self.settings.initial_step {
            return self.settings.clamp_step(h);
        }
        let mut slope = vec![0.0; state.len()];
        field.apply(t0, state, &mut slope);
        let scale =
            |i: usize| self.settings.abs_tol + self.settings.rel_tol * state[i].abs();
        let rms = |v: &[f64]| {
            let sum: f64 = v
                .iter()
                .enumerate()
                .map(|(i, x)| (x / scale(i)).powi(2))
                .sum();
            (sum / v.len() as f64).sqrt()
        };
        let d0 = rms(state);
        let d1 = rms(&slope);
        let guess = if d0 < 1e-5 || d1 < 1e-5 || !d1.is_finite() {
            1e-6
        } else {
            0.01 * d0 / d1
        };
        self.settings.clamp_step(guess)
    }
}

impl Integrator for AdaptiveTsit5 {
    fn integrate<F: VectorField + ?Sized>(
        &self,
        field: &F,
        initial: &[f64],
        times: &[f64],
    ) -> SimResult<Trajectory> {
        self.settings.validate()?;
        validate_time_grid(times)?;
        let dim = initial.len();
        if dim == 0 {
            return Err(SimulationError::InvalidDimension);
        }
        let t0 = times[0];
        ensure_finite(initial, t0)?;

        let mut data = Vec::with_capacity(times.len() * dim);
        data.extend_from_slice(initial);

        let mut stepper = Tsit5::new(dim);
        let mut state = initial.to_vec();
        let mut next = vec![0.0; dim];
        let mut t = t0;
        let mut h = self.initial_step(field, t0, initial);

        for &target in &times[1..] {
            let mut attempts = 0usize;
            while t < target {
                attempts += 1;
                if attempts > self.settings.max_steps_per_interval {
                    return Err(SimulationError::IntegrationFailure {
                        t,
                        reason: FailureReason::StepBudgetExhausted {
                            steps: self.settings.max_steps_per_interval,
                        },
                    });
                }

                let remaining = target - t;
                let lands = h >= remaining;
                let dt = if lands { remaining } else { h };
                if !lands && t + dt == t {
                    return Err(SimulationError::IntegrationFailure {
                        t,
                        reason: FailureReason::StepBelowTimeResolution { h: dt },
                    });
                }

                stepper.trial_step(&field, t, &state, dt, &mut next);
                let error = stepper.error_norm(
                    &state,
                    &next,
                    dt,
                    self.settings.abs_tol,
                    self.settings.rel_tol,
                );

                if error.is_finite() && error <= 1.0 {
                    ensure_finite(&next, t + dt)?;
                    t = if lands { target } else { t + dt };
                    state.copy_from_slice(&next);
                    let proposed = self.settings.clamp_step(dt * self.settings.step_factor(error));
                    // A step shortened to land on an output time says little
                    // about the step the solution can afford.
                    h = if lands { h.max(proposed) } else { proposed };
                } else {
                    if dt <= self.settings.min_step {
                        return Err(SimulationError::IntegrationFailure {
                            t,
                            reason: FailureReason::StepSizeTooSmall { h: dt },
                        });
                    }
                    let factor = if error.is_finite() {
                        self.settings.step_factor(error)
                    } else {
                        self.settings.min_factor
                    };
                    trace!(t, dt, error, "rejected step");
                    h = self.settings.clamp_step(dt * factor);
                }
            }
            data.extend_from_slice(&state);
        }

        Ok(Trajectory::from_row_major(times.to_vec(), dim, data))
    }
}

/// Classic RK4 on a uniform sub-grid: each output interval is split into the
/// fewest equal steps no longer than `max_step`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedRk4 {
    pub max_step: f64,
}

impl Default for FixedRk4 {
    fn default() -> Self {
        Self { max_step: 1e-3 }
    }
}

impl FixedRk4 {
    pub fn new(max_step: f64) -> Self {
        Self { max_step }
    }
}

impl Integrator for FixedRk4 {
    fn integrate<F: VectorField + ?Sized>(
        &self,
        field: &F,
        initial: &[f64],
        times: &[f64],
    ) -> SimResult<Trajectory> {
        if !self.max_step.is_finite() || self.max_step <= 0.0 {
            return Err(SimulationError::invalid_settings(
                "max_step must be finite and positive",
            ));
        }
        validate_time_grid(times)?;
        let dim = initial.len();
        if dim == 0 {
            return Err(SimulationError::InvalidDimension);
        }
        let t0 = times[0];
        ensure_finite(initial, t0)?;

        let mut data = Vec::with_capacity(times.len() * dim);
        data.extend_from_slice(initial);

        let mut stepper = RK4::new(dim);
        let mut state = initial.to_vec();
        let mut t = t0;

        for &target in &times[1..] {
            let span = target - t;
            if span > 0.0 {
                let steps = (span / self.max_step).ceil().max(1.0) as usize;
                let dt = span / steps as f64;
                for _ in 0..steps {
                    stepper.step(&field, &mut t, &mut state, dt);
                }
                ensure_finite(&state, target)?;
                t = target;
            }
            data.extend_from_slice(&state);
        }

        Ok(Trajectory::from_row_major(times.to_vec(), dim, data))
    }
}

fn ensure_finite(state: &[f64], t: f64) -> SimResult<()> {
    if state.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(SimulationError::IntegrationFailure {
            t,
            reason: FailureReason::NonFiniteState,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{AdaptiveTsit5, FixedRk4, Integrator, IntegratorSettings};
    use crate::error::{FailureReason, SimulationError};
    use crate::grid::linspace;
    use crate::traits::FnField;

    fn assert_err_contains<T: std::fmt::Debug>(
        result: Result<T, SimulationError>,
        needle: &str,
    ) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn adaptive_tracks_exponential_decay_at_requested_times() {
        let field = FnField::new(1, |_t, x: &[f64], out: &mut [f64]| out[0] = -0.5 * x[0]);
        let times = linspace(0.0, 10.0, 11);
        let trajectory = AdaptiveTsit5::default()
            .integrate(&field, &[2.0], &times)
            .expect("integration should succeed");

        assert_eq!(trajectory.shape(), (11, 1));
        for (row, &t) in trajectory.rows().zip(times.iter()) {
            let exact = 2.0 * (-0.5 * t).exp();
            assert!((row[0] - exact).abs() < 1e-6, "t = {t}: {} vs {exact}", row[0]);
        }
    }

    #[test]
    fn adaptive_handles_time_dependent_fields() {
        // x' = cos(t), x(0) = 0  =>  x = sin(t)
        let field = FnField::new(1, |t, _x: &[f64], out: &mut [f64]| out[0] = t.cos());
        let times = linspace(0.0, 6.0, 25);
        let trajectory = AdaptiveTsit5::default()
            .integrate(&field, &[0.0], &times)
            .expect("integration should succeed");
        for (row, &t) in trajectory.rows().zip(times.iter()) {
            assert!((row[0] - t.sin()).abs() < 1e-6);
        }
    }

    #[test]
    fn repeated_times_repeat_rows() {
        let field = FnField::new(1, |_t, x: &[f64], out: &mut [f64]| out[0] = x[0]);
        let trajectory = AdaptiveTsit5::default()
            .integrate(&field, &[1.0], &[0.0, 0.5, 0.5, 1.0])
            .expect("integration should succeed");
        assert_eq!(trajectory.row(1), trajectory.row(2));
        assert!((trajectory.row(3)[0] - 1.0_f64.exp()).abs() < 1e-6);
    }

    #[test]
    fn blow_up_is_reported_as_integration_failure() {
        // x' = x^2 from x(0) = 1 escapes to infinity at t = 1.
        let field = FnField::new(1, |_t, x: &[f64], out: &mut [f64]| out[0] = x[0] * x[0]);
        let result = AdaptiveTsit5::default().integrate(&field, &[1.0], &[0.0, 2.0]);
        match result {
            Err(SimulationError::IntegrationFailure { t, .. }) => assert!(t < 1.0 + 1e-6),
            other => panic!("expected integration failure, got {other:?}"),
        }
    }

    #[test]
    fn step_budget_is_enforced() {
        let field = FnField::new(1, |_t, x: &[f64], out: &mut [f64]| out[0] = -x[0]);
        let integrator = AdaptiveTsit5::new(IntegratorSettings {
            max_step: Some(0.01),
            max_steps_per_interval: 10,
            ..IntegratorSettings::default()
        });
        match integrator.integrate(&field, &[1.0], &[0.0, 1.0]) {
            Err(SimulationError::IntegrationFailure { reason, .. }) => {
                assert_eq!(reason, FailureReason::StepBudgetExhausted { steps: 10 })
            }
            other => panic!("expected step budget failure, got {other:?}"),
        }
    }

    #[test]
    fn steps_that_cannot_move_t_fail_early() {
        // The spacing of f64 near 1e17 is 16, far above any step the decay needs.
        let field = FnField::new(1, |_t, x: &[f64], out: &mut [f64]| out[0] = -x[0]);
        match AdaptiveTsit5::default().integrate(&field, &[1.0], &[1e17, 1e17 + 64.0]) {
            Err(SimulationError::IntegrationFailure { t, reason }) => {
                assert_eq!(t, 1e17);
                assert!(matches!(
                    reason,
                    FailureReason::StepBelowTimeResolution { .. }
                ));
            }
            other => panic!("expected a time resolution failure, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_initial_state_fails_at_t0() {
        let field = FnField::new(1, |_t, x: &[f64], out: &mut [f64]| out[0] = x[0]);
        assert_eq!(
            AdaptiveTsit5::default().integrate(&field, &[f64::NAN], &[3.0, 4.0]),
            Err(SimulationError::IntegrationFailure {
                t: 3.0,
                reason: FailureReason::NonFiniteState,
            })
        );
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let field = FnField::new(1, |_t, x: &[f64], out: &mut [f64]| out[0] = x[0]);
        let integrator = AdaptiveTsit5::new(IntegratorSettings {
            abs_tol: 0.0,
            ..IntegratorSettings::default()
        });
        assert_err_contains(integrator.integrate(&field, &[1.0], &[0.0, 1.0]), "abs_tol");

        let integrator = AdaptiveTsit5::new(IntegratorSettings {
            min_factor: 1.5,
            ..IntegratorSettings::default()
        });
        assert_err_contains(integrator.integrate(&field, &[1.0], &[0.0, 1.0]), "min_factor");

        assert_err_contains(
            FixedRk4::new(0.0).integrate(&field, &[1.0], &[0.0, 1.0]),
            "max_step",
        );
    }

    #[test]
    fn fixed_rk4_agrees_with_adaptive() {
        let field = FnField::new(2, |_t, x: &[f64], out: &mut [f64]| {
            out[0] = x[1];
            out[1] = -x[0];
        });
        let times = linspace(0.0, 3.0, 7);
        let adaptive = AdaptiveTsit5::default()
            .integrate(&field, &[1.0, 0.0], &times)
            .expect("adaptive integration should succeed");
        let fixed = FixedRk4::new(1e-3)
            .integrate(&field, &[1.0, 0.0], &times)
            .expect("fixed integration should succeed");
        for (a, b) in adaptive.rows().zip(fixed.rows()) {
            assert!((a[0] - b[0]).abs() < 1e-6);
            assert!((a[1] - b[1]).abs() < 1e-6);
        }
        assert!((adaptive.last_row()[0] - 3.0_f64.cos()).abs() < 1e-6);
    }
}
