use crate::error::{SimResult, SimulationError};
use crate::grid::validate_time_grid;
use crate::integrator::{AdaptiveTsit5, Integrator};
use crate::traits::VectorField;
use crate::trajectory::Trajectory;
use tracing::debug;

/// A reusable handle on an N-variable ODE system.
///
/// The field, its dimension and the integrator are fixed at construction;
/// [`SimulationDriver::evaluate`] is the single entry point for producing
/// trajectories and never mutates the driver.
#[derive(Debug, Clone)]
pub struct SimulationDriver<F, I = AdaptiveTsit5> {
    field: F,
    dimension: usize,
    integrator: I,
}

impl<F: VectorField> SimulationDriver<F> {
    /// Builds a driver using the default adaptive integrator.
    pub fn new(field: F, dimension: usize) -> SimResult<Self> {
        Self::with_integrator(field, dimension, AdaptiveTsit5::default())
    }
}

impl<F: VectorField, I: Integrator> SimulationDriver<F, I> {
    pub fn with_integrator(field: F, dimension: usize, integrator: I) -> SimResult<Self> {
        if dimension == 0 {
            return Err(SimulationError::InvalidDimension);
        }
        Ok(Self {
            field,
            dimension,
            integrator,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn field(&self) -> &F {
        &self.field
    }

    pub fn integrator(&self) -> &I {
        &self.integrator
    }

    /// Integrates the system from `initial_conditions` at `times[0]` and
    /// returns its state at every entry of `times`.
    ///
    /// The result always has shape `(times.len(), dimension)`; on any failure
    /// no trajectory is returned.
    pub fn evaluate(&self, initial_conditions: &[f64], times: &[f64]) -> SimResult<Trajectory> {
        if initial_conditions.len() != self.dimension {
            return Err(SimulationError::DimensionMismatch {
                expected: self.dimension,
                actual: initial_conditions.len(),
            });
        }
        let declared = self.field.dimension();
        if declared != self.dimension {
            return Err(SimulationError::ContractViolation {
                expected: self.dimension,
                declared,
            });
        }
        validate_time_grid(times)?;

        debug!(
            dimension = self.dimension,
            points = times.len(),
            t0 = times[0],
            t_end = times[times.len() - 1],
            "evaluating trajectory"
        );
        let trajectory = self
            .integrator
            .integrate(&self.field, initial_conditions, times)?;
        debug_assert_eq!(trajectory.shape(), (times.len(), self.dimension));
        debug!(final_state = ?trajectory.last_row(), "trajectory complete");
        Ok(trajectory)
    }
}
