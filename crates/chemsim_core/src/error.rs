use thiserror::Error;

pub type SimResult<T> = Result<T, SimulationError>;

/// Errors surfaced by the simulation driver, its integrators and the derived views.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("Initial conditions have {actual} entries but the system has {expected} variables")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Integration failed at t = {t}: {reason}")]
    IntegrationFailure { t: f64, reason: FailureReason },

    #[error(
        "Vector field declares {declared} variables but the driver was configured for {expected}"
    )]
    ContractViolation { expected: usize, declared: usize },

    #[error("System dimension must be positive")]
    InvalidDimension,

    #[error("Invalid time grid: {what}")]
    InvalidTimeGrid { what: String },

    #[error("Invalid settings: {what}")]
    InvalidSettings { what: String },

    #[error("{view} requires a {expected}-variable system, got {actual}")]
    UnsupportedDimension {
        view: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Index out of range: {what} (index={index}, len={len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },
}

/// Why an integrator gave up.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum FailureReason {
    #[error("state became non-finite")]
    NonFiniteState,

    #[error("step size {h:e} fell below the minimum allowed step")]
    StepSizeTooSmall { h: f64 },

    #[error("step size {h:e} is below the time resolution at this t")]
    StepBelowTimeResolution { h: f64 },

    #[error("exceeded {steps} steps within a single output interval")]
    StepBudgetExhausted { steps: usize },
}

impl SimulationError {
    pub(crate) fn invalid_settings(what: impl Into<String>) -> Self {
        Self::InvalidSettings { what: what.into() }
    }

    pub(crate) fn invalid_grid(what: impl Into<String>) -> Self {
        Self::InvalidTimeGrid { what: what.into() }
    }
}
