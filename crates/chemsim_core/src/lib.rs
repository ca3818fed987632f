//! The `chemsim_core` crate simulates small systems of coupled ODEs, such as
//! chemical concentration dynamics, and prepares their output for plotting.
//!
//! Key components:
//! - **Traits**: `VectorField` (the right-hand side dx/dt = f(t, x)), `Steppable` (single-step solvers).
//! - **Driver**: `SimulationDriver`, which owns a field and its dimension and evaluates trajectories on a time grid.
//! - **Integrators**: adaptive Tsit5 with error control and fixed-step RK4, behind the `Integrator` trait.
//! - **Views**: concentration series, trajectory families and normalized direction fields.
//! - **Equation Engine**: parses text equations into bytecode evaluated as a `VectorField`.
//! - **Equilibrium**: Newton search for fixed points with eigenvalue-based stability.

pub mod driver;
pub mod equation_engine;
pub mod equilibrium;
pub mod error;
pub mod grid;
pub mod integrator;
pub mod solvers;
pub mod traits;
pub mod trajectory;
pub mod views;

pub use driver::SimulationDriver;
pub use error::{FailureReason, SimResult, SimulationError};
pub use integrator::{AdaptiveTsit5, FixedRk4, Integrator, IntegratorSettings};
pub use traits::{FnField, VectorField};
pub use trajectory::Trajectory;
