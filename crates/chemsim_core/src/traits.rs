/// The right-hand side of an ODE system, dx/dt = f(t, x).
pub trait VectorField {
    /// Returns the number of state variables.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt into, same length as x
    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]);
}

impl<F: VectorField + ?Sized> VectorField for &F {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        (**self).apply(t, x, out)
    }
}

impl<F: VectorField + ?Sized> VectorField for Box<F> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        (**self).apply(t, x, out)
    }
}

/// A trait for solvers that can step a system forward by a fixed amount.
pub trait Steppable {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, field: &impl VectorField, t: &mut f64, state: &mut [f64], dt: f64);
}

/// Wraps a closure `|t, x, out|` as a [`VectorField`] of a fixed dimension.
///
/// ```
/// use chemsim_core::traits::{FnField, VectorField};
///
/// let decay = FnField::new(1, |_t, x: &[f64], out: &mut [f64]| out[0] = -x[0]);
/// let mut out = [0.0];
/// decay.apply(0.0, &[2.0], &mut out);
/// assert_eq!(out[0], -2.0);
/// ```
#[derive(Clone)]
pub struct FnField<F> {
    dimension: usize,
    func: F,
}

impl<F> FnField<F>
where
    F: Fn(f64, &[f64], &mut [f64]),
{
    pub fn new(dimension: usize, func: F) -> Self {
        Self { dimension, func }
    }
}

impl<F> VectorField for FnField<F>
where
    F: Fn(f64, &[f64], &mut [f64]),
{
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        (self.func)(t, x, out)
    }
}
