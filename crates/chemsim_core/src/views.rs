//! Plot-ready data built on [`SimulationDriver::evaluate`]: concentration
//! curves over time, and phase-plane trajectories with a normalized
//! direction field.

use crate::driver::SimulationDriver;
use crate::error::{SimResult, SimulationError};
use crate::grid::linspace;
use crate::integrator::Integrator;
use crate::traits::VectorField;
use crate::trajectory::Trajectory;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Number of time points used by the views when the caller has no preference.
pub const DEFAULT_SAMPLES: usize = 100_000;

/// Concentrations of every variable over a uniform time grid starting at 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcentrationSeries {
    pub trajectory: Trajectory,
}

impl ConcentrationSeries {
    pub fn times(&self) -> &[f64] {
        self.trajectory.times()
    }

    /// One variable's curve, for plotting against [`ConcentrationSeries::times`].
    pub fn variable(&self, var: usize) -> SimResult<Vec<f64>> {
        self.trajectory.column(var)
    }
}

/// Evaluates the system from all-zero initial concentrations over
/// `samples` evenly spaced points on `[0, end_time]`.
pub fn concentration_series<F, I>(
    driver: &SimulationDriver<F, I>,
    end_time: f64,
    samples: usize,
) -> SimResult<ConcentrationSeries>
where
    F: VectorField,
    I: Integrator,
{
    let times = sample_times(end_time, samples)?;
    let initial = vec![0.0; driver.dimension()];
    let trajectory = driver.evaluate(&initial, &times)?;
    Ok(ConcentrationSeries { trajectory })
}

/// One trajectory per initial condition, all over the same grid of
/// `samples` points on `[0, end_time]`. Stops at the first failure.
pub fn trajectory_family<F, I>(
    driver: &SimulationDriver<F, I>,
    initial_conditions: &[Vec<f64>],
    end_time: f64,
    samples: usize,
) -> SimResult<Vec<Trajectory>>
where
    F: VectorField,
    I: Integrator,
{
    let times = sample_times(end_time, samples)?;
    initial_conditions
        .iter()
        .map(|initial| driver.evaluate(initial, &times))
        .collect()
}

fn sample_times(end_time: f64, samples: usize) -> SimResult<Vec<f64>> {
    if !end_time.is_finite() || end_time < 0.0 {
        return Err(SimulationError::invalid_settings(
            "end_time must be finite and non-negative",
        ));
    }
    if samples == 0 {
        return Err(SimulationError::invalid_settings(
            "samples must be greater than zero",
        ));
    }
    Ok(linspace(0.0, end_time, samples))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionFieldSettings {
    /// Arrows along each axis.
    pub sampling_points: usize,
    /// State variable on the horizontal axis.
    pub x_var: usize,
    /// State variable on the vertical axis.
    pub y_var: usize,
    /// Fraction of the plotted data range added above the largest value.
    pub margin: f64,
}

impl Default for DirectionFieldSettings {
    fn default() -> Self {
        Self {
            sampling_points: 20,
            x_var: 0,
            y_var: 1,
            margin: 0.05,
        }
    }
}

/// Unit-length derivative directions sampled on a grid over
/// `[0, x_max] × [0, y_max]`.
///
/// `dx`, `dy` and `magnitude` are row-major over `(y, x)`: entry
/// `j * xs.len() + i` belongs to the point `(xs[i], ys[j])`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionField {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub dx: Vec<f64>,
    pub dy: Vec<f64>,
    /// Norm of the raw derivative, with exact zeros replaced by 1.
    pub magnitude: Vec<f64>,
}

impl DirectionField {
    pub fn x_max(&self) -> f64 {
        self.xs.last().copied().unwrap_or(0.0)
    }

    pub fn y_max(&self) -> f64 {
        self.ys.last().copied().unwrap_or(0.0)
    }

    /// `(x, y, dx, dy, magnitude)` for every grid point, rows of constant y first.
    pub fn arrows(&self) -> impl Iterator<Item = (f64, f64, f64, f64, f64)> + '_ {
        let width = self.xs.len();
        (0..self.dx.len()).map(move |k| {
            let (i, j) = (k % width, k / width);
            (
                self.xs[i],
                self.ys[j],
                self.dx[k],
                self.dy[k],
                self.magnitude[k],
            )
        })
    }
}

/// Samples the normalized direction of a 2-variable field on a grid sized to
/// cover every plotted trajectory.
///
/// The field is evaluated at t = 0. Where the derivative is exactly zero the
/// norm is taken as 1, so the arrow has zero length instead of NaN.
pub fn direction_field<F: VectorField + ?Sized>(
    field: &F,
    trajectories: &[Trajectory],
    settings: &DirectionFieldSettings,
) -> SimResult<DirectionField> {
    let dim = field.dimension();
    if dim != 2 {
        return Err(SimulationError::UnsupportedDimension {
            view: "direction field",
            expected: 2,
            actual: dim,
        });
    }
    if settings.sampling_points < 2 {
        return Err(SimulationError::invalid_settings(
            "sampling_points must be at least 2",
        ));
    }
    for var in [settings.x_var, settings.y_var] {
        if var >= dim {
            return Err(SimulationError::IndexOutOfRange {
                what: "direction field axis",
                index: var,
                len: dim,
            });
        }
    }
    if settings.x_var == settings.y_var {
        return Err(SimulationError::invalid_settings(
            "x_var and y_var must differ",
        ));
    }
    if !settings.margin.is_finite() || settings.margin < 0.0 {
        return Err(SimulationError::invalid_settings(
            "margin must be finite and non-negative",
        ));
    }

    let x_max = axis_extent(trajectories, settings.x_var, settings.margin)?;
    let y_max = axis_extent(trajectories, settings.y_var, settings.margin)?;
    let xs = linspace(0.0, x_max, settings.sampling_points);
    let ys = linspace(0.0, y_max, settings.sampling_points);

    let cells = xs.len() * ys.len();
    let mut dx = Vec::with_capacity(cells);
    let mut dy = Vec::with_capacity(cells);
    let mut magnitude = Vec::with_capacity(cells);
    let mut point = [0.0; 2];
    let mut slope = [0.0; 2];
    let mut zero_points = 0usize;

    for &y in &ys {
        for &x in &xs {
            point[settings.x_var] = x;
            point[settings.y_var] = y;
            field.apply(0.0, &point, &mut slope);
            let (u, v) = (slope[settings.x_var], slope[settings.y_var]);
            let mut norm = u.hypot(v);
            if norm == 0.0 {
                norm = 1.0;
                zero_points += 1;
            }
            dx.push(u / norm);
            dy.push(v / norm);
            magnitude.push(norm);
        }
    }

    if zero_points > 0 {
        warn!(zero_points, "direction field has stationary grid points");
    }
    debug!(x_max, y_max, points = cells, "direction field sampled");

    Ok(DirectionField {
        xs,
        ys,
        dx,
        dy,
        magnitude,
    })
}

/// Upper bound of one axis: the largest plotted value plus `margin` times the
/// plotted range, falling back to 1 when nothing positive was plotted.
fn axis_extent(trajectories: &[Trajectory], var: usize, margin: f64) -> SimResult<f64> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for trajectory in trajectories {
        for value in trajectory.column(var)? {
            if value.is_finite() {
                lo = lo.min(value);
                hi = hi.max(value);
            }
        }
    }
    // The axis always starts at zero.
    lo = lo.min(0.0);
    if hi <= 0.0 {
        return Ok(1.0);
    }
    Ok(hi + margin * (hi - lo))
}

/// Trajectories from several initial conditions together with the direction
/// field over the region they cover.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhasePortrait {
    pub initial_conditions: Vec<Vec<f64>>,
    pub trajectories: Vec<Trajectory>,
    pub field: DirectionField,
}

pub fn phase_portrait<F, I>(
    driver: &SimulationDriver<F, I>,
    initial_conditions: &[Vec<f64>],
    end_time: f64,
    samples: usize,
    settings: &DirectionFieldSettings,
) -> SimResult<PhasePortrait>
where
    F: VectorField,
    I: Integrator,
{
    let trajectories = trajectory_family(driver, initial_conditions, end_time, samples)?;
    let field = direction_field(driver.field(), &trajectories, settings)?;
    Ok(PhasePortrait {
        initial_conditions: initial_conditions.to_vec(),
        trajectories,
        field,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        concentration_series, direction_field, trajectory_family, DirectionFieldSettings,
    };
    use crate::driver::SimulationDriver;
    use crate::error::SimulationError;
    use crate::traits::{FnField, VectorField};

    /// dx/dt = 1 - x, dy/dt = x - y; relaxes to (1, 1).
    struct Relaxation;

    impl VectorField for Relaxation {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = 1.0 - x[0];
            out[1] = x[0] - x[1];
        }
    }

    #[test]
    fn series_passes_integration_failure_through() {
        let field = FnField::new(1, |_t, x: &[f64], out: &mut [f64]| out[0] = 1.0 + x[0] * x[0]);
        let driver = SimulationDriver::new(field, 1).unwrap();
        // x = tan(t) from zero initial conditions blows up at pi/2.
        assert!(matches!(
            concentration_series(&driver, 3.0, 31),
            Err(SimulationError::IntegrationFailure { .. })
        ));
    }

    #[test]
    fn concentration_series_starts_from_zero() {
        let driver = SimulationDriver::new(Relaxation, 2).unwrap();
        let series = concentration_series(&driver, 10.0, 101).unwrap();
        assert_eq!(series.trajectory.shape(), (101, 2));
        assert_eq!(series.trajectory.first_row(), &[0.0, 0.0]);
        assert_eq!(series.times()[100], 10.0);
        let x = series.variable(0).unwrap();
        assert!((x[100] - (1.0 - (-10.0_f64).exp())).abs() < 1e-6);
        assert!(matches!(
            series.variable(5),
            Err(SimulationError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn concentration_series_rejects_bad_sampling() {
        let driver = SimulationDriver::new(Relaxation, 2).unwrap();
        assert!(matches!(
            concentration_series(&driver, f64::NAN, 10),
            Err(SimulationError::InvalidSettings { .. })
        ));
        assert!(matches!(
            concentration_series(&driver, 1.0, 0),
            Err(SimulationError::InvalidSettings { .. })
        ));
    }

    #[test]
    fn trajectory_family_propagates_dimension_mismatch() {
        let driver = SimulationDriver::new(Relaxation, 2).unwrap();
        let result = trajectory_family(&driver, &[vec![0.0, 0.0], vec![1.0]], 1.0, 5);
        assert_eq!(
            result,
            Err(SimulationError::DimensionMismatch {
                expected: 2,
                actual: 1,
            })
        );
    }

    #[test]
    fn direction_field_vectors_are_unit_or_zero() {
        let driver = SimulationDriver::new(Relaxation, 2).unwrap();
        let family = trajectory_family(&driver, &[vec![0.0, 0.0], vec![2.0, 3.0]], 5.0, 50).unwrap();
        let field = direction_field(driver.field(), &family, &DirectionFieldSettings::default())
            .unwrap();

        assert_eq!(field.xs.len(), 20);
        assert_eq!(field.ys.len(), 20);
        assert_eq!(field.dx.len(), 400);
        // x never exceeds 2 and y never exceeds 3, plus a 5% margin of the range
        assert!((field.x_max() - 2.1).abs() < 1e-9);
        assert!((field.y_max() - 3.15).abs() < 1e-9);
        for (_, _, u, v, m) in field.arrows() {
            let len = u.hypot(v);
            assert!(len.is_finite());
            assert!((len - 1.0).abs() < 1e-12 || len == 0.0);
            assert!(m > 0.0);
        }
    }

    #[test]
    fn zero_derivative_gives_zero_arrow_not_nan() {
        let still = FnField::new(2, |_t, _x: &[f64], out: &mut [f64]| {
            out[0] = 0.0;
            out[1] = 0.0;
        });
        let field = direction_field(&still, &[], &DirectionFieldSettings::default()).unwrap();
        assert_eq!(field.x_max(), 1.0);
        for (_, _, u, v, m) in field.arrows() {
            assert_eq!((u, v), (0.0, 0.0));
            assert_eq!(m, 1.0);
        }
    }

    #[test]
    fn swapped_axes_read_the_matching_components() {
        // dx/dt = 1, dy/dt = 0 everywhere.
        let drift = FnField::new(2, |_t, _x: &[f64], out: &mut [f64]| {
            out[0] = 1.0;
            out[1] = 0.0;
        });
        let settings = DirectionFieldSettings {
            x_var: 1,
            y_var: 0,
            ..DirectionFieldSettings::default()
        };
        let field = direction_field(&drift, &[], &settings).unwrap();
        for (_, _, u, v, _) in field.arrows() {
            assert_eq!((u, v), (0.0, 1.0));
        }
    }

    #[test]
    fn direction_field_requires_two_variables() {
        let three = FnField::new(3, |_t, _x: &[f64], out: &mut [f64]| out.fill(0.0));
        assert_eq!(
            direction_field(&three, &[], &DirectionFieldSettings::default()),
            Err(SimulationError::UnsupportedDimension {
                view: "direction field",
                expected: 2,
                actual: 3,
            })
        );
    }

    #[test]
    fn direction_field_rejects_bad_settings() {
        let driver = SimulationDriver::new(Relaxation, 2).unwrap();
        let same_axis = DirectionFieldSettings {
            x_var: 0,
            y_var: 0,
            ..DirectionFieldSettings::default()
        };
        assert!(matches!(
            direction_field(driver.field(), &[], &same_axis),
            Err(SimulationError::InvalidSettings { .. })
        ));
        let one_point = DirectionFieldSettings {
            sampling_points: 1,
            ..DirectionFieldSettings::default()
        };
        assert!(matches!(
            direction_field(driver.field(), &[], &one_point),
            Err(SimulationError::InvalidSettings { .. })
        ));
    }
}
