use crate::error::{SimResult, SimulationError};
use serde::Serialize;

/// Tabulated solution of an ODE system: one row of `dimension` values per
/// requested time, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    times: Vec<f64>,
    dimension: usize,
    data: Vec<f64>,
}

impl Trajectory {
    pub(crate) fn from_row_major(times: Vec<f64>, dimension: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(times.len() * dimension, data.len());
        Self {
            times,
            dimension,
            data,
        }
    }

    /// Number of rows (one per requested time).
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Number of state variables per row.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.len(), self.dimension)
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Row-major view of the whole table.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// State at `times()[index]`. Panics if `index >= len()`, like slice indexing.
    pub fn row(&self, index: usize) -> &[f64] {
        &self.data[index * self.dimension..(index + 1) * self.dimension]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.data.chunks_exact(self.dimension)
    }

    pub fn first_row(&self) -> &[f64] {
        self.row(0)
    }

    pub fn last_row(&self) -> &[f64] {
        self.row(self.len() - 1)
    }

    /// Copies out one state variable over time.
    pub fn column(&self, var: usize) -> SimResult<Vec<f64>> {
        if var >= self.dimension {
            return Err(SimulationError::IndexOutOfRange {
                what: "trajectory column",
                index: var,
                len: self.dimension,
            });
        }
        Ok(self.rows().map(|row| row[var]).collect())
    }

    /// Largest finite value taken by one state variable, if any.
    pub fn column_max(&self, var: usize) -> SimResult<Option<f64>> {
        let column = self.column(var)?;
        Ok(column
            .into_iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v)))))
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}
