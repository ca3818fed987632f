use crate::error::{SimResult, SimulationError};

/// `count` evenly spaced points from `start` to `end`, both included.
/// A single point yields `[start]`; zero points yields an empty vector.
pub fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            let mut points: Vec<f64> = (0..count).map(|i| start + step * i as f64).collect();
            // Pin the endpoint so it never drifts by rounding.
            points[count - 1] = end;
            points
        }
    }
}

/// Checks that a time grid is non-empty, finite and non-decreasing.
pub fn validate_time_grid(times: &[f64]) -> SimResult<()> {
    if times.is_empty() {
        return Err(SimulationError::invalid_grid(
            "time grid must contain at least one point",
        ));
    }
    if let Some(idx) = times.iter().position(|t| !t.is_finite()) {
        return Err(SimulationError::invalid_grid(format!(
            "time grid entry {} is not finite",
            idx
        )));
    }
    if let Some(idx) = times.windows(2).position(|w| w[1] < w[0]) {
        return Err(SimulationError::invalid_grid(format!(
            "time grid decreases between entries {} and {}",
            idx,
            idx + 1
        )));
    }
    Ok(())
}
