//! CSV tables for the plotting side: one row per time point for concentration
//! curves, long format for trajectory families, one row per arrow for the
//! direction field.

use anyhow::{bail, Context, Result};
use chemsim_core::views::{ConcentrationSeries, DirectionField};
use chemsim_core::Trajectory;
use csv::Writer;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

pub fn create_file(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Columns `t` followed by the selected variables. An empty `vars` selects
/// every variable.
pub fn write_series<W: Write>(
    out: W,
    series: &ConcentrationSeries,
    names: &[String],
    vars: &[usize],
) -> Result<()> {
    let trajectory = &series.trajectory;
    let all: Vec<usize> = (0..trajectory.dimension()).collect();
    let vars = if vars.is_empty() { &all[..] } else { vars };
    for &var in vars {
        if var >= trajectory.dimension() {
            bail!(
                "Variable index {} out of range for {} variables.",
                var,
                trajectory.dimension()
            );
        }
    }

    let mut writer = Writer::from_writer(out);
    let mut header = vec!["t".to_string()];
    header.extend(vars.iter().map(|&v| column_name(names, v)));
    writer.write_record(&header)?;

    for (t, row) in trajectory.times().iter().zip(trajectory.rows()) {
        let mut record = vec![t.to_string()];
        record.extend(vars.iter().map(|&v| row[v].to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Long format: `trajectory, t, <variables...>`, trajectories numbered from 0
/// in the order given.
pub fn write_trajectories<W: Write>(
    out: W,
    trajectories: &[Trajectory],
    names: &[String],
) -> Result<()> {
    let mut writer = Writer::from_writer(out);
    let dim = trajectories.first().map_or(names.len(), Trajectory::dimension);

    let mut header = vec!["trajectory".to_string(), "t".to_string()];
    header.extend((0..dim).map(|v| column_name(names, v)));
    writer.write_record(&header)?;

    for (index, trajectory) in trajectories.iter().enumerate() {
        for (t, row) in trajectory.times().iter().zip(trajectory.rows()) {
            let mut record = vec![index.to_string(), t.to_string()];
            record.extend(row.iter().map(f64::to_string));
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn write_direction_field<W: Write>(out: W, field: &DirectionField) -> Result<()> {
    let mut writer = Writer::from_writer(out);
    writer.write_record(["x", "y", "dx", "dy", "magnitude"])?;
    for (x, y, dx, dy, magnitude) in field.arrows() {
        writer.write_record([x, y, dx, dy, magnitude].map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

fn column_name(names: &[String], var: usize) -> String {
    names
        .get(var)
        .cloned()
        .unwrap_or_else(|| format!("x{var}"))
}
