mod output;
mod scenario;

use anyhow::{Context, Result};
use chemsim_core::equilibrium::solve_equilibrium;
use chemsim_core::views::{concentration_series, phase_portrait, DirectionFieldSettings};
use clap::{Parser, Subcommand};
use scenario::ScenarioConfig;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chemsim")]
#[command(about = "Simulate coupled concentration ODEs and export plot data as CSV", long_about = None)]
struct Cli {
    /// Scenario YAML file (defaults to the built-in two-species system)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Concentration curves plus the phase portrait of the scenario
    Run {
        /// End of the time grid
        #[arg(long)]
        end_time: Option<f64>,
        /// Number of time points
        #[arg(long)]
        samples: Option<usize>,
        /// Directory receiving the CSV files
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
    /// Concentrations over time from all-zero initial conditions
    Concentrations {
        #[arg(long)]
        end_time: Option<f64>,
        #[arg(long)]
        samples: Option<usize>,
        /// Variable indices to export, comma separated (default: all)
        #[arg(long, value_delimiter = ',')]
        vars: Vec<usize>,
        /// Output CSV file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Trajectory family and direction field on the phase plane
    Trajectories {
        #[arg(long)]
        end_time: Option<f64>,
        #[arg(long)]
        samples: Option<usize>,
        /// Initial condition, e.g. `--ic 8,8`; repeat for several
        #[arg(long = "ic", value_parser = parse_state)]
        initial_conditions: Vec<State>,
        /// Arrows per axis
        #[arg(long)]
        sampling_points: Option<usize>,
        #[arg(long)]
        x_var: Option<usize>,
        #[arg(long)]
        y_var: Option<usize>,
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
    /// Newton search for a fixed point and its linear stability
    Equilibrium {
        /// Starting guess, comma separated (default: all ones)
        #[arg(long, value_parser = parse_state)]
        guess: Option<State>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct State(Vec<f64>);

fn parse_state(s: &str) -> Result<State, String> {
    s.split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|err| format!("invalid value `{}`: {}", part.trim(), err))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(State)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let scenario = match &cli.config {
        Some(path) => ScenarioConfig::load(path)?,
        None => ScenarioConfig::default(),
    };

    match cli.command {
        Commands::Run {
            end_time,
            samples,
            output_dir,
        } => {
            let scenario = ScenarioConfig {
                end_time: end_time.unwrap_or(scenario.end_time),
                samples: samples.unwrap_or(scenario.samples),
                ..scenario
            };
            cmd_run(&scenario, &output_dir)
        }
        Commands::Concentrations {
            end_time,
            samples,
            vars,
            output,
        } => cmd_concentrations(
            &scenario,
            end_time.unwrap_or(scenario.end_time),
            samples.unwrap_or(scenario.samples),
            &vars,
            output.as_deref(),
        ),
        Commands::Trajectories {
            end_time,
            samples,
            initial_conditions,
            sampling_points,
            x_var,
            y_var,
            output_dir,
        } => {
            let defaults = scenario.direction_field;
            let settings = DirectionFieldSettings {
                sampling_points: sampling_points.unwrap_or(defaults.sampling_points),
                x_var: x_var.unwrap_or(defaults.x_var),
                y_var: y_var.unwrap_or(defaults.y_var),
                ..defaults
            };
            let scenario = ScenarioConfig {
                end_time: end_time.unwrap_or(scenario.end_time),
                samples: samples.unwrap_or(scenario.samples),
                initial_conditions: if initial_conditions.is_empty() {
                    scenario.initial_conditions.clone()
                } else {
                    initial_conditions.into_iter().map(|s| s.0).collect()
                },
                direction_field: settings,
                ..scenario
            };
            cmd_trajectories(&scenario, &output_dir)
        }
        Commands::Equilibrium { guess } => cmd_equilibrium(&scenario, guess),
    }
}

fn cmd_run(scenario: &ScenarioConfig, output_dir: &Path) -> Result<()> {
    let series_path = output_dir.join("concentrations.csv");
    cmd_concentrations(
        scenario,
        scenario.end_time,
        scenario.samples,
        &[],
        Some(series_path.as_path()),
    )?;
    if scenario.dimension() == 2 {
        cmd_trajectories(scenario, output_dir)
    } else {
        warn!(
            dimension = scenario.dimension(),
            "phase portrait needs exactly two variables; skipping"
        );
        Ok(())
    }
}

fn cmd_concentrations(
    scenario: &ScenarioConfig,
    end_time: f64,
    samples: usize,
    vars: &[usize],
    output: Option<&Path>,
) -> Result<()> {
    let driver = scenario.driver()?;
    let series = concentration_series(&driver, end_time, samples)
        .context("Concentration simulation failed.")?;

    match output {
        Some(path) => {
            output::write_series(output::create_file(path)?, &series, &scenario.variables, vars)?;
            info!(path = %path.display(), rows = series.trajectory.len(), "wrote concentrations");
            println!("✓ Concentrations written to {}", path.display());
        }
        None => output::write_series(io::stdout().lock(), &series, &scenario.variables, vars)?,
    }
    Ok(())
}

fn cmd_trajectories(scenario: &ScenarioConfig, output_dir: &Path) -> Result<()> {
    scenario.validate()?;
    let driver = scenario.driver()?;
    let portrait = phase_portrait(
        &driver,
        &scenario.initial_conditions,
        scenario.end_time,
        scenario.samples,
        &scenario.direction_field,
    )
    .context("Phase portrait failed.")?;

    let trajectories_path = output_dir.join("trajectories.csv");
    output::write_trajectories(
        output::create_file(&trajectories_path)?,
        &portrait.trajectories,
        &scenario.variables,
    )?;
    let field_path = output_dir.join("direction_field.csv");
    output::write_direction_field(output::create_file(&field_path)?, &portrait.field)?;

    println!(
        "✓ {} trajectories written to {}",
        portrait.trajectories.len(),
        trajectories_path.display()
    );
    println!(
        "✓ Direction field ({}x{}) written to {}",
        portrait.field.xs.len(),
        portrait.field.ys.len(),
        field_path.display()
    );
    Ok(())
}

fn cmd_equilibrium(scenario: &ScenarioConfig, guess: Option<State>) -> Result<()> {
    let system = scenario.build_system()?;
    let guess = guess.map_or_else(|| vec![1.0; scenario.dimension()], |s| s.0);
    let result = solve_equilibrium(&system, &guess, scenario.newton)?;
    print!("{}", serde_yaml::to_string(&result)?);
    Ok(())
}
