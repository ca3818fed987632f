use anyhow::{bail, Context, Result};
use chemsim_core::equation_engine::EquationSystem;
use chemsim_core::equilibrium::NewtonSettings;
use chemsim_core::views::{DirectionFieldSettings, DEFAULT_SAMPLES};
use chemsim_core::{AdaptiveTsit5, IntegratorSettings, SimulationDriver};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
}

/// Everything needed to simulate one system: its equations, the starting
/// points of the phase portrait and the numerical settings.
///
/// Every field is optional in YAML; missing fields fall back to the
/// two-species chemical system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub variables: Vec<String>,
    pub parameters: Vec<Parameter>,
    /// `equations[i]` is the time derivative of `variables[i]`.
    pub equations: Vec<String>,
    pub initial_conditions: Vec<Vec<f64>>,
    pub end_time: f64,
    pub samples: usize,
    pub integrator: IntegratorSettings,
    pub direction_field: DirectionFieldSettings,
    pub newton: NewtonSettings,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        let param = |name: &str, value: f64| Parameter {
            name: name.to_string(),
            value,
        };
        Self {
            variables: vec!["X".to_string(), "Y".to_string()],
            parameters: vec![param("k", 0.02), param("b", 2.0), param("d", 0.04)],
            equations: vec![
                "1 + k*X^2*Y - b*X - d*X".to_string(),
                "b*X - k*X^2*Y".to_string(),
            ],
            initial_conditions: vec![vec![0.0, 0.0], vec![8.0, 8.0], vec![4.0, 23.0]],
            end_time: 200.0,
            samples: DEFAULT_SAMPLES,
            integrator: IntegratorSettings::default(),
            direction_field: DirectionFieldSettings::default(),
            newton: NewtonSettings::default(),
        }
    }
}

impl ScenarioConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to load scenario from {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let scenario: Self =
            serde_yaml::from_str(content).context("Scenario is not valid YAML.")?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn dimension(&self) -> usize {
        self.variables.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.variables.is_empty() {
            bail!("Scenario declares no variables.");
        }
        let dim = self.dimension();
        for (i, ic) in self.initial_conditions.iter().enumerate() {
            if ic.len() != dim {
                bail!(
                    "Initial condition {} has {} values, expected {}.",
                    i,
                    ic.len(),
                    dim
                );
            }
        }
        self.integrator.validate()?;
        Ok(())
    }

    pub fn build_system(&self) -> Result<EquationSystem> {
        let names: Vec<String> = self.parameters.iter().map(|p| p.name.clone()).collect();
        let values: Vec<f64> = self.parameters.iter().map(|p| p.value).collect();
        EquationSystem::compile(&self.variables, &names, &values, &self.equations)
            .context("Failed to compile scenario equations.")
    }

    pub fn driver(&self) -> Result<SimulationDriver<EquationSystem>> {
        let system = self.build_system()?;
        let driver = SimulationDriver::with_integrator(
            system,
            self.dimension(),
            AdaptiveTsit5::new(self.integrator),
        )?;
        Ok(driver)
    }
}
