use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use morph_core::errors::{ErrorInfo, MorphError};
use morph_core::events::EventSink;
use serde::{Deserialize, Serialize};

use crate::design::DEFAULT_SINGULAR_TOLERANCE;
use crate::parameters::{ParameterSpec, PowerSpec};
use crate::serde::{from_yaml_slice, to_yaml_string};
use crate::session::MorphingSession;

fn config_error(code: &str, message: impl Into<String>) -> MorphError {
    MorphError::Config(ErrorInfo::new(code, message.into()))
}

/// Aggregate of the morphing error over the optimizer's test points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Objective {
    /// Mean squared-weight sum over the test points.
    #[default]
    Mean,
    /// Worst squared-weight sum over the test points.
    Max,
}

/// Knobs controlling the basis search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Master seed; test points and trials use derived substreams.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Number of random initialisations.
    #[serde(default = "default_trials")]
    pub n_trials: usize,
    /// Number of points at which the morphing error is sampled.
    #[serde(default = "default_test_points")]
    pub n_test_points: usize,
    /// Coordinate descent passes per trial (0 disables refinement).
    #[serde(default = "default_refine_sweeps")]
    pub refine_sweeps: usize,
    /// Initial refinement step as a fraction of the sampling width.
    #[serde(default = "default_refine_step")]
    pub refine_step: f64,
    /// Aggregate used as the objective.
    #[serde(default)]
    pub objective: Objective,
    /// Relative pivot threshold for declaring a design matrix singular.
    #[serde(default = "default_singular_tolerance")]
    pub singular_tolerance: f64,
    /// Re-samples allowed per trial when a candidate is singular.
    #[serde(default = "default_singular_retries")]
    pub max_singular_retries: usize,
    /// Worker threads; 0 uses one per available core.
    #[serde(default)]
    pub concurrency: usize,
    /// Wall clock budget in milliseconds; the best basis so far is returned on expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    /// Requested basis size when an over-complete basis is wanted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_benchmarks: Option<usize>,
    /// Sampling window used for parameters declared `unbounded`.
    #[serde(default = "default_unbounded_window")]
    pub unbounded_window: [f64; 2],
}

fn default_seed() -> u64 {
    0x6D6F_5250_4842_4153
}

fn default_trials() -> usize {
    32
}

fn default_test_points() -> usize {
    100
}

fn default_refine_sweeps() -> usize {
    4
}

fn default_refine_step() -> f64 {
    0.1
}

fn default_singular_tolerance() -> f64 {
    DEFAULT_SINGULAR_TOLERANCE
}

fn default_singular_retries() -> usize {
    8
}

fn default_unbounded_window() -> [f64; 2] {
    [-1.0, 1.0]
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            n_trials: default_trials(),
            n_test_points: default_test_points(),
            refine_sweeps: default_refine_sweeps(),
            refine_step: default_refine_step(),
            objective: Objective::default(),
            singular_tolerance: default_singular_tolerance(),
            max_singular_retries: default_singular_retries(),
            concurrency: 0,
            deadline_ms: None,
            n_benchmarks: None,
            unbounded_window: default_unbounded_window(),
        }
    }
}

impl OptimizerConfig {
    /// Rejects configurations the optimizer cannot run with.
    pub fn validate(&self) -> Result<(), MorphError> {
        if self.n_trials == 0 {
            return Err(config_error("optimizer-trials", "n_trials must be at least 1"));
        }
        if self.n_test_points == 0 {
            return Err(config_error(
                "optimizer-test-points",
                "n_test_points must be at least 1",
            ));
        }
        if !(self.refine_step > 0.0 && self.refine_step <= 1.0) {
            return Err(config_error(
                "optimizer-refine-step",
                format!("refine_step must lie in (0, 1], got {}", self.refine_step),
            ));
        }
        if !(self.singular_tolerance > 0.0 && self.singular_tolerance < 1.0) {
            return Err(config_error(
                "optimizer-tolerance",
                format!(
                    "singular_tolerance must lie in (0, 1), got {}",
                    self.singular_tolerance
                ),
            ));
        }
        let [low, high] = self.unbounded_window;
        if !(low.is_finite() && high.is_finite() && low < high && (high - low).is_finite()) {
            return Err(config_error(
                "optimizer-window",
                "unbounded_window must be a finite interval with low < high",
            ));
        }
        Ok(())
    }
}

/// Named benchmark as written in a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSpec {
    /// Unique benchmark name.
    pub name: String,
    /// Internal parameter values.
    pub values: BTreeMap<String, f64>,
}

/// Complete description of a morphing setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphingConfig {
    /// Parameters in registration order.
    pub parameters: Vec<ParameterSpec>,
    /// Benchmarks registered before setup.
    #[serde(default)]
    pub benchmarks: Vec<BenchmarkSpec>,
    /// Overall power cap, scalar or per power class.
    pub max_overall_power: PowerSpec,
    /// Keep the configured benchmarks as a fixed part of the basis.
    #[serde(default = "default_keep_existing")]
    pub keep_existing: bool,
    /// Basis search settings.
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

fn default_keep_existing() -> bool {
    true
}

impl MorphingConfig {
    /// Produces a canonical YAML representation of the configuration.
    pub fn to_yaml_string(&self) -> Result<String, MorphError> {
        to_yaml_string(self)
    }

    /// Creates a session with the configured parameters and benchmarks registered.
    pub fn build_session(&self, sink: Arc<dyn EventSink>) -> Result<MorphingSession, MorphError> {
        MorphingSession::from_config(self, sink)
    }
}

/// Loads a morphing configuration from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MorphingConfig, MorphError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|err| {
        MorphError::Serde(
            ErrorInfo::new("config-read", err.to_string())
                .with_context("path", path.display().to_string()),
        )
    })?;
    let config: MorphingConfig = from_yaml_slice(&bytes)?;
    config.optimizer.validate()?;
    Ok(config)
}
