use std::collections::BTreeMap;

use indexmap::IndexMap;
use morph_core::errors::{ErrorInfo, MorphError};
use serde::{Deserialize, Serialize};

use crate::parameters::ParameterRegistry;

/// Named point in parameter space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    /// Unique benchmark name.
    pub name: String,
    /// Internal parameter values keyed by parameter name.
    pub values: BTreeMap<String, f64>,
}

impl Benchmark {
    /// Creates a benchmark from a name and a value mapping.
    pub fn new(name: impl Into<String>, values: BTreeMap<String, f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Creates a benchmark from an ordered point of the given registry.
    pub fn from_point(name: impl Into<String>, registry: &ParameterRegistry, point: &[f64]) -> Self {
        Self::new(name, registry.map_from(point))
    }

    /// Ordered coordinates of the benchmark for the given registry.
    pub fn point(&self, registry: &ParameterRegistry) -> Result<Vec<f64>, MorphError> {
        registry.point_from(&self.values)
    }

    /// Values handed to downstream simulation, with transforms applied.
    pub fn external_values(
        &self,
        registry: &ParameterRegistry,
    ) -> Result<BTreeMap<String, f64>, MorphError> {
        let point = self.point(registry)?;
        Ok(registry.to_external(&point))
    }
}

/// Ordered collection of benchmarks with unique names.
///
/// Values are validated against the registered parameter *names* only. They
/// are deliberately not checked against the declared ranges: ranges steer
/// the basis optimizer and never reject a caller supplied point.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkRegistry {
    benchmarks: IndexMap<String, Benchmark>,
}

impl BenchmarkRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a benchmark at the given point.
    pub fn add_benchmark(
        &mut self,
        parameters: &ParameterRegistry,
        values: BTreeMap<String, f64>,
        name: impl Into<String>,
    ) -> Result<(), MorphError> {
        let name = name.into();
        parameters.point_from(&values).map_err(|err| match err {
            MorphError::UnknownParameter(info) => {
                MorphError::UnknownParameter(info.with_context("benchmark", name.clone()))
            }
            MorphError::MissingParameter(info) => {
                MorphError::MissingParameter(info.with_context("benchmark", name.clone()))
            }
            MorphError::InvalidValue(info) => {
                MorphError::InvalidValue(info.with_context("benchmark", name.clone()))
            }
            other => other,
        })?;
        if self.benchmarks.contains_key(&name) {
            return Err(MorphError::DuplicateBenchmark(
                ErrorInfo::new("duplicate-benchmark", "benchmark name is already in use")
                    .with_context("benchmark", name),
            ));
        }
        self.benchmarks
            .insert(name.clone(), Benchmark::new(name, values));
        Ok(())
    }

    /// Inserts an already validated benchmark.
    pub(crate) fn push(&mut self, benchmark: Benchmark) {
        self.benchmarks.insert(benchmark.name.clone(), benchmark);
    }

    /// Removes every benchmark.
    pub fn clear(&mut self) {
        self.benchmarks.clear();
    }

    /// Number of benchmarks.
    pub fn len(&self) -> usize {
        self.benchmarks.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.benchmarks.is_empty()
    }

    /// Whether a benchmark with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.benchmarks.contains_key(name)
    }

    /// Looks up a benchmark by name.
    pub fn get(&self, name: &str) -> Option<&Benchmark> {
        self.benchmarks.get(name)
    }

    /// Benchmarks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Benchmark> + '_ {
        self.benchmarks.values()
    }

    /// Owned copy of the benchmarks in insertion order.
    pub fn to_vec(&self) -> Vec<Benchmark> {
        self.benchmarks.values().cloned().collect()
    }
}
