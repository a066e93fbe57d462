use std::collections::{BTreeMap, BTreeSet};

use morph_core::errors::{ErrorInfo, MorphError};
use nalgebra::DMatrix;

use crate::benchmarks::Benchmark;
use crate::components::Components;
use crate::design::{design_matrix, squared_weight_sum, WeightSolver};
use crate::parameters::ParameterRegistry;

/// Committed morphing basis: frozen parameters, components and ordered benchmarks.
///
/// The design matrix is factorised once at construction. Every query method
/// takes `&self`, so a basis can be shared across threads and queried
/// concurrently.
#[derive(Debug, Clone)]
pub struct MorphingBasis {
    parameters: ParameterRegistry,
    caps: Vec<u32>,
    components: Components,
    benchmarks: Vec<Benchmark>,
    points: Vec<Vec<f64>>,
    tolerance: f64,
    solver: WeightSolver,
}

impl MorphingBasis {
    /// Validates the benchmarks and factorises the design matrix.
    pub fn new(
        mut parameters: ParameterRegistry,
        caps: Vec<u32>,
        components: Components,
        benchmarks: Vec<Benchmark>,
        tolerance: f64,
    ) -> Result<Self, MorphError> {
        parameters.freeze();
        let mut seen = BTreeSet::new();
        for benchmark in &benchmarks {
            if !seen.insert(benchmark.name.as_str()) {
                return Err(MorphError::DuplicateBenchmark(
                    ErrorInfo::new("duplicate-benchmark", "basis repeats a benchmark name")
                        .with_context("benchmark", benchmark.name.clone()),
                ));
            }
        }
        let points = benchmarks
            .iter()
            .map(|benchmark| benchmark.point(&parameters))
            .collect::<Result<Vec<_>, _>>()?;
        let design = design_matrix(&components, &points)?;
        let solver = WeightSolver::new(&design, tolerance)?;
        Ok(Self {
            parameters,
            caps,
            components,
            benchmarks,
            points,
            tolerance,
            solver,
        })
    }

    /// Frozen parameter registry.
    pub fn parameters(&self) -> &ParameterRegistry {
        &self.parameters
    }

    /// Overall power caps, one per power class.
    pub fn caps(&self) -> &[u32] {
        &self.caps
    }

    /// Components in canonical column order.
    pub fn components(&self) -> &Components {
        &self.components
    }

    /// Benchmarks in basis order.
    pub fn benchmarks(&self) -> &[Benchmark] {
        &self.benchmarks
    }

    /// Ordered coordinates of the basis benchmarks.
    pub fn points(&self) -> &[Vec<f64>] {
        &self.points
    }

    /// Singularity tolerance used when factorising.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Whether the basis has exactly one benchmark per component.
    pub fn is_square(&self) -> bool {
        self.benchmarks.len() == self.components.len()
    }

    /// Design matrix of the basis (rows = benchmarks, columns = components).
    pub fn design_matrix(&self) -> Result<DMatrix<f64>, MorphError> {
        design_matrix(&self.components, &self.points)
    }

    /// Morphing weights at a named query point, one per benchmark in basis order.
    pub fn weights_at(&self, query: &BTreeMap<String, f64>) -> Result<Vec<f64>, MorphError> {
        let point = self.parameters.point_from(query)?;
        self.weights_at_point(&point)
    }

    /// Morphing weights at an ordered point.
    pub fn weights_at_point(&self, point: &[f64]) -> Result<Vec<f64>, MorphError> {
        if point.len() != self.parameters.len() {
            return Err(MorphError::Dimension(
                ErrorInfo::new("point-dimension", "point has the wrong number of coordinates")
                    .with_context("expected", self.parameters.len().to_string())
                    .with_context("found", point.len().to_string()),
            ));
        }
        self.solver.solve(&self.components.evaluate(point))
    }

    /// Sum of squared morphing weights at a named query point.
    pub fn morphing_error(&self, query: &BTreeMap<String, f64>) -> Result<f64, MorphError> {
        Ok(squared_weight_sum(&self.weights_at(query)?))
    }

    /// Sum of squared morphing weights at an ordered point.
    pub fn morphing_error_at_point(&self, point: &[f64]) -> Result<f64, MorphError> {
        Ok(squared_weight_sum(&self.weights_at_point(point)?))
    }

    /// Interpolates a quantity known at every basis benchmark to the query point.
    pub fn morph(
        &self,
        query: &BTreeMap<String, f64>,
        benchmark_values: &[f64],
    ) -> Result<f64, MorphError> {
        if benchmark_values.len() != self.benchmarks.len() {
            return Err(MorphError::Dimension(
                ErrorInfo::new("benchmark-values", "one value per basis benchmark is required")
                    .with_context("expected", self.benchmarks.len().to_string())
                    .with_context("found", benchmark_values.len().to_string()),
            ));
        }
        let weights = self.weights_at(query)?;
        Ok(weights
            .iter()
            .zip(benchmark_values)
            .map(|(w, value)| w * value)
            .sum())
    }
}
