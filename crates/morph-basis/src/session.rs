use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use morph_core::errors::{ErrorInfo, MorphError};
use morph_core::events::{Event, EventSink, Level, NullSink};
use morph_core::provenance::BasisProvenance;

use crate::basis::MorphingBasis;
use crate::benchmarks::BenchmarkRegistry;
use crate::components::{enumerate_components, resolve_caps, Components};
use crate::config::{MorphingConfig, OptimizerConfig};
use crate::optimizer::{optimize_basis, CancelToken, OptimizedBasis};
use crate::parameters::{ParameterRegistry, ParameterSpec, PowerSpec};
use crate::persist::{load_basis, save_basis, BasisFile};

const TARGET: &str = "session";

/// Parameter and benchmark registries plus the committed basis.
///
/// Parameters freeze at the first successful morphing setup. Benchmarks may
/// still be added afterwards, but they never enter a committed basis; a
/// later setup run takes them into account.
pub struct MorphingSession {
    parameters: ParameterRegistry,
    benchmarks: BenchmarkRegistry,
    basis: Option<MorphingBasis>,
    provenance: Option<BasisProvenance>,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for MorphingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MorphingSession")
            .field("parameters", &self.parameters)
            .field("benchmarks", &self.benchmarks)
            .field("basis", &self.basis.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for MorphingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MorphingSession {
    /// Creates an empty session that discards its events.
    pub fn new() -> Self {
        Self::with_sink(Arc::new(NullSink))
    }

    /// Creates an empty session reporting to `sink`.
    pub fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        Self {
            parameters: ParameterRegistry::new(),
            benchmarks: BenchmarkRegistry::new(),
            basis: None,
            provenance: None,
            sink,
        }
    }

    /// Registers the parameters and benchmarks described by a configuration.
    pub fn from_config(config: &MorphingConfig, sink: Arc<dyn EventSink>) -> Result<Self, MorphError> {
        let mut session = Self::with_sink(sink);
        for spec in &config.parameters {
            session.add_parameter(spec.clone())?;
        }
        for benchmark in &config.benchmarks {
            session.add_benchmark(benchmark.values.clone(), benchmark.name.clone())?;
        }
        Ok(session)
    }

    /// Registers a parameter. Fails once morphing has been set up.
    pub fn add_parameter(&mut self, spec: ParameterSpec) -> Result<(), MorphError> {
        let name = spec.name.clone();
        self.parameters.add_parameter(spec)?;
        self.sink
            .emit(Event::new(Level::Debug, TARGET, "parameter added").with_field("parameter", name));
        Ok(())
    }

    /// Registers a benchmark. Values outside the declared ranges are accepted.
    pub fn add_benchmark(
        &mut self,
        values: BTreeMap<String, f64>,
        name: impl Into<String>,
    ) -> Result<(), MorphError> {
        let name = name.into();
        self.benchmarks
            .add_benchmark(&self.parameters, values, name.clone())?;
        self.sink
            .emit(Event::new(Level::Debug, TARGET, "benchmark added").with_field("benchmark", name));
        Ok(())
    }

    /// Registered parameters.
    pub fn parameters(&self) -> &ParameterRegistry {
        &self.parameters
    }

    /// Registered benchmarks, including ones added after setup.
    pub fn benchmarks(&self) -> &BenchmarkRegistry {
        &self.benchmarks
    }

    /// Enumerates the components for the current parameters.
    pub fn components(&self, caps: &PowerSpec) -> Result<Components, MorphError> {
        enumerate_components(&self.parameters, caps)
    }

    /// Enumerates components, searches a basis and commits it.
    ///
    /// With `keep_existing` the registered benchmarks are kept as the head of
    /// the basis; otherwise they are discarded and replaced by the optimized
    /// basis.
    pub fn set_up_morphing(
        &mut self,
        caps: &PowerSpec,
        keep_existing: bool,
        config: &OptimizerConfig,
        cancel: Option<&CancelToken>,
    ) -> Result<&MorphingBasis, MorphError> {
        let components = enumerate_components(&self.parameters, caps)?;
        let resolved = resolve_caps(&self.parameters, caps)?;
        let existing = self.benchmarks.to_vec();
        let optimized = optimize_basis(
            &self.parameters,
            &components,
            &existing,
            keep_existing,
            config,
            self.sink.as_ref(),
            cancel,
        )?;
        let basis = MorphingBasis::new(
            self.parameters.clone(),
            resolved,
            components,
            optimized.benchmarks.clone(),
            config.singular_tolerance,
        )?;
        self.commit(basis, &optimized, keep_existing, config);
        self.require_basis()
    }

    fn commit(
        &mut self,
        basis: MorphingBasis,
        optimized: &OptimizedBasis,
        keep_existing: bool,
        config: &OptimizerConfig,
    ) {
        self.parameters.freeze();
        if !keep_existing {
            self.benchmarks.clear();
        }
        for benchmark in basis.benchmarks() {
            if !self.benchmarks.contains(&benchmark.name) {
                self.benchmarks.push(benchmark.clone());
            }
        }
        let mut tool_versions = BTreeMap::new();
        tool_versions.insert(
            env!("CARGO_PKG_NAME").to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        self.provenance = Some(BasisProvenance {
            seed: config.seed,
            created_at: Utc::now().to_rfc3339(),
            expected_error: Some(optimized.expected_error),
            trials: optimized.trials_completed,
            cancelled: optimized.cancelled,
            tool_versions,
            unbounded_window: Some(config.unbounded_window),
        });
        self.sink.emit(
            Event::new(Level::Info, TARGET, "morphing basis committed")
                .with_field("benchmarks", basis.benchmarks().len())
                .with_field("components", basis.components().len())
                .with_field("expected_error", optimized.expected_error),
        );
        self.basis = Some(basis);
    }

    /// Committed basis, if setup has run.
    pub fn basis(&self) -> Option<&MorphingBasis> {
        self.basis.as_ref()
    }

    /// Provenance of the committed basis.
    pub fn provenance(&self) -> Option<&BasisProvenance> {
        self.provenance.as_ref()
    }

    fn require_basis(&self) -> Result<&MorphingBasis, MorphError> {
        self.basis.as_ref().ok_or_else(|| {
            MorphError::Config(
                ErrorInfo::new("no-basis", "morphing has not been set up")
                    .with_hint("call set_up_morphing or load a persisted basis"),
            )
        })
    }

    /// Morphing weights of the committed basis at a query point.
    pub fn weights_at(&self, query: &BTreeMap<String, f64>) -> Result<Vec<f64>, MorphError> {
        self.require_basis()?.weights_at(query)
    }

    /// Morphing error of the committed basis at a query point.
    pub fn morphing_error(&self, query: &BTreeMap<String, f64>) -> Result<f64, MorphError> {
        self.require_basis()?.morphing_error(query)
    }

    /// Basis benchmarks with transforms applied, for hand-off to simulation.
    pub fn external_benchmarks(&self) -> Result<Vec<(String, BTreeMap<String, f64>)>, MorphError> {
        let basis = self.require_basis()?;
        basis
            .benchmarks()
            .iter()
            .map(|benchmark| {
                Ok((
                    benchmark.name.clone(),
                    benchmark.external_values(basis.parameters())?,
                ))
            })
            .collect()
    }

    /// Persists the committed basis.
    pub fn save(&self, path: &Path) -> Result<BasisFile, MorphError> {
        let basis = self.require_basis()?;
        let file = save_basis(basis, self.provenance.clone().unwrap_or_default(), path)?;
        self.sink.emit(
            Event::new(Level::Info, TARGET, "basis saved")
                .with_field("path", path.display())
                .with_field("hash", &file.content_hash),
        );
        Ok(file)
    }

    /// Restores a session from a persisted basis.
    pub fn load(path: &Path, sink: Arc<dyn EventSink>) -> Result<Self, MorphError> {
        let (basis, provenance) = load_basis(path)?;
        let mut benchmarks = BenchmarkRegistry::new();
        for benchmark in basis.benchmarks() {
            benchmarks.push(benchmark.clone());
        }
        sink.emit(
            Event::new(Level::Info, TARGET, "basis loaded")
                .with_field("path", path.display())
                .with_field("benchmarks", basis.benchmarks().len()),
        );
        Ok(Self {
            parameters: basis.parameters().clone(),
            benchmarks,
            basis: Some(basis),
            provenance: Some(provenance),
            sink,
        })
    }
}
