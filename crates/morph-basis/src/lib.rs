#![deny(missing_docs)]
#![doc = "Morphing basis engine: parameter and benchmark registries, component enumeration, basis optimization, weight solving and persistence."]

/// Committed bases and weight queries.
pub mod basis;
/// Benchmark points and their registry.
pub mod benchmarks;
/// Component enumeration under power caps.
pub mod components;
/// YAML configuration of a morphing setup.
pub mod config;
/// Design matrix construction and factorisation.
pub mod design;
/// Canonical hashing helpers.
pub mod hash;
/// Basis search.
pub mod optimizer;
/// Parameter definitions and their registry.
pub mod parameters;
/// Basis files and staleness checks.
pub mod persist;
/// Canonical JSON and YAML serde helpers.
pub mod serde;
/// Stateful facade tying registries and the committed basis together.
pub mod session;
/// Monotonic polynomial maps from internal to external parameter values.
pub mod transform;

pub use basis::MorphingBasis;
pub use benchmarks::{Benchmark, BenchmarkRegistry};
pub use components::{enumerate_components, resolve_caps, Component, Components};
pub use config::{load_config, BenchmarkSpec, MorphingConfig, Objective, OptimizerConfig};
pub use design::{design_matrix, squared_weight_sum, WeightSolver, DEFAULT_SINGULAR_TOLERANCE};
pub use optimizer::{optimize_basis, CancelToken, OptimizedBasis, GENERATED_PREFIX};
pub use parameters::{Parameter, ParameterRange, ParameterRegistry, ParameterSpec, PowerSpec};
pub use persist::{load_basis, save_basis, BasisFile, BASIS_SCHEMA};
pub use session::MorphingSession;
pub use transform::Transform;
