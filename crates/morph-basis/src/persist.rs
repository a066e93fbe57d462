use std::fs;
use std::path::Path;

use morph_core::errors::{ErrorInfo, MorphError};
use morph_core::provenance::{BasisProvenance, SchemaVersion};
use serde::{Deserialize, Serialize};

use crate::basis::MorphingBasis;
use crate::benchmarks::Benchmark;
use crate::components::{enumerate_components, Components};
use crate::hash::stable_hash_string;
use crate::parameters::{ParameterRegistry, ParameterSpec, PowerSpec};
use crate::serde::{from_json_slice, to_pretty_json};

/// Schema version written into every basis file.
pub const BASIS_SCHEMA: SchemaVersion = SchemaVersion::new(1, 0, 0);

fn io_error(code: &str, err: impl ToString, path: &Path) -> MorphError {
    MorphError::Serde(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// On-disk representation of a committed basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisFile {
    /// Schema version of the payload.
    pub schema: SchemaVersion,
    /// Parameter definitions in registration order.
    pub parameters: Vec<ParameterSpec>,
    /// Overall power caps, one per power class.
    pub max_overall_power: Vec<u32>,
    /// Components in canonical order.
    pub components: Components,
    /// Benchmarks in basis order.
    pub benchmarks: Vec<Benchmark>,
    /// Singularity tolerance used when factorising.
    pub singular_tolerance: f64,
    /// SHA-256 of the fields above.
    pub content_hash: String,
    /// Where the basis came from.
    #[serde(default)]
    pub provenance: BasisProvenance,
}

#[derive(Serialize)]
struct HashedContent<'a> {
    schema: &'a SchemaVersion,
    parameters: &'a [ParameterSpec],
    max_overall_power: &'a [u32],
    components: &'a Components,
    benchmarks: &'a [Benchmark],
    singular_tolerance: f64,
}

impl BasisFile {
    /// Captures a committed basis together with its provenance.
    pub fn from_basis(basis: &MorphingBasis, provenance: BasisProvenance) -> Result<Self, MorphError> {
        let mut file = Self {
            schema: BASIS_SCHEMA,
            parameters: basis.parameters().to_specs(),
            max_overall_power: basis.caps().to_vec(),
            components: basis.components().clone(),
            benchmarks: basis.benchmarks().to_vec(),
            singular_tolerance: basis.tolerance(),
            content_hash: String::new(),
            provenance,
        };
        file.content_hash = file.compute_hash()?;
        Ok(file)
    }

    fn compute_hash(&self) -> Result<String, MorphError> {
        stable_hash_string(&HashedContent {
            schema: &self.schema,
            parameters: &self.parameters,
            max_overall_power: &self.max_overall_power,
            components: &self.components,
            benchmarks: &self.benchmarks,
            singular_tolerance: self.singular_tolerance,
        })
    }

    /// Rebuilds the basis, refusing anything that no longer matches the
    /// definitions it was saved with.
    ///
    /// Components are recomputed from the stored parameter definitions and
    /// must match the stored list in count and order; they are never
    /// silently replaced.
    pub fn into_basis(self) -> Result<MorphingBasis, MorphError> {
        if !BASIS_SCHEMA.accepts(&self.schema) {
            return Err(MorphError::Serde(
                ErrorInfo::new("basis-schema", "unsupported basis schema version")
                    .with_context(
                        "found",
                        format!(
                            "{}.{}.{}",
                            self.schema.major, self.schema.minor, self.schema.patch
                        ),
                    ),
            ));
        }
        let registry = ParameterRegistry::from_specs(&self.parameters)?;
        let recomputed =
            enumerate_components(&registry, &PowerSpec::per_class(&self.max_overall_power))?;
        if recomputed != self.components {
            let first_difference = recomputed
                .iter()
                .zip(self.components.iter())
                .position(|(fresh, stored)| fresh != stored)
                .unwrap_or_else(|| recomputed.len().min(self.components.len()));
            return Err(MorphError::StaleBasis(
                ErrorInfo::new(
                    "component-mismatch",
                    "stored components differ from the enumeration of the stored parameters",
                )
                .with_context("stored", self.components.len().to_string())
                .with_context("recomputed", recomputed.len().to_string())
                .with_context("first_difference", first_difference.to_string())
                .with_hint("rerun morphing setup"),
            ));
        }
        let expected = self.compute_hash()?;
        if expected != self.content_hash {
            return Err(MorphError::StaleBasis(
                ErrorInfo::new("content-hash", "basis content does not match its recorded hash")
                    .with_context("stored", self.content_hash.clone())
                    .with_context("recomputed", expected)
                    .with_hint("rerun morphing setup"),
            ));
        }
        MorphingBasis::new(
            registry,
            self.max_overall_power,
            recomputed,
            self.benchmarks,
            self.singular_tolerance,
        )
    }

    /// Writes the payload as pretty JSON.
    pub fn store(&self, path: &Path) -> Result<(), MorphError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| io_error("basis-mkdir", err, parent))?;
            }
        }
        let json = to_pretty_json(self)?;
        fs::write(path, json).map_err(|err| io_error("basis-write", err, path))
    }

    /// Reads a payload without validating it.
    pub fn load(path: &Path) -> Result<Self, MorphError> {
        let bytes = fs::read(path).map_err(|err| io_error("basis-read", err, path))?;
        from_json_slice(&bytes).map_err(|err| match err {
            MorphError::Serde(info) => {
                MorphError::Serde(info.with_context("path", path.display().to_string()))
            }
            other => other,
        })
    }
}

/// Persists a basis and returns the written payload.
pub fn save_basis(
    basis: &MorphingBasis,
    provenance: BasisProvenance,
    path: &Path,
) -> Result<BasisFile, MorphError> {
    let file = BasisFile::from_basis(basis, provenance)?;
    file.store(path)?;
    Ok(file)
}

/// Loads and validates a persisted basis.
pub fn load_basis(path: &Path) -> Result<(MorphingBasis, BasisProvenance), MorphError> {
    let file = BasisFile::load(path)?;
    let provenance = file.provenance.clone();
    let basis = file.into_basis()?;
    Ok((basis, provenance))
}
