//! Provenance and schema descriptors attached to persisted bases.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Semantic version describing the schema of serialized payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Major version incremented for breaking changes.
    pub major: u32,
    /// Minor version incremented for additive changes.
    pub minor: u32,
    /// Patch version incremented for bug fixes and documentation updates.
    pub patch: u32,
}

impl SchemaVersion {
    /// Creates a new schema version descriptor.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Returns true when a payload written with `other` can be read by `self`.
    pub fn accepts(&self, other: &SchemaVersion) -> bool {
        self.major == other.major && self.minor >= other.minor
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

/// Provenance information recorded when a basis is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BasisProvenance {
    /// Master seed used by the optimizer.
    pub seed: u64,
    /// ISO-8601 timestamp recording when the basis was produced.
    pub created_at: String,
    /// Expected morphing error reported by the optimizer.
    pub expected_error: Option<f64>,
    /// Number of optimizer trials that completed.
    pub trials: usize,
    /// Whether the search stopped early because of cancellation.
    #[serde(default)]
    pub cancelled: bool,
    /// Version map for the tools involved.
    #[serde(default)]
    pub tool_versions: BTreeMap<String, String>,
    /// Window the optimizer sampled unbounded parameters from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unbounded_window: Option<[f64; 2]>,
}
