//! Structured error types shared across the morphing crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`MorphError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (parameter names, sizes, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Broad families used to decide how an error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// Rejected at the call that introduced the bad input.
    Configuration,
    /// Singular or ill-conditioned linear algebra.
    Numerical,
    /// Persisted state incompatible with the current definitions.
    Consistency,
    /// Reading, writing or decoding artefacts.
    Io,
}

/// Canonical error type for the morphing engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "detail")]
pub enum MorphError {
    /// A parameter with the same name is already registered.
    #[error("duplicate parameter: {0}")]
    DuplicateParameter(ErrorInfo),
    /// A bounded range is empty, inverted or non-finite.
    #[error("invalid range: {0}")]
    InvalidRange(ErrorInfo),
    /// A maximum power or overall power cap is malformed.
    #[error("invalid power: {0}")]
    InvalidPower(ErrorInfo),
    /// A parameter transform could not be parsed or is not monotonic.
    #[error("invalid transform: {0}")]
    InvalidTransform(ErrorInfo),
    /// A point references a parameter that is not registered.
    #[error("unknown parameter: {0}")]
    UnknownParameter(ErrorInfo),
    /// A point omits a registered parameter.
    #[error("missing parameter: {0}")]
    MissingParameter(ErrorInfo),
    /// A point carries a NaN or infinite coordinate.
    #[error("invalid value: {0}")]
    InvalidValue(ErrorInfo),
    /// A benchmark with the same name is already registered.
    #[error("duplicate benchmark: {0}")]
    DuplicateBenchmark(ErrorInfo),
    /// The registry was frozen by a previous morphing setup.
    #[error("frozen: {0}")]
    Frozen(ErrorInfo),
    /// Invalid optimizer or session configuration.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// The requested basis cannot be realised within the parameter space.
    #[error("insufficient parameter space: {0}")]
    InsufficientParameterSpace(ErrorInfo),
    /// The design matrix is singular up to the configured tolerance.
    #[error("singular basis: {0}")]
    SingularBasis(ErrorInfo),
    /// The design matrix has fewer rows than components.
    #[error("dimension error: {0}")]
    Dimension(ErrorInfo),
    /// A persisted basis no longer matches the recomputed definitions.
    #[error("stale basis: {0}")]
    StaleBasis(ErrorInfo),
    /// Serialization, schema and filesystem errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl MorphError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            MorphError::DuplicateParameter(info)
            | MorphError::InvalidRange(info)
            | MorphError::InvalidPower(info)
            | MorphError::InvalidTransform(info)
            | MorphError::UnknownParameter(info)
            | MorphError::MissingParameter(info)
            | MorphError::InvalidValue(info)
            | MorphError::DuplicateBenchmark(info)
            | MorphError::Frozen(info)
            | MorphError::Config(info)
            | MorphError::InsufficientParameterSpace(info)
            | MorphError::SingularBasis(info)
            | MorphError::Dimension(info)
            | MorphError::StaleBasis(info)
            | MorphError::Serde(info) => info,
        }
    }

    /// Returns the handling class of the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            MorphError::DuplicateParameter(_)
            | MorphError::InvalidRange(_)
            | MorphError::InvalidPower(_)
            | MorphError::InvalidTransform(_)
            | MorphError::UnknownParameter(_)
            | MorphError::MissingParameter(_)
            | MorphError::InvalidValue(_)
            | MorphError::DuplicateBenchmark(_)
            | MorphError::Frozen(_)
            | MorphError::Config(_)
            | MorphError::InsufficientParameterSpace(_) => ErrorClass::Configuration,
            MorphError::SingularBasis(_) | MorphError::Dimension(_) => ErrorClass::Numerical,
            MorphError::StaleBasis(_) => ErrorClass::Consistency,
            MorphError::Serde(_) => ErrorClass::Io,
        }
    }
}
