use std::collections::BTreeMap;

use indexmap::IndexMap;
use morph_core::errors::{ErrorInfo, MorphError};
use serde::{Deserialize, Serialize};

use crate::transform::Transform;

/// Closed interval a parameter is expected to live in.
///
/// Absence of bounds is spelled out explicitly as [`ParameterRange::Unbounded`];
/// the optimizer then samples such parameters from its configured window
/// instead of inventing a numeric bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ParameterRange {
    /// Closed interval `[min, max]` with `min < max`.
    Bounded {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// No constraint on the parameter value.
    Unbounded,
}

impl ParameterRange {
    /// Shorthand for a bounded range.
    pub fn bounded(min: f64, max: f64) -> Self {
        ParameterRange::Bounded { min, max }
    }

    /// Returns `(min, max)` for bounded ranges.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match *self {
            ParameterRange::Bounded { min, max } => Some((min, max)),
            ParameterRange::Unbounded => None,
        }
    }

    /// Width of a bounded range.
    pub fn width(&self) -> Option<f64> {
        self.bounds().map(|(min, max)| max - min)
    }

    /// Clamps a value into the range (identity for unbounded ranges).
    pub fn clamp(&self, value: f64) -> f64 {
        match *self {
            ParameterRange::Bounded { min, max } => value.clamp(min, max),
            ParameterRange::Unbounded => value,
        }
    }

    fn validate(&self, name: &str) -> Result<(), MorphError> {
        if let ParameterRange::Bounded { min, max } = *self {
            if !min.is_finite() || !max.is_finite() {
                return Err(MorphError::InvalidRange(
                    ErrorInfo::new("range-non-finite", "range bounds must be finite")
                        .with_context("parameter", name)
                        .with_hint("use `unbounded` for an unconstrained parameter"),
                ));
            }
            if min >= max {
                return Err(MorphError::InvalidRange(
                    ErrorInfo::new(
                        "range-inverted",
                        "range lower bound must be strictly below the upper bound",
                    )
                    .with_context("parameter", name)
                    .with_context("min", min.to_string())
                    .with_context("max", max.to_string()),
                ));
            }
            if !self.width().is_some_and(f64::is_finite) {
                return Err(MorphError::InvalidRange(
                    ErrorInfo::new("range-width", "range width overflows a finite float")
                        .with_context("parameter", name)
                        .with_context("min", min.to_string())
                        .with_context("max", max.to_string()),
                ));
            }
        }
        Ok(())
    }
}

/// Integer powers given either as a scalar or as one entry per power class.
///
/// Values are signed so that malformed input (negative powers) reaches the
/// registry and is rejected with [`MorphError::InvalidPower`] instead of
/// failing somewhere in the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PowerSpec {
    /// Same power for a single power class.
    Scalar(i64),
    /// One power per power class (e.g. production and decay).
    PerClass(Vec<i64>),
}

impl PowerSpec {
    /// Single power class with the given power.
    pub fn scalar(power: u32) -> Self {
        PowerSpec::Scalar(power as i64)
    }

    /// One power per class.
    pub fn per_class(powers: &[u32]) -> Self {
        PowerSpec::PerClass(powers.iter().map(|&p| p as i64).collect())
    }

    /// Raw values in class order.
    pub fn values(&self) -> Vec<i64> {
        match self {
            PowerSpec::Scalar(value) => vec![*value],
            PowerSpec::PerClass(values) => values.clone(),
        }
    }

    /// Validates the powers and converts them to unsigned integers.
    pub fn validated(&self, subject: &str) -> Result<Vec<u32>, MorphError> {
        let values = self.values();
        if values.is_empty() {
            return Err(MorphError::InvalidPower(
                ErrorInfo::new("power-empty", "at least one power class is required")
                    .with_context("subject", subject),
            ));
        }
        values
            .iter()
            .enumerate()
            .map(|(class, &value)| {
                u32::try_from(value).map_err(|_| {
                    MorphError::InvalidPower(
                        ErrorInfo::new("power-negative", "powers must be non-negative integers")
                            .with_context("subject", subject)
                            .with_context("class", class.to_string())
                            .with_context("value", value.to_string()),
                    )
                })
            })
            .collect()
    }
}

impl From<u32> for PowerSpec {
    fn from(value: u32) -> Self {
        PowerSpec::scalar(value)
    }
}

impl From<Vec<u32>> for PowerSpec {
    fn from(value: Vec<u32>) -> Self {
        PowerSpec::per_class(&value)
    }
}

/// Declarative parameter description as supplied by callers and config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Unique parameter name.
    pub name: String,
    /// Opaque external block label (e.g. a param card block).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lha_block: Option<String>,
    /// Opaque external identifier inside the block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lha_id: Option<u32>,
    /// Maximum power with which the parameter enters the squared amplitude.
    pub max_power: PowerSpec,
    /// Advisory parameter range.
    pub range: ParameterRange,
    /// Optional transform to the external representation, in `theta`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

impl ParameterSpec {
    /// Creates a spec with a single power class.
    pub fn new(name: impl Into<String>, max_power: u32, range: ParameterRange) -> Self {
        Self {
            name: name.into(),
            lha_block: None,
            lha_id: None,
            max_power: PowerSpec::scalar(max_power),
            range,
            transform: None,
        }
    }

    /// Replaces the powers with one entry per power class.
    pub fn with_power_classes(mut self, powers: &[u32]) -> Self {
        self.max_power = PowerSpec::per_class(powers);
        self
    }

    /// Attaches external block metadata.
    pub fn with_lha(mut self, block: impl Into<String>, id: u32) -> Self {
        self.lha_block = Some(block.into());
        self.lha_id = Some(id);
        self
    }

    /// Attaches a transform expression.
    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }
}

/// Validated parameter held by a [`ParameterRegistry`].
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Unique parameter name.
    pub name: String,
    /// Opaque external block label.
    pub lha_block: Option<String>,
    /// Opaque external identifier.
    pub lha_id: Option<u32>,
    /// Maximum power per power class.
    pub max_power: Vec<u32>,
    /// Advisory range.
    pub range: ParameterRange,
    /// Transform to the external representation.
    pub transform: Option<Transform>,
}

impl Parameter {
    /// Maps an internal value to the external representation.
    pub fn to_external(&self, value: f64) -> f64 {
        match &self.transform {
            Some(transform) => transform.apply(value),
            None => value,
        }
    }

    /// Converts the parameter back into its declarative form.
    pub fn to_spec(&self) -> ParameterSpec {
        ParameterSpec {
            name: self.name.clone(),
            lha_block: self.lha_block.clone(),
            lha_id: self.lha_id,
            max_power: if self.max_power.len() == 1 {
                PowerSpec::scalar(self.max_power[0])
            } else {
                PowerSpec::per_class(&self.max_power)
            },
            range: self.range,
            transform: self.transform.as_ref().map(|t| t.source().to_string()),
        }
    }
}

/// Ordered set of declared parameters.
///
/// Registration order defines the exponent position of every parameter in
/// a component tuple and the coordinate order of every point.
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    parameters: IndexMap<String, Parameter>,
    frozen: bool,
}

impl ParameterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from specs, validating each one in order.
    pub fn from_specs(specs: &[ParameterSpec]) -> Result<Self, MorphError> {
        let mut registry = Self::new();
        for spec in specs {
            registry.add_parameter(spec.clone())?;
        }
        Ok(registry)
    }

    /// Registers a parameter.
    pub fn add_parameter(&mut self, spec: ParameterSpec) -> Result<(), MorphError> {
        if self.frozen {
            return Err(MorphError::Frozen(
                ErrorInfo::new(
                    "parameters-frozen",
                    "parameters cannot be added after morphing setup",
                )
                .with_context("parameter", spec.name),
            ));
        }
        if spec.name.trim().is_empty() {
            return Err(MorphError::Config(ErrorInfo::new(
                "parameter-name-empty",
                "parameter names must not be empty",
            )));
        }
        if self.parameters.contains_key(&spec.name) {
            return Err(MorphError::DuplicateParameter(
                ErrorInfo::new("duplicate-parameter", "parameter is already registered")
                    .with_context("parameter", spec.name),
            ));
        }
        spec.range.validate(&spec.name)?;
        let max_power = spec.max_power.validated(&spec.name)?;
        if let Some(classes) = self.n_power_classes() {
            if classes != max_power.len() {
                return Err(MorphError::InvalidPower(
                    ErrorInfo::new(
                        "power-classes",
                        "all parameters must declare the same number of power classes",
                    )
                    .with_context("parameter", spec.name.clone())
                    .with_context("expected", classes.to_string())
                    .with_context("found", max_power.len().to_string()),
                ));
            }
        }
        let transform = match &spec.transform {
            Some(source) => {
                let transform = Transform::parse(source)?;
                transform.check_monotonic(spec.range.bounds())?;
                Some(transform)
            }
            None => None,
        };
        let parameter = Parameter {
            name: spec.name.clone(),
            lha_block: spec.lha_block,
            lha_id: spec.lha_id,
            max_power,
            range: spec.range,
            transform,
        };
        self.parameters.insert(spec.name, parameter);
        Ok(())
    }

    /// Makes the registry immutable.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Whether the registry has been frozen by a morphing setup.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Number of registered parameters.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Whether no parameter has been registered.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Number of power classes shared by all parameters.
    pub fn n_power_classes(&self) -> Option<usize> {
        self.parameters.values().next().map(|p| p.max_power.len())
    }

    /// Parameter names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.parameters.keys().map(String::as_str)
    }

    /// Parameters in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> + '_ {
        self.parameters.values()
    }

    /// Looks up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    /// Position of a parameter in registration order.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.parameters.get_index_of(name)
    }

    /// Converts a name to value mapping into an ordered point.
    pub fn point_from(&self, values: &BTreeMap<String, f64>) -> Result<Vec<f64>, MorphError> {
        if let Some(unknown) = values.keys().find(|name| !self.parameters.contains_key(*name)) {
            return Err(MorphError::UnknownParameter(
                ErrorInfo::new("unknown-parameter", "value given for an unregistered parameter")
                    .with_context("parameter", unknown.clone()),
            ));
        }
        let mut point = Vec::with_capacity(self.parameters.len());
        for name in self.parameters.keys() {
            let value = values.get(name).copied().ok_or_else(|| {
                MorphError::MissingParameter(
                    ErrorInfo::new("missing-parameter", "no value given for a registered parameter")
                        .with_context("parameter", name.clone()),
                )
            })?;
            if !value.is_finite() {
                return Err(MorphError::InvalidValue(
                    ErrorInfo::new("value-non-finite", "parameter values must be finite")
                        .with_context("parameter", name.clone())
                        .with_context("value", value.to_string()),
                ));
            }
            point.push(value);
        }
        Ok(point)
    }

    /// Converts an ordered point back into a name to value mapping.
    pub fn map_from(&self, point: &[f64]) -> BTreeMap<String, f64> {
        self.parameters
            .keys()
            .cloned()
            .zip(point.iter().copied())
            .collect()
    }

    /// Applies each parameter's transform to an ordered point.
    pub fn to_external(&self, point: &[f64]) -> BTreeMap<String, f64> {
        self.parameters
            .values()
            .zip(point.iter().copied())
            .map(|(parameter, value)| (parameter.name.clone(), parameter.to_external(value)))
            .collect()
    }

    /// Declarative form of every parameter, in registration order.
    pub fn to_specs(&self) -> Vec<ParameterSpec> {
        self.parameters.values().map(Parameter::to_spec).collect()
    }
}
