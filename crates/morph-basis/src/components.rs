use std::collections::BTreeSet;
use std::fmt;

use morph_core::errors::{ErrorInfo, MorphError};
use serde::{Deserialize, Serialize};

use crate::parameters::{ParameterRegistry, PowerSpec};

/// Monomial term of the squared amplitude, one exponent per parameter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Component(Vec<u32>);

impl Component {
    /// Wraps an exponent tuple.
    pub fn new(exponents: Vec<u32>) -> Self {
        Self(exponents)
    }

    /// Exponents in parameter registration order.
    pub fn exponents(&self) -> &[u32] {
        &self.0
    }

    /// Total polynomial degree.
    pub fn degree(&self) -> u32 {
        self.0.iter().sum()
    }

    /// Whether this is the constant monomial.
    pub fn is_constant(&self) -> bool {
        self.0.iter().all(|&e| e == 0)
    }

    /// Evaluates the monomial at an ordered point.
    pub fn evaluate(&self, point: &[f64]) -> f64 {
        self.0
            .iter()
            .zip(point.iter())
            .map(|(&exponent, &value)| value.powi(exponent as i32))
            .product()
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (idx, exponent) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ",")?;
            }
            write!(f, "{exponent}")?;
        }
        write!(f, ")")
    }
}

/// Deduplicated, lexicographically ordered component list.
///
/// The order is the column order of every design matrix built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Components(Vec<Component>);

impl Components {
    /// Number of components.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Components in canonical order.
    pub fn iter(&self) -> std::slice::Iter<'_, Component> {
        self.0.iter()
    }

    /// Components as a slice.
    pub fn as_slice(&self) -> &[Component] {
        &self.0
    }

    /// Monomial values at an ordered point, in canonical order.
    pub fn evaluate(&self, point: &[f64]) -> Vec<f64> {
        self.0.iter().map(|c| c.evaluate(point)).collect()
    }

    /// Highest exponent of the parameter at `index` over all components.
    pub fn max_exponent(&self, index: usize) -> u32 {
        self.0
            .iter()
            .filter_map(|c| c.exponents().get(index).copied())
            .max()
            .unwrap_or(0)
    }

    /// Whether the constant monomial is part of the list.
    pub fn contains_constant(&self) -> bool {
        self.0.iter().any(Component::is_constant)
    }
}

impl<'a> IntoIterator for &'a Components {
    type Item = &'a Component;
    type IntoIter = std::slice::Iter<'a, Component>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Resolves the overall power caps against the registry's power classes.
///
/// A scalar cap applies to every class.
pub fn resolve_caps(registry: &ParameterRegistry, caps: &PowerSpec) -> Result<Vec<u32>, MorphError> {
    let values = caps.validated("max_overall_power")?;
    let classes = registry.n_power_classes().unwrap_or(1);
    match (caps, values.len()) {
        (PowerSpec::Scalar(_), _) => Ok(vec![values[0]; classes]),
        (_, len) if len == classes => Ok(values),
        (_, len) => Err(MorphError::InvalidPower(
            ErrorInfo::new(
                "overall-power-classes",
                "overall power caps must match the number of power classes",
            )
            .with_context("expected", classes.to_string())
            .with_context("found", len.to_string()),
        )),
    }
}

/// Enumerates every morphing component allowed by the registry and caps.
///
/// Within each power class a tuple respects every parameter's class power
/// and the class cap; components are the element-wise sums of one tuple per
/// class, deduplicated and sorted lexicographically.
pub fn enumerate_components(
    registry: &ParameterRegistry,
    caps: &PowerSpec,
) -> Result<Components, MorphError> {
    if registry.is_empty() {
        return Err(MorphError::Config(
            ErrorInfo::new("no-parameters", "at least one parameter must be registered")
                .with_hint("call add_parameter before enumerating components"),
        ));
    }
    let caps = resolve_caps(registry, caps)?;
    let n_params = registry.len();

    let mut combined: BTreeSet<Vec<u32>> = BTreeSet::new();
    combined.insert(vec![0; n_params]);
    for (class, &cap) in caps.iter().enumerate() {
        let bounds: Vec<u32> = registry.iter().map(|p| p.max_power[class]).collect();
        let tuples = class_tuples(&bounds, cap);
        let mut next = BTreeSet::new();
        for base in &combined {
            for tuple in &tuples {
                let sum: Vec<u32> = base.iter().zip(tuple).map(|(a, b)| a + b).collect();
                next.insert(sum);
            }
        }
        combined = next;
    }

    Ok(Components(combined.into_iter().map(Component).collect()))
}

fn class_tuples(bounds: &[u32], cap: u32) -> Vec<Vec<u32>> {
    let mut out = Vec::new();
    let mut current = vec![0; bounds.len()];
    fill(bounds, cap, 0, &mut current, &mut out);
    out
}

fn fill(bounds: &[u32], remaining: u32, index: usize, current: &mut [u32], out: &mut Vec<Vec<u32>>) {
    if index == bounds.len() {
        out.push(current.to_vec());
        return;
    }
    for exponent in 0..=bounds[index].min(remaining) {
        current[index] = exponent;
        fill(bounds, remaining - exponent, index + 1, current, out);
    }
    current[index] = 0;
}
