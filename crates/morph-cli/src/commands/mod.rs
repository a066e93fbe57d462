use std::collections::BTreeMap;
use std::error::Error;
use std::io::Write;

use morph_basis::{Components, ParameterRegistry};

pub mod components;
pub mod error_grid;
pub mod setup;
pub mod weights;

/// Parses a `name=value` command line assignment.
pub fn parse_assignment(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in `{raw}`"));
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|err| format!("invalid value for `{name}`: {err}"))?;
    Ok((name.to_string(), value))
}

pub fn assignments_to_map(
    assignments: &[(String, f64)],
) -> Result<BTreeMap<String, f64>, Box<dyn Error>> {
    let mut values = BTreeMap::new();
    for (name, value) in assignments {
        if values.insert(name.clone(), *value).is_some() {
            return Err(format!("parameter `{name}` assigned more than once").into());
        }
    }
    Ok(values)
}

/// Writes one row per component: its index followed by one exponent per parameter.
pub fn write_components_csv<W: Write>(
    writer: W,
    parameters: &ParameterRegistry,
    components: &Components,
) -> Result<(), Box<dyn Error>> {
    let mut csv = csv::Writer::from_writer(writer);
    let mut header = vec!["component".to_string()];
    header.extend(parameters.names().map(str::to_string));
    csv.write_record(&header)?;
    for (idx, component) in components.iter().enumerate() {
        let mut row = vec![idx.to_string()];
        row.extend(component.exponents().iter().map(u32::to_string));
        csv.write_record(&row)?;
    }
    csv.flush()?;
    Ok(())
}
