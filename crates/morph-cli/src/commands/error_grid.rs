use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use morph_basis::{MorphingBasis, MorphingSession, OptimizerConfig};
use morph_core::EventSink;

use super::{assignments_to_map, parse_assignment};

#[derive(Args, Debug)]
pub struct ErrorGridArgs {
    /// Basis file written by `morph setup`.
    #[arg(long)]
    pub basis: PathBuf,
    /// Parameter scanned along the first axis.
    #[arg(long)]
    pub x: String,
    /// Optional parameter scanned along the second axis.
    #[arg(long)]
    pub y: Option<String>,
    /// Grid points per axis.
    #[arg(long, default_value_t = 21)]
    pub steps: usize,
    /// Output CSV path.
    #[arg(long)]
    pub out: PathBuf,
    /// Values for the parameters that are not scanned, as `name=value`.
    #[arg(long = "fix", value_parser = parse_assignment)]
    pub fix: Vec<(String, f64)>,
}

pub fn run(args: &ErrorGridArgs, sink: Arc<dyn EventSink>) -> Result<(), Box<dyn Error>> {
    if args.steps < 2 {
        return Err("--steps must be at least 2".into());
    }
    let session = MorphingSession::load(&args.basis, sink)?;
    let basis = session
        .basis()
        .ok_or("basis file did not produce a basis")?;
    let fixed = assignments_to_map(&args.fix)?;
    if let Some(unknown) = fixed.keys().find(|name| basis.parameters().get(name).is_none()) {
        return Err(format!("--fix names unknown parameter `{unknown}`").into());
    }

    let window = session
        .provenance()
        .and_then(|provenance| provenance.unbounded_window)
        .unwrap_or_else(|| OptimizerConfig::default().unbounded_window);
    let x_axis = axis(basis, &args.x, args.steps, window)?;
    let y_axis = match &args.y {
        Some(name) if name == &args.x => {
            return Err(format!("--x and --y both name `{name}`").into());
        }
        Some(name) => Some(axis(basis, name, args.steps, window)?),
        None => None,
    };

    let mut base = Vec::with_capacity(basis.parameters().len());
    for parameter in basis.parameters().iter() {
        let centre = match parameter.range.bounds() {
            Some((min, max)) => 0.5 * (min + max),
            None => 0.5 * (window[0] + window[1]),
        };
        base.push(fixed.get(&parameter.name).copied().unwrap_or(centre));
    }

    if let Some(parent) = args.out.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut csv = csv::Writer::from_path(&args.out)?;
    let mut header = vec![args.x.clone()];
    if let Some(name) = &args.y {
        header.push(name.clone());
    }
    header.push("morphing_error".to_string());
    csv.write_record(&header)?;

    let (x_index, x_values) = x_axis;
    let mut point = base;
    for &x in &x_values {
        point[x_index] = x;
        match &y_axis {
            Some((y_index, y_values)) => {
                for &y in y_values {
                    point[*y_index] = y;
                    let error = basis.morphing_error_at_point(&point)?;
                    csv.write_record([x.to_string(), y.to_string(), error.to_string()])?;
                }
            }
            None => {
                let error = basis.morphing_error_at_point(&point)?;
                csv.write_record([x.to_string(), error.to_string()])?;
            }
        }
    }
    csv.flush()?;
    Ok(())
}

/// Position of the scanned parameter and its evenly spaced grid values.
///
/// Unbounded parameters are scanned over the window the basis was optimized in.
fn axis(
    basis: &MorphingBasis,
    name: &str,
    steps: usize,
    window: [f64; 2],
) -> Result<(usize, Vec<f64>), Box<dyn Error>> {
    let index = basis
        .parameters()
        .index_of(name)
        .ok_or_else(|| format!("unknown parameter `{name}`"))?;
    let parameter = basis
        .parameters()
        .get(name)
        .ok_or_else(|| format!("unknown parameter `{name}`"))?;
    let (low, high) = parameter.range.bounds().unwrap_or((window[0], window[1]));
    let step = (high - low) / (steps - 1) as f64;
    let values = (0..steps)
        .map(|i| if i == steps - 1 { high } else { low + step * i as f64 })
        .collect();
    Ok((index, values))
}
