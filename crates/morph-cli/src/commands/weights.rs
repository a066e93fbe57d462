use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use morph_basis::{squared_weight_sum, MorphingSession};
use morph_core::EventSink;
use serde::Serialize;

use super::{assignments_to_map, parse_assignment};

#[derive(Args, Debug)]
pub struct WeightsArgs {
    /// Basis file written by `morph setup`.
    #[arg(long)]
    pub basis: PathBuf,
    /// Query point as `name=value`, one per parameter.
    #[arg(long = "at", value_parser = parse_assignment, num_args = 1.., required = true)]
    pub at: Vec<(String, f64)>,
}

#[derive(Debug, Serialize)]
struct WeightEntry {
    benchmark: String,
    weight: f64,
}

#[derive(Debug, Serialize)]
struct WeightsReport {
    query: BTreeMap<String, f64>,
    weights: Vec<WeightEntry>,
    morphing_error: f64,
}

pub fn run(args: &WeightsArgs, sink: Arc<dyn EventSink>) -> Result<(), Box<dyn Error>> {
    let session = MorphingSession::load(&args.basis, sink)?;
    let query = assignments_to_map(&args.at)?;
    let basis = session
        .basis()
        .ok_or("basis file did not produce a basis")?;
    let weights = basis.weights_at(&query)?;
    let morphing_error = squared_weight_sum(&weights);
    let report = WeightsReport {
        weights: basis
            .benchmarks()
            .iter()
            .zip(weights)
            .map(|(benchmark, weight)| WeightEntry {
                benchmark: benchmark.name.clone(),
                weight,
            })
            .collect(),
        query,
        morphing_error,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
