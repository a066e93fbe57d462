use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use morph_basis::{load_config, MorphingSession};
use morph_core::EventSink;
use serde_json::json;

use super::write_components_csv;

#[derive(Args, Debug)]
pub struct SetupArgs {
    /// YAML configuration describing parameters, benchmarks and optimizer settings.
    #[arg(long)]
    pub config: PathBuf,
    /// Output directory for basis.json, benchmarks.csv and components.csv.
    #[arg(long)]
    pub out: PathBuf,
    /// Overrides the optimizer seed from the configuration.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Overrides the number of optimizer trials.
    #[arg(long)]
    pub trials: Option<usize>,
    /// Stops the search after this many milliseconds, keeping the best basis so far.
    #[arg(long)]
    pub deadline_ms: Option<u64>,
}

pub fn run(args: &SetupArgs, sink: Arc<dyn EventSink>) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(&args.config)?;
    if let Some(seed) = args.seed {
        config.optimizer.seed = seed;
    }
    if let Some(trials) = args.trials {
        config.optimizer.n_trials = trials;
    }
    if args.deadline_ms.is_some() {
        config.optimizer.deadline_ms = args.deadline_ms;
    }
    config.optimizer.validate()?;

    let mut session = config.build_session(sink)?;
    session.set_up_morphing(
        &config.max_overall_power,
        config.keep_existing,
        &config.optimizer,
        None,
    )?;

    fs::create_dir_all(&args.out)?;
    let file = session.save(&args.out.join("basis.json"))?;
    write_benchmarks_csv(&args.out.join("benchmarks.csv"), &session)?;
    let basis = session
        .basis()
        .ok_or("morphing setup did not commit a basis")?;
    write_components_csv(
        fs::File::create(args.out.join("components.csv"))?,
        basis.parameters(),
        basis.components(),
    )?;

    let summary = json!({
        "benchmarks": basis.benchmarks().len(),
        "components": basis.components().len(),
        "expected_error": file.provenance.expected_error,
        "trials": file.provenance.trials,
        "cancelled": file.provenance.cancelled,
        "content_hash": file.content_hash,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn write_benchmarks_csv(path: &Path, session: &MorphingSession) -> Result<(), Box<dyn Error>> {
    let basis = session
        .basis()
        .ok_or("morphing setup did not commit a basis")?;
    let names: Vec<&str> = basis.parameters().names().collect();
    let mut csv = csv::Writer::from_path(path)?;
    let mut header = vec!["benchmark".to_string()];
    header.extend(names.iter().map(|name| name.to_string()));
    header.extend(names.iter().map(|name| format!("{name}_external")));
    csv.write_record(&header)?;

    for (benchmark, (_, external)) in basis.benchmarks().iter().zip(session.external_benchmarks()?) {
        let mut row = vec![benchmark.name.clone()];
        for name in &names {
            row.push(benchmark.values[*name].to_string());
        }
        for name in &names {
            row.push(external[*name].to_string());
        }
        csv.write_record(&row)?;
    }
    csv.flush()?;
    Ok(())
}
