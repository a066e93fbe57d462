use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use morph_basis::load_config;
use morph_core::EventSink;

use super::write_components_csv;

#[derive(Args, Debug)]
pub struct ComponentsArgs {
    /// YAML configuration declaring the parameters and power caps.
    #[arg(long)]
    pub config: PathBuf,
}

pub fn run(args: &ComponentsArgs, sink: Arc<dyn EventSink>) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args.config)?;
    let session = config.build_session(sink)?;
    let components = session.components(&config.max_overall_power)?;
    write_components_csv(io::stdout().lock(), session.parameters(), &components)
}
