use std::error::Error;

use clap::{ArgAction, Parser, Subcommand};
use commands::{
    components::{self, ComponentsArgs},
    error_grid::{self, ErrorGridArgs},
    setup::{self, SetupArgs},
    weights::{self, WeightsArgs},
};

mod commands;
mod sink;

#[derive(Parser, Debug)]
#[command(name = "morph", about = "Morphing basis setup and weight queries")]
struct Cli {
    /// Print engine events as JSON lines on stderr (-v for progress, -vv for debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the components implied by a configuration.
    Components(ComponentsArgs),
    /// Optimize and commit a basis, writing it to an output directory.
    Setup(SetupArgs),
    /// Evaluate morphing weights of a persisted basis at one point.
    Weights(WeightsArgs),
    /// Tabulate the morphing error of a persisted basis on a grid.
    ErrorGrid(ErrorGridArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let sink = sink::stderr_sink(cli.verbose);
    match cli.command {
        Command::Components(args) => components::run(&args, sink),
        Command::Setup(args) => setup::run(&args, sink),
        Command::Weights(args) => weights::run(&args, sink),
        Command::ErrorGrid(args) => error_grid::run(&args, sink),
    }
}
