//! Command-line interface definition and parsing.

use clap::{Args, Parser, Subcommand};
use std::{
    fs::File,
    io::{BufWriter, Write, stdout},
    path::PathBuf,
};

/// Command-line arguments for the simulator.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// What to do
    #[command(subcommand)]
    pub command: Commands,
}

/// The simulator's subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run clearing cycles over a network and report the outcome
    Run {
        /// The network description (TOML)
        #[arg(env = "TNS_NETWORK")]
        network: PathBuf,

        #[command(flatten)]
        output: OutputArgs,

        /// Override the number of clearing cycles
        #[arg(long)]
        cycles: Option<usize>,

        /// Override the negotiation rounds allowed per cycle
        #[arg(long)]
        rounds: Option<usize>,
    },

    /// Validate a network description and print it with every default resolved
    Check {
        /// The network description (TOML)
        #[arg(env = "TNS_NETWORK")]
        network: PathBuf,
    },
}

/// Where output goes
#[derive(Args, Debug)]
pub struct OutputArgs {
    /// The output file (defaults to stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl OutputArgs {
    /// Open the output for writing
    pub fn write(&self) -> anyhow::Result<Box<dyn Write>> {
        if let Some(path) = &self.output {
            Ok(Box::new(BufWriter::new(File::create(path)?)))
        } else {
            Ok(Box::new(stdout().lock()))
        }
    }
}

impl Cli {
    /// Parse command-line arguments.
    pub fn import() -> Result<Self, clap::Error> {
        Self::try_parse()
    }
}
