use tnsim::{Cli, Commands, NetworkConfig, Simulation};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

fn main() -> anyhow::Result<()> {
    // Library crates only emit `tracing` events; subscribe here so they reach stderr.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::import()?;

    match cli.command {
        Commands::Run {
            network,
            output,
            cycles,
            rounds,
        } => {
            let mut network = NetworkConfig::load(&network)?;
            if let Some(cycles) = cycles {
                network.simulation.cycles = cycles;
            }
            if let Some(rounds) = rounds {
                network.simulation.rounds = rounds;
            }

            let mut simulation = Simulation::new(&network)?;
            let report = simulation.run()?;
            serde_json::to_writer_pretty(output.write()?, &report)?;
        }
        Commands::Check { network } => {
            let network = NetworkConfig::load(&network)?;
            Simulation::new(&network)?;
            serde_json::to_writer_pretty(std::io::stdout().lock(), &network)?;
            println!();
        }
    }

    Ok(())
}
