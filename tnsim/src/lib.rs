#![warn(missing_docs)]
//! A simulator for networks of transactive nodes.
//!
//! A network description names every node with its market settings, local
//! assets and neighbors. The simulator builds one [`tns_market::TransactiveNode`]
//! per entry, connects them through an in-memory [`MemoryBus`], and drives a
//! simulated clock through clearing cycles, recording what each node settled on.

mod bus;
pub use bus::{BusError, MemoryBus};

mod cli;
pub use cli::{Cli, Commands};

mod config;
pub use config::{NetworkConfig, NodeConfig, SimulationConfig};

pub mod report;

mod simulation;
pub use simulation::{NetworkError, Simulation};
