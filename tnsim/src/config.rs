//! Network description loading.
//!
//! A description is layered from default values, a TOML file, and `TNS_`
//! environment variables, in increasing order of precedence.

use serde::{Deserialize, Serialize};
use std::path::Path;
use time::OffsetDateTime;
use tns_core::models::{AssetConfig, MarketConfig, NeighborConfig};

/// How long and from when to simulate
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// The simulated start time (if omitted, defaults to now)
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start: Option<OffsetDateTime>,

    /// The number of clearing cycles to run
    #[serde(default = "default_cycles")]
    pub cycles: usize,

    /// The negotiation rounds allowed per cycle before moving on
    #[serde(default = "default_rounds")]
    pub rounds: usize,
}

fn default_cycles() -> usize {
    1
}

fn default_rounds() -> usize {
    10
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start: None,
            cycles: default_cycles(),
            rounds: default_rounds(),
        }
    }
}

/// One node of the network
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeConfig {
    /// The node's name, which its neighbors use to address it
    pub name: String,

    /// Market settings for this node, replacing the network-wide ones
    #[serde(default)]
    pub market: Option<MarketConfig>,

    /// The node's local assets
    #[serde(default)]
    pub assets: Vec<AssetConfig>,

    /// The node's neighbors, named after the nodes they stand for
    #[serde(default)]
    pub neighbors: Vec<NeighborConfig>,
}

/// A whole network and how to simulate it
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Simulation length and start
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Market settings shared by every node that does not set its own
    #[serde(default)]
    pub market: MarketConfig,

    /// The nodes
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

impl NetworkConfig {
    /// Load a network description with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. The TOML file at `path`
    /// 3. Default values (lowest priority)
    ///
    /// Environment variables are mapped using the pattern
    /// `TNS_<SECTION>__<KEY>` to `<section>.<key>`, for example
    /// `TNS_SIMULATION__CYCLES=24` or `TNS_MARKET__METHOD=subgradient`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Network file {} does not exist",
                path.display()
            ));
        }

        let built = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("TNS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        built.try_deserialize().map_err(Into::into)
    }

    /// The market settings `node` runs with
    pub fn market_for<'a>(&'a self, node: &'a NodeConfig) -> &'a MarketConfig {
        node.market.as_ref().unwrap_or(&self.market)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_network() {
        let raw = r#"
            [simulation]
            start = "2026-01-05T10:20:00Z"
            cycles = 2

            [market]
            horizon = 4
            interval_duration = "30m"

            [[nodes]]
            name = "campus"

            [[nodes.assets]]
            name = "building"
            default_power = -300.0

            [[nodes.neighbors]]
            name = "city"
            transactive = true
            behavior = "price-responsive"
            min_power = 0.0
            max_power = 1000.0
            vertices = [
                { price = 0.05, power = 0.0 },
                { price = 0.15, power = 1000.0, cost = 100.0 },
            ]
        "#;
        let network: NetworkConfig = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(network.simulation.cycles, 2);
        assert_eq!(network.simulation.rounds, 10);
        assert_eq!(network.market.horizon, 4);
        assert_eq!(network.market.interval_duration, Duration::from_secs(1800));
        assert_eq!(network.market.max_iterations, 100);

        let campus = &network.nodes[0];
        assert_eq!(campus.assets[0].default_power, -300.0);
        assert_eq!(campus.assets[0].max_power, f64::INFINITY);
        let city = &campus.neighbors[0];
        assert!(city.transactive);
        assert_eq!(city.entity.name, "city");
        assert_eq!(city.entity.vertices.len(), 2);
        assert_eq!(city.demand_threshold, None);
        assert_eq!(network.market_for(campus).horizon, 4);
    }
}
