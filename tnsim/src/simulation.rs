use crate::{
    MemoryBus, NetworkConfig, SimulationConfig,
    report::{BalanceOutcome, CycleReport, NodeReport, Report},
};
use time::OffsetDateTime;
use tns_core::{
    models::{ConfigError, parse_topic},
    ports::{Clock, SimulatedClock},
};
use tns_market::{SignalError, TransactiveNode};
use tracing::{Level, event, span};

/// Errors in how a network's nodes fit together
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Error when a node's own configuration is invalid
    #[error("node {node}: {source}")]
    Config {
        /// The node's name
        node: String,
        /// What is wrong with it
        #[source]
        source: ConfigError,
    },
    /// Error when two nodes share a name
    #[error("duplicate node {0}")]
    DuplicateNode(String),
    /// Error when a node negotiates with a node the network lacks
    #[error("{node} negotiates with {neighbor}, which is not a node of the network")]
    UnknownPeer {
        /// The node holding the neighbor
        node: String,
        /// The missing node
        neighbor: String,
    },
    /// Error when a node negotiates with a node that does not negotiate back
    #[error("{node} negotiates with {neighbor}, which does not model {node} as transactive")]
    OneSidedPeer {
        /// The node holding the neighbor
        node: String,
        /// The node that does not answer
        neighbor: String,
    },
}

/// A network of nodes exchanging signals over a [`MemoryBus`] in simulated time
#[derive(Debug)]
pub struct Simulation {
    config: SimulationConfig,
    clock: SimulatedClock,
    nodes: Vec<TransactiveNode>,
    bus: MemoryBus,
}

impl Simulation {
    /// Build every node of `network` and check that negotiating nodes pair up
    pub fn new(network: &NetworkConfig) -> Result<Self, NetworkError> {
        for (index, node) in network.nodes.iter().enumerate() {
            if network.nodes[..index].iter().any(|n| n.name == node.name) {
                return Err(NetworkError::DuplicateNode(node.name.clone()));
            }
        }

        for node in network.nodes.iter() {
            for neighbor in node.neighbors.iter().filter(|n| n.transactive) {
                let name = &neighbor.entity.name;
                let peer = network
                    .nodes
                    .iter()
                    .find(|n| &n.name == name)
                    .ok_or_else(|| NetworkError::UnknownPeer {
                        node: node.name.clone(),
                        neighbor: name.clone(),
                    })?;
                if !peer
                    .neighbors
                    .iter()
                    .any(|n| n.transactive && n.entity.name == node.name)
                {
                    return Err(NetworkError::OneSidedPeer {
                        node: node.name.clone(),
                        neighbor: name.clone(),
                    });
                }
            }
        }

        let nodes = network
            .nodes
            .iter()
            .map(|node| {
                TransactiveNode::new(
                    node.name.clone(),
                    network.market_for(node).clone(),
                    node.assets.clone(),
                    node.neighbors.clone(),
                )
                .map_err(|source| NetworkError::Config {
                    node: node.name.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let start = network
            .simulation
            .start
            .unwrap_or_else(OffsetDateTime::now_utc);
        Ok(Self {
            config: network.simulation.clone(),
            clock: SimulatedClock::new(start),
            nodes,
            bus: MemoryBus::new(),
        })
    }

    /// The simulated clock
    pub fn clock(&self) -> &SimulatedClock {
        &self.clock
    }

    /// The network's nodes
    pub fn nodes(&self) -> &[TransactiveNode] {
        &self.nodes
    }

    /// Look up a node by name
    pub fn node(&self, name: &str) -> Option<&TransactiveNode> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    /// Run every configured cycle, advancing the clock by one interval between cycles
    pub fn run(&mut self) -> Result<Report, SignalError> {
        let mut report = Report::default();
        for cycle in 1..=self.config.cycles {
            report.cycles.push(self.run_cycle(cycle)?);

            let step = self
                .nodes
                .iter()
                .map(|n| n.market().config().interval_duration)
                .min()
                .unwrap_or_default();
            self.clock.advance(step);
        }
        Ok(report)
    }

    /// Clear every node at the current time, then negotiate until no node
    /// has anything left to send or the round limit is reached.
    pub fn run_cycle(&mut self, cycle: usize) -> Result<CycleReport, SignalError> {
        let _span = span!(Level::INFO, "cycle", cycle).entered();
        let at = self.clock.now();
        let sent_before = self.bus.sent();

        let mut outcomes = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.iter_mut() {
            let result = node.clear(&self.clock);
            if let Err(error) = &result {
                event!(Level::WARN, node = node.name(), %error, "clearing failed");
            }
            outcomes.push(BalanceOutcome::from(&result));
        }

        // signals left unanswered since an earlier cycle
        for node in self.nodes.iter_mut() {
            node.rerequest_stale(&self.clock, &mut self.bus)?;
        }
        self.deliver_and_rebalance(&mut outcomes)?;

        let mut rounds = 0;
        while rounds < self.config.rounds {
            rounds += 1;
            let mut sent = 0;
            for node in self.nodes.iter_mut() {
                sent += node.negotiate(&self.clock, &mut self.bus)?;
            }
            if sent == 0 {
                break;
            }
            self.deliver_and_rebalance(&mut outcomes)?;
        }

        let nodes = self
            .nodes
            .iter()
            .zip(outcomes)
            .map(|(node, outcome)| NodeReport::new(node, outcome))
            .collect::<Vec<_>>();
        let converged = nodes.iter().all(|n| n.converged);
        let signals = self.bus.sent() - sent_before;
        if converged {
            event!(Level::INFO, rounds, signals, "network converged");
        } else {
            event!(Level::WARN, rounds, signals, "network did not converge");
        }

        Ok(CycleReport {
            cycle,
            at,
            rounds,
            signals,
            converged,
            nodes,
        })
    }

    /// Hand every queued signal to its receiver, then rebalance each receiver once
    fn deliver_and_rebalance(&mut self, outcomes: &mut [BalanceOutcome]) -> Result<(), SignalError> {
        let mut receivers = Vec::new();
        let queued = self.bus.drain().collect::<Vec<_>>();
        for (topic, payload) in queued {
            let Some((from, to)) = parse_topic(&topic) else {
                continue;
            };
            let Some(index) = self.nodes.iter().position(|n| n.name() == to) else {
                event!(Level::WARN, topic = %topic, "no node to deliver to, dropping signal");
                continue;
            };
            self.nodes[index].receive(&self.clock, from, payload)?;
            if !receivers.contains(&index) {
                receivers.push(index);
            }
        }

        for index in receivers {
            let node = &mut self.nodes[index];
            let result = node.balance(&self.clock);
            if let Err(error) = &result {
                event!(Level::WARN, node = node.name(), %error, "rebalancing failed");
            }
            outcomes[index] = BalanceOutcome::from(&result);
        }
        Ok(())
    }
}
