use crate::{
    BalanceError, Convergence, LocalAsset, Market, Neighbor, Schedulable, ScheduleError, Set,
    negotiation,
};
use tns_core::{
    models::{AssetConfig, ConfigError, MarketConfig, NeighborConfig, SignalPayload, signal_topic},
    ports::{Clock, SignalTransport},
};
use tracing::{Level, event, span};

/// Errors from exchanging signals with neighbors
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SignalError {
    /// Error when a signal names a neighbor this node does not model
    #[error("unknown neighbor {name}")]
    UnknownNeighbor {
        /// The name in the signal
        name: String,
    },
    /// Error when a signal arrives from a neighbor that does not negotiate
    #[error("neighbor {name} is not transactive")]
    NotTransactive {
        /// The neighbor's name
        name: String,
    },
    /// Error when the signal could not be prepared
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    /// Error when the transport rejected a signal
    #[error("transport failure: {0}")]
    Transport(String),
}

/// One node of the network: a market together with the assets and neighbors it schedules
#[derive(Debug)]
pub struct TransactiveNode {
    name: String,
    market: Market,
    assets: Vec<LocalAsset>,
    neighbors: Vec<Neighbor>,
}

impl TransactiveNode {
    /// Build a node from configuration.
    ///
    /// Every asset and neighbor is validated, and their names must be unique within the node.
    pub fn new(
        name: impl Into<String>,
        market: MarketConfig,
        assets: Vec<AssetConfig>,
        neighbors: Vec<NeighborConfig>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }

        let mut names = Set::default();
        for config in assets.iter() {
            config.validate()?;
            if !names.insert(config.name.clone()) {
                return Err(ConfigError::DuplicateName(config.name.clone()));
            }
        }
        for config in neighbors.iter() {
            config.validate()?;
            if !names.insert(config.entity.name.clone()) {
                return Err(ConfigError::DuplicateName(config.entity.name.clone()));
            }
        }

        Ok(Self {
            market: Market::new(name.clone(), market)?,
            name,
            assets: assets.into_iter().map(LocalAsset::new).collect(),
            neighbors: neighbors.into_iter().map(Neighbor::new).collect(),
        })
    }

    /// The node's name, which is also its market's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node's market
    pub fn market(&self) -> &Market {
        &self.market
    }

    /// The node's local assets
    pub fn assets(&self) -> &[LocalAsset] {
        &self.assets
    }

    /// The node's neighbors
    pub fn neighbors(&self) -> &[Neighbor] {
        &self.neighbors
    }

    /// Look up a neighbor by name
    pub fn neighbor(&self, name: &str) -> Option<&Neighbor> {
        self.neighbors.iter().find(|n| n.name() == name)
    }

    /// Rewire an asset, for example to attach a forecast or an external model
    pub fn map_asset(&mut self, name: &str, f: impl FnOnce(LocalAsset) -> LocalAsset) -> bool {
        match self.assets.iter().position(|a| a.name() == name) {
            Some(index) => {
                let asset = self.assets.swap_remove(index);
                self.assets.push(f(asset));
                let last = self.assets.len() - 1;
                self.assets.swap(index, last);
                true
            }
            None => false,
        }
    }

    /// Rewire a neighbor, for example to attach a meter
    pub fn map_neighbor(&mut self, name: &str, f: impl FnOnce(Neighbor) -> Neighbor) -> bool {
        match self.neighbors.iter().position(|n| n.name() == name) {
            Some(index) => {
                let neighbor = self.neighbors.swap_remove(index);
                self.neighbors.push(f(neighbor));
                let last = self.neighbors.len() - 1;
                self.neighbors.swap(index, last);
                true
            }
            None => false,
        }
    }

    /// Start a clearing cycle: roll the horizon forward, maintain demand
    /// thresholds, and balance.
    pub fn clear(&mut self, clock: &dyn Clock) -> Result<Convergence, BalanceError> {
        let _span = span!(Level::INFO, "clear", node = %self.name).entered();
        let now = clock.now();
        self.market.refresh(now);
        for neighbor in self.neighbors.iter_mut() {
            neighbor.update_dc_threshold(&self.market, now);
            neighbor.start_of_cycle = true;
        }
        self.balance(clock)
    }

    /// Balance the market over every asset and neighbor
    pub fn balance(&mut self, clock: &dyn Clock) -> Result<Convergence, BalanceError> {
        let mut entities = self
            .assets
            .iter_mut()
            .map(|asset| asset as &mut dyn Schedulable)
            .chain(
                self.neighbors
                    .iter_mut()
                    .map(|neighbor| neighbor as &mut dyn Schedulable),
            )
            .collect::<Vec<_>>();
        self.market.balance(clock, &mut entities)
    }

    /// Prepare a signal for every transactive neighbor and send it to those
    /// not yet converged. Returns the number of signals sent.
    pub fn negotiate<T: SignalTransport>(
        &mut self,
        clock: &dyn Clock,
        transport: &mut T,
    ) -> Result<usize, SignalError> {
        let _span = span!(Level::INFO, "negotiate", node = %self.name).entered();
        let now = clock.now();
        let threshold = self.market.config().convergence_threshold;

        let signals = {
            let entities = self
                .assets
                .iter()
                .map(|asset| asset as &dyn Schedulable)
                .chain(self.neighbors.iter().map(|n| n as &dyn Schedulable))
                .collect::<Vec<_>>();
            let mut signals = Vec::new();
            for (index, neighbor) in self.neighbors.iter().enumerate() {
                if neighbor.is_transactive() {
                    let signal =
                        negotiation::prep_transactive_signal(&self.market, &entities, neighbor, now)?;
                    signals.push((index, signal));
                }
            }
            signals
        };

        let mut sent = 0;
        for (index, signal) in signals {
            let neighbor = &mut self.neighbors[index];
            neighbor.my_signal = signal;
            if negotiation::check_for_convergence(neighbor, &self.market, threshold) {
                continue;
            }

            let payload = SignalPayload {
                curves: neighbor.my_signal.values().flatten().cloned().collect(),
                start_of_cycle: neighbor.start_of_cycle,
                fail_to_converge: !self.market.converged() || self.market.is_forced(),
            };
            let topic = signal_topic(&self.name, neighbor.name());
            transport
                .send(&topic, payload.clone())
                .map_err(|error| SignalError::Transport(error.to_string()))?;
            event!(
                Level::INFO,
                topic = %topic,
                records = payload.curves.len(),
                "sent signal"
            );
            neighbor.record_sent(payload, now);
            sent += 1;
        }

        // non-transactive neighbors never need a signal
        for neighbor in self.neighbors.iter_mut().filter(|n| !n.is_transactive()) {
            negotiation::check_for_convergence(neighbor, &self.market, threshold);
        }
        Ok(sent)
    }

    /// Accept a signal from the neighbor named `from`.
    ///
    /// Any balance in progress is interrupted; the caller rebalances.
    pub fn receive(
        &mut self,
        clock: &dyn Clock,
        from: &str,
        payload: SignalPayload,
    ) -> Result<(), SignalError> {
        let neighbor = self
            .neighbors
            .iter_mut()
            .find(|n| n.name() == from)
            .ok_or_else(|| SignalError::UnknownNeighbor {
                name: from.to_owned(),
            })?;
        if !neighbor.is_transactive() {
            return Err(SignalError::NotTransactive {
                name: from.to_owned(),
            });
        }
        if payload.fail_to_converge {
            event!(Level::WARN, neighbor = from, "neighbor failed to converge");
        }
        neighbor.receive(payload.curves, clock.now());
        self.market.notify_new_data();
        Ok(())
    }

    /// Resend the last signal to every neighbor that has not answered in time.
    /// Returns the number of signals resent.
    pub fn rerequest_stale<T: SignalTransport>(
        &mut self,
        clock: &dyn Clock,
        transport: &mut T,
    ) -> Result<usize, SignalError> {
        let now = clock.now();
        let mut resent = 0;
        for neighbor in self.neighbors.iter() {
            if !neighbor.needs_rerequest(now, neighbor.config().rerequest_after) {
                continue;
            }
            if let Some(payload) = neighbor.last_payload() {
                let topic = signal_topic(&self.name, neighbor.name());
                transport
                    .send(&topic, payload.clone())
                    .map_err(|error| SignalError::Transport(error.to_string()))?;
                event!(Level::INFO, topic = %topic, "resent unanswered signal");
                resent += 1;
            }
        }
        Ok(resent)
    }

    /// Whether the market and every neighbor have converged
    pub fn converged(&self) -> bool {
        self.market.converged() && self.neighbors.iter().all(Neighbor::is_converged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tns_core::ports::ConstantValue;

    #[test]
    fn test_duplicate_names() {
        let result = TransactiveNode::new(
            "campus",
            MarketConfig::default(),
            vec![AssetConfig::inelastic("load", -1.0)],
            vec![NeighborConfig::new(
                AssetConfig::inelastic("load", 0.0),
                true,
            )],
        );
        assert_eq!(result.err(), Some(ConfigError::DuplicateName("load".into())));
    }

    #[test]
    fn test_invalid_entity() {
        let result = TransactiveNode::new(
            "campus",
            MarketConfig::default(),
            vec![AssetConfig::inelastic("", -1.0)],
            Vec::new(),
        );
        assert_eq!(result.err(), Some(ConfigError::EmptyName));
    }

    #[test]
    fn test_map_asset_keeps_order() {
        let mut node = TransactiveNode::new(
            "campus",
            MarketConfig::default(),
            vec![
                AssetConfig::inelastic("a", -1.0),
                AssetConfig::inelastic("b", -1.0),
                AssetConfig::inelastic("c", -1.0),
            ],
            Vec::new(),
        )
        .unwrap();
        assert!(node.map_asset("a", |asset| asset.with_forecast(ConstantValue(-2.0))));
        assert!(!node.map_asset("z", |asset| asset));
        let names = node.assets().iter().map(|a| a.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
