//! The JSON report a simulation run produces.

use serde::Serialize;
use time::OffsetDateTime;
use tns_core::models::{IntervalId, IntervalState};
use tns_market::{BalanceError, Convergence, TransactiveNode};

/// Everything a run settled on, cycle by cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    /// One entry per clearing cycle
    pub cycles: Vec<CycleReport>,
}

/// The outcome of one clearing cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// The cycle's position in the run, from 1
    pub cycle: usize,
    /// The simulated time the cycle ran at
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    /// The negotiation rounds the cycle took
    pub rounds: usize,
    /// The signals exchanged during the cycle
    pub signals: usize,
    /// Whether every node converged
    pub converged: bool,
    /// Per-node outcomes
    pub nodes: Vec<NodeReport>,
}

/// The state one node ended a cycle in
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    /// The node's name
    pub name: String,
    /// Whether the node's market and negotiations converged
    pub converged: bool,
    /// The node's last balance
    pub balance: BalanceOutcome,
    /// The node's intervals and their prices
    pub intervals: Vec<IntervalReport>,
}

/// How a node's last balance ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum BalanceOutcome {
    /// The duality gap fell within the threshold
    Converged {
        /// Iterations used
        iterations: usize,
        /// The final duality gap
        duality_gap: f64,
    },
    /// The iteration cap forced convergence
    IterationCap {
        /// Iterations used
        iterations: usize,
        /// The final duality gap
        duality_gap: f64,
    },
    /// The balance failed
    Failed {
        /// What went wrong
        error: String,
    },
}

impl From<&Result<Convergence, BalanceError>> for BalanceOutcome {
    fn from(value: &Result<Convergence, BalanceError>) -> Self {
        match value {
            Ok(Convergence::Converged {
                iterations,
                duality_gap,
            }) => Self::Converged {
                iterations: *iterations,
                duality_gap: *duality_gap,
            },
            Ok(Convergence::IterationCap {
                iterations,
                duality_gap,
            }) => Self::IterationCap {
                iterations: *iterations,
                duality_gap: *duality_gap,
            },
            Err(error) => Self::Failed {
                error: error.to_string(),
            },
        }
    }
}

/// One interval of a node's horizon
#[derive(Debug, Clone, Serialize)]
pub struct IntervalReport {
    /// The interval's start
    pub interval: IntervalId,
    /// The interval's lifecycle state
    pub state: IntervalState,
    /// The interval's marginal price
    pub price: Option<f64>,
}

impl NodeReport {
    /// Summarize `node` after a balance that ended with `balance`
    pub fn new(node: &TransactiveNode, balance: BalanceOutcome) -> Self {
        let market = node.market();
        Self {
            name: node.name().to_owned(),
            converged: node.converged(),
            balance,
            intervals: market
                .intervals()
                .map(|ti| IntervalReport {
                    interval: ti.id(),
                    state: ti.state(),
                    price: market.prices().get(&ti.id()).copied(),
                })
                .collect(),
        }
    }
}
