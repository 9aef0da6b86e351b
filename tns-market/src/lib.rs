/*!
 * The market-balancing and transactive-negotiation engine.
 *
 * A [`TransactiveNode`] owns one [`Market`] together with the local assets and
 * neighbor models it schedules. Balancing searches for the marginal price at
 * which every interval's aggregate curve crosses zero net power; negotiation
 * then decides, per neighbor, whether an updated signal has to be sent.
 */

/// Pure functions over vertex lists: ordering, interpolation and aggregation.
pub mod curve;

/// Schedulable entities: local assets and neighbor models.
pub mod entity;
pub use entity::{EntityState, LocalAsset, Neighbor, Schedulable, ScheduleError};

/// Curve rewrites for transport losses and demand charges.
pub mod transform;

mod market;
pub use market::{BalanceError, Convergence, Market};

/// Signal comparison and preparation for neighbor negotiation.
pub mod negotiation;

mod node;
pub use node::{SignalError, TransactiveNode};

// We use non-std collections here for their ordering semantics and performance
pub(crate) type Set<T> = indexmap::IndexSet<T, rustc_hash::FxBuildHasher>;
