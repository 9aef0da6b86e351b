use crate::{Market, curve};
use tns_core::models::{IntervalId, Map, Vertex};

mod asset;
pub use asset::LocalAsset;

mod neighbor;
pub use neighbor::{Neighbor, Stamp};

/// Errors raised while an entity schedules itself against a market
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    /// Error when an entity has no curve in an interval it must schedule
    #[error("{entity} has no active vertices in interval {interval}")]
    NoActiveVertices {
        /// The entity's name
        entity: String,
        /// The interval lacking vertices
        interval: IntervalId,
    },
    /// Error when the market holds no price for an interval
    #[error("no marginal price for interval {interval}")]
    MissingPrice {
        /// The interval lacking a price
        interval: IntervalId,
    },
}

/// The per-interval schedule of one entity.
///
/// Values are keyed by interval and only ever replaced wholesale: each
/// scheduling pass drops intervals the market no longer holds and rebuilds
/// every negotiable interval from scratch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityState {
    /// The active curve in each interval
    pub vertices: Map<IntervalId, Vec<Vertex>>,
    /// The scheduled power in each interval
    pub scheduled_power: Map<IntervalId, f64>,
    /// The production cost in each interval
    pub production_cost: Map<IntervalId, f64>,
    /// The dual cost in each interval
    pub dual_cost: Map<IntervalId, f64>,
    /// The spare upward capacity in each interval
    pub reserve_margin: Map<IntervalId, f64>,
    /// Production cost summed over the market's negotiable intervals
    pub total_production_cost: f64,
    /// Dual cost summed over the market's negotiable intervals
    pub total_dual_cost: f64,
    /// Whether the last scheduling pass completed
    pub schedule_calculated: bool,
}

impl EntityState {
    /// Drop values for intervals the market no longer holds
    pub fn reconcile(&mut self, market: &Market) {
        self.vertices.retain(|id, _| market.interval(id).is_some());
        self.scheduled_power.retain(|id, _| market.interval(id).is_some());
        self.production_cost.retain(|id, _| market.interval(id).is_some());
        self.dual_cost.retain(|id, _| market.interval(id).is_some());
        self.reserve_margin.retain(|id, _| market.interval(id).is_some());
        self.schedule_calculated = false;
    }

    /// The scheduled power in `interval`, if any
    pub fn scheduled(&self, interval: &IntervalId) -> Option<f64> {
        self.scheduled_power.get(interval).copied()
    }
}

/// Anything a market can schedule: local assets, neighbors, or specialized models.
///
/// Implementors supply their curve through [`Schedulable::update_vertices`]
/// and may override how power, engagement and reserve are derived from it.
/// [`Schedulable::schedule`] runs the whole pass in order.
pub trait Schedulable {
    /// A name unique within the owning node
    fn name(&self) -> &str;

    /// The entity's schedule
    fn state(&self) -> &EntityState;

    /// The entity's schedule, mutably
    fn state_mut(&mut self) -> &mut EntityState;

    /// The physical (min, max) power limits
    fn hard_limits(&self) -> (f64, f64);

    /// Rebuild the active vertices of every negotiable interval
    fn update_vertices(&mut self, market: &Market) -> Result<(), ScheduleError>;

    /// Schedule power in every negotiable interval at the market's current prices
    fn schedule_power(&mut self, market: &Market) -> Result<(), ScheduleError> {
        for interval in market.negotiable() {
            let price = market.price(interval)?;
            let power = curve::production(&*self, price, interval)?;
            self.state_mut().scheduled_power.insert(interval.id(), power);
        }
        Ok(())
    }

    /// Decide commitment of discrete resources; most entities have none
    fn schedule_engagement(&mut self, _market: &Market) {}

    /// The spare upward capacity: `max(0, min(hard max, curve max) - scheduled)`
    fn calculate_reserve_margin(&mut self, market: &Market) {
        let (_, hard_max) = self.hard_limits();
        let mut margins = Vec::new();
        for interval in market.negotiable() {
            let id = interval.id();
            let state = self.state();
            let curve_max = state
                .vertices
                .get(&id)
                .into_iter()
                .flatten()
                .map(|v| v.power)
                .fold(f64::NEG_INFINITY, f64::max);
            let scheduled = state.scheduled(&id).unwrap_or_default();
            margins.push((id, (hard_max.min(curve_max) - scheduled).max(0.0)));
        }
        self.state_mut().reserve_margin.extend(margins);
    }

    /// Run a full scheduling pass against `market`
    fn schedule(&mut self, market: &Market) -> Result<(), ScheduleError> {
        self.state_mut().reconcile(market);
        self.update_vertices(market)?;
        self.schedule_power(market)?;
        self.schedule_engagement(market);
        self.calculate_reserve_margin(market);
        calculate_costs(&mut *self, market)?;
        self.state_mut().schedule_calculated = true;
        Ok(())
    }
}

/// Production and dual costs per negotiable interval, and their totals.
///
/// Totals only cover the intervals `market` is negotiating.
fn calculate_costs<E: Schedulable + ?Sized>(
    entity: &mut E,
    market: &Market,
) -> Result<(), ScheduleError> {
    let mut costs = Vec::new();
    for interval in market.negotiable() {
        let id = interval.id();
        let power = entity.state().scheduled(&id).unwrap_or_default();
        let production = curve::prod_cost_from_vertices(&*entity, interval, power)?;
        let price = market.price(interval)?;
        let dual = production - price * power * interval.duration_hours();
        costs.push((id, production, dual));
    }

    let state = entity.state_mut();
    state.total_production_cost = 0.0;
    state.total_dual_cost = 0.0;
    for (id, production, dual) in costs {
        state.production_cost.insert(id, production);
        state.dual_cost.insert(id, dual);
        state.total_production_cost += production;
        state.total_dual_cost += dual;
    }
    Ok(())
}
