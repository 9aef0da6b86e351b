use super::asset::base_vertices;
use crate::{EntityState, Market, Schedulable, ScheduleError, transform};
use std::time::Duration;
use time::OffsetDateTime;
use tns_core::{
    models::{
        IntervalId, IntervalState, Map, NeighborConfig, SignalPayload, TransactiveRecord, Vertex,
    },
    ports::{ProfileValue, ValueSource},
};
use tracing::{Level, event};

/// When a signal was sent or received.
///
/// Timestamps can collide in simulated time, so each neighbor also numbers
/// its sends and receives; the sequence number orders equal timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stamp {
    /// The time of the exchange
    pub at: OffsetDateTime,
    /// The exchange's position among this neighbor's sends and receives
    pub sequence: u64,
}

/// A neighboring node as modeled by this node.
///
/// Power is this node's import from the neighbor. A transactive neighbor's
/// curve comes from the signals it sends; until one arrives, and for
/// non-transactive neighbors, the configured default curve applies.
pub struct Neighbor {
    config: NeighborConfig,
    state: EntityState,
    forecast: Option<Box<dyn ValueSource>>,
    meter: Option<Box<dyn ValueSource>>,

    pub(crate) my_signal: Map<IntervalId, Vec<TransactiveRecord>>,
    sent_signal: Map<IntervalId, Vec<TransactiveRecord>>,
    received_signal: Map<IntervalId, Vec<TransactiveRecord>>,
    last_payload: Option<SignalPayload>,
    sent: Option<Stamp>,
    received: Option<Stamp>,
    sequence: u64,

    pub(crate) convergence: Map<IntervalId, bool>,
    pub(crate) converged: bool,
    pub(crate) start_of_cycle: bool,

    demand_threshold: Option<f64>,
    dc_updated: Option<OffsetDateTime>,
}

impl Neighbor {
    /// Create a neighbor from its configuration
    pub fn new(config: NeighborConfig) -> Self {
        let forecast = (!config.entity.profile.is_empty()).then(|| {
            Box::new(ProfileValue::new(config.entity.profile.clone())) as Box<dyn ValueSource>
        });
        let demand_threshold = config.demand_threshold;
        Self {
            config,
            state: EntityState::default(),
            forecast,
            meter: None,
            my_signal: Map::default(),
            sent_signal: Map::default(),
            received_signal: Map::default(),
            last_payload: None,
            sent: None,
            received: None,
            sequence: 0,
            convergence: Map::default(),
            converged: false,
            start_of_cycle: true,
            demand_threshold,
            dc_updated: None,
        }
    }

    /// Replace the power forecast used by the default curve
    pub fn with_forecast(mut self, forecast: impl ValueSource + 'static) -> Self {
        self.forecast = Some(Box::new(forecast));
        self
    }

    /// Attach the meter whose readings raise the demand threshold
    pub fn with_meter(mut self, meter: impl ValueSource + 'static) -> Self {
        self.meter = Some(Box::new(meter));
        self
    }

    /// The neighbor's configuration
    pub fn config(&self) -> &NeighborConfig {
        &self.config
    }

    /// Whether the neighbor negotiates through signals
    pub fn is_transactive(&self) -> bool {
        self.config.transactive
    }

    /// The signal computed in the latest negotiation round
    pub fn my_signal(&self) -> &Map<IntervalId, Vec<TransactiveRecord>> {
        &self.my_signal
    }

    /// The signal last sent
    pub fn sent_signal(&self) -> &Map<IntervalId, Vec<TransactiveRecord>> {
        &self.sent_signal
    }

    /// The signal last received
    pub fn received_signal(&self) -> &Map<IntervalId, Vec<TransactiveRecord>> {
        &self.received_signal
    }

    /// When the last signal was sent
    pub fn sent_at(&self) -> Option<Stamp> {
        self.sent
    }

    /// When the last signal was received
    pub fn received_at(&self) -> Option<Stamp> {
        self.received
    }

    /// Whether a signal arrived after the last one was sent
    pub fn received_since_send(&self) -> bool {
        match (self.sent, self.received) {
            (Some(sent), Some(received)) => received > sent,
            _ => false,
        }
    }

    /// Per-interval convergence, as of the latest check
    pub fn interval_convergence(&self) -> &Map<IntervalId, bool> {
        &self.convergence
    }

    /// Whether every interval has converged
    pub fn is_converged(&self) -> bool {
        self.converged
    }

    /// The current demand-charge threshold, if demand charges apply
    pub fn demand_threshold(&self) -> Option<f64> {
        self.demand_threshold
    }

    fn next_stamp(&mut self, at: OffsetDateTime) -> Stamp {
        self.sequence += 1;
        Stamp {
            at,
            sequence: self.sequence,
        }
    }

    /// Store a signal from the neighbor, replacing earlier records interval by interval
    pub fn receive(&mut self, curves: Vec<TransactiveRecord>, now: OffsetDateTime) {
        let mut incoming: Map<IntervalId, Vec<TransactiveRecord>> = Map::default();
        for record in curves {
            incoming
                .entry(record.time_interval)
                .or_default()
                .push(record);
        }
        event!(
            Level::INFO,
            neighbor = %self.config.entity.name,
            intervals = incoming.len(),
            "received signal"
        );
        self.received_signal.extend(incoming);
        self.received_signal.sort_keys();
        self.received = Some(self.next_stamp(now));
    }

    /// Record that `payload`, built from the current signal, was sent
    pub(crate) fn record_sent(&mut self, payload: SignalPayload, now: OffsetDateTime) {
        self.sent_signal = self.my_signal.clone();
        self.last_payload = Some(payload);
        self.sent = Some(self.next_stamp(now));
        self.start_of_cycle = false;
    }

    /// The last payload sent, for retransmission
    pub fn last_payload(&self) -> Option<&SignalPayload> {
        self.last_payload.as_ref()
    }

    /// Whether the neighbor has left the last signal unanswered for `timeout`
    pub fn needs_rerequest(&self, now: OffsetDateTime, timeout: Duration) -> bool {
        match self.sent {
            Some(sent) if self.config.transactive && !self.received_since_send() => {
                now - sent.at >= timeout
            }
            _ => false,
        }
    }

    /// Maintain the demand-charge threshold once per clearing cycle.
    ///
    /// At a calendar-month rollover the threshold first decays to
    /// `coefficient × threshold`. It then rises to the peak of the metered
    /// value and the scheduled import of every interval in delivery.
    pub fn update_dc_threshold(&mut self, market: &Market, now: OffsetDateTime) {
        let Some(mut threshold) = self.demand_threshold else {
            return;
        };

        let rollover = self
            .dc_updated
            .is_some_and(|last| (last.year(), last.month()) != (now.year(), now.month()));
        if rollover {
            threshold *= self.config.demand_threshold_coefficient;
            event!(
                Level::INFO,
                neighbor = %self.config.entity.name,
                threshold,
                "demand threshold reset for a new month"
            );
        }

        for interval in market
            .intervals()
            .filter(|ti| ti.state() == IntervalState::Delivery)
        {
            if let Some(metered) = self.meter.as_ref().and_then(|m| m.value_at(interval)) {
                threshold = threshold.max(metered);
            }
            if let Some(scheduled) = self.state.scheduled(&interval.id()) {
                threshold = threshold.max(scheduled);
            }
        }

        self.demand_threshold = Some(threshold);
        self.dc_updated = Some(now);
    }

    /// Drop signal records for intervals the market no longer holds
    fn reconcile_signals(&mut self, market: &Market) {
        self.my_signal.retain(|id, _| market.interval(id).is_some());
        self.sent_signal.retain(|id, _| market.interval(id).is_some());
        self.received_signal
            .retain(|id, _| market.interval(id).is_some());
        self.convergence.retain(|id, _| market.interval(id).is_some());
    }

    /// The curve implied by the neighbor's latest signal for `id`, from this node's side
    fn received_vertices(&self, id: &IntervalId) -> Option<Vec<Vertex>> {
        let records = self
            .received_signal
            .get(id)
            .filter(|records| !records.is_empty())?;

        let import = |record: &TransactiveRecord| {
            let vertex = record.vertex();
            Vertex {
                power: -vertex.power,
                ..vertex
            }
        };

        let flexibility = records
            .iter()
            .filter(|r| !r.is_balance_point())
            .map(import)
            .collect::<Vec<_>>();
        if !flexibility.is_empty() {
            return Some(flexibility);
        }

        // only the balance point: the neighbor offers no flexibility
        records.iter().find(|r| r.is_balance_point()).map(|record| {
            let vertex = import(record);
            vec![Vertex::inelastic(vertex.power, vertex.cost).with_record(0)]
        })
    }
}

impl std::fmt::Debug for Neighbor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neighbor")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("converged", &self.converged)
            .field("demand_threshold", &self.demand_threshold)
            .field("sent", &self.sent)
            .field("received", &self.received)
            .finish_non_exhaustive()
    }
}

impl Schedulable for Neighbor {
    fn name(&self) -> &str {
        &self.config.entity.name
    }

    fn state(&self) -> &EntityState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EntityState {
        &mut self.state
    }

    fn hard_limits(&self) -> (f64, f64) {
        (self.config.entity.min_power, self.config.entity.max_power)
    }

    fn update_vertices(&mut self, market: &Market) -> Result<(), ScheduleError> {
        self.reconcile_signals(market);

        for interval in market.negotiable() {
            let id = interval.id();
            let received = if self.config.transactive {
                self.received_vertices(&id)
            } else {
                None
            };
            let mut vertices = received.unwrap_or_else(|| {
                base_vertices(&self.config.entity, self.forecast.as_deref(), interval)
            });
            if vertices.is_empty() {
                return Err(ScheduleError::NoActiveVertices {
                    entity: self.config.entity.name.clone(),
                    interval: id,
                });
            }

            transform::include_marginal_losses(
                &mut vertices,
                self.config.loss_factor,
                self.config.entity.max_power,
            );
            if let Some(threshold) = self.demand_threshold {
                transform::include_demand_charges(
                    &mut vertices,
                    threshold,
                    self.config.demand_rate,
                    interval.duration_hours(),
                );
            }

            self.state.vertices.insert(id, vertices);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tns_core::models::{AssetConfig, MarketConfig, TimeInterval, VertexPoint};
    use time::macros::datetime;

    fn market(now: OffsetDateTime) -> Market {
        let config = MarketConfig {
            horizon: 2,
            ..Default::default()
        };
        let mut market = Market::new("test", config).unwrap();
        market.refresh(now);
        market
    }

    fn city() -> Neighbor {
        let mut entity = AssetConfig::inelastic("city", 0.0);
        entity.min_power = 0.0;
        entity.max_power = 1000.0;
        Neighbor::new(NeighborConfig::new(entity, true))
    }

    fn record(interval: IntervalId, record: u32, price: f64, power: f64) -> TransactiveRecord {
        TransactiveRecord::new(
            interval,
            record,
            &Vertex::new(price, 0.0, power),
            datetime!(2026-01-05 00:00 UTC),
        )
    }

    #[test]
    fn test_default_curve_until_signal() {
        let market = market(datetime!(2026-01-05 00:00 UTC));
        let mut city = city();
        city.schedule(&market).unwrap();
        assert!(city.state().scheduled_power.values().all(|p| *p == 0.0));
    }

    #[test]
    fn test_received_flexibility_is_negated() {
        let market = market(datetime!(2026-01-05 00:00 UTC));
        let id = market.intervals().next().unwrap().id();
        let mut city = city();
        city.receive(
            vec![
                record(id, 0, 0.13, -300.0),
                record(id, 1, 0.07, 0.0),
                record(id, 2, 0.23, -800.0),
            ],
            datetime!(2026-01-05 00:01 UTC),
        );
        city.schedule(&market).unwrap();

        let vertices = &city.state().vertices[&id];
        let powers = vertices.iter().map(|v| v.power).collect::<Vec<_>>();
        assert_eq!(powers, vec![0.0, 800.0]);
        // the default price of 0.05 is below the neighbor's curve
        assert_eq!(city.state().scheduled(&id), Some(0.0));
    }

    #[test]
    fn test_balance_point_alone_is_inelastic() {
        let market = market(datetime!(2026-01-05 00:00 UTC));
        let id = market.intervals().next().unwrap().id();
        let mut city = city();
        city.receive(vec![record(id, 0, 0.08, -300.0)], datetime!(2026-01-05 00:01 UTC));
        city.schedule(&market).unwrap();

        let vertices = &city.state().vertices[&id];
        assert_eq!(vertices.len(), 1);
        assert!(vertices[0].is_inelastic());
        assert_eq!(city.state().scheduled(&id), Some(300.0));
    }

    #[test]
    fn test_non_transactive_ignores_signals() {
        let market = market(datetime!(2026-01-05 00:00 UTC));
        let id = market.intervals().next().unwrap().id();
        let mut entity = AssetConfig::inelastic("grid", 50.0);
        entity.max_power = 1000.0;
        let mut grid = Neighbor::new(NeighborConfig::new(entity, false));
        grid.receive(vec![record(id, 0, 0.08, -300.0)], datetime!(2026-01-05 00:01 UTC));
        grid.schedule(&market).unwrap();
        assert_eq!(grid.state().scheduled(&id), Some(50.0));
    }

    #[test]
    fn test_demand_charge_is_applied() {
        let market = market(datetime!(2026-01-05 00:00 UTC));
        let id = market.intervals().next().unwrap().id();
        let mut entity = AssetConfig::responsive(
            "city",
            vec![
                VertexPoint {
                    price: 0.05,
                    power: 0.0,
                    cost: 0.0,
                },
                VertexPoint {
                    price: 0.15,
                    power: 1000.0,
                    cost: 100.0,
                },
            ],
        );
        entity.max_power = 1000.0;
        let mut config = NeighborConfig::new(entity, false);
        config.demand_rate = 0.02;
        config.demand_threshold = Some(400.0);
        let mut city = Neighbor::new(config);
        city.schedule(&market).unwrap();
        assert_eq!(city.state().vertices[&id].len(), 4);
    }

    #[test]
    fn test_receive_replaces_per_interval() {
        let market = market(datetime!(2026-01-05 00:00 UTC));
        let ids = market.intervals().map(TimeInterval::id).collect::<Vec<_>>();
        let mut city = city();
        city.receive(
            vec![record(ids[0], 0, 0.1, 1.0), record(ids[1], 0, 0.1, 2.0)],
            datetime!(2026-01-05 00:01 UTC),
        );
        city.receive(vec![record(ids[1], 0, 0.2, 3.0)], datetime!(2026-01-05 00:02 UTC));

        assert_eq!(city.received_signal()[&ids[0]][0].power, 1.0);
        assert_eq!(city.received_signal()[&ids[1]].len(), 1);
        assert_eq!(city.received_signal()[&ids[1]][0].power, 3.0);
    }

    #[test]
    fn test_stamps_order_equal_times() {
        let now = datetime!(2026-01-05 00:00 UTC);
        let mut city = city();
        city.record_sent(SignalPayload::default(), now);
        assert!(!city.received_since_send());
        city.receive(Vec::new(), now);
        assert!(city.received_since_send());
    }

    #[test]
    fn test_needs_rerequest() {
        let now = datetime!(2026-01-05 00:00 UTC);
        let timeout = Duration::from_secs(300);
        let mut city = city();
        assert!(!city.needs_rerequest(now, timeout));

        city.record_sent(SignalPayload::default(), now);
        assert!(!city.needs_rerequest(now + Duration::from_secs(60), timeout));
        assert!(city.needs_rerequest(now + timeout, timeout));

        city.receive(Vec::new(), now + Duration::from_secs(60));
        assert!(!city.needs_rerequest(now + timeout, timeout));
    }

    #[test]
    fn test_dc_threshold_follows_peak_and_decays() {
        let mut config = NeighborConfig::new(AssetConfig::inelastic("city", 0.0), false);
        config.demand_rate = 0.02;
        config.demand_threshold = Some(400.0);
        let meter = |ti: &TimeInterval| (ti.state() == IntervalState::Delivery).then_some(450.0);
        let mut city = Neighbor::new(config).with_meter(meter);

        let mut market = market(datetime!(2026-01-31 22:00 UTC));
        city.update_dc_threshold(&market, datetime!(2026-01-31 22:00 UTC));
        assert_eq!(city.demand_threshold(), Some(400.0));

        market.refresh(datetime!(2026-01-31 23:30 UTC));
        city.update_dc_threshold(&market, datetime!(2026-01-31 23:30 UTC));
        assert_eq!(city.demand_threshold(), Some(450.0));

        // the month rolls over: 0.8 × 450 = 360, then no interval is in delivery
        market.refresh(datetime!(2026-02-01 03:00 UTC));
        city.update_dc_threshold(&market, datetime!(2026-02-01 03:00 UTC));
        assert_relative_eq!(city.demand_threshold().unwrap(), 360.0, epsilon = 1e-9);
    }
}
