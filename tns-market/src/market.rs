use crate::{Schedulable, ScheduleError, curve};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use time::OffsetDateTime;
use tns_core::{
    models::{
        ConfigError, IntervalId, IntervalState, Map, MarketConfig, SolverMethod, TimeInterval,
        Vertex,
    },
    ports::Clock,
};
use tracing::{Level, event, span};

/// How a balancing call ended
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Convergence {
    /// The duality gap fell within the threshold
    Converged {
        /// The iteration that converged
        iterations: usize,
        /// The final relative duality gap
        duality_gap: f64,
    },
    /// The iteration cap forced convergence; prices are usable but not optimal
    IterationCap {
        /// The number of iterations run
        iterations: usize,
        /// The duality gap when the cap was hit
        duality_gap: f64,
    },
}

impl Convergence {
    /// Whether convergence was forced by the iteration cap
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::IterationCap { .. })
    }

    /// The number of iterations run
    pub fn iterations(&self) -> usize {
        match self {
            Self::Converged { iterations, .. } | Self::IterationCap { iterations, .. } => {
                *iterations
            }
        }
    }

    /// The final relative duality gap
    pub fn duality_gap(&self) -> f64 {
        match self {
            Self::Converged { duality_gap, .. } | Self::IterationCap { duality_gap, .. } => {
                *duality_gap
            }
        }
    }
}

/// Errors that abort a balancing call, leaving the market unconverged
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum BalanceError {
    /// Error when an entity cannot schedule itself
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    /// Error when no pair of aggregate vertices straddles zero net power
    #[error("no vertex pair brackets the balance point in interval {interval}")]
    NoBracket {
        /// The interval without a bracket
        interval: IntervalId,
    },
    /// Error when the bracketing pair spans no power
    #[error("zero power range around the balance point in interval {interval}")]
    DegenerateBracket {
        /// The interval with the degenerate bracket
        interval: IntervalId,
    },
    /// Error when new data arrived while balancing
    #[error("new data arrived while balancing")]
    Interrupted,
}

/// A rolling horizon of time intervals, each with one marginal price
#[derive(Debug)]
pub struct Market {
    name: String,
    config: MarketConfig,
    intervals: Map<IntervalId, TimeInterval>,
    prices: Map<IntervalId, f64>,
    converged: bool,
    forced: bool,
    duality_gap: f64,
    new_data: Arc<AtomicBool>,
}

impl Market {
    /// Create an empty market; intervals appear on the first [`Market::refresh`]
    pub fn new(name: impl Into<String>, config: MarketConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            intervals: Map::default(),
            prices: Map::default(),
            converged: false,
            forced: false,
            duality_gap: f64::INFINITY,
            new_data: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The market's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The market's configuration
    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Every interval the market holds, in start-time order
    pub fn intervals(&self) -> impl Iterator<Item = &TimeInterval> {
        self.intervals.values()
    }

    /// The intervals whose prices may still move
    pub fn negotiable(&self) -> impl Iterator<Item = &TimeInterval> {
        self.intervals().filter(|ti| ti.state().is_negotiable())
    }

    /// Look up an interval by id
    pub fn interval(&self, id: &IntervalId) -> Option<&TimeInterval> {
        self.intervals.get(id)
    }

    /// The marginal price of every interval
    pub fn prices(&self) -> &Map<IntervalId, f64> {
        &self.prices
    }

    /// The marginal price of `interval`
    pub fn price(&self, interval: &TimeInterval) -> Result<f64, ScheduleError> {
        self.prices
            .get(&interval.id())
            .copied()
            .ok_or(ScheduleError::MissingPrice {
                interval: interval.id(),
            })
    }

    /// Whether the last balancing call converged (or was forced to)
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Whether the last balancing call only converged because of the iteration cap
    pub fn is_forced(&self) -> bool {
        self.forced
    }

    /// The duality gap of the last balancing iteration
    pub fn duality_gap(&self) -> f64 {
        self.duality_gap
    }

    /// A handle that interrupts a balance in progress when raised
    pub fn new_data_flag(&self) -> Arc<AtomicBool> {
        self.new_data.clone()
    }

    /// Signal that inputs changed since the current balance began
    pub fn notify_new_data(&self) {
        self.new_data.store(true, Ordering::SeqCst);
    }

    /// Bring the horizon up to date at `now`.
    ///
    /// Interval states are re-evaluated and expired intervals dropped. The
    /// horizon then holds the next `horizon` intervals, the first starting at
    /// the interval boundary after `now`. Intervals without a price inherit the
    /// price of the interval before them, or the default price.
    pub fn refresh(&mut self, now: OffsetDateTime) {
        for interval in self.intervals.values_mut() {
            interval.assign_state(now);
        }
        self.intervals
            .retain(|_, ti| ti.state() != IntervalState::Expired);

        let step = self.config.interval_duration;
        let first = next_boundary(now, step);
        for k in 0..self.config.horizon {
            let start = first + step * (k as u32);
            let id = IntervalId::from(start);
            if !self.intervals.contains_key(&id) {
                let mut interval = TimeInterval::new(now, start, &self.config);
                interval.assign_state(now);
                self.intervals.insert(id, interval);
            }
        }
        self.intervals.sort_keys();

        let mut prices = Map::default();
        let mut prior = None;
        for id in self.intervals.keys() {
            let price = self
                .prices
                .get(id)
                .copied()
                .or(prior)
                .unwrap_or(self.config.default_price);
            prices.insert(*id, price);
            prior = Some(price);
        }
        self.prices = prices;
    }

    /// Search for the prices at which every negotiable interval balances.
    ///
    /// Each iteration schedules every entity at the current prices and checks
    /// the relative duality gap. Outside the threshold, prices move by the
    /// configured method. Reaching `max_iterations` forces convergence and is
    /// reported as [`Convergence::IterationCap`].
    pub fn balance(
        &mut self,
        clock: &dyn Clock,
        entities: &mut [&mut dyn Schedulable],
    ) -> Result<Convergence, BalanceError> {
        let _span = span!(Level::INFO, "balance", market = %self.name).entered();

        self.new_data.store(false, Ordering::SeqCst);
        self.refresh(clock.now());
        self.converged = false;
        self.forced = false;

        let max_iterations = self.config.max_iterations;
        for iteration in 1..=max_iterations {
            if self.new_data.load(Ordering::SeqCst) {
                event!(Level::INFO, iteration, "new data arrived, abandoning balance");
                return Err(BalanceError::Interrupted);
            }

            for entity in entities.iter_mut() {
                entity.schedule(&*self)?;
            }

            let (production, dual) = entities.iter().fold((0.0, 0.0), |(pc, dc), entity| {
                let state = entity.state();
                (pc + state.total_production_cost, dc + state.total_dual_cost)
            });
            self.duality_gap = if production == 0.0 {
                f64::INFINITY
            } else {
                (production - dual) / production
            };

            let mut aggregates = Vec::new();
            for interval in self.negotiable() {
                let vertices = curve::sum_vertices(
                    entities.iter().map(|entity| &**entity as &dyn Schedulable),
                    interval,
                    None,
                )?;
                aggregates.push((interval.id(), vertices));
            }

            event!(
                Level::DEBUG,
                iteration,
                production_cost = production,
                dual_cost = dual,
                duality_gap = self.duality_gap,
            );

            if self.duality_gap.abs() <= self.config.duality_gap_threshold {
                for (interval, vertices) in aggregates.iter() {
                    if bracket(vertices).is_none() {
                        return Err(BalanceError::NoBracket {
                            interval: *interval,
                        });
                    }
                }
                self.converged = true;
                event!(
                    Level::INFO,
                    iterations = iteration,
                    duality_gap = self.duality_gap,
                    "balance converged"
                );
                return Ok(Convergence::Converged {
                    iterations: iteration,
                    duality_gap: self.duality_gap,
                });
            }

            if iteration == max_iterations {
                self.converged = true;
                self.forced = true;
                event!(
                    Level::WARN,
                    iterations = iteration,
                    duality_gap = self.duality_gap,
                    "iteration cap reached, forcing convergence"
                );
                return Ok(Convergence::IterationCap {
                    iterations: iteration,
                    duality_gap: self.duality_gap,
                });
            }

            match self.config.method {
                SolverMethod::Interpolation => {
                    for (interval, vertices) in aggregates {
                        let price = interpolate_price(interval, &vertices)?;
                        self.prices.insert(interval, price);
                    }
                }
                SolverMethod::Subgradient => self.subgradient_step(iteration, entities),
            }
        }

        // max_iterations >= 1 is validated, so the loop always returns
        Ok(Convergence::IterationCap {
            iterations: max_iterations,
            duality_gap: self.duality_gap,
        })
    }

    /// Move each negotiable price against its net power imbalance
    fn subgradient_step(&mut self, iteration: usize, entities: &[&mut dyn Schedulable]) {
        let step = self.config.subgradient_step / (iteration as f64).sqrt();

        let mut updates = Vec::new();
        for interval in self.negotiable() {
            let id = interval.id();
            let (generation, demand) = entities
                .iter()
                .filter_map(|entity| entity.state().scheduled(&id))
                .fold((0.0, 0.0), |(g, d), p| {
                    if p > 0.0 { (g + p, d) } else { (g, d + p) }
                });
            let scale = generation - demand;
            if scale == 0.0 {
                event!(Level::WARN, interval = %id, "no scheduled power, price unchanged");
                continue;
            }
            let net = generation + demand;
            updates.push((id, net / scale * step));
        }

        for (id, delta) in updates {
            if let Some(price) = self.prices.get_mut(&id) {
                *price -= delta;
            }
        }
    }
}

/// The start of the first interval after `now`, aligned to the Unix epoch
fn next_boundary(now: OffsetDateTime, step: Duration) -> OffsetDateTime {
    let step_nanos = step.as_nanos() as i128;
    let offset = now.unix_timestamp_nanos().rem_euclid(step_nanos);
    now - Duration::from_nanos(offset as u64) + step
}

/// The aggregate vertex pair straddling zero net power
fn bracket(vertices: &[Vertex]) -> Option<(&Vertex, &Vertex)> {
    vertices.windows(2).find_map(|pair| {
        let (lower, upper) = (&pair[0], &pair[1]);
        (lower.power < 0.0 && 0.0 <= upper.power).then_some((lower, upper))
    })
}

/// The price at which the aggregate curve crosses zero, by similar triangles
fn interpolate_price(interval: IntervalId, vertices: &[Vertex]) -> Result<f64, BalanceError> {
    let (lower, upper) = bracket(vertices).ok_or(BalanceError::NoBracket { interval })?;
    let power_range = upper.power - lower.power;
    if power_range == 0.0 {
        event!(Level::WARN, interval = %interval, "zero power range at the balance point");
        return Err(BalanceError::DegenerateBracket { interval });
    }
    let price_range = upper.marginal_price - lower.marginal_price;
    Ok(lower.marginal_price - price_range / power_range * lower.power)
}
