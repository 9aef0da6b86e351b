#![allow(dead_code)]
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use time::{OffsetDateTime, macros::datetime};
use tns_core::models::{MarketConfig, SolverMethod, Vertex};
use tns_market::{EntityState, Market, Schedulable, ScheduleError};

pub const NOW: OffsetDateTime = datetime!(2026-01-05 10:20 UTC);

/// A market with a short horizon, refreshed at [`NOW`]
pub fn market(method: SolverMethod) -> Market {
    let config = MarketConfig {
        horizon: 2,
        method,
        subgradient_step: 0.2,
        ..Default::default()
    };
    let mut market = Market::new("test", config).unwrap();
    market.refresh(NOW);
    market
}

/// An entity offering the same curve in every interval
#[derive(Debug, Default)]
pub struct FixedCurve {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub state: EntityState,
    /// Raised on every scheduling pass, to simulate a signal arriving mid-balance
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl FixedCurve {
    pub fn new(name: &str, vertices: Vec<Vertex>) -> Self {
        Self {
            name: name.to_owned(),
            vertices,
            ..Default::default()
        }
    }
}

impl Schedulable for FixedCurve {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> &EntityState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EntityState {
        &mut self.state
    }

    fn hard_limits(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    fn update_vertices(&mut self, market: &Market) -> Result<(), ScheduleError> {
        for interval in market.negotiable() {
            self.state
                .vertices
                .insert(interval.id(), self.vertices.clone());
        }
        if let Some(flag) = self.interrupt.as_ref() {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}
