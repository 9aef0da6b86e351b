use approx::assert_relative_eq;
use rstest::*;
use rstest_reuse::{self, *};
use tns_core::{
    models::{AssetConfig, MarketConfig, QuadraticCost, SolverMethod, Vertex},
    ports::SimulatedClock,
};
use tns_market::{BalanceError, Convergence, LocalAsset, Market, Schedulable};

mod all_methods;
use all_methods::all_methods;

mod common;
use common::{FixedCurve, NOW, market};

#[fixture]
pub fn generator() -> LocalAsset {
    let cost = QuadraticCost {
        a0: 0.0,
        a1: 0.03,
        a2: 0.0001,
    };
    LocalAsset::new(AssetConfig::quadratic("generator", cost, 0.0, 1000.0))
}

#[fixture]
pub fn load() -> LocalAsset {
    LocalAsset::new(AssetConfig::inelastic("load", -500.0))
}

#[apply(all_methods)]
#[rstest]
fn should_clear_at_marginal_cost(method: SolverMethod, generator: LocalAsset, load: LocalAsset) {
    let clock = SimulatedClock::new(NOW);
    let mut market = market(method);
    let (mut generator, mut load) = (generator, load);

    let outcome = market
        .balance(&clock, &mut [&mut generator, &mut load])
        .unwrap();
    assert!(!outcome.is_forced());
    assert!(market.converged());
    assert!(outcome.duality_gap().abs() <= market.config().duality_gap_threshold);

    for interval in market.negotiable() {
        let id = interval.id();
        // a1 + 2 a2 p = 0.13 at p = 500
        assert_relative_eq!(market.prices()[&id], 0.13, epsilon = 1e-3);
        let generation = generator.state().scheduled(&id).unwrap();
        assert_relative_eq!(generation, 500.0, epsilon = 10.0);
        assert_eq!(load.state().scheduled(&id), Some(-500.0));
    }
}

#[rstest]
fn interpolation_lands_on_the_crossing(generator: LocalAsset, load: LocalAsset) {
    let clock = SimulatedClock::new(NOW);
    let mut market = market(SolverMethod::Interpolation);
    let (mut generator, mut load) = (generator, load);

    let outcome = market
        .balance(&clock, &mut [&mut generator, &mut load])
        .unwrap();
    assert_eq!(outcome.iterations(), 2);
    for price in market.prices().values() {
        assert_relative_eq!(*price, 0.13, epsilon = 1e-12);
    }
}

#[rstest]
fn iteration_cap_forces_convergence(generator: LocalAsset, load: LocalAsset) {
    let clock = SimulatedClock::new(NOW);
    let config = MarketConfig {
        horizon: 2,
        max_iterations: 1,
        ..Default::default()
    };
    let mut market = Market::new("capped", config).unwrap();
    let (mut generator, mut load) = (generator, load);

    let outcome = market
        .balance(&clock, &mut [&mut generator, &mut load])
        .unwrap();
    assert!(matches!(
        outcome,
        Convergence::IterationCap { iterations: 1, .. }
    ));
    assert!(outcome.is_forced());
    assert!(market.converged());
}

#[rstest]
fn generation_alone_has_no_bracket(generator: LocalAsset) {
    let clock = SimulatedClock::new(NOW);
    let mut market = market(SolverMethod::Interpolation);
    let mut generator = generator;

    let result = market.balance(&clock, &mut [&mut generator]);
    assert!(matches!(result, Err(BalanceError::NoBracket { .. })));
    assert!(!market.converged());
}

#[test]
fn new_data_interrupts_balance() {
    let clock = SimulatedClock::new(NOW);
    let mut market = market(SolverMethod::Interpolation);
    let mut supply = FixedCurve::new(
        "supply",
        vec![Vertex::new(0.1, 0.0, -100.0), Vertex::new(0.2, 0.0, 100.0)],
    );
    supply.interrupt = Some(market.new_data_flag());

    // the first pass raises the flag, the second iteration sees it
    let result = market.balance(&clock, &mut [&mut supply]);
    assert_eq!(result, Err(BalanceError::Interrupted));
    assert!(!market.converged());
}

#[test]
fn stale_signal_does_not_interrupt() {
    let clock = SimulatedClock::new(NOW);
    let mut market = market(SolverMethod::Interpolation);
    market.notify_new_data();
    let mut supply = FixedCurve::new(
        "supply",
        vec![Vertex::new(0.1, 0.0, 0.0), Vertex::new(0.2, 15.0, 100.0)],
    );
    let mut demand = FixedCurve::new("demand", vec![Vertex::inelastic(-50.0, 0.0)]);

    let outcome = market
        .balance(&clock, &mut [&mut supply, &mut demand])
        .unwrap();
    assert_eq!(outcome.iterations(), 2);
    for price in market.prices().values() {
        assert_relative_eq!(*price, 0.15, epsilon = 1e-12);
    }
}
