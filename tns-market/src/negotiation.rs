use crate::{
    Market, Neighbor, Schedulable, ScheduleError,
    curve::{self, CurveError},
    transform,
};
use time::OffsetDateTime;
use tns_core::models::{IntervalId, Map, TransactiveRecord, Vertex};
use tracing::{Level, event};

/// The Euclidean norm of the component-wise relative differences of `a` and `b`.
///
/// Each difference is normalized by the pair's mean magnitude, so values of
/// opposite sign are always far apart. Equal values contribute nothing.
pub fn relative_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(a, b)| {
            let average = (a.abs() + b.abs()) / 2.0;
            if average == 0.0 {
                event!(Level::DEBUG, "zero average, treating as equal");
                0.0
            } else if a == b {
                0.0
            } else {
                let relative = (a - b).abs() / average;
                relative * relative
            }
        })
        .sum::<f64>()
        .sqrt()
}

fn balance_point(records: &[TransactiveRecord]) -> Option<&TransactiveRecord> {
    records.iter().find(|r| r.is_balance_point())
}

/// Whether the neighbor's reply moved away from what was sent.
///
/// Compares the balance points (record 0), with the received power turned
/// around to this node's side. A missing balance point counts as different.
pub fn are_different1(
    sent: &[TransactiveRecord],
    received: &[TransactiveRecord],
    threshold: f64,
) -> bool {
    match (balance_point(sent), balance_point(received)) {
        (Some(sent), Some(received)) => {
            relative_distance(
                &[sent.marginal_price, sent.power],
                &[received.marginal_price, -received.power],
            ) > threshold
        }
        _ => true,
    }
}

/// Whether a freshly computed signal moved away from the one last sent.
///
/// Single-record signals compare power. Multi-record signals match every
/// flexibility record sent against some computed flexibility record in both
/// price and power.
pub fn are_different2(
    computed: &[TransactiveRecord],
    sent: &[TransactiveRecord],
    threshold: f64,
) -> bool {
    match (computed, sent) {
        ([], _) | (_, []) => true,
        ([computed], [sent]) => relative_distance(&[computed.power], &[sent.power]) > threshold,
        ([_], _) | (_, [_]) => true,
        _ => sent.iter().filter(|s| !s.is_balance_point()).any(|s| {
            !computed.iter().filter(|c| !c.is_balance_point()).any(|c| {
                relative_distance(&[c.marginal_price, c.power], &[s.marginal_price, s.power])
                    <= threshold
            })
        }),
    }
}

/// Re-evaluate whether negotiation with `neighbor` has converged.
///
/// An interval converges once a signal was sent for it, any reply received
/// since agrees with it, and the current signal has not moved away from it.
/// Non-transactive neighbors are always converged.
pub fn check_for_convergence(neighbor: &mut Neighbor, market: &Market, threshold: f64) -> bool {
    let mut flags = Map::default();
    if !neighbor.is_transactive() {
        flags.extend(market.negotiable().map(|ti| (ti.id(), true)));
        neighbor.convergence = flags;
        neighbor.converged = true;
        return true;
    }

    let ever_sent = neighbor.sent_at().is_some();
    let replied = neighbor.received_since_send();
    for interval in market.negotiable() {
        let id = interval.id();
        let sent = interval_records(neighbor.sent_signal(), &id);
        let received = interval_records(neighbor.received_signal(), &id);
        let computed = interval_records(neighbor.my_signal(), &id);

        let converged = ever_sent
            && !sent.is_empty()
            && !(replied && are_different1(sent, received, threshold))
            && !are_different2(computed, sent, threshold);
        flags.insert(id, converged);
    }

    neighbor.converged = flags.values().all(|converged| *converged);
    neighbor.convergence = flags;
    event!(
        Level::DEBUG,
        neighbor = neighbor.name(),
        converged = neighbor.converged,
        "checked negotiation convergence"
    );
    neighbor.converged
}

fn interval_records<'a>(
    signal: &'a Map<IntervalId, Vec<TransactiveRecord>>,
    id: &IntervalId,
) -> &'a [TransactiveRecord] {
    signal.get(id).map(Vec::as_slice).unwrap_or_default()
}

/// Build the signal for `neighbor`: this node's balance point and flexibility,
/// as seen from the neighbor's side of the tie.
///
/// The node's curve is aggregated without the neighbor and turned into an
/// import curve. Record 0 is the import at the market price; records 1, 2, ...
/// are the import curve's vertices inside the soft power range, the
/// intersection of the neighbor's hard limits with the curve's extent. The
/// neighbor's demand charges and losses are stripped before sending.
pub fn prep_transactive_signal(
    market: &Market,
    entities: &[&dyn Schedulable],
    neighbor: &Neighbor,
    now: OffsetDateTime,
) -> Result<Map<IntervalId, Vec<TransactiveRecord>>, ScheduleError> {
    let config = neighbor.config();
    let mut signal = Map::default();

    for interval in market.negotiable() {
        let id = interval.id();
        let price = market.price(interval)?;
        let aggregate = curve::sum_vertices(
            entities.iter().copied(),
            interval,
            Some(neighbor.name()),
        )?;

        if aggregate.is_empty() {
            let record = TransactiveRecord::new(id, 0, &Vertex::new(price, 0.0, 0.0), now);
            signal.insert(id, vec![record]);
            continue;
        }

        let imports = aggregate
            .iter()
            .map(|v| Vertex {
                power: -v.power,
                ..*v
            })
            .collect::<Vec<_>>();

        let no_vertices = |_: CurveError| ScheduleError::NoActiveVertices {
            entity: neighbor.name().to_owned(),
            interval: id,
        };
        let power = -curve::production_from_vertices(&aggregate, price).map_err(no_vertices)?;
        let cost = curve::cost_at_power(&imports, power).map_err(no_vertices)?;
        let mut balance = vec![Vertex::new(price, cost, power)];

        let mut flexibility = if imports.len() > 1 {
            soft_range_vertices(&imports, neighbor.hard_limits()).map_err(no_vertices)?
        } else {
            Vec::new()
        };

        let hours = interval.duration_hours();
        for vertices in [&mut balance, &mut flexibility] {
            if let Some(threshold) = neighbor.demand_threshold() {
                transform::remove_demand_charges(vertices, threshold, config.demand_rate, hours);
            }
            transform::remove_marginal_losses(
                vertices,
                config.loss_factor,
                config.entity.max_power,
            );
        }
        curve::order_vertices(&mut flexibility);

        let records = balance
            .iter()
            .map(|v| TransactiveRecord::new(id, 0, v, now))
            .chain(
                (1..)
                    .zip(flexibility.iter())
                    .map(|(record, v)| TransactiveRecord::new(id, record, v, now)),
            )
            .collect();
        signal.insert(id, records);
    }
    Ok(signal)
}

/// The vertices of `curve` inside its extent intersected with `limits`,
/// with vertices synthesized on the range boundaries.
///
/// When the curve lies entirely outside the limits, the range collapses onto
/// the nearer limit.
fn soft_range_vertices(curve: &[Vertex], limits: (f64, f64)) -> Result<Vec<Vertex>, CurveError> {
    let (hard_min, hard_max) = limits;
    let (curve_min, curve_max) = curve
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v.power), hi.max(v.power))
        });

    let (low, high) = if curve_max < hard_min {
        (hard_min, hard_min)
    } else if curve_min > hard_max {
        (hard_max, hard_max)
    } else {
        (hard_min.max(curve_min), hard_max.min(curve_max))
    };

    let mut inside = curve
        .iter()
        .filter(|v| low <= v.power && v.power <= high)
        .copied()
        .collect::<Vec<_>>();
    for bound in [low, high] {
        if !inside.iter().any(|v| v.power == bound) {
            let price = curve::marginal_price_from_vertices(bound, curve)?;
            let cost = curve::cost_at_power(curve, bound)?;
            inside.push(Vertex::new(price, cost, bound));
        }
    }
    Ok(inside)
}
