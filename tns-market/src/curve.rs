use crate::{Schedulable, ScheduleError};
use tns_core::models::{TimeInterval, Vertex};
use tracing::{Level, event};

/// The price offset that keeps two vertices at an identical marginal price in order
pub const TIE_BREAK: f64 = 1e-10;

/// Errors from evaluating a curve
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CurveError {
    /// Error when a curve has no vertices to evaluate
    #[error("curve has no vertices")]
    Empty,
}

/// Sort vertices by marginal price, breaking ties by power.
///
/// The sort is stable, so vertices equal in both coordinates keep their order.
pub fn order_vertices(vertices: &mut [Vertex]) {
    vertices.sort_by(Vertex::price_order);
}

/// The power a curve produces at `price`.
///
/// Segments are half-open in price: at a vertical step the upper power applies.
/// A single-vertex curve is inelastic and returns its power at any price.
pub fn production_from_vertices(vertices: &[Vertex], price: f64) -> Result<f64, CurveError> {
    let mut vertices = vertices.to_vec();
    order_vertices(&mut vertices);

    let (first, last) = match (vertices.first(), vertices.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(CurveError::Empty),
    };

    if vertices.len() == 1 || price < first.marginal_price {
        return Ok(first.power);
    }
    if price >= last.marginal_price {
        return Ok(last.power);
    }

    // first.marginal_price <= price < last.marginal_price, so a bracketing pair exists
    for pair in vertices.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        if lo.marginal_price <= price && price < hi.marginal_price {
            let fraction = (price - lo.marginal_price) / (hi.marginal_price - lo.marginal_price);
            return Ok(lo.power + fraction * (hi.power - lo.power));
        }
    }
    Ok(last.power)
}

/// The production cost of running at `power` for `hours`.
///
/// Inside the curve the cost integrates the marginal price from the lower
/// bracketing vertex; outside it the nearest boundary vertex's cost applies.
/// Consumption (`power <= 0`) costs nothing.
pub fn cost_from_vertices(vertices: &[Vertex], power: f64, hours: f64) -> Result<f64, CurveError> {
    let mut vertices = vertices.to_vec();
    vertices.sort_by(Vertex::power_order);

    let (first, last) = match (vertices.first(), vertices.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(CurveError::Empty),
    };

    if power <= 0.0 {
        return Ok(0.0);
    }
    if power <= first.power {
        return Ok(first.cost);
    }
    if power >= last.power {
        return Ok(last.cost);
    }

    for pair in vertices.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        if lo.power <= power && power < hi.power {
            let delta = power - lo.power;
            let width = hi.power - lo.power;
            let slope = if width == 0.0 {
                0.0
            } else {
                (hi.marginal_price - lo.marginal_price) / width
            };
            return Ok(lo.cost
                + lo.marginal_price * delta * hours
                + 0.5 * slope * delta * delta * hours);
        }
    }
    Ok(last.cost)
}

/// The marginal price of a curve at `power`: the inverse of [`production_from_vertices`].
///
/// Powers outside the curve saturate to the boundary vertex's price.
pub fn marginal_price_from_vertices(power: f64, vertices: &[Vertex]) -> Result<f64, CurveError> {
    let mut vertices = vertices.to_vec();
    vertices.sort_by(Vertex::power_order);

    let (first, last) = match (vertices.first(), vertices.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(CurveError::Empty),
    };

    if power < first.power {
        return Ok(first.marginal_price);
    }
    if power >= last.power {
        return Ok(last.marginal_price);
    }

    // half-open in power, so a vertical step wins over the segment ending at it
    for pair in vertices.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        let width = hi.power - lo.power;
        if width == 0.0 {
            if power == lo.power {
                event!(
                    Level::WARN,
                    power,
                    price = hi.marginal_price,
                    "zero-width segment, using the upper price"
                );
                return Ok(hi.marginal_price);
            }
            continue;
        }
        if lo.power <= power && power < hi.power {
            let fraction = (power - lo.power) / width;
            return Ok(lo.marginal_price + fraction * (hi.marginal_price - lo.marginal_price));
        }
    }
    Ok(last.marginal_price)
}

/// The cost at `power`, linearly interpolated between the curve's vertices.
///
/// Used when a vertex is synthesized on an existing segment.
pub fn cost_at_power(vertices: &[Vertex], power: f64) -> Result<f64, CurveError> {
    let mut vertices = vertices.to_vec();
    vertices.sort_by(Vertex::power_order);

    let (first, last) = match (vertices.first(), vertices.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(CurveError::Empty),
    };

    if power <= first.power {
        return Ok(first.cost);
    }
    if power >= last.power {
        return Ok(last.cost);
    }

    for pair in vertices.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        if lo.power <= power && power < hi.power {
            let fraction = (power - lo.power) / (hi.power - lo.power);
            return Ok(lo.cost + fraction * (hi.cost - lo.cost));
        }
    }
    Ok(last.cost)
}

fn active_vertices<'a, E: Schedulable + ?Sized>(
    entity: &'a E,
    interval: &TimeInterval,
) -> Result<&'a [Vertex], ScheduleError> {
    entity
        .state()
        .vertices
        .get(&interval.id())
        .map(Vec::as_slice)
        .filter(|vertices| !vertices.is_empty())
        .ok_or_else(|| ScheduleError::NoActiveVertices {
            entity: entity.name().to_owned(),
            interval: interval.id(),
        })
}

/// The power `entity` produces at `price` in `interval`, from its active vertices
pub fn production<E: Schedulable + ?Sized>(
    entity: &E,
    price: f64,
    interval: &TimeInterval,
) -> Result<f64, ScheduleError> {
    let vertices = active_vertices(entity, interval)?;
    production_from_vertices(vertices, price).map_err(|_| ScheduleError::NoActiveVertices {
        entity: entity.name().to_owned(),
        interval: interval.id(),
    })
}

/// The cost of `entity` producing `power` in `interval`, from its active vertices
pub fn prod_cost_from_vertices<E: Schedulable + ?Sized>(
    entity: &E,
    interval: &TimeInterval,
    power: f64,
) -> Result<f64, ScheduleError> {
    let vertices = active_vertices(entity, interval)?;
    cost_from_vertices(vertices, power, interval.duration_hours()).map_err(|_| {
        ScheduleError::NoActiveVertices {
            entity: entity.name().to_owned(),
            interval: interval.id(),
        }
    })
}

/// Aggregate the curves of `entities` in `interval` into one system curve.
///
/// The aggregate has a vertex at every marginal price where some constituent
/// curve bends. An inelastic entity contributes an infinite price, which is
/// dropped unless it is the only price left, so it shifts the aggregate
/// without adding a vertex. Where two or more vertices share a price, the
/// pair straddling the step is kept apart by [`TIE_BREAK`].
///
/// The entity named `excluded`, if any, is left out of the aggregate.
pub fn sum_vertices<'a>(
    entities: impl IntoIterator<Item = &'a dyn Schedulable>,
    interval: &TimeInterval,
    excluded: Option<&str>,
) -> Result<Vec<Vertex>, ScheduleError> {
    let entities = entities
        .into_iter()
        .filter(|entity| Some(entity.name()) != excluded)
        .collect::<Vec<_>>();

    let mut prices = Vec::new();
    for entity in entities.iter() {
        let vertices = active_vertices(*entity, interval)?;
        if vertices.len() == 1 {
            prices.push(f64::INFINITY);
        } else {
            prices.extend(vertices.iter().map(|v| v.marginal_price));
        }
    }
    prices.sort_by(f64::total_cmp);

    let mut collapsed: Vec<f64> = Vec::with_capacity(prices.len());
    for run in prices.chunk_by(|a, b| a == b) {
        let price = run[0];
        if run.len() > 1 && price.is_finite() {
            collapsed.push(price - TIE_BREAK);
        }
        collapsed.push(price);
    }
    while collapsed.len() > 1 && collapsed.last().is_some_and(|p| p.is_infinite()) {
        collapsed.pop();
    }

    let mut aggregate = Vec::with_capacity(collapsed.len());
    for price in collapsed {
        let mut power = 0.0;
        let mut cost = 0.0;
        for entity in entities.iter() {
            let p = production(*entity, price, interval)?;
            power += p;
            cost += prod_cost_from_vertices(*entity, interval, p)?;
        }
        aggregate.push(Vertex::new(price, cost, power));
    }
    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_midpoint_production() {
        let curve = [Vertex::new(0.1, 0.0, -100.0), Vertex::new(0.2, 0.0, 100.0)];
        assert_relative_eq!(production_from_vertices(&curve, 0.15).unwrap(), 0.0, epsilon = 1e-9);
        assert_eq!(production_from_vertices(&curve, 0.05).unwrap(), -100.0);
        assert_eq!(production_from_vertices(&curve, 0.2).unwrap(), 100.0);
        assert_eq!(production_from_vertices(&curve, 1.0).unwrap(), 100.0);
    }

    #[test]
    fn test_inelastic_production() {
        let curve = [Vertex::inelastic(-110.0, 0.0)];
        assert_eq!(production_from_vertices(&curve, 0.0).unwrap(), -110.0);
        assert_eq!(production_from_vertices(&curve, f64::INFINITY).unwrap(), -110.0);
    }

    #[test]
    fn test_vertical_step_takes_upper_power() {
        let curve = [Vertex::new(0.05, 0.0, 0.0), Vertex::new(0.05, 50.0, 1000.0)];
        assert_eq!(production_from_vertices(&curve, 0.05).unwrap(), 1000.0);
        assert_eq!(production_from_vertices(&curve, 0.05 - TIE_BREAK).unwrap(), 0.0);
    }

    #[test]
    fn test_empty_curve() {
        assert_eq!(production_from_vertices(&[], 0.1), Err(CurveError::Empty));
        assert_eq!(cost_from_vertices(&[], 1.0, 1.0), Err(CurveError::Empty));
        assert_eq!(marginal_price_from_vertices(1.0, &[]), Err(CurveError::Empty));
    }

    #[test]
    fn test_production_cost_integrates_price() {
        let curve = [
            Vertex::new(0.1, 1000.0, 0.0),
            Vertex::new(0.2, 1015.0, 100.0),
        ];
        assert_relative_eq!(cost_from_vertices(&curve, 50.0, 1.0).unwrap(), 1006.25, epsilon = 1e-9);
        // outside the curve the boundary costs apply
        assert_eq!(cost_from_vertices(&curve, 150.0, 1.0).unwrap(), 1015.0);
        assert_eq!(cost_from_vertices(&curve, -5.0, 1.0).unwrap(), 0.0);
    }

    #[test]
    fn test_marginal_price() {
        let curve = [
            Vertex::new(0.03, 0.0, 0.0),
            Vertex::new(0.23, 130.0, 1000.0),
        ];
        assert_relative_eq!(marginal_price_from_vertices(500.0, &curve).unwrap(), 0.13, epsilon = 1e-9);
        assert_eq!(marginal_price_from_vertices(-10.0, &curve).unwrap(), 0.03);
        assert_eq!(marginal_price_from_vertices(2000.0, &curve).unwrap(), 0.23);
    }

    #[test]
    fn test_marginal_price_on_vertical_step() {
        let curve = [
            Vertex::new(0.05, 0.0, 0.0),
            Vertex::new(0.08, 0.0, 100.0),
            Vertex::new(0.09, 0.0, 100.0),
            Vertex::new(0.10, 0.0, 200.0),
        ];
        // the step owns its power, not the segment ending at it
        assert_eq!(marginal_price_from_vertices(100.0, &curve).unwrap(), 0.09);
        assert_relative_eq!(marginal_price_from_vertices(50.0, &curve).unwrap(), 0.065, epsilon = 1e-12);
        assert_relative_eq!(marginal_price_from_vertices(150.0, &curve).unwrap(), 0.095, epsilon = 1e-12);
    }

    #[test]
    fn test_marginal_price_on_leading_step() {
        let curve = [
            Vertex::new(0.05, 0.0, 0.0),
            Vertex::new(0.07, 0.0, 0.0),
            Vertex::new(0.10, 0.0, 100.0),
        ];
        assert_eq!(marginal_price_from_vertices(0.0, &curve).unwrap(), 0.07);
        assert_eq!(marginal_price_from_vertices(-1.0, &curve).unwrap(), 0.05);
    }

    #[test]
    fn test_cost_at_power() {
        let curve = [
            Vertex::new(0.23, 130.0, -800.0),
            Vertex::new(0.03, 0.0, 200.0),
        ];
        assert_relative_eq!(cost_at_power(&curve, 0.0).unwrap(), 26.0, epsilon = 1e-9);
    }

    #[test]
    fn test_linear_cost_differs_from_integrated_cost() {
        let curve = [
            Vertex::new(0.1, 1000.0, 0.0),
            Vertex::new(0.2, 1015.0, 100.0),
        ];
        // interpolating the vertex costs, rather than integrating the price
        assert_relative_eq!(cost_at_power(&curve, 50.0).unwrap(), 1007.5, epsilon = 1e-9);
        assert_relative_eq!(cost_from_vertices(&curve, 50.0, 1.0).unwrap(), 1006.25, epsilon = 1e-9);
    }

    #[test]
    fn test_order_vertices() {
        let mut curve = vec![
            Vertex::new(0.2, 0.0, 100.0),
            Vertex::new(0.1, 0.0, 50.0),
            Vertex::new(0.1, 0.0, -50.0),
        ];
        order_vertices(&mut curve);
        let prices = curve.iter().map(|v| (v.marginal_price, v.power)).collect::<Vec<_>>();
        assert_eq!(prices, vec![(0.1, -50.0), (0.1, 50.0), (0.2, 100.0)]);
    }
}
