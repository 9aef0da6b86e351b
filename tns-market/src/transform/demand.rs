use tns_core::models::Vertex;

// Vertices at one power closer in price than this are merged
const PRICE_TOLERANCE: f64 = 1e-12;

/// Add the demand charge to every import above `threshold`.
///
/// Vertices above the threshold have `rate` added to their marginal price and
/// the charge accumulated into their cost. A curve crossing the threshold gets
/// a pair of vertices there, one at the uncharged price and one at the charged
/// price, so it stays continuous in power.
pub fn include_demand_charges(vertices: &mut Vec<Vertex>, threshold: f64, rate: f64, hours: f64) {
    shift_above_threshold(vertices, threshold, rate, hours);
}

/// Strip the demand charge from every import above `threshold`
pub fn remove_demand_charges(vertices: &mut Vec<Vertex>, threshold: f64, rate: f64, hours: f64) {
    shift_above_threshold(vertices, threshold, -rate, hours);
}

fn shift_above_threshold(vertices: &mut Vec<Vertex>, threshold: f64, delta: f64, hours: f64) {
    if delta == 0.0 || !threshold.is_finite() {
        return;
    }

    let shift = |vertex: &Vertex| Vertex {
        marginal_price: vertex.marginal_price + delta,
        cost: vertex.cost + delta * (vertex.power - threshold) * hours,
        ..*vertex
    };

    // An inelastic curve has no segment to split
    if let [vertex] = vertices.as_mut_slice() {
        if vertex.power > threshold {
            *vertex = shift(&*vertex);
        }
        return;
    }

    vertices.sort_by(Vertex::power_order);
    let spans = match (vertices.first(), vertices.last()) {
        (Some(first), Some(last)) => first.power <= threshold && threshold < last.power,
        _ => return,
    };

    let mut shifted = vertices
        .iter()
        .filter(|v| v.power < threshold)
        .copied()
        .collect::<Vec<_>>();

    let at_threshold = vertices
        .iter()
        .filter(|v| v.power == threshold)
        .collect::<Vec<_>>();
    if spans {
        // the price just below and just above the threshold
        let kink = match (at_threshold.first(), at_threshold.last()) {
            (Some(lower), Some(upper)) => {
                Some((lower.marginal_price, upper.marginal_price, upper.cost))
            }
            _ => crossing(vertices, threshold).map(|(price, cost)| (price, price, cost)),
        };
        if let Some((lower, upper, cost)) = kink {
            shifted.push(Vertex::new(lower, cost, threshold));
            shifted.push(Vertex::new(upper + delta, cost, threshold));
        }
    } else {
        shifted.extend(at_threshold.into_iter().copied());
    }

    shifted.extend(vertices.iter().filter(|v| v.power > threshold).map(shift));
    shifted.sort_by(Vertex::power_order);
    shifted.dedup_by(|a, b| {
        a.power == b.power && (a.marginal_price - b.marginal_price).abs() < PRICE_TOLERANCE
    });
    *vertices = shifted;
}

/// The price and cost where a segment strictly crosses `threshold`
fn crossing(vertices: &[Vertex], threshold: f64) -> Option<(f64, f64)> {
    vertices.windows(2).find_map(|pair| {
        let (lo, hi) = (&pair[0], &pair[1]);
        (lo.power < threshold && threshold < hi.power).then(|| {
            let fraction = (threshold - lo.power) / (hi.power - lo.power);
            (
                lo.marginal_price + fraction * (hi.marginal_price - lo.marginal_price),
                lo.cost + fraction * (hi.cost - lo.cost),
            )
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::marginal_price_from_vertices;
    use approx::assert_relative_eq;

    fn supply() -> Vec<Vertex> {
        vec![Vertex::new(0.05, 0.0, 0.0), Vertex::new(0.15, 100.0, 1000.0)]
    }

    #[test]
    fn test_include_splits_at_threshold() {
        let mut curve = supply();
        include_demand_charges(&mut curve, 400.0, 0.02, 1.0);

        assert_eq!(curve.len(), 4);
        assert_eq!(curve[1].power, 400.0);
        assert_relative_eq!(curve[1].marginal_price, 0.09, epsilon = 1e-12);
        assert_eq!(curve[2].power, 400.0);
        assert_relative_eq!(curve[2].marginal_price, 0.11, epsilon = 1e-12);
        assert_relative_eq!(curve[1].cost, 40.0, epsilon = 1e-9);
        assert_relative_eq!(curve[3].marginal_price, 0.17, epsilon = 1e-12);
        assert_relative_eq!(curve[3].cost, 112.0, epsilon = 1e-9);
    }

    #[test]
    fn test_charge_is_a_step_of_rate() {
        let mut curve = supply();
        include_demand_charges(&mut curve, 400.0, 0.02, 1.0);

        let below = marginal_price_from_vertices(400.0 - 1e-6, &curve).unwrap();
        let above = marginal_price_from_vertices(400.0 + 1e-6, &curve).unwrap();
        assert_relative_eq!(above - below, 0.02, epsilon = 1e-9);
    }

    #[test]
    fn test_remove_restores_curve() {
        let mut curve = supply();
        include_demand_charges(&mut curve, 400.0, 0.02, 1.0);
        remove_demand_charges(&mut curve, 400.0, 0.02, 1.0);

        // the original curve, with one collinear vertex left at the threshold
        assert_eq!(curve.len(), 3);
        for power in [0.0, 200.0, 400.0, 700.0, 1000.0] {
            assert_relative_eq!(
                marginal_price_from_vertices(power, &curve).unwrap(),
                marginal_price_from_vertices(power, &supply()).unwrap(),
                epsilon = 1e-12
            );
        }
        assert_relative_eq!(curve[2].cost, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_curve_below_threshold_is_untouched() {
        let mut curve = supply();
        include_demand_charges(&mut curve, 2000.0, 0.02, 1.0);
        assert_eq!(curve, supply());
    }

    #[test]
    fn test_inelastic_above_threshold() {
        let mut curve = vec![Vertex::new(0.1, 0.0, 500.0)];
        include_demand_charges(&mut curve, 400.0, 0.02, 2.0);
        assert_relative_eq!(curve[0].marginal_price, 0.12, epsilon = 1e-12);
        assert_relative_eq!(curve[0].cost, 4.0, epsilon = 1e-12);
        assert_eq!(curve[0].power, 500.0);
    }
}
