use std::cmp::Ordering;

/// A point on a piecewise-linear supply/demand curve.
///
/// Each vertex consists of:
/// - A marginal price (value of the next unit of power at this point)
/// - A power (signed; generation and imports are positive, consumption negative)
/// - A cumulative production cost at this power for one time interval
///
/// A curve made of a single vertex is inelastic: its power does not respond
/// to price, and by convention its marginal price is `f64::INFINITY`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct Vertex {
    /// The marginal price coordinate
    pub marginal_price: f64,
    /// The power coordinate
    pub power: f64,
    /// The production cost accumulated up to this power
    pub cost: f64,
    /// The transactive record number this vertex was received as, if any
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub record: Option<u32>,
}

impl Vertex {
    /// Create a vertex that did not originate from a transactive record
    pub fn new(marginal_price: f64, cost: f64, power: f64) -> Self {
        Self {
            marginal_price,
            power,
            cost,
            record: None,
        }
    }

    /// Create the lone vertex of a price-independent curve
    pub fn inelastic(power: f64, cost: f64) -> Self {
        Self::new(f64::INFINITY, cost, power)
    }

    /// Tag the vertex with a transactive record number
    pub fn with_record(self, record: u32) -> Self {
        Self {
            record: Some(record),
            ..self
        }
    }

    /// Whether this vertex carries no price information
    pub fn is_inelastic(&self) -> bool {
        self.marginal_price.is_infinite()
    }

    /// Total order on (marginal price, power), used to lay curves out along the price axis
    pub fn price_order(&self, other: &Self) -> Ordering {
        self.marginal_price
            .total_cmp(&other.marginal_price)
            .then_with(|| self.power.total_cmp(&other.power))
    }

    /// Total order on (power, marginal price), used to lay curves out along the power axis
    pub fn power_order(&self, other: &Self) -> Ordering {
        self.power
            .total_cmp(&other.power)
            .then_with(|| self.marginal_price.total_cmp(&other.marginal_price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_order_breaks_ties_by_power() {
        let a = Vertex::new(0.1, 0.0, 50.0);
        let b = Vertex::new(0.1, 0.0, -50.0);
        let c = Vertex::new(0.05, 0.0, 100.0);

        let mut v = vec![a, b, c];
        v.sort_by(Vertex::price_order);
        assert_eq!(v, vec![c, b, a]);
    }

    #[test]
    fn test_inelastic() {
        let v = Vertex::inelastic(-110.0, 0.0);
        assert!(v.is_inelastic());
        assert_eq!(v.power, -110.0);
        assert!(!Vertex::new(0.1, 0.0, 1.0).is_inelastic());
    }

    #[test]
    fn test_wire_names() {
        let v = Vertex::new(0.1, 2.0, 3.0).with_record(1);
        let json = serde_json::to_value(v).unwrap();
        assert_eq!(json["marginalPrice"], 0.1);
        assert_eq!(json["power"], 3.0);
        assert_eq!(json["cost"], 2.0);
        assert_eq!(json["record"], 1);
    }
}
