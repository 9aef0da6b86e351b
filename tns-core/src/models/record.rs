use crate::models::{IntervalId, Vertex};
use time::OffsetDateTime;

/// One price/power/cost tuple exchanged between neighboring nodes.
///
/// Record 0 is the sender's current balance point for the interval; records
/// 1, 2, ... are the vertices of the sender's flexibility curve. Power is
/// expressed from the sender's side: positive means the sender imports from
/// the receiver.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct TransactiveRecord {
    /// The interval this record prices
    pub time_interval: IntervalId,
    /// The record number (0 for the balance point)
    pub record: u32,
    /// The marginal price
    pub marginal_price: f64,
    /// The power, from the sender's side
    pub power: f64,
    /// The production cost at this power
    pub cost: f64,
    /// When the record was prepared
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl TransactiveRecord {
    /// Build a record from a vertex
    pub fn new(
        time_interval: IntervalId,
        record: u32,
        vertex: &Vertex,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            time_interval,
            record,
            marginal_price: vertex.marginal_price,
            power: vertex.power,
            cost: vertex.cost,
            timestamp,
        }
    }

    /// Whether this is the balance-point record
    pub fn is_balance_point(&self) -> bool {
        self.record == 0
    }

    /// The record as a vertex, still from the sender's side
    pub fn vertex(&self) -> Vertex {
        Vertex::new(self.marginal_price, self.cost, self.power).with_record(self.record)
    }
}

/// The body of one signal sent to a neighbor
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct SignalPayload {
    /// The records for every negotiable interval
    pub curves: Vec<TransactiveRecord>,
    /// Whether this is the first signal of a new clearing cycle
    pub start_of_cycle: bool,
    /// Whether the sender's own market failed to converge
    pub fail_to_converge: bool,
}

/// The topic a node publishes signals for one neighbor on
pub fn signal_topic(from: &str, to: &str) -> String {
    format!("{from}/{to}")
}

/// Split a topic produced by [`signal_topic`] into its sender and receiver
pub fn parse_topic(topic: &str) -> Option<(&str, &str)> {
    topic
        .split_once('/')
        .filter(|(from, to)| !from.is_empty() && !to.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_wire_shape() {
        let record = TransactiveRecord::new(
            datetime!(2026-01-05 12:00 UTC).into(),
            0,
            &Vertex::new(0.13, 56.0, 300.0),
            datetime!(2026-01-05 11:02:30 UTC),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["timeInterval"], "2026-01-05T12:00:00Z");
        assert_eq!(json["record"], 0);
        assert_eq!(json["marginalPrice"], 0.13);
        assert_eq!(json["power"], 300.0);
        assert_eq!(json["cost"], 56.0);
        assert_eq!(json["timestamp"], "2026-01-05T11:02:30Z");

        let back: TransactiveRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_payload_shape() {
        let raw = r#"{
            "curves": [],
            "startOfCycle": true,
            "failToConverge": false
        }"#;
        let payload = serde_json::from_str::<SignalPayload>(raw).unwrap();
        assert!(payload.start_of_cycle);
        assert!(!payload.fail_to_converge);
    }

    #[test]
    fn test_topic() {
        let topic = signal_topic("campus", "city");
        assert_eq!(parse_topic(&topic), Some(("campus", "city")));
        assert_eq!(parse_topic("campus"), None);
        assert_eq!(parse_topic("/city"), None);
    }
}
