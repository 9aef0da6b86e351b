use crate::models::{TimeInterval, Vertex};
use time::OffsetDateTime;

/// An externally maintained per-interval scalar, such as a load forecast or metered demand.
///
/// `None` means no value is available; callers fall back to a configured constant.
pub trait ValueSource {
    /// The value for `interval`, if known
    fn value_at(&self, interval: &TimeInterval) -> Option<f64>;
}

impl<F: Fn(&TimeInterval) -> Option<f64>> ValueSource for F {
    fn value_at(&self, interval: &TimeInterval) -> Option<f64> {
        self(interval)
    }
}

/// The same value for every interval
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantValue(pub f64);

impl ValueSource for ConstantValue {
    fn value_at(&self, _interval: &TimeInterval) -> Option<f64> {
        Some(self.0)
    }
}

/// A daily profile indexed by the hour of the interval's start time.
///
/// A profile shorter than 24 entries repeats; an empty profile yields nothing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProfileValue {
    hourly: Vec<f64>,
}

impl ProfileValue {
    /// Wrap an hour-of-day profile
    pub fn new(hourly: Vec<f64>) -> Self {
        Self { hourly }
    }

    fn at(&self, time: OffsetDateTime) -> Option<f64> {
        if self.hourly.is_empty() {
            return None;
        }
        let hour = usize::from(time.hour()) % self.hourly.len();
        self.hourly.get(hour).copied()
    }
}

impl ValueSource for ProfileValue {
    fn value_at(&self, interval: &TimeInterval) -> Option<f64> {
        self.at(interval.start_time)
    }
}

/// Supplies an entity's curve per interval from an external model (a building
/// simulation, for example).
pub trait CurveSource {
    /// The vertices for `interval`, if the model has produced any
    fn vertices_at(&self, interval: &TimeInterval) -> Option<Vec<Vertex>>;
}

impl<F: Fn(&TimeInterval) -> Option<Vec<Vertex>>> CurveSource for F {
    fn vertices_at(&self, interval: &TimeInterval) -> Option<Vec<Vertex>> {
        self(interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketConfig;
    use time::macros::datetime;

    #[test]
    fn test_profile_value() {
        let profile = ProfileValue::new(vec![1.0, 2.0, 3.0]);
        let config = MarketConfig::default();
        let at = |start| TimeInterval::new(start, start, &config);

        assert_eq!(profile.value_at(&at(datetime!(2026-01-05 00:00 UTC))), Some(1.0));
        assert_eq!(profile.value_at(&at(datetime!(2026-01-05 04:00 UTC))), Some(2.0));
        assert_eq!(ProfileValue::default().value_at(&at(datetime!(2026-01-05 04:00 UTC))), None);
    }

    #[test]
    fn test_closure_source() {
        let source = |ti: &TimeInterval| (ti.start_time.hour() > 12).then_some(5.0);
        let config = MarketConfig::default();
        let start = datetime!(2026-01-05 13:00 UTC);
        assert_eq!(source.value_at(&TimeInterval::new(start, start, &config)), Some(5.0));
    }
}
