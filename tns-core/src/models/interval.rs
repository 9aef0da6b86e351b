use crate::models::MarketConfig;
use std::time::Duration;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Identifies a time interval by its start time.
///
/// Intervals are owned by exactly one market; assets, neighbors and
/// transactive records refer to them through this key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct IntervalId(#[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))] OffsetDateTime);

impl IntervalId {
    /// The start time this id stands for
    pub fn start_time(&self) -> OffsetDateTime {
        self.0
    }
}

impl From<OffsetDateTime> for IntervalId {
    fn from(value: OffsetDateTime) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for IntervalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.format(&Rfc3339) {
            Ok(name) => f.write_str(&name),
            Err(_) => self.0.fmt(f),
        }
    }
}

/// The lifecycle of a time interval, in the order the states are visited
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum IntervalState {
    /// Created but not yet activated
    Inactive,
    /// Open for price discovery
    Exploring,
    /// The final stretch of price discovery before clearing
    Tender,
    /// Cleared; waiting for delivery to begin
    Transaction,
    /// Power is being delivered
    Delivery,
    /// Delivery has ended; results are retained for accounting
    Publish,
    /// No longer of interest and may be dropped
    Expired,
}

impl IntervalState {
    /// Whether prices for an interval in this state may still move
    pub fn is_negotiable(&self) -> bool {
        matches!(self, Self::Exploring | Self::Tender)
    }
}

/// A scheduling unit of a market's rolling horizon
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct TimeInterval {
    /// When the interval becomes visible to negotiation
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub activation_time: OffsetDateTime,
    /// When delivery begins
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub start_time: OffsetDateTime,
    /// How long delivery lasts
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub duration: Duration,
    /// When the interval's price is fixed
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub market_clearing_time: OffsetDateTime,
    /// How long before clearing the tender stretch begins
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub tender_window: Duration,
    /// How long after delivery the interval is retained
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub publish_window: Duration,
    state: IntervalState,
}

impl TimeInterval {
    /// Create an interval starting at `start_time`, laid out according to the market's configuration.
    ///
    /// The interval starts out `Inactive`; call [`TimeInterval::assign_state`] to evaluate it.
    pub fn new(
        activation_time: OffsetDateTime,
        start_time: OffsetDateTime,
        config: &MarketConfig,
    ) -> Self {
        Self {
            activation_time,
            start_time,
            duration: config.interval_duration,
            market_clearing_time: start_time - config.clearing_lead,
            tender_window: config.tender_window,
            publish_window: config.publish_window,
            state: IntervalState::Inactive,
        }
    }

    /// The key under which markets and entities store per-interval values
    pub fn id(&self) -> IntervalId {
        IntervalId(self.start_time)
    }

    /// The RFC 3339 name of the interval, as used on the wire
    pub fn name(&self) -> String {
        self.id().to_string()
    }

    /// When delivery ends
    pub fn end_time(&self) -> OffsetDateTime {
        self.start_time + self.duration
    }

    /// The delivery duration in hours
    pub fn duration_hours(&self) -> f64 {
        self.duration.as_secs_f64() / 3600.0
    }

    /// The most recently assigned state
    pub fn state(&self) -> IntervalState {
        self.state
    }

    /// The state the interval would be in at `now`
    pub fn state_at(&self, now: OffsetDateTime) -> IntervalState {
        let end = self.end_time();
        if now < self.activation_time {
            IntervalState::Inactive
        } else if now < self.market_clearing_time - self.tender_window {
            IntervalState::Exploring
        } else if now < self.market_clearing_time {
            IntervalState::Tender
        } else if now < self.start_time {
            IntervalState::Transaction
        } else if now < end {
            IntervalState::Delivery
        } else if now < end + self.publish_window {
            IntervalState::Publish
        } else {
            IntervalState::Expired
        }
    }

    /// Re-evaluate the state at `now`.
    ///
    /// States only move forward: a clock that steps backwards leaves the state unchanged.
    pub fn assign_state(&mut self, now: OffsetDateTime) -> IntervalState {
        self.state = self.state.max(self.state_at(now));
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn interval() -> TimeInterval {
        let config = MarketConfig {
            interval_duration: Duration::from_secs(3600),
            clearing_lead: Duration::from_secs(300),
            tender_window: Duration::from_secs(600),
            publish_window: Duration::from_secs(3600),
            ..Default::default()
        };
        TimeInterval::new(
            datetime!(2026-01-05 09:00 UTC),
            datetime!(2026-01-05 12:00 UTC),
            &config,
        )
    }

    #[test]
    fn test_state_boundaries() {
        let ti = interval();
        assert_eq!(ti.state_at(datetime!(2026-01-05 08:59 UTC)), IntervalState::Inactive);
        assert_eq!(ti.state_at(datetime!(2026-01-05 09:00 UTC)), IntervalState::Exploring);
        assert_eq!(ti.state_at(datetime!(2026-01-05 11:44 UTC)), IntervalState::Exploring);
        assert_eq!(ti.state_at(datetime!(2026-01-05 11:45 UTC)), IntervalState::Tender);
        assert_eq!(ti.state_at(datetime!(2026-01-05 11:55 UTC)), IntervalState::Transaction);
        assert_eq!(ti.state_at(datetime!(2026-01-05 12:00 UTC)), IntervalState::Delivery);
        assert_eq!(ti.state_at(datetime!(2026-01-05 13:00 UTC)), IntervalState::Publish);
        assert_eq!(ti.state_at(datetime!(2026-01-05 14:00 UTC)), IntervalState::Expired);
    }

    #[test]
    fn test_state_is_monotonic() {
        let mut ti = interval();
        assert_eq!(ti.assign_state(datetime!(2026-01-05 12:30 UTC)), IntervalState::Delivery);
        // a clock stepping backwards does not resurrect negotiation
        assert_eq!(ti.assign_state(datetime!(2026-01-05 10:00 UTC)), IntervalState::Delivery);
        assert!(!ti.state().is_negotiable());
    }

    #[test]
    fn test_name_is_rfc3339() {
        let ti = interval();
        assert_eq!(ti.name(), "2026-01-05T12:00:00Z");
        assert_eq!(ti.duration_hours(), 1.0);
    }
}
