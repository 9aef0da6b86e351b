mod entity;
pub use entity::*;

use std::time::Duration;

/// The rule a market uses to move its trial prices between balancing iterations
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum SolverMethod {
    /// Step the price against the net power imbalance with a diminishing step size
    Subgradient,
    /// Interpolate the zero crossing of the aggregate system curve
    #[default]
    Interpolation,
}

/// The context a market clears in: its horizon, lifecycle windows and solver settings.
///
/// Every value is treated as immutable for the duration of a clearing cycle.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MarketConfig {
    /// The delivery duration of each interval
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_interval_duration", with = "humantime_serde")
    )]
    pub interval_duration: Duration,

    /// The number of future intervals kept in the rolling horizon
    #[cfg_attr(feature = "serde", serde(default = "default_horizon"))]
    pub horizon: usize,

    /// How long before its start an interval clears
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_clearing_lead", with = "humantime_serde")
    )]
    pub clearing_lead: Duration,

    /// The final stretch of exploration before clearing
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_tender_window", with = "humantime_serde")
    )]
    pub tender_window: Duration,

    /// How long a delivered interval is retained before it expires
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_publish_window", with = "humantime_serde")
    )]
    pub publish_window: Duration,

    /// The marginal price seeded into an interval that has no predecessor
    #[cfg_attr(feature = "serde", serde(default = "default_price"))]
    pub default_price: f64,

    /// The relative duality gap below which a balance is converged
    #[cfg_attr(feature = "serde", serde(default = "default_threshold"))]
    pub duality_gap_threshold: f64,

    /// The relative distance above which two signals are significantly different
    #[cfg_attr(feature = "serde", serde(default = "default_threshold"))]
    pub convergence_threshold: f64,

    /// The balancing iteration that forces convergence
    #[cfg_attr(feature = "serde", serde(default = "default_max_iterations"))]
    pub max_iterations: usize,

    /// The price update rule
    #[cfg_attr(feature = "serde", serde(default))]
    pub method: SolverMethod,

    /// The initial step size of the subgradient rule, in price units
    #[cfg_attr(feature = "serde", serde(default = "default_subgradient_step"))]
    pub subgradient_step: f64,
}

fn default_interval_duration() -> Duration {
    Duration::from_secs(3600)
}

fn default_horizon() -> usize {
    24
}

fn default_clearing_lead() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_tender_window() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_publish_window() -> Duration {
    Duration::from_secs(3600)
}

fn default_price() -> f64 {
    0.05
}

fn default_threshold() -> f64 {
    0.01
}

fn default_max_iterations() -> usize {
    100
}

fn default_subgradient_step() -> f64 {
    0.05
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            interval_duration: default_interval_duration(),
            horizon: default_horizon(),
            clearing_lead: default_clearing_lead(),
            tender_window: default_tender_window(),
            publish_window: default_publish_window(),
            default_price: default_price(),
            duality_gap_threshold: default_threshold(),
            convergence_threshold: default_threshold(),
            max_iterations: default_max_iterations(),
            method: SolverMethod::default(),
            subgradient_step: default_subgradient_step(),
        }
    }
}

impl MarketConfig {
    /// Check the configuration for values the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_duration.is_zero() {
            return Err(ConfigError::NonPositiveDuration);
        }
        if self.horizon == 0 {
            return Err(ConfigError::EmptyHorizon);
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::NoIterations);
        }
        if !self.default_price.is_finite() {
            return Err(ConfigError::InvalidParameter("default_price"));
        }
        for (name, value) in [
            ("duality_gap_threshold", self.duality_gap_threshold),
            ("convergence_threshold", self.convergence_threshold),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidParameter(name));
            }
        }
        if !(self.subgradient_step.is_finite() && self.subgradient_step > 0.0) {
            return Err(ConfigError::InvalidParameter("subgradient_step"));
        }
        Ok(())
    }
}

/// Errors that can occur when validating configuration
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Error when the interval duration is zero
    #[error("interval duration must be positive")]
    NonPositiveDuration,
    /// Error when the horizon holds no intervals
    #[error("market horizon must hold at least one interval")]
    EmptyHorizon,
    /// Error when the balancing loop would never run
    #[error("max_iterations must be at least 1")]
    NoIterations,
    /// Error when a numeric market parameter is out of range
    #[error("invalid value for {0}")]
    InvalidParameter(&'static str),
    /// Error when an entity has no name
    #[error("entities must be named")]
    EmptyName,
    /// Error when an entity's configuration contains NaN
    #[error("{0}: NaN value encountered")]
    NaN(String),
    /// Error when an entity's minimum power exceeds its maximum
    #[error("{0}: min_power exceeds max_power")]
    InvalidBounds(String),
    /// Error when a price-responsive entity can derive no curve
    #[error("{0}: price-responsive entities need vertices or finite power bounds")]
    UnboundedResponse(String),
    /// Error when a loss factor is negative or infinite
    #[error("{0}: loss factor must be finite and non-negative")]
    InvalidLossFactor(String),
    /// Error when demand-charge settings are out of range
    #[error("{0}: invalid demand charge settings")]
    InvalidDemandCharge(String),
    /// Error when two entities of one node share a name
    #[error("duplicate entity name {0}")]
    DuplicateName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(MarketConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_market() {
        let config = MarketConfig {
            horizon: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyHorizon));

        let config = MarketConfig {
            duality_gap_threshold: f64::NAN,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidParameter("duality_gap_threshold"))
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let raw = r#"{
            "interval_duration": "15m",
            "horizon": 4,
            "method": "subgradient"
        }"#;
        let config = serde_json::from_str::<MarketConfig>(raw).unwrap();
        assert_eq!(config.interval_duration, Duration::from_secs(900));
        assert_eq!(config.horizon, 4);
        assert_eq!(config.method, SolverMethod::Subgradient);
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.duality_gap_threshold, 0.01);
    }
}
