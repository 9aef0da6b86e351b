use super::ConfigError;
use crate::models::Vertex;
use std::time::Duration;

/// How an entity projects its flexibility onto the market
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum Behavior {
    /// A fixed (or forecast) power, regardless of price
    #[default]
    Inelastic,
    /// A curve derived from configured vertices or the quadratic cost model
    PriceResponsive,
    /// A curve supplied per interval by an external model
    External,
}

/// Production cost `a0 + a1·p + a2·p²` per hour of operation at power `p`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct QuadraticCost {
    /// Fixed cost
    pub a0: f64,
    /// Linear cost coefficient
    pub a1: f64,
    /// Quadratic cost coefficient
    pub a2: f64,
}

impl QuadraticCost {
    /// Hourly production cost at `power`
    pub fn cost(&self, power: f64) -> f64 {
        self.a0 + self.a1 * power + self.a2 * power * power
    }

    /// Marginal price at `power`
    pub fn marginal_price(&self, power: f64) -> f64 {
        self.a1 + 2.0 * self.a2 * power
    }
}

/// A configured curve point
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VertexPoint {
    /// The marginal price
    pub price: f64,
    /// The power
    pub power: f64,
    /// The production cost for one interval at this power
    #[cfg_attr(feature = "serde", serde(default))]
    pub cost: f64,
}

impl From<VertexPoint> for Vertex {
    fn from(value: VertexPoint) -> Self {
        Vertex::new(value.price, value.cost, value.power)
    }
}

/// Configuration of a local asset
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssetConfig {
    /// A name unique within the node
    pub name: String,

    /// How the asset responds to price
    #[cfg_attr(feature = "serde", serde(default))]
    pub behavior: Behavior,

    /// The quadratic production cost model
    #[cfg_attr(feature = "serde", serde(default))]
    pub cost: QuadraticCost,

    /// The hard lower power limit
    #[cfg_attr(feature = "serde", serde(default = "neg_infinity"))]
    pub min_power: f64,

    /// The hard upper power limit
    #[cfg_attr(feature = "serde", serde(default = "infinity"))]
    pub max_power: f64,

    /// The power scheduled when no forecast is available
    #[cfg_attr(feature = "serde", serde(default))]
    pub default_power: f64,

    /// Explicit default vertices (price-responsive and external behaviors)
    #[cfg_attr(feature = "serde", serde(default))]
    pub vertices: Vec<VertexPoint>,

    /// An hour-of-day forecast of power, cycled over the profile length
    #[cfg_attr(feature = "serde", serde(default))]
    pub profile: Vec<f64>,
}

fn neg_infinity() -> f64 {
    f64::NEG_INFINITY
}

fn infinity() -> f64 {
    f64::INFINITY
}

impl AssetConfig {
    /// An inelastic entity drawing or supplying a constant power
    pub fn inelastic(name: impl Into<String>, default_power: f64) -> Self {
        Self {
            name: name.into(),
            behavior: Behavior::Inelastic,
            cost: QuadraticCost::default(),
            min_power: f64::NEG_INFINITY,
            max_power: f64::INFINITY,
            default_power,
            vertices: Vec::new(),
            profile: Vec::new(),
        }
    }

    /// A price-responsive entity following the quadratic cost model between the power limits
    pub fn quadratic(
        name: impl Into<String>,
        cost: QuadraticCost,
        min_power: f64,
        max_power: f64,
    ) -> Self {
        Self {
            behavior: Behavior::PriceResponsive,
            cost,
            min_power,
            max_power,
            default_power: min_power,
            ..Self::inelastic(name, 0.0)
        }
    }

    /// A price-responsive entity following explicit vertices
    pub fn responsive(name: impl Into<String>, vertices: Vec<VertexPoint>) -> Self {
        Self {
            behavior: Behavior::PriceResponsive,
            vertices,
            ..Self::inelastic(name, 0.0)
        }
    }

    /// The configured vertices as curve vertices
    pub fn default_vertices(&self) -> Vec<Vertex> {
        self.vertices.iter().copied().map(Vertex::from).collect()
    }

    /// Check the configuration for values the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        let values = [
            self.cost.a0,
            self.cost.a1,
            self.cost.a2,
            self.min_power,
            self.max_power,
            self.default_power,
        ];
        let points = self
            .vertices
            .iter()
            .flat_map(|v| [v.price, v.power, v.cost]);
        if values
            .into_iter()
            .chain(points)
            .chain(self.profile.iter().copied())
            .any(f64::is_nan)
        {
            return Err(ConfigError::NaN(self.name.clone()));
        }
        if self.min_power > self.max_power {
            return Err(ConfigError::InvalidBounds(self.name.clone()));
        }
        if self.behavior == Behavior::PriceResponsive
            && self.vertices.is_empty()
            && !(self.min_power.is_finite() && self.max_power.is_finite())
        {
            return Err(ConfigError::UnboundedResponse(self.name.clone()));
        }
        Ok(())
    }
}

/// Configuration of a neighboring node, as modeled by this node.
///
/// Power is this node's import from the neighbor.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NeighborConfig {
    /// The curve model used until (or unless) the neighbor sends signals
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub entity: AssetConfig,

    /// Whether the neighbor negotiates through transactive signals
    #[cfg_attr(feature = "serde", serde(default))]
    pub transactive: bool,

    /// Fraction of power lost in transport at full (max_power) flow
    #[cfg_attr(feature = "serde", serde(default))]
    pub loss_factor: f64,

    /// Price adder for imports above the demand threshold
    #[cfg_attr(feature = "serde", serde(default))]
    pub demand_rate: f64,

    /// The initial peak-power threshold, if demand charges apply
    #[cfg_attr(feature = "serde", serde(default))]
    pub demand_threshold: Option<f64>,

    /// The fraction of the threshold kept at each calendar-month rollover
    #[cfg_attr(feature = "serde", serde(default = "default_threshold_coefficient"))]
    pub demand_threshold_coefficient: f64,

    /// How long to wait for a reply before re-sending the last signal
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_rerequest_after", with = "humantime_serde")
    )]
    pub rerequest_after: Duration,
}

fn default_threshold_coefficient() -> f64 {
    0.8
}

fn default_rerequest_after() -> Duration {
    Duration::from_secs(5 * 60)
}

impl NeighborConfig {
    /// Wrap an entity model with neutral neighbor settings
    pub fn new(entity: AssetConfig, transactive: bool) -> Self {
        Self {
            entity,
            transactive,
            loss_factor: 0.0,
            demand_rate: 0.0,
            demand_threshold: None,
            demand_threshold_coefficient: default_threshold_coefficient(),
            rerequest_after: default_rerequest_after(),
        }
    }

    /// Check the configuration for values the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.entity.validate()?;
        let name = &self.entity.name;
        if !(self.loss_factor.is_finite() && self.loss_factor >= 0.0) {
            return Err(ConfigError::InvalidLossFactor(name.clone()));
        }
        let threshold_ok = self.demand_threshold.is_none_or(|t| !t.is_nan());
        let coefficient_ok =
            self.demand_threshold_coefficient > 0.0 && self.demand_threshold_coefficient <= 1.0;
        if !(self.demand_rate.is_finite() && self.demand_rate >= 0.0)
            || !threshold_ok
            || !coefficient_ok
        {
            return Err(ConfigError::InvalidDemandCharge(name.clone()));
        }
        Ok(())
    }
}
