use crate::{EntityState, Market, Schedulable, ScheduleError};
use tns_core::{
    models::{AssetConfig, Behavior, TimeInterval, Vertex},
    ports::{CurveSource, ProfileValue, ValueSource},
};

/// A resource or load local to a node: generation, storage or demand
pub struct LocalAsset {
    config: AssetConfig,
    state: EntityState,
    forecast: Option<Box<dyn ValueSource>>,
    curves: Option<Box<dyn CurveSource>>,
}

impl LocalAsset {
    /// Create an asset from its configuration.
    ///
    /// A configured hourly profile becomes the asset's power forecast.
    pub fn new(config: AssetConfig) -> Self {
        let forecast = (!config.profile.is_empty())
            .then(|| Box::new(ProfileValue::new(config.profile.clone())) as Box<dyn ValueSource>);
        Self {
            config,
            state: EntityState::default(),
            forecast,
            curves: None,
        }
    }

    /// Replace the power forecast used by inelastic behavior
    pub fn with_forecast(mut self, forecast: impl ValueSource + 'static) -> Self {
        self.forecast = Some(Box::new(forecast));
        self
    }

    /// Attach the external model used by external behavior
    pub fn with_curves(mut self, curves: impl CurveSource + 'static) -> Self {
        self.curves = Some(Box::new(curves));
        self
    }

    /// The asset's configuration
    pub fn config(&self) -> &AssetConfig {
        &self.config
    }
}

impl std::fmt::Debug for LocalAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAsset")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("forecast", &self.forecast.is_some())
            .field("curves", &self.curves.is_some())
            .finish()
    }
}

/// The curve an entity offers from its configuration alone.
///
/// Inelastic entities follow their forecast (else `default_power`), clamped to
/// the hard limits. Price-responsive entities use their explicit vertices, else
/// the quadratic cost model evaluated at the power limits.
pub(crate) fn base_vertices(
    config: &AssetConfig,
    forecast: Option<&dyn ValueSource>,
    interval: &TimeInterval,
) -> Vec<Vertex> {
    let hours = interval.duration_hours();
    match config.behavior {
        Behavior::Inelastic => {
            let power = forecast
                .and_then(|source| source.value_at(interval))
                .unwrap_or(config.default_power)
                .max(config.min_power)
                .min(config.max_power);
            vec![Vertex::inelastic(power, config.cost.cost(power) * hours)]
        }
        Behavior::PriceResponsive | Behavior::External => {
            if !config.vertices.is_empty() {
                return config.default_vertices();
            }
            [config.min_power, config.max_power]
                .into_iter()
                .filter(|power| power.is_finite())
                .map(|power| {
                    Vertex::new(
                        config.cost.marginal_price(power),
                        config.cost.cost(power) * hours,
                        power,
                    )
                })
                .collect()
        }
    }
}

impl Schedulable for LocalAsset {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn state(&self) -> &EntityState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EntityState {
        &mut self.state
    }

    fn hard_limits(&self) -> (f64, f64) {
        (self.config.min_power, self.config.max_power)
    }

    fn update_vertices(&mut self, market: &Market) -> Result<(), ScheduleError> {
        for interval in market.negotiable() {
            let external = match self.config.behavior {
                Behavior::External => self
                    .curves
                    .as_ref()
                    .and_then(|model| model.vertices_at(interval))
                    .filter(|vertices| !vertices.is_empty()),
                _ => None,
            };
            let vertices = external.unwrap_or_else(|| {
                base_vertices(&self.config, self.forecast.as_deref(), interval)
            });
            if vertices.is_empty() {
                return Err(ScheduleError::NoActiveVertices {
                    entity: self.config.name.clone(),
                    interval: interval.id(),
                });
            }
            self.state.vertices.insert(interval.id(), vertices);
        }
        Ok(())
    }
}
