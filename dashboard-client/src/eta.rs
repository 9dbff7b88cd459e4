//! Arrival estimates adjusted for traffic and weather.
//!
//! The base duration comes from a routing provider; this module only applies
//! the weather adjustment and always rounds up. Provider outages degrade the
//! estimate instead of failing the render.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::geo::{haversine_distance, GeoPoint};

/// Distance under which a driver counts as arrived.
pub const ARRIVAL_EPSILON_METERS: f64 = 25.0;

// Float noise tolerated before `ceil`, in ulps of the adjusted value. Covers
// 10.0 * 1.1 = 11.000000000000002 without hiding a real overshoot.
const ROUNDING_ULPS: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Motorcycle,
    Car,
    Van,
    Truck,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Directions {
    pub duration_seconds: f64,
    /// Duration under typical traffic, when the provider knows it.
    pub duration_typical_seconds: Option<f64>,
    pub geometry: Vec<GeoPoint>,
}

impl Directions {
    pub fn traffic_ratio(&self) -> Option<f64> {
        match self.duration_typical_seconds {
            Some(typical) if typical > 0.0 && self.duration_seconds.is_finite() => {
                Some(self.duration_seconds / typical)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherAdjustment {
    pub multiplier: f64,
    pub delay_minutes: f64,
    #[serde(default)]
    pub alert: Option<String>,
}

impl Default for WeatherAdjustment {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            delay_minutes: 0.0,
            alert: None,
        }
    }
}

impl WeatherAdjustment {
    /// Weather can only slow a driver down: multipliers below 1 and negative
    /// delays are clamped, non-finite values fall back to neutral.
    pub fn sanitized(&self) -> Self {
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let delay_minutes = if self.delay_minutes.is_finite() {
            self.delay_minutes.max(0.0)
        } else {
            0.0
        };
        Self {
            multiplier,
            delay_minutes,
            alert: self.alert.clone(),
        }
    }
}

pub trait RoutingProvider {
    fn get_directions(&self, origin: GeoPoint, destination: GeoPoint) -> Result<Directions, ProviderError>;
}

pub trait WeatherProvider {
    fn get_adjustment(&self, at: GeoPoint, vehicle: VehicleClass) -> Result<WeatherAdjustment, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficLevel {
    Unknown,
    Light,
    Moderate,
    Heavy,
}

impl TrafficLevel {
    pub fn from_ratio(ratio: Option<f64>) -> Self {
        match ratio {
            Some(r) if r.is_finite() && r < 1.1 => TrafficLevel::Light,
            Some(r) if r.is_finite() && r < 1.4 => TrafficLevel::Moderate,
            Some(r) if r.is_finite() => TrafficLevel::Heavy,
            _ => TrafficLevel::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Eta {
    /// Current position is within [`ARRIVAL_EPSILON_METERS`] of the destination.
    Arrived,
    Estimate {
        eta_minutes: u32,
        formatted: String,
        traffic: TrafficLevel,
        weather_alert: Option<String>,
    },
    /// The routing provider could not supply a base duration.
    Unavailable,
}

impl Eta {
    pub fn formatted(&self) -> &str {
        match self {
            Eta::Arrived => "Arrived",
            Eta::Estimate { formatted, .. } => formatted,
            Eta::Unavailable => "--",
        }
    }

    pub fn minutes(&self) -> Option<u32> {
        match self {
            Eta::Estimate { eta_minutes, .. } => Some(*eta_minutes),
            _ => None,
        }
    }
}

pub fn has_arrived(position: GeoPoint, destination: GeoPoint) -> bool {
    haversine_distance(position, destination) <= ARRIVAL_EPSILON_METERS
}

/// `ceil(base × multiplier + delay)`, never below one minute.
pub fn adjusted_minutes(base_minutes: f64, weather: &WeatherAdjustment) -> u32 {
    let weather = weather.sanitized();
    let base = if base_minutes.is_finite() { base_minutes.max(0.0) } else { 0.0 };
    let adjusted = base * weather.multiplier + weather.delay_minutes;
    let slack = adjusted.abs() * ROUNDING_ULPS * f64::EPSILON;
    let rounded = (adjusted - slack).ceil();
    rounded.clamp(1.0, u32::MAX as f64) as u32
}

pub fn format_eta(minutes: u32) -> String {
    if minutes < 60 {
        format!("{minutes} min")
    } else {
        format!("{} h {:02} min", minutes / 60, minutes % 60)
    }
}

/// Pure adjustment step behind [`EtaEstimator::estimate`], which resolves the
/// vehicle class into a weather adjustment before calling this.
/// `traffic_ratio` only labels the result; the base duration is expected to
/// already include live traffic.
pub fn estimate(
    origin: GeoPoint,
    destination: GeoPoint,
    base_minutes: f64,
    traffic_ratio: Option<f64>,
    weather: Option<&WeatherAdjustment>,
) -> Eta {
    if has_arrived(origin, destination) {
        return Eta::Arrived;
    }
    let neutral = WeatherAdjustment::default();
    let weather = weather.unwrap_or(&neutral);
    let eta_minutes = adjusted_minutes(base_minutes, weather);
    Eta::Estimate {
        eta_minutes,
        formatted: format_eta(eta_minutes),
        traffic: TrafficLevel::from_ratio(traffic_ratio),
        weather_alert: weather.alert.clone(),
    }
}

pub struct EtaEstimator<R, W> {
    routing: R,
    weather: W,
}

impl<R: RoutingProvider, W: WeatherProvider> EtaEstimator<R, W> {
    pub fn new(routing: R, weather: W) -> Self {
        Self { routing, weather }
    }

    /// `origin` should be the animator's interpolated position, not the last
    /// raw report.
    pub fn estimate(&self, origin: GeoPoint, destination: GeoPoint, vehicle: VehicleClass) -> Eta {
        if has_arrived(origin, destination) {
            return Eta::Arrived;
        }

        let directions = match self.routing.get_directions(origin, destination) {
            Ok(directions) => directions,
            Err(e) => {
                warn!("Routing provider unavailable: {}", e);
                return Eta::Unavailable;
            }
        };

        let weather = match self.weather.get_adjustment(origin, vehicle) {
            Ok(adjustment) => adjustment,
            Err(e) => {
                warn!("Weather provider unavailable, using unadjusted ETA: {}", e);
                WeatherAdjustment::default()
            }
        };

        estimate(
            origin,
            destination,
            directions.duration_seconds / 60.0,
            directions.traffic_ratio(),
            Some(&weather),
        )
    }
}
