//! Client-side half of the live driver map.
//!
//! Server frames are decoded in [`wire`], applied to a [`FleetView`], and each
//! render pass asks the view for smoothed, de-collided marker positions. ETAs
//! are computed from the interpolated position through caller-supplied routing
//! and weather providers.

pub mod animator;
pub mod decollision;
pub mod error;
pub mod eta;
pub mod fleet;
pub mod geo;
pub mod wire;

pub use animator::{AnimatedPositionState, AnimatorConfig, PositionAnimator};
pub use decollision::{decollide, Marker, PlacedMarker};
pub use error::{ClientError, ProviderError};
pub use eta::{Eta, EtaEstimator, RoutingProvider, TrafficLevel, VehicleClass, WeatherAdjustment, WeatherProvider};
pub use fleet::{FleetView, RenderedDriver};
pub use crate::geo::GeoPoint;
pub use wire::{parse_server_event, subscribe_frame, ServerEvent};
