//! Dashboard-side model of the live fleet.
//!
//! `FleetView` consumes decoded server frames, keeps one animator per online
//! driver and produces the per-frame render list with overlaps resolved.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::animator::{AnimatorConfig, PositionAnimator};
use crate::decollision::{decollide, Marker};
use crate::error::ClientError;
use crate::eta::{Eta, EtaEstimator, RoutingProvider, VehicleClass, WeatherProvider};
use crate::geo::GeoPoint;
use crate::wire::{DriverStatus, ServerEvent};

#[derive(Debug, Clone)]
struct TrackedDriver {
    is_available: bool,
    animator: PositionAnimator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDriver {
    pub driver_id: String,
    pub is_available: bool,
    /// Interpolated position, used for ETA.
    pub position: GeoPoint,
    /// Position after de-collision, used for drawing.
    pub display_position: GeoPoint,
    pub heading: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct FleetView {
    config: AnimatorConfig,
    drivers: BTreeMap<String, TrackedDriver>,
}

impl FleetView {
    pub fn new(config: AnimatorConfig) -> Self {
        Self {
            config,
            drivers: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn contains(&self, driver_id: &str) -> bool {
        self.drivers.contains_key(driver_id)
    }

    /// Applies one server frame. An `error` frame is surfaced as
    /// [`ClientError::Rejected`] and leaves the view unchanged.
    pub fn apply(&mut self, event: ServerEvent, now_ms: i64) -> Result<(), ClientError> {
        match event {
            ServerEvent::Snapshot { drivers } => {
                let incoming: BTreeMap<String, DriverStatus> = drivers
                    .into_iter()
                    .map(|d| (d.driver_id.clone(), d))
                    .collect();
                self.drivers.retain(|id, _| incoming.contains_key(id));
                for (id, status) in incoming {
                    let position = status.position();
                    self.upsert(id, status.is_available, position, now_ms);
                }
                debug!("Snapshot applied, {} drivers online", self.drivers.len());
            }
            ServerEvent::DriverOnline {
                driver_id,
                is_available,
                lat,
                lng,
                ..
            } => {
                let position = match (lat, lng) {
                    (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
                    _ => None,
                };
                self.upsert(driver_id, is_available, position, now_ms);
            }
            ServerEvent::DriverOffline { driver_id } => {
                self.drivers.remove(&driver_id);
            }
            ServerEvent::DriverPositionUpdate {
                driver_id, lat, lng, ..
            } => match self.drivers.get_mut(&driver_id) {
                Some(driver) => {
                    driver.animator.observe(GeoPoint::new(lat, lng), now_ms);
                }
                None => {
                    debug!("Position update for untracked driver {}", driver_id);
                    self.upsert(driver_id, false, Some(GeoPoint::new(lat, lng)), now_ms);
                }
            },
            ServerEvent::Error { message } => {
                warn!("Server error: {}", message);
                return Err(ClientError::Rejected(message));
            }
        }
        Ok(())
    }

    pub fn set_destination(&mut self, driver_id: &str, destination: Option<GeoPoint>) -> bool {
        match self.drivers.get_mut(driver_id) {
            Some(driver) => {
                driver.animator.set_destination(destination);
                true
            }
            None => false,
        }
    }

    /// Drivers with a known position, in driver-id order.
    pub fn render(&self, now_ms: i64, zoom: f64, display_density: f64) -> Vec<RenderedDriver> {
        let visible: Vec<(&String, &TrackedDriver, GeoPoint)> = self
            .drivers
            .iter()
            .filter_map(|(id, d)| d.animator.current_render_position(now_ms).map(|p| (id, d, p)))
            .collect();

        let markers: Vec<Marker> = visible
            .iter()
            .map(|(id, _, position)| Marker::new(id.as_str(), *position))
            .collect();
        let placed = decollide(&markers, zoom, display_density);

        visible
            .into_iter()
            .zip(placed)
            .map(|((id, driver, position), placement)| RenderedDriver {
                driver_id: id.clone(),
                is_available: driver.is_available,
                position,
                display_position: placement.display_position,
                heading: driver.animator.current_heading(now_ms),
            })
            .collect()
    }

    /// ETA from where the marker currently is on screen, not from the last
    /// raw report. `None` when the driver is unknown or has no position yet.
    pub fn eta_for<R: RoutingProvider, W: WeatherProvider>(
        &self,
        driver_id: &str,
        destination: GeoPoint,
        vehicle: VehicleClass,
        estimator: &EtaEstimator<R, W>,
        now_ms: i64,
    ) -> Option<Eta> {
        let origin = self
            .drivers
            .get(driver_id)?
            .animator
            .current_render_position(now_ms)?;
        Some(estimator.estimate(origin, destination, vehicle))
    }

    fn upsert(&mut self, driver_id: String, is_available: bool, position: Option<GeoPoint>, now_ms: i64) {
        let config = self.config;
        let driver = self.drivers.entry(driver_id).or_insert_with(|| TrackedDriver {
            is_available,
            animator: PositionAnimator::new(config),
        });
        driver.is_available = is_available;
        if let Some(position) = position {
            driver.animator.observe(position, now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use chrono::Utc;

    use super::*;
    use crate::error::ProviderError;
    use crate::eta::{Directions, WeatherAdjustment};
    use crate::geo::haversine_distance;

    fn status(id: &str, lat: f64, lng: f64) -> DriverStatus {
        DriverStatus {
            driver_id: id.into(),
            is_available: true,
            lat: Some(lat),
            lng: Some(lng),
            last_updated_at: Utc::now(),
        }
    }

    fn moved(id: &str, lat: f64, lng: f64) -> ServerEvent {
        ServerEvent::DriverPositionUpdate {
            driver_id: id.into(),
            lat,
            lng,
            at: Utc::now(),
        }
    }

    #[test]
    fn snapshot_replaces_the_fleet() {
        let mut fleet = FleetView::default();
        fleet
            .apply(
                ServerEvent::Snapshot {
                    drivers: vec![status("a", 1.0, 1.0), status("b", 2.0, 2.0)],
                },
                0,
            )
            .unwrap();
        assert_eq!(fleet.len(), 2);

        fleet
            .apply(
                ServerEvent::Snapshot {
                    drivers: vec![status("b", 2.0, 2.0)],
                },
                10,
            )
            .unwrap();
        assert!(!fleet.contains("a"));
        assert!(fleet.contains("b"));
    }

    #[test]
    fn online_offline_lifecycle() {
        let mut fleet = FleetView::default();
        fleet
            .apply(
                ServerEvent::DriverOnline {
                    driver_id: "d1".into(),
                    is_available: false,
                    lat: None,
                    lng: None,
                    at: Utc::now(),
                },
                0,
            )
            .unwrap();
        assert!(fleet.contains("d1"));
        assert!(fleet.render(0, 15.0, 1.0).is_empty());

        fleet.apply(moved("d1", 5.36, -4.0083), 100).unwrap();
        let rendered = fleet.render(100, 15.0, 1.0);
        assert_eq!(rendered.len(), 1);
        assert!(!rendered[0].is_available);

        fleet
            .apply(
                ServerEvent::DriverOffline {
                    driver_id: "d1".into(),
                },
                200,
            )
            .unwrap();
        assert!(fleet.is_empty());
    }

    #[test]
    fn render_interpolates_between_reports() {
        let mut fleet = FleetView::new(AnimatorConfig { duration_ms: 1_000 });
        fleet
            .apply(
                ServerEvent::Snapshot {
                    drivers: vec![status("d1", 0.0, 0.0)],
                },
                0,
            )
            .unwrap();
        fleet.apply(moved("d1", 1.0, 0.0), 1_000).unwrap();

        let mid = &fleet.render(1_500, 12.0, 1.0)[0];
        assert!((mid.position.lat - 0.5).abs() < 1e-12);
        assert_eq!(mid.heading, Some(0.0));
        assert_eq!(fleet.render(2_000, 12.0, 1.0)[0].position, GeoPoint::new(1.0, 0.0));
    }

    #[test]
    fn overlapping_drivers_are_spread_apart() {
        let mut fleet = FleetView::default();
        fleet
            .apply(
                ServerEvent::Snapshot {
                    drivers: vec![
                        status("a", 5.36, -4.0083),
                        status("b", 5.36, -4.0083),
                        status("c", 5.36, -4.0083),
                    ],
                },
                0,
            )
            .unwrap();
        let rendered = fleet.render(0, 17.0, 2.0);
        assert_eq!(rendered.len(), 3);
        for r in &rendered {
            assert_eq!(r.position, GeoPoint::new(5.36, -4.0083));
            assert!(haversine_distance(r.position, r.display_position) > 0.0);
        }
        assert_ne!(rendered[0].display_position, rendered[1].display_position);
    }

    #[test]
    fn error_frames_are_reported() {
        let mut fleet = FleetView::default();
        let result = fleet.apply(
            ServerEvent::Error {
                message: "unknown token".into(),
            },
            0,
        );
        assert!(matches!(result, Err(ClientError::Rejected(m)) if m == "unknown token"));
    }

    struct RecordingRoute {
        origins: Rc<RefCell<Vec<GeoPoint>>>,
    }

    impl RoutingProvider for RecordingRoute {
        fn get_directions(&self, origin: GeoPoint, _: GeoPoint) -> Result<Directions, ProviderError> {
            self.origins.borrow_mut().push(origin);
            Ok(Directions {
                duration_seconds: 300.0,
                duration_typical_seconds: None,
                geometry: Vec::new(),
            })
        }
    }

    struct ClearSkies;

    impl WeatherProvider for ClearSkies {
        fn get_adjustment(&self, _: GeoPoint, _: VehicleClass) -> Result<WeatherAdjustment, ProviderError> {
            Ok(WeatherAdjustment::default())
        }
    }

    #[test]
    fn eta_starts_from_the_interpolated_position() {
        let mut fleet = FleetView::new(AnimatorConfig { duration_ms: 1_000 });
        fleet
            .apply(
                ServerEvent::Snapshot {
                    drivers: vec![status("d1", 0.0, 0.0)],
                },
                0,
            )
            .unwrap();
        fleet.apply(moved("d1", 0.02, 0.0), 0).unwrap();

        let origins = Rc::new(RefCell::new(Vec::new()));
        let estimator = EtaEstimator::new(
            RecordingRoute {
                origins: origins.clone(),
            },
            ClearSkies,
        );
        let eta = fleet
            .eta_for("d1", GeoPoint::new(0.5, 0.0), VehicleClass::Car, &estimator, 500)
            .unwrap();
        assert_eq!(eta.minutes(), Some(5));
        let origin = origins.borrow()[0];
        assert!((origin.lat - 0.01).abs() < 1e-12);

        assert!(fleet
            .eta_for("ghost", GeoPoint::new(0.5, 0.0), VehicleClass::Car, &estimator, 500)
            .is_none());
    }
}
