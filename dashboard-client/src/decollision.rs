//! Spreads markers that share a coordinate onto a ring around their centroid.

use crate::geo::{centroid, destination_point, GeoPoint};

/// Coordinates closer than this (in degrees, per axis) are treated as identical.
pub const COINCIDENT_TOLERANCE_DEG: f64 = 1e-6;

/// Desired on-screen gap between a group's centroid and each member, in CSS
/// pixels at a display density of 1.
pub const MARKER_SPACING_PX: f64 = 24.0;

// Web Mercator ground resolution at the equator for zoom 0, 256 px tiles.
const METERS_PER_PIXEL_Z0: f64 = 156_543.033_92;

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: String,
    pub position: GeoPoint,
}

impl Marker {
    pub fn new(id: impl Into<String>, position: GeoPoint) -> Self {
        Self {
            id: id.into(),
            position,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedMarker {
    pub id: String,
    /// Where the driver actually is.
    pub position: GeoPoint,
    /// Where the marker should be drawn.
    pub display_position: GeoPoint,
    pub group_size: usize,
    /// Bearing from the group centroid, for grouped markers only.
    pub offset_bearing: Option<f64>,
}

pub fn meters_per_pixel(latitude: f64, zoom: f64) -> f64 {
    METERS_PER_PIXEL_Z0 * latitude.to_radians().cos().abs() / 2f64.powf(zoom)
}

/// Ring radius in metres. Halves with every zoom level in.
pub fn separation_radius_m(latitude: f64, zoom: f64, display_density: f64) -> f64 {
    let density = if display_density.is_finite() && display_density > 0.0 {
        display_density
    } else {
        1.0
    };
    MARKER_SPACING_PX * density * meters_per_pixel(latitude, zoom)
}

/// Returns one placement per input marker, in input order. Markers alone at
/// their coordinate are passed through untouched.
pub fn decollide(markers: &[Marker], zoom: f64, display_density: f64) -> Vec<PlacedMarker> {
    let groups = group_coincident(markers);
    let mut placed: Vec<Option<PlacedMarker>> = vec![None; markers.len()];

    for members in groups {
        let n = members.len();
        if n == 1 {
            let marker = &markers[members[0]];
            placed[members[0]] = Some(PlacedMarker {
                id: marker.id.clone(),
                position: marker.position,
                display_position: marker.position,
                group_size: 1,
                offset_bearing: None,
            });
            continue;
        }

        let points: Vec<GeoPoint> = members.iter().map(|&i| markers[i].position).collect();
        let Some(center) = centroid(&points) else {
            continue;
        };
        let radius = separation_radius_m(center.lat, zoom, display_density);

        for (index, &i) in members.iter().enumerate() {
            let bearing = 360.0 * index as f64 / n as f64;
            placed[i] = Some(PlacedMarker {
                id: markers[i].id.clone(),
                position: markers[i].position,
                display_position: destination_point(center, bearing, radius),
                group_size: n,
                offset_bearing: Some(bearing),
            });
        }
    }

    placed.into_iter().flatten().collect()
}

/// Groups marker indices whose coordinates match a group's first member
/// within [`COINCIDENT_TOLERANCE_DEG`].
fn group_coincident(markers: &[Marker]) -> Vec<Vec<usize>> {
    let mut groups: Vec<(GeoPoint, Vec<usize>)> = Vec::new();
    for (i, marker) in markers.iter().enumerate() {
        let p = marker.position;
        match groups.iter_mut().find(|(anchor, _)| {
            (anchor.lat - p.lat).abs() <= COINCIDENT_TOLERANCE_DEG
                && (anchor.lng - p.lng).abs() <= COINCIDENT_TOLERANCE_DEG
        }) {
            Some((_, members)) => members.push(i),
            None => groups.push((p, vec![i])),
        }
    }
    groups.into_iter().map(|(_, members)| members).collect()
}
