//! Frames exchanged with the presence server over the dashboard socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::geo::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "subscribe")]
    Subscribe {
        token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        viewer_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverStatus {
    pub driver_id: String,
    pub is_available: bool,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    pub last_updated_at: DateTime<Utc>,
}

impl DriverStatus {
    pub fn position(&self) -> Option<GeoPoint> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "snapshot")]
    Snapshot { drivers: Vec<DriverStatus> },
    #[serde(rename = "driver:online")]
    DriverOnline {
        driver_id: String,
        is_available: bool,
        #[serde(default)]
        lat: Option<f64>,
        #[serde(default)]
        lng: Option<f64>,
        at: DateTime<Utc>,
    },
    #[serde(rename = "driver:offline")]
    DriverOffline { driver_id: String },
    #[serde(rename = "driver:position:update")]
    DriverPositionUpdate {
        driver_id: String,
        lat: f64,
        lng: f64,
        at: DateTime<Utc>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

pub fn parse_server_event(text: &str) -> Result<ServerEvent, ClientError> {
    Ok(serde_json::from_str(text)?)
}

pub fn subscribe_frame(token: &str, viewer_id: Option<&str>) -> Result<String, ClientError> {
    let frame = ClientFrame::Subscribe {
        token: token.to_string(),
        viewer_id: viewer_id.map(str::to_string),
    };
    Ok(serde_json::to_string(&frame)?)
}
