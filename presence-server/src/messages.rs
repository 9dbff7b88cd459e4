use chrono::{DateTime, Utc};
use hyper_tungstenite::tungstenite::Message;
use serde::{Deserialize, Serialize};

use crate::state::presence::{DriverId, PresenceRecord};
use crate::state::subscribers::ViewerId;

// ============================================
// Viewer -> server
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// First frame on every dashboard socket. `viewer_id` is only checked
    /// against the identity derived from `token`, never trusted on its own.
    #[serde(rename = "subscribe")]
    Subscribe {
        token: String,
        #[serde(default)]
        viewer_id: Option<ViewerId>,
    },
}

// ============================================
// Server -> viewer
// ============================================

/// A transition detected between two broadcaster ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    #[serde(rename = "driver:online")]
    DriverOnline {
        driver_id: DriverId,
        is_available: bool,
        #[serde(default)]
        lat: Option<f64>,
        #[serde(default)]
        lng: Option<f64>,
        at: DateTime<Utc>,
    },
    #[serde(rename = "driver:offline")]
    DriverOffline { driver_id: DriverId },
    #[serde(rename = "driver:position:update")]
    DriverPositionUpdate {
        driver_id: DriverId,
        lat: f64,
        lng: f64,
        at: DateTime<Utc>,
    },
}

impl ChangeEvent {
    pub fn driver_id(&self) -> &str {
        match self {
            ChangeEvent::DriverOnline { driver_id, .. }
            | ChangeEvent::DriverOffline { driver_id }
            | ChangeEvent::DriverPositionUpdate { driver_id, .. } => driver_id,
        }
    }

    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        serde_json::to_string(self).map(Message::Text)
    }
}

/// Control frames that are not change events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Bootstrap sent once per connection right after it subscribes.
    #[serde(rename = "snapshot")]
    Snapshot { drivers: Vec<DriverStatus> },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        serde_json::to_string(self).map(Message::Text)
    }
}

/// Public view of one online driver, used by the bootstrap snapshot and
/// `GET /api/drivers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverStatus {
    pub driver_id: DriverId,
    pub is_available: bool,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    pub last_updated_at: DateTime<Utc>,
}

impl From<&PresenceRecord> for DriverStatus {
    fn from(record: &PresenceRecord) -> Self {
        Self {
            driver_id: record.driver_id.clone(),
            is_available: record.is_available,
            lat: record.latitude,
            lng: record.longitude,
            last_updated_at: record.last_updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_events_use_colon_separated_wire_names() {
        let at = Utc::now();
        let online = ChangeEvent::DriverOnline {
            driver_id: "d1".into(),
            is_available: true,
            lat: Some(5.36),
            lng: Some(-4.0083),
            at,
        };
        let json: serde_json::Value = serde_json::to_value(&online).unwrap();
        assert_eq!(json["type"], "driver:online");
        assert_eq!(json["driver_id"], "d1");
        assert_eq!(json["lat"], 5.36);

        let offline = ChangeEvent::DriverOffline {
            driver_id: "d1".into(),
        };
        let json = serde_json::to_value(&offline).unwrap();
        assert_eq!(json["type"], "driver:offline");

        let moved = ChangeEvent::DriverPositionUpdate {
            driver_id: "d1".into(),
            lat: 1.0,
            lng: 2.0,
            at,
        };
        let json = serde_json::to_value(&moved).unwrap();
        assert_eq!(json["type"], "driver:position:update");
    }

    #[test]
    fn subscribe_viewer_id_is_optional() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","token":"abc"}"#).unwrap();
        match msg {
            ClientMessage::Subscribe { token, viewer_id } => {
                assert_eq!(token, "abc");
                assert!(viewer_id.is_none());
            }
        }
    }
}
