use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::ReportError;

pub type DriverId = String;

/// Latest known state for one driver. No history is kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceRecord {
    pub driver_id: DriverId,
    pub is_online: bool,
    /// Never true while `is_online` is false.
    pub is_available: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub last_updated_at: DateTime<Utc>,
}

impl PresenceRecord {
    fn new(driver_id: DriverId, now: DateTime<Utc>) -> Self {
        Self {
            driver_id,
            is_online: false,
            is_available: false,
            latitude: None,
            longitude: None,
            last_updated_at: now,
        }
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }

    fn go_offline(&mut self) {
        self.is_online = false;
        self.is_available = false;
    }
}

/// Body of `POST /api/drivers/{id}/presence`. Absent fields leave the stored
/// value unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceReport {
    pub is_online: bool,
    #[serde(default)]
    pub is_available: Option<bool>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
}

impl PresenceReport {
    pub fn online_at(lat: f64, lng: f64) -> Self {
        Self {
            is_online: true,
            is_available: Some(true),
            lat: Some(lat),
            lng: Some(lng),
        }
    }

    pub fn offline() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<Option<(f64, f64)>, ReportError> {
        match (self.lat, self.lng) {
            (None, None) => Ok(None),
            (Some(lat), Some(lng)) => {
                if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                    return Err(ReportError::InvalidLatitude(lat));
                }
                if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
                    return Err(ReportError::InvalidLongitude(lng));
                }
                Ok(Some((lat, lng)))
            }
            _ => Err(ReportError::IncompleteCoordinates),
        }
    }
}

/// Immutable copy of every record taken at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceSnapshot {
    records: BTreeMap<DriverId, PresenceRecord>,
}

impl PresenceSnapshot {
    pub fn get(&self, driver_id: &str) -> Option<&PresenceRecord> {
        self.records.get(driver_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PresenceRecord> {
        self.records.values()
    }

    pub fn online(&self) -> impl Iterator<Item = &PresenceRecord> {
        self.records.values().filter(|r| r.is_online)
    }

    pub fn is_online(&self, driver_id: &str) -> bool {
        self.get(driver_id).map_or(false, |r| r.is_online)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<PresenceRecord> for PresenceSnapshot {
    fn from_iter<I: IntoIterator<Item = PresenceRecord>>(iter: I) -> Self {
        Self {
            records: iter
                .into_iter()
                .map(|r| (r.driver_id.clone(), r))
                .collect(),
        }
    }
}

/// The single shared-mutable map of the subsystem. Every read and write goes
/// through the one mutex.
pub struct PresenceStore {
    records: Mutex<HashMap<DriverId, PresenceRecord>>,
    offline_grace: Duration,
}

impl PresenceStore {
    pub fn new(offline_grace: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            offline_grace,
        }
    }

    pub async fn report(&self, driver_id: &str, report: PresenceReport) -> Result<(), ReportError> {
        self.report_at(driver_id, report, Utc::now()).await
    }

    pub async fn report_at(
        &self,
        driver_id: &str,
        report: PresenceReport,
        now: DateTime<Utc>,
    ) -> Result<(), ReportError> {
        let driver_id = driver_id.trim();
        if driver_id.is_empty() {
            return Err(ReportError::MissingDriverId);
        }
        let position = report.validate()?;

        let mut records = self.records.lock().await;
        let record = records
            .entry(driver_id.to_string())
            .or_insert_with(|| PresenceRecord::new(driver_id.to_string(), now));

        let was_online = record.is_online;
        record.is_online = report.is_online;
        if let Some(available) = report.is_available {
            record.is_available = available;
        }
        if !record.is_online {
            record.go_offline();
        }
        if let Some((lat, lng)) = position {
            record.latitude = Some(lat);
            record.longitude = Some(lng);
        }
        record.last_updated_at = now;

        if was_online != record.is_online {
            info!(
                "Driver {} reported {}",
                driver_id,
                if record.is_online { "online" } else { "offline" }
            );
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> PresenceSnapshot {
        self.snapshot_at(Utc::now()).await
    }

    /// Offline records past the grace window are left out even if the reaper
    /// has not purged them yet.
    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> PresenceSnapshot {
        let records = self.records.lock().await;
        records
            .values()
            .filter(|r| r.is_online || now - r.last_updated_at <= self.offline_grace)
            .cloned()
            .collect()
    }

    pub async fn online_drivers(&self) -> Vec<PresenceRecord> {
        let records = self.records.lock().await;
        let mut online: Vec<PresenceRecord> =
            records.values().filter(|r| r.is_online).cloned().collect();
        online.sort_by(|a, b| a.driver_id.cmp(&b.driver_id));
        online
    }

    /// Forces every online record idle for longer than `threshold` offline.
    /// Returns the affected driver ids.
    pub async fn mark_stale_offline(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<DriverId> {
        let mut records = self.records.lock().await;
        let mut evicted = Vec::new();
        for record in records.values_mut() {
            if record.is_online && now - record.last_updated_at > threshold {
                record.go_offline();
                evicted.push(record.driver_id.clone());
            }
        }
        evicted.sort();
        evicted
    }

    /// Drops offline records older than the grace window. Returns how many were removed.
    pub async fn purge_offline(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, r| r.is_online || now - r.last_updated_at <= self.offline_grace);
        let purged = before - records.len();
        if purged > 0 {
            debug!("Purged {} offline presence records", purged);
        }
        purged
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[cfg(test)]
impl PresenceStore {
    async fn get(&self, driver_id: &str) -> Option<PresenceRecord> {
        self.records.lock().await.get(driver_id).cloned()
    }
}
