//! Fixed-cadence change detection over the presence store.
//!
//! Each tick asks the subscriber registry to copy the store, diff the copy
//! against the previous tick's copy and fan the resulting events out.
//! Transitions that happen between two ticks are only observed at their
//! latest state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::messages::ChangeEvent;
use crate::state::presence::PresenceSnapshot;
use crate::state::subscribers::SubscriberRegistry;

/// Classifies every transition between two snapshots.
///
/// Position changes use exact float equality. An online record without
/// coordinates still produces `DriverOnline` but never a position update.
pub fn diff(previous: &PresenceSnapshot, current: &PresenceSnapshot) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    for record in current.online() {
        match previous.get(&record.driver_id).filter(|p| p.is_online) {
            None => events.push(ChangeEvent::DriverOnline {
                driver_id: record.driver_id.clone(),
                is_available: record.is_available,
                lat: record.latitude,
                lng: record.longitude,
                at: record.last_updated_at,
            }),
            Some(before) => {
                let Some((lat, lng)) = record.position() else {
                    debug!("Driver {} is online without coordinates", record.driver_id);
                    continue;
                };
                if before.position() != Some((lat, lng)) {
                    events.push(ChangeEvent::DriverPositionUpdate {
                        driver_id: record.driver_id.clone(),
                        lat,
                        lng,
                        at: record.last_updated_at,
                    });
                }
            }
        }
    }

    for before in previous.online() {
        if !current.is_online(&before.driver_id) {
            events.push(ChangeEvent::DriverOffline {
                driver_id: before.driver_id.clone(),
            });
        }
    }

    events
}

pub struct Broadcaster {
    registry: Arc<SubscriberRegistry>,
    previous: Arc<PresenceSnapshot>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            registry,
            previous: Arc::new(PresenceSnapshot::default()),
        }
    }

    pub async fn tick_once(&mut self) -> Vec<ChangeEvent> {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Vec<ChangeEvent> {
        let outcome = self.registry.publish(&self.previous, now).await;
        if !outcome.events.is_empty() {
            debug!(
                "Tick produced {} event(s), delivered to {} connection(s)",
                outcome.events.len(),
                outcome.delivered
            );
        }
        self.previous = outcome.snapshot;
        outcome.events
    }

    pub async fn run(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("Broadcaster ticking every {:?}", period);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_once().await;
                }
                _ = shutdown.changed() => {
                    info!("Broadcaster stopping");
                    break;
                }
            }
        }
    }
}
