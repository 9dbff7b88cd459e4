use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::info;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::state::presence::{DriverId, PresenceStore};

#[derive(Debug, Default, PartialEq)]
pub struct ReapOutcome {
    /// Drivers forced offline on this pass.
    pub evicted: Vec<DriverId>,
    /// Offline records dropped from the store after their grace window.
    pub purged: usize,
}

/// Evicts drivers that stopped reporting. Runs on its own interval and talks
/// to the broadcaster only through the store.
pub struct Reaper {
    store: Arc<PresenceStore>,
    inactivity_threshold: chrono::Duration,
}

impl Reaper {
    pub fn new(store: Arc<PresenceStore>, inactivity_threshold: chrono::Duration) -> Self {
        Self {
            store,
            inactivity_threshold,
        }
    }

    pub async fn reap_once(&self, now: DateTime<Utc>) -> ReapOutcome {
        let evicted = self
            .store
            .mark_stale_offline(now, self.inactivity_threshold)
            .await;
        for driver_id in &evicted {
            info!(
                "Driver {} silent for over {} min, marking offline",
                driver_id,
                self.inactivity_threshold.num_minutes()
            );
        }
        let purged = self.store.purge_offline(now).await;
        ReapOutcome { evicted, purged }
    }

    pub async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Reaper scanning every {:?} (inactivity threshold {} s)",
            period,
            self.inactivity_threshold.num_seconds()
        );
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reap_once(Utc::now()).await;
                }
                _ = shutdown.changed() => {
                    info!("Reaper stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::Broadcaster;
    use crate::messages::ChangeEvent;
    use crate::state::presence::PresenceReport;
    use crate::state::subscribers::SubscriberRegistry;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn stale_driver_yields_exactly_one_offline_event() {
        let store = Arc::new(PresenceStore::new(ChronoDuration::seconds(10)));
        let registry = Arc::new(SubscriberRegistry::new(store.clone(), Duration::from_millis(50)));
        let reaper = Reaper::new(store.clone(), ChronoDuration::minutes(30));
        let mut broadcaster = Broadcaster::new(registry);
        let t0 = Utc::now();

        store
            .report_at("d1", PresenceReport::online_at(1.0, 1.0), t0)
            .await
            .unwrap();
        broadcaster.tick_at(t0 + ChronoDuration::seconds(2)).await;

        let early = reaper.reap_once(t0 + ChronoDuration::minutes(29)).await;
        assert!(early.evicted.is_empty());

        let late = t0 + ChronoDuration::minutes(30) + ChronoDuration::seconds(1);
        let outcome = reaper.reap_once(late).await;
        assert_eq!(outcome.evicted, vec!["d1".to_string()]);

        let events = broadcaster.tick_at(late + ChronoDuration::seconds(1)).await;
        assert_eq!(
            events,
            vec![ChangeEvent::DriverOffline {
                driver_id: "d1".into()
            }]
        );
        assert!(broadcaster
            .tick_at(late + ChronoDuration::seconds(3))
            .await
            .is_empty());

        let outcome = reaper.reap_once(late + ChronoDuration::minutes(1)).await;
        assert!(outcome.evicted.is_empty());
        assert_eq!(outcome.purged, 1);
        assert_eq!(store.len().await, 0);
    }
}
