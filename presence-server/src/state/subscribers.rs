use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use hyper_tungstenite::tungstenite::Message;
use log::{debug, info, warn};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::Mutex;

use crate::broadcaster::diff;
use crate::error::SubscribeError;
use crate::messages::{ChangeEvent, DriverStatus, ServerMessage};
use crate::state::presence::{PresenceSnapshot, PresenceStore};

pub type ViewerId = String;
pub type ConnId = String;
pub type ViewerSender = mpsc::Sender<Message>;

/// One live dashboard connection.
#[derive(Debug, Clone)]
struct Subscriber {
    viewer_id: ViewerId,
    sender: ViewerSender,
    /// What the bootstrap showed, until the first tick after registration
    /// has been diffed against it.
    bootstrap: Option<Arc<PresenceSnapshot>>,
}

struct RegistryInner {
    /// Map of conn_id -> subscriber
    subscribers: HashMap<ConnId, Subscriber>,
    /// Map of viewer_id -> every conn_id that viewer has open (multi-tab/multi-device)
    viewers: HashMap<ViewerId, HashSet<ConnId>>,
}

/// Result of one broadcaster tick.
#[derive(Debug)]
pub struct PublishOutcome {
    pub snapshot: Arc<PresenceSnapshot>,
    /// Transitions since the previous tick, as seen by long-lived connections.
    pub events: Vec<ChangeEvent>,
    /// Connections that received everything queued for them.
    pub delivered: usize,
}

/// Tracks which connections belong to which viewer and fans events out to them.
///
/// The bootstrap is read from the store under the registry lock, and each
/// tick reads the store under the same lock. A new connection's first tick is
/// diffed against its own bootstrap rather than the previous tick, so every
/// viewer sees each transition exactly once. Socket sends never run under the
/// lock.
pub struct SubscriberRegistry {
    inner: Mutex<RegistryInner>,
    store: Arc<PresenceStore>,
    send_timeout: Duration,
}

impl SubscriberRegistry {
    pub fn new(store: Arc<PresenceStore>, send_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                subscribers: HashMap::new(),
                viewers: HashMap::new(),
            }),
            store,
            send_timeout,
        }
    }

    /// Registers a connection and queues a bootstrap of every driver online
    /// in the store right now.
    pub async fn register(
        &self,
        viewer_id: ViewerId,
        conn_id: ConnId,
        sender: ViewerSender,
    ) -> Result<(), SubscribeError> {
        let mut inner = self.inner.lock().await;
        if inner.subscribers.contains_key(&conn_id) {
            return Err(SubscribeError::AlreadySubscribed(conn_id));
        }

        let bootstrap = Arc::new(self.store.snapshot().await);
        let frame = ServerMessage::Snapshot {
            drivers: bootstrap.online().map(DriverStatus::from).collect(),
        }
        .to_message()?;
        sender
            .try_send(frame)
            .map_err(|_| SubscribeError::BootstrapFailed)?;

        inner
            .viewers
            .entry(viewer_id.clone())
            .or_insert_with(HashSet::new)
            .insert(conn_id.clone());
        let sessions = inner.viewers.get(&viewer_id).map_or(0, HashSet::len);
        inner.subscribers.insert(
            conn_id.clone(),
            Subscriber {
                viewer_id: viewer_id.clone(),
                sender,
                bootstrap: Some(bootstrap),
            },
        );

        info!(
            "Registered connection {} for viewer {} ({} session(s))",
            conn_id, viewer_id, sessions
        );
        Ok(())
    }

    /// Removes one connection. Other sessions of the same viewer stay registered.
    pub async fn unregister(&self, conn_id: &str) -> Option<ViewerId> {
        let mut inner = self.inner.lock().await;
        let subscriber = inner.subscribers.remove(conn_id)?;
        let viewer_id = subscriber.viewer_id;

        if let Some(conns) = inner.viewers.get_mut(&viewer_id) {
            conns.remove(conn_id);
            if conns.is_empty() {
                inner.viewers.remove(&viewer_id);
                info!("Viewer {} has no remaining connections", viewer_id);
            } else {
                debug!(
                    "Viewer {} still has {} connection(s)",
                    viewer_id,
                    conns.len()
                );
            }
        }
        Some(viewer_id)
    }

    /// Sends one event to every connection as is.
    pub async fn broadcast(&self, event: &ChangeEvent) -> usize {
        let targets: Vec<(ConnId, ViewerSender)> = {
            let inner = self.inner.lock().await;
            inner
                .subscribers
                .iter()
                .map(|(conn_id, s)| (conn_id.clone(), s.sender.clone()))
                .collect()
        };
        let messages = Arc::new(encode(std::slice::from_ref(event)));
        let targets = targets
            .into_iter()
            .map(|(conn_id, sender)| (conn_id, sender, messages.clone()))
            .collect();
        self.deliver(targets).await
    }

    /// Runs one tick: reads the store at `now`, diffs it against `previous`
    /// and fans the transitions out. Connections registered since the last
    /// tick get the diff against their own bootstrap instead.
    pub async fn publish(&self, previous: &PresenceSnapshot, now: DateTime<Utc>) -> PublishOutcome {
        let (snapshot, events, targets) = {
            let mut inner = self.inner.lock().await;
            let snapshot = Arc::new(self.store.snapshot_at(now).await);
            let events = diff(previous, &snapshot);
            let shared = Arc::new(encode(&events));

            let mut targets = Vec::new();
            for (conn_id, subscriber) in inner.subscribers.iter_mut() {
                let messages = match subscriber.bootstrap.take() {
                    Some(bootstrap) => Arc::new(encode(&diff(&bootstrap, &snapshot))),
                    None => shared.clone(),
                };
                if !messages.is_empty() {
                    targets.push((conn_id.clone(), subscriber.sender.clone(), messages));
                }
            }
            (snapshot, events, targets)
        };

        let delivered = if events.is_empty() && targets.is_empty() {
            0
        } else {
            self.deliver(targets).await
        };
        PublishOutcome {
            snapshot,
            events,
            delivered,
        }
    }

    async fn deliver(&self, targets: Vec<(ConnId, ViewerSender, Arc<Vec<Message>>)>) -> usize {
        if targets.is_empty() {
            debug!("No subscribers to deliver to");
            return 0;
        }

        let timeout = self.send_timeout;
        let sends = targets.into_iter().map(|(conn_id, sender, messages)| async move {
            for message in messages.iter() {
                match sender.send_timeout(message.clone(), timeout).await {
                    Ok(()) => {}
                    Err(SendTimeoutError::Timeout(_)) => {
                        warn!("Send to connection {} timed out", conn_id);
                        return Err(conn_id);
                    }
                    Err(SendTimeoutError::Closed(_)) => {
                        debug!("Connection {} already closed", conn_id);
                        return Err(conn_id);
                    }
                }
            }
            Ok(())
        });

        let mut delivered = 0;
        for result in join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(conn_id) => {
                    self.unregister(&conn_id).await;
                }
            }
        }
        delivered
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    pub async fn viewer_count(&self) -> usize {
        self.inner.lock().await.viewers.len()
    }

    pub async fn sessions_for(&self, viewer_id: &str) -> usize {
        self.inner
            .lock()
            .await
            .viewers
            .get(viewer_id)
            .map_or(0, HashSet::len)
    }
}

fn encode(events: &[ChangeEvent]) -> Vec<Message> {
    events
        .iter()
        .filter_map(|event| match event.to_message() {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Dropping unencodable event for {}: {}", event.driver_id(), e);
                None
            }
        })
        .collect()
}
