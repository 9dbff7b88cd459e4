pub mod presence;
pub mod subscribers;

pub use presence::{PresenceRecord, PresenceReport, PresenceSnapshot, PresenceStore};
pub use subscribers::SubscriberRegistry;

use std::sync::Arc;

use crate::auth::{StaticTokenAuthenticator, ViewerAuthenticator};
use crate::config::Config;

/// Everything request handlers need. The presence store is the only
/// shared-mutable driver state; the registry reads it for bootstraps and ticks.
pub struct AppState {
    pub config: Config,
    pub presence: Arc<PresenceStore>,
    pub subscribers: Arc<SubscriberRegistry>,
    pub auth: Arc<dyn ViewerAuthenticator>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let auth = StaticTokenAuthenticator::from_pairs(&config.viewer_tokens);
        Self::with_authenticator(config, Arc::new(auth))
    }

    pub fn with_authenticator(config: Config, auth: Arc<dyn ViewerAuthenticator>) -> Self {
        let presence = Arc::new(PresenceStore::new(config.offline_grace_chrono()));
        Self {
            subscribers: Arc::new(SubscriberRegistry::new(presence.clone(), config.send_timeout)),
            presence,
            auth,
            config,
        }
    }
}

pub type SharedState = Arc<AppState>;
