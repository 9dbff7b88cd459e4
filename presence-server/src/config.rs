use std::{env, fmt::Display, net::SocketAddr, str::FromStr, time::Duration};

use log::{info, warn};

pub const DEFAULT_ADDR: &str = "0.0.0.0:9001";

/// Runtime settings. Every field has a default so the server starts with an
/// empty environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub broadcast_tick: Duration,
    pub reaper_interval: Duration,
    pub inactivity_threshold: Duration,
    pub offline_grace: Duration,
    pub send_timeout: Duration,
    pub outbound_buffer: usize,
    /// `token=viewer` pairs separated by commas.
    pub viewer_tokens: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 9001)),
            broadcast_tick: Duration::from_millis(2_000),
            reaper_interval: Duration::from_secs(60),
            inactivity_threshold: Duration::from_secs(30 * 60),
            offline_grace: Duration::from_secs(10),
            send_timeout: Duration::from_millis(2_000),
            outbound_buffer: 64,
            viewer_tokens: String::new(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let defaults = Self::default();
        Self {
            addr: try_load("PRESENCE_ADDR", defaults.addr),
            broadcast_tick: Duration::from_millis(try_load("BROADCAST_TICK_MS", 2_000u64).max(1)),
            reaper_interval: Duration::from_secs(try_load("REAPER_INTERVAL_SECS", 60u64).max(1)),
            inactivity_threshold: Duration::from_secs(try_load(
                "INACTIVITY_THRESHOLD_SECS",
                30 * 60u64,
            )),
            offline_grace: Duration::from_secs(try_load("OFFLINE_GRACE_SECS", 10u64)),
            send_timeout: Duration::from_millis(try_load("SEND_TIMEOUT_MS", 2_000u64)),
            outbound_buffer: try_load("OUTBOUND_BUFFER", defaults.outbound_buffer).max(1),
            viewer_tokens: env::var("VIEWER_TOKENS").unwrap_or_default(),
        }
    }

    pub fn inactivity_threshold_chrono(&self) -> chrono::Duration {
        to_chrono(self.inactivity_threshold)
    }

    pub fn offline_grace_chrono(&self) -> chrono::Duration {
        to_chrono(self.offline_grace)
    }
}

/// Saturates instead of failing; thresholds this large mean "never".
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}; using default {default}");
            default
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}
