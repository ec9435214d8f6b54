use std::time::Duration;

use log::{error, info};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::error::ChatError;
use crate::messages::now_millis;
use crate::presence::PresenceRegistry;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    pub interval: Duration,
    /// Idle time after which a participant is evicted.
    pub timeout: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        SweepSettings {
            interval: DEFAULT_SWEEP_INTERVAL,
            timeout: DEFAULT_INACTIVITY_TIMEOUT,
        }
    }
}

/// Runs one sweep and logs the outcome. Returns how many participants left.
pub async fn run_sweep(registry: &PresenceRegistry, timeout: Duration) -> usize {
    match registry.sweep(now_millis(), timeout).await {
        Ok(evicted) => {
            if !evicted.is_empty() {
                info!("sweep evicted {} participant(s)", evicted.len());
            }
            evicted.len()
        }
        Err(ChatError::Unavailable(cause)) => {
            error!("sweep failed, retrying next tick: {}", cause);
            0
        }
        Err(e) => {
            error!("sweep failed, retrying next tick: {}", e);
            0
        }
    }
}

/// Starts the background sweep loop.
///
/// Sweeps run inline in the loop, so two never overlap; ticks missed while a
/// sweep was running are dropped rather than queued.
pub fn spawn_sweeper(registry: PresenceRegistry, settings: SweepSettings) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately
        ticker.tick().await;

        info!(
            "sweeper started (every {:?}, timeout {:?})",
            settings.interval, settings.timeout
        );
        loop {
            ticker.tick().await;
            run_sweep(&registry, settings.timeout).await;
        }
    })
}
