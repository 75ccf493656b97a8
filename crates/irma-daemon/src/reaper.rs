//! The expiry reaper.
//!
//! A background task sweeping the session store on a fixed cadence,
//! independent of traffic. The reaper is the only place timeouts are
//! applied; handlers never self-expire a session mid-request.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::store::{MemorySessionStore, SessionStore as _};

/// Sweep cadence.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(10);

/// Spawns the reaper at the default cadence.
pub fn spawn(store: Arc<MemorySessionStore>) -> JoinHandle<()> {
    spawn_with_interval(store, REAPER_INTERVAL)
}

/// Spawns the reaper at a caller-chosen cadence.
///
/// The sweep is safe to run concurrently with handlers: it takes the
/// store read lock and each session's own mutex for inspection, and the
/// write lock only for the final detach.
pub fn spawn_with_interval(store: Arc<MemorySessionStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            store.delete_expired();
        }
    })
}
