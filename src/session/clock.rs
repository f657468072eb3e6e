use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

/// Remaining time below this threshold puts the countdown in its warning
/// state (5 minutes).
pub const WARNING_THRESHOLD_MS: i64 = 300_000;

/// Remaining session time, derived from the expiry and the current instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remaining {
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    pub total_ms: i64,
}

impl Remaining {
    pub fn is_warning(&self) -> bool {
        self.total_ms < WARNING_THRESHOLD_MS
    }
}

/// Pure remaining-time computation. `None` when there is no expiry or the
/// expiry has passed; consumers hide the countdown on `None` rather than
/// rendering zero forever.
pub fn remaining(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Remaining> {
    let expires_at = expires_at?;
    let total_ms = (expires_at - now).num_milliseconds();
    if total_ms <= 0 {
        return None;
    }

    Some(Remaining {
        hours: total_ms / 3_600_000,
        minutes: (total_ms % 3_600_000) / 60_000,
        seconds: (total_ms % 60_000) / 1_000,
        total_ms,
    })
}

/// The single ticking source for a session's countdown. Every UI countdown
/// (header, sidebar, mobile bar) subscribes to the same watch channel, so the
/// displayed values can never drift apart. Crossing into expiry publishes
/// `None` once; the value then stays `None` without further notifications.
pub struct SessionClock {
    expiry: Arc<RwLock<DateTime<Utc>>>,
    rx: watch::Receiver<Option<Remaining>>,
    ticker: JoinHandle<()>,
}

impl SessionClock {
    pub fn start(expires_at: DateTime<Utc>) -> Self {
        let expiry = Arc::new(RwLock::new(expires_at));
        let (tx, rx) = watch::channel(remaining(Some(expires_at), Utc::now()));

        let tick_expiry = expiry.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tx.is_closed() {
                    break;
                }
                let target = *tick_expiry.read().unwrap();
                let value = remaining(Some(target), Utc::now());
                // send_if_modified publishes the crossing into None exactly
                // once; after that the value stays None with no wakeups
                // until a retarget moves the expiry forward again.
                tx.send_if_modified(|current| {
                    if *current == value {
                        false
                    } else {
                        *current = value;
                        true
                    }
                });
            }
        });

        Self { expiry, rx, ticker }
    }

    /// Subscribe to the shared countdown
    pub fn subscribe(&self) -> watch::Receiver<Option<Remaining>> {
        self.rx.clone()
    }

    /// Current value without waiting for the next tick
    pub fn current(&self) -> Option<Remaining> {
        *self.rx.borrow()
    }

    /// Point the countdown at a new expiry (room extended)
    pub fn retarget(&self, expires_at: DateTime<Utc>) {
        *self.expiry.write().unwrap() = expires_at;
    }
}

impl Drop for SessionClock {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}
