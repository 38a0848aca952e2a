//! Session watchdog
//!
//! A fixed-length countdown started on connect. It reports the remaining time
//! on every tick and fires its expiry callback exactly once, after which the
//! session tears itself down. It is not reset by traffic; only a new
//! connection starts a fresh countdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Countdown {
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

/// Countdown timer with a fixed tick
pub struct Watchdog {
    tick: Duration,
    remaining_ms: Arc<AtomicU64>,
    active: Arc<AtomicBool>,
    countdown: Option<Countdown>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("tick", &self.tick)
            .field("remaining", &self.remaining())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Watchdog {
    /// A zero tick is raised to one millisecond.
    pub fn new(tick: Duration) -> Self {
        Self {
            tick: tick.max(Duration::from_millis(1)),
            remaining_ms: Arc::new(AtomicU64::new(0)),
            active: Arc::new(AtomicBool::new(false)),
            countdown: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Time left before expiry; zero when idle.
    pub fn remaining(&self) -> Duration {
        Duration::from_millis(self.remaining_ms.load(Ordering::SeqCst))
    }

    /// Begin a countdown of `duration`.
    ///
    /// `on_tick` receives the remaining time after every tick, including the
    /// final zero. `on_expire` runs once after that. Returns `false` and does
    /// nothing if a countdown is already active.
    pub fn start<FT, FE>(&mut self, duration: Duration, on_tick: FT, on_expire: FE) -> bool
    where
        FT: Fn(Duration) + Send + 'static,
        FE: FnOnce() + Send + 'static,
    {
        if self.is_active() {
            debug!("Watchdog already running, start ignored");
            return false;
        }
        if let Some(previous) = self.countdown.take() {
            previous.token.cancel();
        }

        let tick = self.tick;
        let token = CancellationToken::new();
        let remaining_ms = Arc::clone(&self.remaining_ms);
        let active = Arc::clone(&self.active);
        remaining_ms.store(duration.as_millis() as u64, Ordering::SeqCst);
        active.store(true, Ordering::SeqCst);

        let cancel = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + tick, tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut remaining = duration;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                if cancel.is_cancelled() {
                    return;
                }
                remaining = remaining.saturating_sub(tick);
                remaining_ms.store(remaining.as_millis() as u64, Ordering::SeqCst);
                on_tick(remaining);

                if remaining.is_zero() {
                    active.store(false, Ordering::SeqCst);
                    info!("Session watchdog expired after {:?}", duration);
                    on_expire();
                    return;
                }
            }
        });

        info!("Session watchdog armed for {:?}", duration);
        self.countdown = Some(Countdown {
            token,
            _handle: handle,
        });
        true
    }

    /// Cancel the countdown and reset the remaining time to zero. Idempotent.
    pub fn stop(&mut self) {
        if let Some(countdown) = self.countdown.take() {
            countdown.token.cancel();
            debug!("Session watchdog stopped");
        }
        self.active.store(false, Ordering::SeqCst);
        self.remaining_ms.store(0, Ordering::SeqCst);
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(countdown) = &self.countdown {
            countdown.token.cancel();
        }
    }
}
