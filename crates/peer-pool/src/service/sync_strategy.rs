//! # Sync Strategy
//!
//! Chooses how often a topic search polls the discovery subsystem.
//!
//! A single coordinator task owns the current [`SyncMode`]. Callers send it
//! mode requests and read the resulting polling periods from a bounded
//! queue. Only changes are emitted. Entering fast mode arms a timer that
//! downgrades to slow mode unless another transition happens first.

use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tracing::{debug, trace};

use crate::domain::{
    Limits, SyncMode, DEFAULT_FAST_SYNC, DEFAULT_SLOW_SYNC, DEFAULT_TOPIC_FAST_MODE_TIMEOUT,
    PERIOD_QUEUE_CAPACITY,
};
use crate::service::expired;

/// Polling periods and the fast-mode grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPeriods {
    /// Period while under-subscribed.
    pub fast: Duration,
    /// Period once satisfied.
    pub slow: Duration,
    /// Fast mode downgrades itself after this long. Zero disables it.
    pub fast_mode_timeout: Duration,
}

impl SyncPeriods {
    /// Period for a mode.
    pub fn period(&self, mode: SyncMode) -> Duration {
        match mode {
            SyncMode::Fast => self.fast,
            SyncMode::Slow => self.slow,
        }
    }
}

impl Default for SyncPeriods {
    fn default() -> Self {
        Self {
            fast: DEFAULT_FAST_SYNC,
            slow: DEFAULT_SLOW_SYNC,
            fast_mode_timeout: DEFAULT_TOPIC_FAST_MODE_TIMEOUT,
        }
    }
}

/// Cloneable handle for requesting mode changes.
#[derive(Debug, Clone)]
pub struct SyncUpdater {
    requests: mpsc::UnboundedSender<SyncMode>,
}

impl SyncUpdater {
    /// Request fast mode when `connected < limits.min`, slow mode otherwise.
    pub fn update(&self, connected: usize, limits: Limits) {
        self.request(SyncMode::for_peer_count(connected, limits));
    }

    /// Request a specific mode. Requesting the active mode is a no-op.
    pub fn request(&self, mode: SyncMode) {
        if self.requests.send(mode).is_err() {
            trace!(%mode, "Sync strategy already stopped, request ignored");
        }
    }
}

/// Running polling-rate controller.
///
/// Dropping it without calling [`SyncStrategy::stop`] still ends the
/// coordinator, but does not wait for it.
#[derive(Debug)]
pub struct SyncStrategy {
    updater: SyncUpdater,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncStrategy {
    /// Start in fast mode.
    ///
    /// Returns the controller and the queue of polling periods, which yields
    /// the fast period first.
    pub fn start(periods: SyncPeriods) -> (Self, mpsc::Receiver<Duration>) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (periods_tx, periods_rx) = mpsc::channel(PERIOD_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let coordinator = Coordinator {
            periods,
            mode: SyncMode::Fast,
            output: periods_tx,
            shutdown: shutdown_rx,
        };
        let handle = tokio::spawn(coordinator.run(requests_rx));

        let strategy = Self {
            updater: SyncUpdater {
                requests: requests_tx,
            },
            shutdown: shutdown_tx,
            handle,
        };
        (strategy, periods_rx)
    }

    /// Handle for sending mode requests from other tasks.
    pub fn updater(&self) -> SyncUpdater {
        self.updater.clone()
    }

    /// Request a mode for the given connected count.
    pub fn update(&self, connected: usize, limits: Limits) {
        self.updater.update(connected, limits);
    }

    /// Stop the coordinator and wait for it to exit.
    ///
    /// The period queue is closed once this returns.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            debug!(error = %e, "Sync strategy task ended abnormally");
        }
    }
}

struct Coordinator {
    periods: SyncPeriods,
    mode: SyncMode,
    output: mpsc::Sender<Duration>,
    shutdown: watch::Receiver<bool>,
}

impl Coordinator {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<SyncMode>) {
        let mut downgrade = self.arm_downgrade();
        if !self.emit().await {
            return;
        }

        loop {
            let next = tokio::select! {
                _ = self.shutdown.changed() => break,
                request = requests.recv() => match request {
                    Some(mode) => mode,
                    None => break,
                },
                _ = expired(&mut downgrade) => {
                    debug!("Fast sync mode timed out");
                    SyncMode::Slow
                }
            };

            if next == self.mode {
                continue;
            }
            self.mode = next;
            downgrade = match next {
                SyncMode::Fast => self.arm_downgrade(),
                SyncMode::Slow => None,
            };
            if !self.emit().await {
                break;
            }
        }
    }

    fn arm_downgrade(&self) -> Option<Pin<Box<Sleep>>> {
        if self.periods.fast_mode_timeout.is_zero() {
            return None;
        }
        Some(Box::pin(sleep(self.periods.fast_mode_timeout)))
    }

    /// Publish the current period. Returns false on shutdown.
    async fn emit(&mut self) -> bool {
        let period = self.periods.period(self.mode);
        debug!(mode = %self.mode, ?period, "Sync mode changed");
        tokio::select! {
            _ = self.shutdown.changed() => false,
            sent = self.output.send(period) => {
                if sent.is_err() {
                    trace!("Period queue has no reader");
                }
                true
            }
        }
    }
}
