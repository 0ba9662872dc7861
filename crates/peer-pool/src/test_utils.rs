//! Test utilities for the peer pool.
//!
//! Scriptable collaborators for deterministic tests. Enable with the
//! `test-utils` feature flag.
//!
//! # Example
//!
//! ```rust
//! use peer_pool::test_utils::ControllableTimeSource;
//! use peer_pool::TimeSource;
//! use std::time::Duration;
//!
//! let clock = ControllableTimeSource::new(1_000);
//! clock.advance(Duration::from_millis(500));
//! assert_eq!(clock.now().as_millis(), 1_500);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

use crate::domain::{DiscoveryError, Endpoint, NodeId, NodeRecord, Timestamp, Topic};
use crate::ports::{ConnectionManager, Discovery, PeerEvent, Signal, SignalSink, TimeSource};

/// Node record with id `[byte, 0, 0, ..]` at `127.0.0.{byte}:30303`.
pub fn node_record(byte: u8) -> NodeRecord {
    let mut id = [0u8; 32];
    id[0] = byte;
    NodeRecord::new(
        NodeId::new(id),
        Endpoint::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, byte)), 30303, 30303),
    )
}

/// Poll `condition` until it holds, sleeping between attempts.
///
/// Returns whether it eventually held (about one second of polling).
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Install a test log subscriber honouring `RUST_LOG`.
#[cfg(test)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// ControllableTimeSource
// =============================================================================

/// Thread-safe clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ControllableTimeSource {
    millis: AtomicU64,
}

impl ControllableTimeSource {
    /// Create a clock reading `initial` milliseconds.
    pub fn new(initial: u64) -> Self {
        Self {
            millis: AtomicU64::new(initial),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the clock to an absolute reading.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ControllableTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

// =============================================================================
// RecordingSignalSink
// =============================================================================

/// Keeps every signal it receives.
#[derive(Debug, Default)]
pub struct RecordingSignalSink {
    signals: Mutex<Vec<Signal>>,
}

impl RecordingSignalSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals received so far.
    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().clone()
    }

    /// Number of received signals equal to `signal`.
    pub fn count(&self, signal: &Signal) -> usize {
        self.signals.lock().iter().filter(|s| *s == signal).count()
    }

    /// Number of received summaries.
    pub fn summaries(&self) -> usize {
        self.signals
            .lock()
            .iter()
            .filter(|s| matches!(s, Signal::DiscoverySummary(_)))
            .count()
    }
}

impl SignalSink for RecordingSignalSink {
    fn send(&self, signal: Signal) {
        self.signals.lock().push(signal);
    }
}

// =============================================================================
// FakeConnector
// =============================================================================

/// Scriptable discovery subsystem and connection manager.
///
/// Dial and drop requests are only recorded; tests decide which peers
/// connect or drop by calling [`FakeConnector::connect`] and
/// [`FakeConnector::disconnect`].
pub struct FakeConnector {
    self_id: NodeId,
    running: AtomicBool,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    events: broadcast::Sender<PeerEvent>,
    dialed: Mutex<Vec<NodeRecord>>,
    removed: Mutex<Vec<NodeRecord>>,
    connected: Mutex<Vec<NodeRecord>>,
    searches: Arc<Mutex<HashMap<Topic, mpsc::Sender<NodeRecord>>>>,
    periods: Mutex<Vec<(Topic, Duration)>>,
    registered: Mutex<Vec<Topic>>,
    active_registrations: Arc<AtomicUsize>,
    failing_topics: Mutex<HashSet<Topic>>,
}

impl FakeConnector {
    /// Running connector whose local id is `node_record(0).id`.
    pub fn new() -> Self {
        Self::with_self_id(node_record(0).id)
    }

    /// Running connector with the given local id.
    pub fn with_self_id(self_id: NodeId) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            self_id,
            running: AtomicBool::new(true),
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            events,
            dialed: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            connected: Mutex::new(Vec::new()),
            searches: Arc::new(Mutex::new(HashMap::new())),
            periods: Mutex::new(Vec::new()),
            registered: Mutex::new(Vec::new()),
            active_registrations: Arc::new(AtomicUsize::new(0)),
            failing_topics: Mutex::new(HashSet::new()),
        }
    }

    /// Toggle whether discovery reports itself as running.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Make subsequent `start` calls fail.
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make searches and registrations of `topic` fail immediately.
    pub fn fail_topic(&self, topic: &Topic) {
        self.failing_topics.lock().insert(topic.clone());
    }

    /// Deliver a found node to the active search of `topic`.
    ///
    /// Waits for the search to come up. Returns false if it never did.
    pub async fn discover(&self, topic: &Topic, node: NodeRecord) -> bool {
        if !eventually(|| self.is_searching(topic)).await {
            return false;
        }
        let sender = self.searches.lock().get(topic).cloned();
        match sender {
            Some(sender) => sender.send(node).await.is_ok(),
            None => false,
        }
    }

    /// Report `node` as connected.
    pub fn connect(&self, node: &NodeRecord) {
        self.connected.lock().push(*node);
        let _ = self.events.send(PeerEvent::Connected { id: node.id });
    }

    /// Report `id` as dropped.
    pub fn disconnect(&self, id: &NodeId) {
        self.connected.lock().retain(|node| node.id != *id);
        let _ = self.events.send(PeerEvent::Dropped {
            id: *id,
            error: None,
        });
    }

    /// Whether a search for `topic` is running.
    pub fn is_searching(&self, topic: &Topic) -> bool {
        self.searches.lock().contains_key(topic)
    }

    /// Nodes we were asked to dial, in order.
    pub fn dialed(&self) -> Vec<NodeRecord> {
        self.dialed.lock().clone()
    }

    /// Nodes we were asked to drop, in order.
    pub fn removed(&self) -> Vec<NodeRecord> {
        self.removed.lock().clone()
    }

    /// Periods received by searches of `topic`, in order.
    pub fn periods(&self, topic: &Topic) -> Vec<Duration> {
        self.periods
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, period)| *period)
            .collect()
    }

    /// Topics passed to `register_topic`, in order.
    pub fn registered(&self) -> Vec<Topic> {
        self.registered.lock().clone()
    }

    /// Registrations that have not returned yet.
    pub fn active_registrations(&self) -> usize {
        self.active_registrations.load(Ordering::SeqCst)
    }

    /// Successful and failed `start` calls.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// `stop` calls.
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Live event subscriptions.
    pub fn subscribers(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a closure when dropped, so bookkeeping survives task cancellation.
struct OnDrop<F: FnMut()>(F);

impl<F: FnMut()> Drop for OnDrop<F> {
    fn drop(&mut self) {
        (self.0)();
    }
}

#[async_trait]
impl Discovery for FakeConnector {
    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn start(&self) -> Result<(), DiscoveryError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(DiscoveryError::StartFailed("scripted failure".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), DiscoveryError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn register_topic(
        &self,
        topic: Topic,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), DiscoveryError> {
        self.registered.lock().push(topic.clone());
        if self.failing_topics.lock().contains(&topic) {
            return Err(DiscoveryError::QueryFailed {
                topic,
                message: "scripted failure".into(),
            });
        }

        self.active_registrations.fetch_add(1, Ordering::SeqCst);
        let active = self.active_registrations.clone();
        let _guard = OnDrop(move || {
            active.fetch_sub(1, Ordering::SeqCst);
        });

        while !*stop.borrow() {
            if stop.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn search_topic(
        &self,
        topic: Topic,
        mut period: mpsc::Receiver<Duration>,
        found: mpsc::Sender<NodeRecord>,
        lookup: mpsc::Sender<bool>,
    ) -> Result<(), DiscoveryError> {
        if self.failing_topics.lock().contains(&topic) {
            return Err(DiscoveryError::QueryFailed {
                topic,
                message: "scripted failure".into(),
            });
        }

        self.searches.lock().insert(topic.clone(), found);
        let searches = self.searches.clone();
        let key = topic.clone();
        let _guard = OnDrop(move || {
            searches.lock().remove(&key);
        });

        let _ = lookup.try_send(true);
        while let Some(every) = period.recv().await {
            self.periods.lock().push((topic.clone(), every));
        }
        let _ = lookup.try_send(false);
        Ok(())
    }
}

impl ConnectionManager for FakeConnector {
    fn self_id(&self) -> NodeId {
        self.self_id
    }

    fn add_peer(&self, node: &NodeRecord) {
        self.dialed.lock().push(*node);
    }

    fn remove_peer(&self, node: &NodeRecord) {
        self.removed.lock().push(*node);
    }

    fn subscribe_events(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    fn peers_info(&self) -> Vec<NodeRecord> {
        self.connected.lock().clone()
    }
}
