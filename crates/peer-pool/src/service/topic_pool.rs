//! # Topic Pool
//!
//! Discovery and connection pool of one topic.
//!
//! While searching, two tasks run per topic: one drives the discovery
//! subsystem's topic search (paced by a [`SyncStrategy`]), the other feeds
//! every node it yields into [`TopicPool::process_found_node`]. Connect and
//! drop confirmations arrive from [`crate::PeerPool`].
//!
//! ## Locking
//!
//! Bookkeeping lives in a [`TopicTable`] behind a `parking_lot::RwLock`.
//! Table methods return decisions; dial and drop requests, cache writes
//! and sync updates are carried out after the guard is released.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::adapters::{MonotonicTimeSource, PeerCache};
use crate::domain::{
    AddedOutcome, DroppedOutcome, FoundOutcome, Limits, NodeId, NodeRecord, PeerPoolError,
    PeerRecord, SyncMode, Topic, TopicStats, TopicTable, DEFAULT_CACHE_PREFETCH,
    DEFAULT_EXPIRATION_PERIOD, FOUND_QUEUE_CAPACITY, LOOKUP_QUEUE_CAPACITY,
};
use crate::ports::{Connector, TimeSource};
use crate::service::sync_strategy::{SyncPeriods, SyncStrategy, SyncUpdater};

/// Discovery and connection pool of one topic.
pub struct TopicPool {
    shared: Arc<Shared>,
    search: Mutex<Option<ActiveSearch>>,
}

/// State reachable from the consumer task.
struct Shared {
    topic: Topic,
    table: RwLock<TopicTable>,
    running: AtomicBool,
    connector: RwLock<Option<Arc<dyn Connector>>>,
    sync: RwLock<Option<SyncUpdater>>,
    cache: Option<Arc<PeerCache>>,
    clock: Arc<dyn TimeSource>,
    periods: SyncPeriods,
    expiration: Duration,
    cache_prefetch: usize,
}

struct ActiveSearch {
    strategy: SyncStrategy,
    quit: watch::Sender<bool>,
    discovery: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl TopicPool {
    /// Create an idle pool for `topic`.
    pub fn new(topic: Topic, limits: Limits, periods: SyncPeriods) -> Self {
        Self {
            shared: Arc::new(Shared {
                topic,
                table: RwLock::new(TopicTable::new(limits)),
                running: AtomicBool::new(false),
                connector: RwLock::new(None),
                sync: RwLock::new(None),
                cache: None,
                clock: Arc::new(MonotonicTimeSource::new()),
                periods,
                expiration: DEFAULT_EXPIRATION_PERIOD,
                cache_prefetch: DEFAULT_CACHE_PREFETCH,
            }),
            search: Mutex::new(None),
        }
    }

    /// Persist connected peers to `cache` and seed searches from it.
    #[must_use]
    pub fn with_cache(self, cache: Arc<PeerCache>) -> Self {
        self.configure(|shared| shared.cache = Some(cache))
    }

    /// Use `clock` for discovery timestamps.
    #[must_use]
    pub fn with_time_source(self, clock: Arc<dyn TimeSource>) -> Self {
        self.configure(|shared| shared.clock = clock)
    }

    /// Candidates not rediscovered within `expiration` are not dialed.
    #[must_use]
    pub fn with_expiration(self, expiration: Duration) -> Self {
        self.configure(|shared| shared.expiration = expiration)
    }

    /// Number of cached peers used to seed a search.
    #[must_use]
    pub fn with_cache_prefetch(self, cache_prefetch: usize) -> Self {
        self.configure(|shared| shared.cache_prefetch = cache_prefetch)
    }

    fn configure(mut self, apply: impl FnOnce(&mut Shared)) -> Self {
        let shared = Arc::get_mut(&mut self.shared);
        debug_assert!(shared.is_some(), "topic pool configured while searching");
        if let Some(shared) = shared {
            apply(shared);
        }
        self
    }

    /// Topic of this pool.
    pub fn topic(&self) -> &Topic {
        &self.shared.topic
    }

    /// Start discovering peers for the topic.
    ///
    /// No-op if already searching. Fails with
    /// [`PeerPoolError::DiscoveryUnavailable`] if discovery is not running.
    pub async fn start_search(&self, connector: Arc<dyn Connector>) -> Result<(), PeerPoolError> {
        let mut search = self.search.lock().await;
        if search.is_some() {
            return Ok(());
        }
        if !connector.running() {
            return Err(PeerPoolError::DiscoveryUnavailable);
        }

        let shared = &self.shared;
        *shared.connector.write() = Some(connector.clone());

        let (strategy, periods) = SyncStrategy::start(shared.periods);
        *shared.sync.write() = Some(strategy.updater());
        shared.running.store(true, Ordering::SeqCst);

        for node in shared.cached_peers() {
            debug!(topic = %shared.topic, peer = %node.id.short(), "Seeding candidate from cache");
            shared.process_found(connector.as_ref(), node);
        }

        let (found_tx, found_rx) = mpsc::channel(FOUND_QUEUE_CAPACITY);
        let (lookup_tx, lookup_rx) = mpsc::channel(LOOKUP_QUEUE_CAPACITY);
        let (quit_tx, quit_rx) = watch::channel(false);

        let discovery = tokio::spawn(run_discovery(
            connector.clone(),
            shared.topic.clone(),
            periods,
            found_tx,
            lookup_tx,
            quit_rx.clone(),
        ));
        let consumer = tokio::spawn(
            shared
                .clone()
                .consume(connector, found_rx, lookup_rx, quit_rx),
        );

        *search = Some(ActiveSearch {
            strategy,
            quit: quit_tx,
            discovery,
            consumer,
        });
        info!(topic = %shared.topic, limits = %shared.table.read().limits(), "Topic search started");
        Ok(())
    }

    /// Stop discovering peers and wait for both search tasks to exit.
    ///
    /// No-op if not searching. Connected peers and candidates are kept.
    pub async fn stop_search(&self) {
        let mut search = self.search.lock().await;
        let Some(active) = search.take() else {
            return;
        };

        self.shared.running.store(false, Ordering::SeqCst);
        let _ = active.quit.send(true);
        *self.shared.sync.write() = None;
        active.strategy.stop().await;

        for (task, handle) in [("discovery", active.discovery), ("consumer", active.consumer)] {
            if let Err(e) = handle.await {
                error!(topic = %self.shared.topic, task, error = %e, "Topic search task panicked");
            }
        }
        info!(topic = %self.shared.topic, "Topic search stopped");
    }

    /// Whether the topic is searching.
    pub fn search_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Handle a discovered node: refresh or record it, and dial it if the
    /// topic has spare capacity.
    ///
    /// Ignored until a search has been started once.
    pub fn process_found_node(&self, node: NodeRecord) {
        if let Some(connector) = self.shared.connector() {
            self.shared.process_found(connector.as_ref(), node);
        }
    }

    /// Handle a connect event.
    ///
    /// Known peers are cached. Past capacity, the peer is dismissed and a drop
    /// is requested; otherwise it moves to the connected set.
    pub fn confirm_added(&self, id: &NodeId) {
        let outcome = self.shared.table.write().confirm_added(id);
        let topic = &self.shared.topic;

        match outcome {
            AddedOutcome::Unknown | AddedOutcome::AlreadyConnected => {}
            AddedOutcome::Admitted { node, reached_min } => {
                debug!(topic = %topic, peer = %node.id.short(), "Peer admitted");
                self.shared.cache_add(&node);
                if reached_min {
                    self.shared.request_sync(SyncMode::Slow);
                }
            }
            AddedOutcome::Dismissed { node } => {
                debug!(topic = %topic, peer = %node.id.short(), "Topic full, dismissing peer");
                self.shared.cache_add(&node);
                if let Some(connector) = self.shared.connector() {
                    connector.remove_peer(&node);
                }
            }
        }
    }

    /// Handle a drop event.
    ///
    /// Returns `true` only when a connected peer of this topic was lost. The
    /// connection manager is then told to forget the peer as well.
    /// Completing our own dismissal returns `false`.
    pub fn confirm_dropped(&self, id: &NodeId) -> bool {
        let outcome = self.shared.table.write().confirm_dropped(id);
        let topic = &self.shared.topic;

        match outcome {
            DroppedOutcome::Unknown => false,
            DroppedOutcome::DismissalCompleted => {
                debug!(topic = %topic, peer = %id.short(), "Dismissed peer dropped");
                false
            }
            DroppedOutcome::Removed {
                node,
                fell_below_min,
            } => {
                debug!(topic = %topic, peer = %node.id.short(), "Peer dropped");
                if fell_below_min && self.search_running() {
                    self.shared.request_sync(SyncMode::Fast);
                }
                // The connection manager would otherwise keep redialing it.
                if let Some(connector) = self.shared.connector() {
                    connector.remove_peer(&node);
                }
                self.shared.cache_remove(&node.id);
                true
            }
        }
    }

    /// Dial the most recently discovered unexpired candidate.
    ///
    /// Returns the chosen record, or `None` if no candidate is eligible.
    pub fn add_peer_from_table(&self) -> Option<PeerRecord> {
        let connector = self.shared.connector()?;
        let now = self.shared.clock.now();
        let backfill = self
            .shared
            .table
            .write()
            .take_backfill(now, self.shared.expiration);

        if backfill.expired > 0 {
            warn!(topic = %self.shared.topic, expired = backfill.expired, "Pruned expired candidates");
        }
        let record = backfill.chosen?;
        debug!(topic = %self.shared.topic, peer = %record.id().short(), "Dialing candidate from table");
        connector.add_peer(&record.node);
        Some(record)
    }

    /// Connected count has reached max.
    pub fn max_reached(&self) -> bool {
        self.shared.table.read().max_reached()
    }

    /// Connected count is below min.
    pub fn below_min(&self) -> bool {
        self.shared.table.read().below_min()
    }

    /// Current limits.
    pub fn limits(&self) -> Limits {
        self.shared.table.read().limits()
    }

    /// Change the limits. Sync mode follows the new min on the next
    /// connect or drop.
    pub fn set_limits(&self, limits: Limits) {
        self.shared.table.write().set_limits(limits);
    }

    /// Number of connected peers.
    pub fn connected_count(&self) -> usize {
        self.shared.table.read().connected_count()
    }

    /// Number of candidates held.
    pub fn candidate_count(&self) -> usize {
        self.shared.table.read().stats().candidates
    }

    /// Bookkeeping snapshot.
    pub fn stats(&self) -> TopicStats {
        self.shared.table.read().stats()
    }

    /// Whether `id` is connected for this topic.
    pub fn is_connected(&self, id: &NodeId) -> bool {
        self.shared.table.read().is_connected(id)
    }

    /// Whether `id` is held as a candidate.
    pub fn is_candidate(&self, id: &NodeId) -> bool {
        self.shared.table.read().is_candidate(id)
    }

    /// Whether `id` is being dismissed.
    pub fn is_dismissed(&self, id: &NodeId) -> bool {
        self.shared.table.read().is_dismissed(id)
    }

    /// Snapshot of a tracked peer, connected or candidate.
    pub fn peer(&self, id: &NodeId) -> Option<PeerRecord> {
        self.shared.table.read().get(id).cloned()
    }
}

impl std::fmt::Debug for TopicPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicPool")
            .field("topic", &self.shared.topic)
            .field("running", &self.search_running())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Shared {
    fn connector(&self) -> Option<Arc<dyn Connector>> {
        self.connector.read().clone()
    }

    fn process_found(&self, connector: &dyn Connector, node: NodeRecord) {
        let now = self.clock.now();
        let outcome = self.table.write().process_found(node, now);

        match outcome {
            FoundOutcome::Dial(node) => {
                debug!(topic = %self.topic, peer = %node.id.short(), endpoint = %node.endpoint, "Dialing discovered peer");
                connector.add_peer(&node);
            }
            FoundOutcome::Queued => {
                trace!(topic = %self.topic, peer = %node.id.short(), "Topic full, candidate queued");
            }
            FoundOutcome::Refreshed | FoundOutcome::PendingDismissal => {}
        }
    }

    async fn consume(
        self: Arc<Self>,
        connector: Arc<dyn Connector>,
        mut found: mpsc::Receiver<NodeRecord>,
        mut lookup: mpsc::Receiver<bool>,
        mut quit: watch::Receiver<bool>,
    ) {
        let self_id = connector.self_id();
        let mut lookups_open = true;

        loop {
            tokio::select! {
                _ = quit.changed() => break,
                node = found.recv() => match node {
                    Some(node) if node.id == self_id => {}
                    Some(node) => self.process_found(connector.as_ref(), node),
                    None => break,
                },
                started = lookup.recv(), if lookups_open => match started {
                    Some(started) => trace!(topic = %self.topic, started, "Discovery lookup"),
                    None => lookups_open = false,
                },
            }
        }
    }

    fn cached_peers(&self) -> Vec<NodeRecord> {
        let Some(cache) = &self.cache else {
            return Vec::new();
        };
        match cache.peers_for_topic(&self.topic, self.cache_prefetch) {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(topic = %self.topic, error = %e, "Failed to read peer cache");
                Vec::new()
            }
        }
    }

    fn cache_add(&self, node: &NodeRecord) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.add_peer(node, &self.topic) {
                error!(topic = %self.topic, peer = %node.id.short(), error = %e, "Failed to cache peer");
            }
        }
    }

    fn cache_remove(&self, id: &NodeId) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remove_peer(id, &self.topic) {
                error!(topic = %self.topic, peer = %id.short(), error = %e, "Failed to remove cached peer");
            }
        }
    }

    fn request_sync(&self, mode: SyncMode) {
        if let Some(sync) = self.sync.read().as_ref() {
            sync.request(mode);
        }
    }
}

async fn run_discovery(
    connector: Arc<dyn Connector>,
    topic: Topic,
    periods: mpsc::Receiver<Duration>,
    found: mpsc::Sender<NodeRecord>,
    lookup: mpsc::Sender<bool>,
    mut quit: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = quit.changed() => {}
        result = connector.search_topic(topic.clone(), periods, found, lookup) => {
            if let Err(e) = result {
                error!(topic = %topic, error = %e, "Topic search failed");
            }
        }
    }
}
