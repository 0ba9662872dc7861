//! # Peer Pool
//!
//! Owns one [`TopicPool`] per configured topic and routes the connection
//! manager's connect and drop events to all of them.
//!
//! ## Discovery Policy
//!
//! - With `stop_on_max`, discovery is shut down once every topic is full,
//!   or when `discovery_timeout` elapses after a (re)start.
//! - A drop that leaves an idle topic below its min restarts discovery.
//!   A failed restart is retried after [`DISCOVERY_RESTART_RETRY`].
//! - Every confirmed drop is backfilled from the topic's candidates.

use parking_lot::RwLock;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tracing::{debug, error, info, warn};

use crate::adapters::{MonotonicTimeSource, NoOpSignalSink, PeerCache, PeerPoolConfig};
use crate::domain::{Limits, NodeId, PeerPoolError, Topic, DISCOVERY_RESTART_RETRY};
use crate::ports::{Connector, PeerEvent, Signal, SignalSink, TimeSource};
use crate::service::expired;
use crate::service::topic_pool::TopicPool;

/// Top-level discovery orchestrator.
pub struct PeerPool {
    config: PeerPoolConfig,
    cache: Option<Arc<PeerCache>>,
    signals: Arc<dyn SignalSink>,
    clock: Arc<dyn TimeSource>,
    topics: RwLock<Vec<Arc<TopicPool>>>,
    running: AtomicBool,
    state: Mutex<Option<Routing>>,
}

struct Routing {
    quit: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeerPool {
    /// Create a stopped pool.
    pub fn new(config: PeerPoolConfig) -> Self {
        Self {
            config,
            cache: None,
            signals: Arc::new(NoOpSignalSink),
            clock: Arc::new(MonotonicTimeSource::new()),
            topics: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            state: Mutex::new(None),
        }
    }

    /// Share `cache` between all topic pools.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<PeerCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Deliver discovery signals to `signals`.
    #[must_use]
    pub fn with_signal_sink(mut self, signals: Arc<dyn SignalSink>) -> Self {
        self.signals = signals;
        self
    }

    /// Use `clock` for discovery timestamps.
    #[must_use]
    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &PeerPoolConfig {
        &self.config
    }

    /// Start a search per configured topic and begin routing peer events.
    ///
    /// No-op if already started. Fails with
    /// [`PeerPoolError::DiscoveryUnavailable`] if discovery is not running;
    /// searches started before a failure are stopped again.
    pub async fn start(&self, connector: Arc<dyn Connector>) -> Result<(), PeerPoolError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }
        if !connector.running() {
            return Err(PeerPoolError::DiscoveryUnavailable);
        }

        // Subscribe before any dial goes out so no connect event is missed.
        let events = connector.subscribe_events();

        let topics: Vec<Arc<TopicPool>> = self
            .config
            .topics
            .iter()
            .map(|(topic, limits)| Arc::new(self.build_topic_pool(topic.clone(), *limits)))
            .collect();

        for (started, topic) in topics.iter().enumerate() {
            if let Err(e) = topic.start_search(connector.clone()).await {
                for pool in &topics[..started] {
                    pool.stop_search().await;
                }
                return Err(e);
            }
        }

        self.signals.send(Signal::DiscoveryStarted);
        info!(topics = topics.len(), stop_on_max = self.config.stop_on_max, "Peer pool started");

        let (quit, quit_rx) = watch::channel(false);
        let router = Router {
            topics: topics.clone(),
            connector,
            signals: self.signals.clone(),
            stop_on_max: self.config.stop_on_max,
            discovery_timeout: self.config.discovery_timeout,
            events,
            quit: quit_rx,
            deadline: None,
            retry: None,
        };
        let handle = tokio::spawn(router.run());

        *self.topics.write() = topics;
        *state = Some(Routing { quit, handle });
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop routing events, stop every topic search and wait for all tasks.
    ///
    /// Idempotent; safe on a pool that never started.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(routing) = state.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);

        let _ = routing.quit.send(true);
        if let Err(e) = routing.handle.await {
            error!(error = %e, "Peer event router panicked");
        }

        let topics = std::mem::take(&mut *self.topics.write());
        for topic in topics {
            topic.stop_search().await;
        }
        info!("Peer pool stopped");
    }

    /// Whether the pool is started.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Topics of the running pool.
    pub fn topics(&self) -> Vec<Topic> {
        self.topics.read().iter().map(|t| t.topic().clone()).collect()
    }

    /// Topic pool of a running pool.
    pub fn topic_pool(&self, topic: &Topic) -> Option<Arc<TopicPool>> {
        self.topics.read().iter().find(|t| t.topic() == topic).cloned()
    }

    fn build_topic_pool(&self, topic: Topic, limits: Limits) -> TopicPool {
        let pool = TopicPool::new(topic, limits, self.config.sync_periods())
            .with_time_source(self.clock.clone())
            .with_expiration(self.config.expiration_period)
            .with_cache_prefetch(self.config.cache_prefetch);
        match &self.cache {
            Some(cache) => pool.with_cache(cache.clone()),
            None => pool,
        }
    }
}

impl std::fmt::Debug for PeerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerPool")
            .field("config", &self.config)
            .field("topics", &self.topics())
            .finish_non_exhaustive()
    }
}

/// Event routing task.
struct Router {
    topics: Vec<Arc<TopicPool>>,
    connector: Arc<dyn Connector>,
    signals: Arc<dyn SignalSink>,
    stop_on_max: bool,
    discovery_timeout: Duration,
    events: broadcast::Receiver<PeerEvent>,
    quit: watch::Receiver<bool>,
    deadline: Option<Pin<Box<Sleep>>>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl Router {
    async fn run(mut self) {
        self.arm_deadline();

        loop {
            tokio::select! {
                _ = self.quit.changed() => break,
                _ = expired(&mut self.deadline) => {
                    self.deadline = None;
                    info!(timeout = ?self.discovery_timeout, "Discovery timed out");
                    self.stop_discovery().await;
                }
                _ = expired(&mut self.retry) => {
                    self.retry = None;
                    if self.needs_restart() {
                        self.restart_discovery().await;
                    }
                }
                event = self.events.recv() => match event {
                    Ok(PeerEvent::Connected { id }) => self.handle_connected(id).await,
                    Ok(PeerEvent::Dropped { id, error }) => self.handle_dropped(id, error).await,
                    Err(RecvError::Lagged(count)) => {
                        warn!(lagged = count, "Peer event subscriber lagged, events dropped");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Peer event stream closed");
                        break;
                    }
                },
            }
        }
    }

    async fn handle_connected(&mut self, id: NodeId) {
        debug!(peer = %id.short(), "Peer connected");
        for topic in &self.topics {
            topic.confirm_added(&id);
        }

        self.send_summary();
        if self.stop_on_max && self.topics.iter().all(|topic| topic.max_reached()) {
            info!("Every topic reached its max");
            self.stop_discovery().await;
        }
    }

    async fn handle_dropped(&mut self, id: NodeId, reason: Option<String>) {
        debug!(peer = %id.short(), reason = reason.as_deref().unwrap_or("none"), "Peer dropped");
        for topic in &self.topics {
            if topic.confirm_dropped(&id) {
                if let Some(record) = topic.add_peer_from_table() {
                    debug!(topic = %topic.topic(), peer = %record.id().short(), "Backfilling dropped slot");
                }
            }
        }

        if self.retry.is_none() && self.needs_restart() {
            self.restart_discovery().await;
        }
        self.send_summary();
    }

    fn needs_restart(&self) -> bool {
        self.topics
            .iter()
            .any(|topic| topic.below_min() && !topic.search_running())
    }

    async fn restart_discovery(&mut self) {
        if !self.connector.running() {
            if let Err(e) = self.connector.start() {
                error!(error = %e, retry = ?DISCOVERY_RESTART_RETRY, "Failed to restart discovery");
                self.retry = Some(Box::pin(sleep(DISCOVERY_RESTART_RETRY)));
                return;
            }
        }

        for topic in &self.topics {
            if !topic.below_min() || topic.search_running() {
                continue;
            }
            if let Err(e) = topic.start_search(self.connector.clone()).await {
                error!(topic = %topic.topic(), error = %e, "Failed to restart topic search");
                self.retry = Some(Box::pin(sleep(DISCOVERY_RESTART_RETRY)));
                return;
            }
        }

        info!("Discovery restarted");
        self.signals.send(Signal::DiscoveryStarted);
        self.arm_deadline();
    }

    async fn stop_discovery(&mut self) {
        if !self.connector.running() {
            return;
        }

        for topic in &self.topics {
            topic.stop_search().await;
        }
        if let Err(e) = self.connector.stop() {
            error!(error = %e, "Failed to stop discovery");
        }
        self.deadline = None;

        info!("Discovery stopped");
        self.signals.send(Signal::DiscoveryStopped);
    }

    fn arm_deadline(&mut self) {
        self.deadline = if self.stop_on_max && !self.discovery_timeout.is_zero() {
            Some(Box::pin(sleep(self.discovery_timeout)))
        } else {
            None
        };
    }

    fn send_summary(&self) {
        self.signals
            .send(Signal::DiscoverySummary(self.connector.peers_info()));
    }
}
