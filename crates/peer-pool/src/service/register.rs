//! # Register
//!
//! Advertises this node under a set of topics so other nodes can find it.
//! One task per topic; a failing topic does not affect the others.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::domain::{PeerPoolError, Topic};
use crate::ports::Connector;

/// Topic advertiser.
#[derive(Debug)]
pub struct Register {
    topics: Vec<Topic>,
    state: Mutex<Option<Advertising>>,
}

#[derive(Debug)]
struct Advertising {
    quit: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Register {
    /// Create a register for `topics`.
    pub fn new(topics: Vec<Topic>) -> Self {
        Self {
            topics,
            state: Mutex::new(None),
        }
    }

    /// Topics advertised.
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Start one advertisement task per topic.
    ///
    /// No-op if already started. Fails with
    /// [`PeerPoolError::DiscoveryUnavailable`] if discovery is not running.
    pub async fn start(&self, connector: Arc<dyn Connector>) -> Result<(), PeerPoolError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }
        if !connector.running() {
            return Err(PeerPoolError::DiscoveryUnavailable);
        }

        let (quit, quit_rx) = watch::channel(false);
        let tasks = self
            .topics
            .iter()
            .cloned()
            .map(|topic| tokio::spawn(advertise(connector.clone(), topic, quit_rx.clone())))
            .collect();

        info!(topics = self.topics.len(), "Topic registration started");
        *state = Some(Advertising { quit, tasks });
        Ok(())
    }

    /// Stop advertising and wait for every task to exit. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(advertising) = state.take() else {
            return;
        };

        let _ = advertising.quit.send(true);
        for task in advertising.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Registration task panicked");
            }
        }
        info!("Topic registration stopped");
    }
}

async fn advertise(connector: Arc<dyn Connector>, topic: Topic, mut quit: watch::Receiver<bool>) {
    let stop = quit.clone();
    tokio::select! {
        _ = quit.changed() => {}
        result = connector.register_topic(topic.clone(), stop) => match result {
            Ok(()) => debug!(topic = %topic, "Registration ended"),
            Err(e) => error!(topic = %topic, error = %e, "Failed to register topic"),
        },
    }
}
