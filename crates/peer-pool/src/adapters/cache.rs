//! # Peer Cache
//!
//! Durable `(topic, node id) -> NodeRecord` map used to seed topic searches
//! after a restart.
//!
//! ## Key Layout
//!
//! ```text
//! [ PEERS_CACHE_NAMESPACE | topic_len (u16 BE) | topic bytes | node id (32) ]
//! ```
//!
//! The length prefix keeps topic `a` out of the key range of topic `ab`.
//! Values are bincode-encoded `NodeRecord`s.
//!
//! Reads hit the store every time; there is no in-memory layer.

use std::sync::Arc;
use tracing::warn;

use crate::domain::{CacheError, NodeId, NodeRecord, Topic};
use crate::ports::outbound::KeyValueStore;

/// Key namespace of cached peers.
pub const PEERS_CACHE_NAMESPACE: u8 = 0x00;

/// Peer cache over any [`KeyValueStore`].
pub struct PeerCache {
    store: Arc<dyn KeyValueStore>,
}

impl PeerCache {
    /// Create a cache backed by `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Insert or replace the record of `node` under `topic`.
    pub fn add_peer(&self, node: &NodeRecord, topic: &Topic) -> Result<(), CacheError> {
        let value = bincode::serialize(node)?;
        self.store.put(&peer_key(topic, &node.id)?, &value)?;
        Ok(())
    }

    /// Delete the record of `id` under `topic`. Absent keys are not an error.
    pub fn remove_peer(&self, id: &NodeId, topic: &Topic) -> Result<(), CacheError> {
        self.store.delete(&peer_key(topic, id)?)?;
        Ok(())
    }

    /// Up to `limit` cached records for `topic`.
    ///
    /// Records come back in node id byte order, not by recency. Entries that
    /// fail to decode are skipped.
    pub fn peers_for_topic(&self, topic: &Topic, limit: usize) -> Result<Vec<NodeRecord>, CacheError> {
        let prefix = topic_prefix(topic)?;
        let entries = self.store.prefix_scan(&prefix, limit)?;

        let mut nodes = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match bincode::deserialize::<NodeRecord>(&value) {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    warn!(
                        topic = %topic,
                        key = %hex::encode(&key),
                        error = %e,
                        "Skipping undecodable cached peer"
                    );
                }
            }
        }
        Ok(nodes)
    }
}

impl std::fmt::Debug for PeerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerCache").finish_non_exhaustive()
    }
}

fn topic_prefix(topic: &Topic) -> Result<Vec<u8>, CacheError> {
    let name = topic.as_bytes();
    let len = u16::try_from(name.len()).map_err(|_| CacheError::TopicTooLong { len: name.len() })?;

    let mut key = Vec::with_capacity(1 + 2 + name.len() + NodeId::LEN);
    key.push(PEERS_CACHE_NAMESPACE);
    key.extend_from_slice(&len.to_be_bytes());
    key.extend_from_slice(name);
    Ok(key)
}

fn peer_key(topic: &Topic, id: &NodeId) -> Result<Vec<u8>, CacheError> {
    let mut key = topic_prefix(topic)?;
    key.extend_from_slice(id.as_bytes());
    Ok(key)
}
