//! # Signal Adapters
//!
//! Render [`Signal`]s as JSON envelopes for the host application:
//!
//! ```json
//! {"type": "discovery.summary", "event": [{"id": "ab12..", "address": "10.0.0.1:30303"}]}
//! ```

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::domain::NodeRecord;
use crate::ports::{Signal, SignalSink};

/// Envelope type of [`Signal::DiscoveryStarted`].
pub const EVENT_DISCOVERY_STARTED: &str = "discovery.started";
/// Envelope type of [`Signal::DiscoveryStopped`].
pub const EVENT_DISCOVERY_STOPPED: &str = "discovery.stopped";
/// Envelope type of [`Signal::DiscoverySummary`].
pub const EVENT_DISCOVERY_SUMMARY: &str = "discovery.summary";

/// JSON shape delivered to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalEnvelope {
    /// Signal name.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Signal payload, `null` when there is none.
    pub event: Value,
}

/// One connected peer in a discovery summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSummary {
    /// Hex node id.
    pub id: String,
    /// Session address.
    pub address: String,
}

impl From<&NodeRecord> for PeerSummary {
    fn from(node: &NodeRecord) -> Self {
        Self {
            id: hex::encode(node.id.as_bytes()),
            address: node.endpoint.tcp_addr().to_string(),
        }
    }
}

impl SignalEnvelope {
    /// Build the envelope for a signal.
    pub fn from_signal(signal: &Signal) -> Result<Self, serde_json::Error> {
        let envelope = match signal {
            Signal::DiscoveryStarted => Self {
                kind: EVENT_DISCOVERY_STARTED,
                event: Value::Null,
            },
            Signal::DiscoveryStopped => Self {
                kind: EVENT_DISCOVERY_STOPPED,
                event: Value::Null,
            },
            Signal::DiscoverySummary(peers) => {
                let summary: Vec<PeerSummary> = peers.iter().map(PeerSummary::from).collect();
                Self {
                    kind: EVENT_DISCOVERY_SUMMARY,
                    event: serde_json::to_value(summary)?,
                }
            }
        };
        Ok(envelope)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Delivers JSON envelopes to a host callback.
pub struct CallbackSignalSink {
    callback: Box<dyn Fn(String) + Send + Sync>,
}

impl CallbackSignalSink {
    /// Wrap a callback. It must return quickly.
    pub fn new(callback: impl Fn(String) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl SignalSink for CallbackSignalSink {
    fn send(&self, signal: Signal) {
        match SignalEnvelope::from_signal(&signal).and_then(|envelope| envelope.to_json()) {
            Ok(json) => (self.callback)(json),
            Err(e) => warn!(error = %e, ?signal, "Failed to encode signal"),
        }
    }
}

/// Discards every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSignalSink;

impl SignalSink for NoOpSignalSink {
    fn send(&self, _signal: Signal) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Endpoint, NodeId};
    use parking_lot::Mutex;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    #[test]
    fn test_started_envelope() {
        let json = SignalEnvelope::from_signal(&Signal::DiscoveryStarted)
            .unwrap()
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"type":"discovery.started","event":null}"#);
    }

    #[test]
    fn test_summary_envelope_lists_peers() {
        let node = NodeRecord::new(
            NodeId::new([0xab; 32]),
            Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 30303, 30304),
        );
        let envelope = SignalEnvelope::from_signal(&Signal::DiscoverySummary(vec![node])).unwrap();

        assert_eq!(envelope.kind, EVENT_DISCOVERY_SUMMARY);
        assert_eq!(envelope.event[0]["id"], "ab".repeat(32));
        assert_eq!(envelope.event[0]["address"], "10.0.0.1:30304");
    }

    #[test]
    fn test_callback_sink_receives_json() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = CallbackSignalSink::new({
            let received = received.clone();
            move |json| received.lock().push(json)
        });

        sink.send(Signal::DiscoveryStopped);
        sink.send(Signal::DiscoverySummary(Vec::new()));

        let received = received.lock();
        assert_eq!(received.len(), 2);
        assert!(received[0].contains(EVENT_DISCOVERY_STOPPED));
        assert!(received[1].contains(r#""event":[]"#));
    }
}
