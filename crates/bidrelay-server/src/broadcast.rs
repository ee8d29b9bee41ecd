use std::sync::Arc;

use serde_json::Value;

use crate::client::ClientRegistry;

/// Fans messages out to every open subscriber connection, best-effort.
///
/// Broadcast is the only delivery primitive: there is no per-recipient
/// addressing, and no delivery acknowledgment is solicited or recorded.
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Serialize `payload` to its wire form exactly once, then deliver it
    /// to every open subscriber. Returns the number of queued deliveries.
    pub fn broadcast(&self, payload: &Value) -> usize {
        match serde_json::to_string(payload) {
            Ok(json) => self.broadcast_raw(&json),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to serialize broadcast payload");
                0
            }
        }
    }

    /// Deliver an already-serialized payload verbatim to every open
    /// subscriber. The external channel path uses this so received
    /// messages are forwarded unmodified.
    pub fn broadcast_raw(&self, payload: &str) -> usize {
        self.registry.broadcast_all(payload)
    }
}
