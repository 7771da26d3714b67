//! Callback interface toward the upper messaging layer.

use async_trait::async_trait;

use super::space::Id;

/// Hooks the upper layer (the topic multicast overlay) registers with the
/// routing core. All methods default to no-ops so embedders implement only
/// what they consume.
#[async_trait]
pub trait AppCallback: Send + Sync {
    /// An application message routed here, keyed by its upper layer header.
    async fn deliver(&self, meta: Vec<u8>, data: Vec<u8>) {
        let _ = (meta, data);
    }

    /// One heartbeat period elapsed on the active overlay.
    async fn beat(&self) {}

    /// A monitored topic member produced no pings within the death
    /// threshold.
    async fn member_dead(&self, topic: Id, node: Id) {
        let _ = (topic, node);
    }
}
