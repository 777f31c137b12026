use async_trait::async_trait;

use crate::stream::Subscription;
use crate::Result;

/// The operations the Tool Meister sub-system needs from its pub/sub
/// key-value store.
///
/// `publish` is fire-and-forget: the returned subscriber count is the only
/// signal of whether anybody is listening, and the store keeps nothing for
/// subscribers that attach later.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `channel`, returning the number of subscribers
    /// that received it.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    async fn set_blob(&self, key: &str, value: &str) -> Result<()>;

    async fn get_blob(&self, key: &str) -> Result<Option<String>>;

    async fn delete_blob(&self, key: &str) -> Result<()>;

    /// Subscribe to `channel`. The subscription is active on return.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}
