//! In-process [`MessageBus`] used by tests.
//!
//! Mirrors the observable Redis behaviour the orchestrator relies on:
//! `publish` reports how many live subscribers received the message and
//! nothing is buffered for subscribers that attach later.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::bus::MessageBus;
use crate::stream::{decode_payload, Subscription};
use crate::Result;

#[derive(Default)]
struct Inner {
    blobs: BTreeMap<String, String>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Value>>>,
    published: Vec<(String, String)>,
}

#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only happens after a test already panicked.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.lock().blobs.keys().cloned().collect()
    }

    pub fn blob(&self, key: &str) -> Option<String> {
        self.lock().blobs.get(key).cloned()
    }

    /// Every payload published on `channel`, oldest first.
    pub fn published(&self, channel: &str) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock()
            .subscribers
            .get(channel)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let mut inner = self.lock();
        inner
            .published
            .push((channel.to_string(), payload.to_string()));
        let Some(subs) = inner.subscribers.get_mut(channel) else {
            return Ok(0);
        };
        subs.retain(|s| !s.is_closed());
        let count = subs.len();
        if let Some(value) = decode_payload(channel, payload) {
            for s in subs.iter() {
                let _ = s.send(value.clone());
            }
        }
        Ok(count)
    }

    async fn set_blob(&self, key: &str, value: &str) -> Result<()> {
        self.lock().blobs.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().blobs.get(key).cloned())
    }

    async fn delete_blob(&self, key: &str) -> Result<()> {
        self.lock().blobs.remove(key);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(channel, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn publish_counts_live_subscribers() {
        let bus = MemoryBus::new();
        assert_eq!(bus.publish("c", "{}").await.unwrap(), 0);

        let mut sub = bus.subscribe("c").await.unwrap();
        assert_eq!(bus.publish("c", r#"{"n":1}"#).await.unwrap(), 1);
        assert_eq!(sub.next().await, Some(json!({"n": 1})));

        drop(sub);
        assert_eq!(bus.publish("c", "{}").await.unwrap(), 0);
        assert_eq!(bus.published("c").len(), 3);
    }

    #[tokio::test]
    async fn messages_before_subscribe_are_lost() {
        let bus = MemoryBus::new();
        bus.publish("c", r#"{"early":true}"#).await.unwrap();
        let mut sub = bus.subscribe("c").await.unwrap();
        bus.publish("c", r#"{"late":true}"#).await.unwrap();
        assert_eq!(sub.next().await, Some(json!({"late": true})));
    }

    #[tokio::test]
    async fn blobs_set_get_delete() {
        let bus = MemoryBus::new();
        bus.set_blob("tm-default-h1", "{}").await.unwrap();
        assert_eq!(
            bus.get_blob("tm-default-h1").await.unwrap().as_deref(),
            Some("{}")
        );
        bus.delete_blob("tm-default-h1").await.unwrap();
        assert_eq!(bus.get_blob("tm-default-h1").await.unwrap(), None);
        assert!(bus.keys().is_empty());
    }
}
