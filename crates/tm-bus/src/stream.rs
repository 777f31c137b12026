use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

// ─── Subscription ────────────────────────────────────────────────────────

/// An endless stream of JSON payloads received on one channel.
///
/// Backed by an unbounded mpsc channel fed by the bus implementation. The
/// subscription is registered with the server before the value is handed
/// out, so anything published afterwards is observed. The stream only ends
/// when the underlying connection goes away; restarting it means
/// subscribing again.
///
/// Payloads that are not valid JSON are logged and dropped before they get
/// here (see [`decode_payload`]).
pub struct Subscription {
    channel: String,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub(crate) fn new(channel: impl Into<String>, rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    /// Name of the channel this subscription listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish()
    }
}

impl Stream for Subscription {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Parse a raw channel payload, logging and discarding anything that is not
/// JSON.
pub(crate) fn decode_payload(channel: &str, raw: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(channel, payload = raw, "ignoring non-JSON payload: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn yields_values_in_order_then_ends() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new("chan", rx);
        tx.send(json!({"a": 1})).unwrap();
        tx.send(json!({"a": 2})).unwrap();
        drop(tx);

        assert_eq!(sub.next().await, Some(json!({"a": 1})));
        assert_eq!(sub.next().await, Some(json!({"a": 2})));
        assert_eq!(sub.next().await, None);
        assert_eq!(sub.channel(), "chan");
    }

    #[test]
    fn decode_payload_skips_garbage() {
        assert_eq!(decode_payload("c", r#"{"ok":true}"#), Some(json!({"ok": true})));
        assert_eq!(decode_payload("c", "pbench-tool-meister-start - probe"), None);
    }
}
