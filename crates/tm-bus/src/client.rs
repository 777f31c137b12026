use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::bus::MessageBus;
use crate::channel::{Channel, ChannelSuffix};
use crate::stream::Subscription;
use crate::types::{ClientRequest, Envelope, ReplyStatus};
use crate::{BusError, Result};

// ─── Client ──────────────────────────────────────────────────────────────

/// A Tool Meister client: sends actions to the data sink on
/// `<prefix>-from-client` and waits for its verdict on `<prefix>-to-client`.
///
/// The reply subscription is created by the caller (usually well before the
/// data sink exists) so no acknowledgement can slip past unobserved.
pub struct Client {
    bus: Arc<dyn MessageBus>,
    from_client: Channel,
    to_client: Subscription,
}

impl Client {
    pub fn new(bus: Arc<dyn MessageBus>, prefix: &str, to_client: Subscription) -> Self {
        Self {
            bus,
            from_client: Channel::new(prefix, ChannelSuffix::FromClient),
            to_client,
        }
    }

    /// Block until the data sink reports the outcome of its own start-up,
    /// and that of every tool meister it was told to expect.
    ///
    /// Unbounded; the data sink limits how long it waits for tool meisters.
    pub async fn wait_for_startup(&mut self) -> Result<ReplyStatus> {
        self.wait_for_reply("startup").await
    }

    /// Send `action` for `group` and wait for the matching reply.
    ///
    /// Returns `Ok(true)` when the data sink reports success.
    pub async fn request(
        &mut self,
        group: &str,
        directory: Option<&str>,
        action: &str,
        args: Value,
    ) -> Result<bool> {
        let req = ClientRequest::new(action, group, directory.map(str::to_string), args);
        let payload = serde_json::to_string(&req)?;
        let channel = self.from_client.name();
        let listeners = self.bus.publish(&channel, &payload).await?;
        if listeners == 0 {
            error!(action, "no data sink listening on {channel}");
            return Err(BusError::NoSubscribers(channel));
        }
        debug!(action, listeners, "request published");

        let status = self.wait_for_reply(action).await?;
        if !status.is_success() {
            warn!(action, ?status, "data sink reported failure");
        }
        Ok(status.is_success())
    }

    async fn wait_for_reply(&mut self, action: &str) -> Result<ReplyStatus> {
        while let Some(payload) = self.to_client.next().await {
            match Envelope::decode(payload) {
                Envelope::Unrecognized(raw) => {
                    warn!("unrecognized data payload in message, '{raw}'");
                }
                env => match env.reply_for(action) {
                    Some(status) => return Ok(status),
                    None => warn!(expected = action, "unexpected reply, {env:?}"),
                },
            }
        }
        Err(BusError::SubscriptionClosed(
            self.to_client.channel().to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;
    use crate::DEFAULT_CHANNEL_PREFIX;
    use serde_json::json;

    async fn client_on(bus: &MemoryBus) -> Client {
        let to_client = bus
            .subscribe(&Channel::new(DEFAULT_CHANNEL_PREFIX, ChannelSuffix::ToClient).name())
            .await
            .unwrap();
        Client::new(Arc::new(bus.clone()), DEFAULT_CHANNEL_PREFIX, to_client)
    }

    /// Answers every request on from-client with `status`.
    async fn spawn_data_sink(bus: &MemoryBus, status: &'static str) {
        let mut requests = bus
            .subscribe(&Channel::new(DEFAULT_CHANNEL_PREFIX, ChannelSuffix::FromClient).name())
            .await
            .unwrap();
        let bus = bus.clone();
        tokio::spawn(async move {
            while let Some(req) = requests.next().await {
                let reply = json!({"kind": "ds", "action": req["action"], "status": status});
                bus.publish("tool-meister-chan-to-client", &reply.to_string())
                    .await
                    .unwrap();
            }
        });
    }

    #[tokio::test]
    async fn wait_for_startup_skips_noise() {
        let bus = MemoryBus::new();
        let mut client = client_on(&bus).await;
        let chan = "tool-meister-chan-to-client";
        bus.publish(chan, r#"{"hello":"world"}"#).await.unwrap();
        bus.publish(chan, r#"{"kind":"tm","action":"startup","status":"success"}"#)
            .await
            .unwrap();
        bus.publish(chan, r#"{"kind":"ds","action":"init","status":"success"}"#)
            .await
            .unwrap();
        bus.publish(chan, r#"{"kind":"ds","action":"startup","status":"failure"}"#)
            .await
            .unwrap();

        let status = client.wait_for_startup().await.unwrap();
        assert_eq!(status, ReplyStatus::Failure);
    }

    #[tokio::test]
    async fn request_round_trip_success() {
        let bus = MemoryBus::new();
        spawn_data_sink(&bus, "success").await;
        let mut client = client_on(&bus).await;

        let ok = client
            .request("default", Some("/run/tools-default"), "init", Value::Null)
            .await
            .unwrap();
        assert!(ok);

        let sent = bus.published("tool-meister-chan-from-client");
        let req: ClientRequest = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(req.action, "init");
        assert_eq!(req.directory.as_deref(), Some("/run/tools-default"));
    }

    #[tokio::test]
    async fn request_failure_status_is_false() {
        let bus = MemoryBus::new();
        spawn_data_sink(&bus, "failure").await;
        let mut client = client_on(&bus).await;
        let ok = client
            .request("default", None, "sysinfo", json!(["block"]))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn request_without_listener_errors() {
        let bus = MemoryBus::new();
        let mut client = client_on(&bus).await;
        let err = client
            .request("default", None, "init", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoSubscribers(_)));
    }
}
