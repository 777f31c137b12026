use std::fmt;

use async_trait::async_trait;
use futures::StreamExt;
use redis::{aio::ConnectionManager, AsyncCommands};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::bus::MessageBus;
use crate::stream::{decode_payload, Subscription};
use crate::{BusError, Result};

/// [`MessageBus`] backed by a Redis server.
///
/// Commands go through a shared [`ConnectionManager`]; every subscription
/// opens its own pub/sub connection, drained by a background task.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
    address: String,
}

impl fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBus")
            .field("address", &self.address)
            .finish()
    }
}

impl RedisBus {
    /// Connect to database 0 of the Redis server at `host:port`.
    ///
    /// Creating the client object is not enough to know the server is
    /// there; the connection manager performs the initial handshake.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let address = format!("{}:{port}", url_host(host));
        let url = format!("redis://{address}/0");
        info!("connecting to redis server at {address}");

        let client = redis::Client::open(url.as_str()).map_err(|source| BusError::Connect {
            address: address.clone(),
            source,
        })?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|source| BusError::Connect {
                address: address.clone(),
                source,
            })?;

        Ok(Self {
            client,
            conn,
            address,
        })
    }
}

/// IPv6 literals must be bracketed inside a URL.
fn url_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn
            .publish(channel, payload)
            .await
            .map_err(|e| BusError::command("PUBLISH", channel, e))?;
        debug!(channel, count, "published");
        Ok(count)
    }

    async fn set_blob(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| BusError::command("SET", key, e))
    }

    async fn get_blob(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| BusError::command("GET", key, e))
    }

    async fn delete_blob(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| BusError::command("DEL", key, e))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|source| BusError::Connect {
                address: self.address.clone(),
                source,
            })?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BusError::command("SUBSCRIBE", channel, e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let name = channel.to_string();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let raw: String = match msg.get_payload() {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(channel = %name, "unreadable payload: {e}");
                        continue;
                    }
                };
                let Some(value) = decode_payload(&name, &raw) else {
                    continue;
                };
                if tx.send(value).is_err() {
                    break; // Subscription dropped
                }
            }
            debug!(channel = %name, "subscription forwarder exiting");
        });

        Ok(Subscription::new(channel, rx))
    }
}
