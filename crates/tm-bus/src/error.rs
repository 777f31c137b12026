use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("unable to connect to redis server at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("redis {op} failed on '{key}': {source}")]
    Command {
        op: &'static str,
        key: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("subscription to '{0}' closed")]
    SubscriptionClosed(String),

    #[error("nobody is listening on '{0}'")]
    NoSubscribers(String),
}

impl BusError {
    pub(crate) fn command(op: &'static str, key: &str, source: redis::RedisError) -> Self {
        Self::Command {
            op,
            key: key.to_string(),
            source,
        }
    }
}
