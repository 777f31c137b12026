//! `tm-bus`: the message bus the Tool Meister sub-system rendezvous through.
//!
//! Every component (the start command, the Tool Data Sink, each Tool
//! Meister) talks through one Redis instance: keyed JSON blobs carry the
//! start-up parameters, and a handful of pub/sub channels carry commands and
//! acknowledgements.
//!
//! # Architecture
//!
//! ```text
//! MessageBus        ← publish / set_blob / get_blob / delete_blob / subscribe
//!     │                 RedisBus (real) or MemoryBus (testkit)
//!     ▼
//! Subscription      ← implements futures::Stream<Item = serde_json::Value>
//!     │                 background forwarder + mpsc channel
//!     ▼
//! Envelope enum     ← typed decode of {kind, action, status}; unknown
//!     │                 payloads surface as Envelope::Unrecognized
//!     ▼
//! Client            ← "send an action, wait for the data sink's reply"
//! ```
//!
//! # Channels
//!
//! | Channel            | Publisher      | Subscriber     |
//! |--------------------|----------------|----------------|
//! | `<P>-to-client`    | data sink      | client         |
//! | `<P>-from-client`  | client         | data sink      |
//! | `<P>-to-tms`       | data sink      | tool meisters  |
//! | `<P>-from-tms`     | tool meisters  | data sink      |
//! | `<P>-to-logging`   | everybody      | data sink      |

pub mod bus;
pub mod channel;
pub mod client;
pub mod error;
#[cfg(any(test, feature = "testkit"))]
pub mod memory;
pub mod redis_bus;
pub mod stream;
pub mod types;

pub use bus::MessageBus;
pub use channel::{Channel, ChannelSuffix, DEFAULT_CHANNEL_PREFIX, DEFAULT_TM_DATA_KEY};
pub use client::Client;
pub use error::BusError;
#[cfg(any(test, feature = "testkit"))]
pub use memory::MemoryBus;
pub use redis_bus::RedisBus;
pub use stream::Subscription;
pub use types::{ClientRequest, Envelope, ReplyStatus};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, BusError>;
