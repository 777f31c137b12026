use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Envelope ────────────────────────────────────────────────────────────

/// Status field of a data sink reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    Failure,
    /// Any status string this crate does not know about; treated as failure.
    #[serde(other)]
    Other,
}

impl ReplyStatus {
    pub fn is_success(self) -> bool {
        self == ReplyStatus::Success
    }
}

/// Wire shape of a reply; only used to drive the decode.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum WireEnvelope {
    Ds { action: String, status: ReplyStatus },
}

/// A message received on a client-facing channel.
///
/// The bus does not enforce a schema, so anything that is not a well-formed
/// `{"kind": "ds", "action": …, "status": …}` reply decodes to
/// [`Envelope::Unrecognized`] carrying the raw payload for logging.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    DataSink { action: String, status: ReplyStatus },
    Unrecognized(Value),
}

impl Envelope {
    pub fn decode(payload: Value) -> Self {
        match serde_json::from_value::<WireEnvelope>(payload.clone()) {
            Ok(WireEnvelope::Ds { action, status }) => Envelope::DataSink { action, status },
            Err(_) => Envelope::Unrecognized(payload),
        }
    }

    /// Returns the reply status when this is a data sink reply for `action`.
    pub fn reply_for(&self, action: &str) -> Option<ReplyStatus> {
        match self {
            Envelope::DataSink { action: a, status } if a == action => Some(*status),
            _ => None,
        }
    }
}

// ─── ClientRequest ───────────────────────────────────────────────────────

/// A request a client publishes on `<prefix>-from-client`.
///
/// Fields are declared in sorted order so the encoded JSON matches what the
/// data sink logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRequest {
    pub action: String,
    pub args: Value,
    pub directory: Option<String>,
    pub group: String,
}

impl ClientRequest {
    pub fn new(
        action: impl Into<String>,
        group: impl Into<String>,
        directory: Option<String>,
        args: Value,
    ) -> Self {
        Self {
            action: action.into(),
            args,
            directory,
            group: group.into(),
        }
    }

    /// The "terminate" request sent during rollback so that an already
    /// running data sink tears down its tool meisters.
    pub fn terminate(group: impl Into<String>) -> Self {
        Self::new(
            "terminate",
            group,
            None,
            serde_json::json!({ "interrupt": false }),
        )
    }
}
