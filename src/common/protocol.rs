//! Operation channel protocol between workers and the primary coordinator
//!
//! Frames are newline-delimited JSON. A worker sends an operation frame
//!
//! ```text
//! {"id":7,"kind":"getById","payload":"0f8fad5b-d9cb-469f-a165-70867728950e"}
//! ```
//!
//! and the coordinator answers with exactly one reply frame carrying the same id
//!
//! ```text
//! {"id":7,"kind":"getById","ok":true,"payload":{"id":"0f8f...","username":"A","age":1,"hobbies":[]}}
//! ```
//!
//! Workers run many requests concurrently over one channel, so replies are
//! matched by `id`, never by arrival order.

use crate::common::user::{User, UserAttributes};
use crate::common::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Correlation token carried by both envelopes of one round trip.
pub type CorrelationId = u64;

/// Kind names as they appear on the wire.
pub const KIND_LIST: &str = "list";
pub const KIND_GET_BY_ID: &str = "getById";
pub const KIND_CREATE: &str = "create";
pub const KIND_UPDATE: &str = "update";
pub const KIND_REMOVE: &str = "remove";

/// A data operation a worker asks the coordinator to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    List,
    GetById(Uuid),
    Create(UserAttributes),
    Update(User),
    Remove(Uuid),
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::List => KIND_LIST,
            Operation::GetById(_) => KIND_GET_BY_ID,
            Operation::Create(_) => KIND_CREATE,
            Operation::Update(_) => KIND_UPDATE,
            Operation::Remove(_) => KIND_REMOVE,
        }
    }
}

/// Worker -> coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationEnvelope {
    pub id: CorrelationId,
    pub operation: Operation,
}

/// What the coordinator learned from a frame it could not decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// 0 when the frame carried no usable id
    pub id: CorrelationId,
    pub kind: String,
    pub reason: String,
}

/// Loose shape of an operation frame, before the kind/payload pairing is checked.
#[derive(Debug, Serialize, Deserialize)]
struct RawOperation {
    #[serde(default)]
    id: Option<CorrelationId>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

impl OperationEnvelope {
    pub fn new(id: CorrelationId, operation: Operation) -> Self {
        Self { id, operation }
    }

    /// Encode as one frame, without the trailing newline.
    pub fn encode(&self) -> Result<String> {
        let payload = match &self.operation {
            Operation::List => None,
            Operation::GetById(id) | Operation::Remove(id) => Some(serde_json::to_value(id)?),
            Operation::Create(attrs) => Some(serde_json::to_value(attrs)?),
            Operation::Update(user) => Some(serde_json::to_value(user)?),
        };
        let raw = RawOperation {
            id: Some(self.id),
            kind: Some(self.operation.kind().to_string()),
            payload,
        };
        Ok(serde_json::to_string(&raw)?)
    }

    /// Decode one frame. Anything that is not a well-formed operation becomes
    /// a [`Rejection`], keeping as much of the id and kind as could be read.
    pub fn decode(frame: &str) -> std::result::Result<Self, Rejection> {
        let raw: RawOperation = serde_json::from_str(frame).map_err(|e| Rejection {
            id: 0,
            kind: String::new(),
            reason: format!("unparsable frame: {}", e),
        })?;

        let kind = raw.kind.unwrap_or_default();
        let reject = |reason: String| Rejection {
            id: raw.id.unwrap_or(0),
            kind: kind.clone(),
            reason,
        };

        let Some(id) = raw.id else {
            return Err(reject("missing id".to_string()));
        };

        let operation = match (kind.as_str(), raw.payload) {
            (KIND_LIST, None) => Operation::List,
            (KIND_GET_BY_ID, Some(p)) => Operation::GetById(
                serde_json::from_value(p).map_err(|e| reject(format!("bad id payload: {}", e)))?,
            ),
            (KIND_REMOVE, Some(p)) => Operation::Remove(
                serde_json::from_value(p).map_err(|e| reject(format!("bad id payload: {}", e)))?,
            ),
            (KIND_CREATE, Some(p)) => Operation::Create(
                serde_json::from_value(p)
                    .map_err(|e| reject(format!("bad attributes payload: {}", e)))?,
            ),
            (KIND_UPDATE, Some(p)) => Operation::Update(
                serde_json::from_value(p)
                    .map_err(|e| reject(format!("bad record payload: {}", e)))?,
            ),
            (KIND_LIST | KIND_GET_BY_ID | KIND_REMOVE | KIND_CREATE | KIND_UPDATE, _) => {
                return Err(reject(format!("payload does not match kind '{}'", kind)));
            }
            _ => return Err(reject(format!("unknown kind '{}'", kind))),
        };

        Ok(Self { id, operation })
    }
}

/// Why a reply is not ok.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Failure {
    /// The targeted record does not exist
    NotFound,
    /// The envelope was rejected before touching the store
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyPayload {
    Records(Vec<User>),
    Record(User),
}

/// Coordinator -> worker. `failure` is set exactly when `ok` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub id: CorrelationId,
    pub kind: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ReplyPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl ReplyEnvelope {
    pub fn success(id: CorrelationId, kind: &str, payload: Option<ReplyPayload>) -> Self {
        Self {
            id,
            kind: kind.to_string(),
            ok: true,
            payload,
            failure: None,
        }
    }

    pub fn not_found(id: CorrelationId, kind: &str) -> Self {
        Self::failed(id, kind, Failure::NotFound)
    }

    pub fn malformed(id: CorrelationId, kind: &str) -> Self {
        Self::failed(id, kind, Failure::Malformed)
    }

    fn failed(id: CorrelationId, kind: &str, failure: Failure) -> Self {
        Self {
            id,
            kind: kind.to_string(),
            ok: false,
            payload: None,
            failure: Some(failure),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Write one frame followed by a newline and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
