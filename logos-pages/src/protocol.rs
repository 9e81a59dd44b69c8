//! JSON wire protocol between the page client and the server.
//!
//! Every frame is one JSON text message, tagged by `type`:
//! ```text
//! client → server   {"type":"request","id":7,"event":"page.readPage","args":["index"]}
//!                   {"type":"notify","event":"page.closePage","args":["index"]}
//! server → client   {"type":"response","id":7,"args":[null,{"text":"…","meta":{…}}]}
//!                   {"type":"event","event":"pageCreated","args":[{"name":"c",…}]}
//! ```
//!
//! Responses are positional: `args[0]` is the error indicator (null or absent on
//! success) and `args[1]` is the payload. Request names are a closed enum and
//! server-pushed event names are mapped to [`ServerEvent`] exactly once, here.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::changes::Cursor;
use crate::error::{Result, SyncError};
use crate::registry::PageMeta;

/// Correlation id of a request. Starts at 1 and is never reused within a session.
pub type RequestId = u64;

/// Every client → server operation, serialized as its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    #[serde(rename = "page.listPages")]
    ListPages,
    #[serde(rename = "page.pushUpdates")]
    PushUpdates,
    #[serde(rename = "page.pullUpdates")]
    PullUpdates,
    #[serde(rename = "page.openPage")]
    OpenPage,
    #[serde(rename = "page.closePage")]
    ClosePage,
    #[serde(rename = "page.readPage")]
    ReadPage,
    #[serde(rename = "page.writePage")]
    WritePage,
    #[serde(rename = "page.deletePage")]
    DeletePage,
    #[serde(rename = "page.getPageMeta")]
    GetPageMeta,
    #[serde(rename = "index.set")]
    IndexSet,
    #[serde(rename = "index.get")]
    IndexGet,
    #[serde(rename = "index.scanPrefixForPage")]
    IndexScanPrefixForPage,
    #[serde(rename = "index.scanPrefixGlobal")]
    IndexScanPrefixGlobal,
    #[serde(rename = "index.deletePrefixForPage")]
    IndexDeletePrefixForPage,
    #[serde(rename = "index.delete")]
    IndexDelete,
}

impl RequestKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::ListPages => "page.listPages",
            Self::PushUpdates => "page.pushUpdates",
            Self::PullUpdates => "page.pullUpdates",
            Self::OpenPage => "page.openPage",
            Self::ClosePage => "page.closePage",
            Self::ReadPage => "page.readPage",
            Self::WritePage => "page.writePage",
            Self::DeletePage => "page.deletePage",
            Self::GetPageMeta => "page.getPageMeta",
            Self::IndexSet => "index.set",
            Self::IndexGet => "index.get",
            Self::IndexScanPrefixForPage => "index.scanPrefixForPage",
            Self::IndexScanPrefixGlobal => "index.scanPrefixGlobal",
            Self::IndexDeletePrefixForPage => "index.deletePrefixForPage",
            Self::IndexDelete => "index.delete",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Frame written by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Correlated request; the server answers with a `Response` carrying the same id.
    Request {
        id: RequestId,
        event: RequestKind,
        args: Vec<Value>,
    },
    /// Fire-and-forget message, no response expected.
    Notify { event: RequestKind, args: Vec<Value> },
}

impl ClientFrame {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Request { event, .. } | Self::Notify { event, .. } => *event,
        }
    }

    pub fn args(&self) -> &[Value] {
        match self {
            Self::Request { args, .. } | Self::Notify { args, .. } => args,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Frame written by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    Response {
        id: RequestId,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Server-pushed event, no request id.
    Event {
        event: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl ServerFrame {
    /// Successful response carrying `payload`.
    pub fn ok(id: RequestId, payload: Value) -> Self {
        Self::Response {
            id,
            args: vec![Value::Null, payload],
        }
    }

    /// Failed response carrying the error indicator.
    pub fn err(id: RequestId, error: impl Into<Value>) -> Self {
        Self::Response {
            id,
            args: vec![error.into()],
        }
    }

    pub fn event(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Event {
            event: event.into(),
            args,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Split positional response args into `Err(indicator)` or `Ok(payload)`.
pub fn split_response(mut args: Vec<Value>) -> std::result::Result<Value, Value> {
    let payload = if args.len() > 1 {
        args.swap_remove(1)
    } else {
        Value::Null
    };
    match args.into_iter().next() {
        Some(error) if !error.is_null() => Err(error),
        _ => Ok(payload),
    }
}

/// Server-pushed events, typed.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Transport-level connect.
    Connect,
    /// Full cursor map of one page, keyed by client id.
    CursorSnapshot {
        page: String,
        cursors: HashMap<String, Cursor>,
    },
    PageCreated(PageMeta),
    PageChanged(PageMeta),
    PageDeleted(String),
}

impl ServerEvent {
    /// Map a wire event to its variant. Unknown event names yield `Ok(None)`.
    pub fn from_wire(event: &str, args: Vec<Value>) -> Result<Option<Self>> {
        let mut args = args.into_iter();
        let parsed = match event {
            "connect" => Self::Connect,
            "cursorSnapshot" => Self::CursorSnapshot {
                page: arg(event, args.next())?,
                cursors: arg(event, args.next())?,
            },
            "pageCreated" => Self::PageCreated(arg(event, args.next())?),
            "pageChanged" => Self::PageChanged(arg(event, args.next())?),
            "pageDeleted" => Self::PageDeleted(arg(event, args.next())?),
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::CursorSnapshot { .. } => "cursorSnapshot",
            Self::PageCreated(_) => "pageCreated",
            Self::PageChanged(_) => "pageChanged",
            Self::PageDeleted(_) => "pageDeleted",
        }
    }
}

fn arg<T: DeserializeOwned>(event: &str, value: Option<Value>) -> Result<T> {
    let value = value.ok_or_else(|| SyncError::Payload(format!("{event}: missing argument")))?;
    serde_json::from_value(value).map_err(|e| SyncError::Payload(format!("{event}: {e}")))
}
