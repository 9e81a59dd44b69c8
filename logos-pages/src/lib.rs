//! # logos-pages — Page sync client for Logos
//!
//! Keeps a local view of a server's pages, exchanges version-stamped edits
//! over a persistent duplex channel, and talks to the server's key/value index.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   JSON frames    ┌─────────────┐
//! │ Channel     │ ◄──────────────► │ Server      │
//! │ (WebSocket  │                  │             │
//! │  or memory) │                  └─────────────┘
//! └──────┬──────┘
//!        │ ServerFrame / ClientFrame
//!        ▼
//! ┌──────────────────────────────┐
//! │ Client task (single writer)  │
//! │  PendingRequests  PageSet    │
//! └──────┬───────────────┬───────┘
//!        │ replies       │ ClientEvent
//!        ▼               ▼
//! ┌─────────────┐  ┌─────────────┐
//! │ PageClient  │  │ EventBus    │
//! │ Index       │  │ (fan-out)   │
//! └─────────────┘  └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Wire frames, request kinds, typed server events
//! - [`transport`] — Duplex channel: in-memory pair and WebSocket
//! - [`correlator`] — Request id allocation and response routing
//! - [`client`] — Page registry and update exchange
//! - [`index`] — Key/value index façade
//! - [`events`] — Synchronous event fan-out
//! - [`changes`] / [`document`] — Change sets, updates, open-page state

pub mod changes;
pub mod client;
pub mod config;
pub mod correlator;
pub mod document;
pub mod error;
pub mod events;
pub mod index;
pub mod protocol;
pub mod registry;
pub mod transport;

// Re-exports for convenience
pub use changes::{Bias, ChangeSet, Cursor, Section};
pub use client::PageClient;
pub use config::ClientConfig;
pub use correlator::PendingRequests;
pub use document::{CollabDocument, OpenedPage, PageData, Update, WireUpdate};
pub use error::{Result, SyncError};
pub use events::{ClientEvent, EventBus, EventKind, SubscriptionId};
pub use index::{Index, ScanEntry, KV};
pub use protocol::{ClientFrame, RequestId, RequestKind, ServerEvent, ServerFrame};
pub use registry::{PageMeta, PageSet, PageState, Permission};
pub use transport::{Channel, RemoteEnd};

pub use ropey::Rope;
