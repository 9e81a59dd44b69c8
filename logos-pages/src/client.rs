//! Page sync client.
//!
//! Provides:
//! - Correlated request/response calls over a [`Channel`]
//! - Update push/pull for collaborative page sessions
//! - The page registry, kept in step with server-pushed lifecycle events
//! - Event fan-out through an [`EventBus`]
//!
//! All protocol state (pending requests, page set, open pages) lives in one
//! background task. [`PageClient`] is a handle that sends it commands and
//! reads registry snapshots from a `watch` channel, so there is exactly one
//! writer and callers never hold a reference into mutable state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc::error::{SendError, TrySendError};
use tokio::sync::mpsc::OwnedPermit;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::changes::ChangeSet;
use crate::config::ClientConfig;
use crate::correlator::{settle, PendingRequests};
use crate::document::{CollabDocument, OpenedPage, PageData, Update, WireUpdate};
use crate::error::{Result, SyncError};
use crate::events::{ClientEvent, EventBus};
use crate::index::Index;
use crate::protocol::{ClientFrame, RequestKind, ServerEvent, ServerFrame};
use crate::registry::{PageMeta, PageSet, PageState};
use crate::transport::{self, Channel};

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Call {
        kind: RequestKind,
        args: Vec<Value>,
        reply: Reply<Value>,
    },
    OpenPage {
        name: String,
        reply: Reply<OpenedPage>,
    },
    ClosePage {
        name: String,
    },
    Notify {
        kind: RequestKind,
        args: Vec<Value>,
    },
    SyncPages {
        reply: Reply<Vec<PageMeta>>,
    },
    /// Drop slots whose caller stopped waiting.
    ReleaseAbandoned,
}

/// What happens when a pending request resolves.
enum Responder {
    Caller(Reply<Value>),
    OpenPage { name: String, reply: Reply<OpenedPage> },
    /// `None` only for a sync nobody waits on (no timeout configured).
    SyncPages(Option<Reply<Vec<PageMeta>>>),
}

impl Responder {
    fn is_abandoned(&self) -> bool {
        match self {
            Self::Caller(reply) => reply.is_closed(),
            Self::OpenPage { reply, .. } => reply.is_closed(),
            Self::SyncPages(Some(reply)) => reply.is_closed(),
            Self::SyncPages(None) => false,
        }
    }
}

/// The page sync client handle.
pub struct PageClient {
    client_id: String,
    config: ClientConfig,
    commands: mpsc::Sender<Command>,
    pages: watch::Receiver<Arc<PageSet>>,
    events: Arc<EventBus>,
    connected: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
}

impl PageClient {
    /// Start a client over `channel`.
    ///
    /// Spawns the client task; must be called inside a tokio runtime. With
    /// `sync_pages_on_start`, the first request (id 1) is `page.listPages`.
    pub fn new(channel: Channel, config: ClientConfig) -> Self {
        Self::with_events(channel, config, Arc::new(EventBus::new()))
    }

    /// Like [`PageClient::new`], delivering to an existing bus so subscribers
    /// registered beforehand see the initial `PageListUpdated`.
    pub fn with_events(channel: Channel, config: ClientConfig, events: Arc<EventBus>) -> Self {
        Self::spawn(Some(channel), config, events)
    }

    /// A client with no transport attached. Calls fail with
    /// [`SyncError::TransportUnavailable`]; `push_updates` returns `false`.
    pub fn detached(config: ClientConfig) -> Self {
        Self::spawn(None, config, Arc::new(EventBus::new()))
    }

    /// Open a WebSocket to `url` and start a client over it.
    pub async fn connect(url: &str, config: ClientConfig) -> Result<Self> {
        let channel = transport::connect(url, config.channel_capacity).await?;
        Ok(Self::new(channel, config))
    }

    fn spawn(channel: Option<Channel>, config: ClientConfig, events: Arc<EventBus>) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let (command_tx, command_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (pages_tx, pages_rx) = watch::channel(Arc::new(PageSet::new()));
        let connected = Arc::new(AtomicBool::new(channel.is_some()));
        let pending = Arc::new(AtomicUsize::new(0));

        let (outgoing, incoming) = match channel {
            Some(channel) => {
                let (tx, rx) = channel.into_parts();
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };

        let startup = if config.sync_pages_on_start && incoming.is_some() {
            Some(Self::startup_sync(&command_tx, config.request_timeout))
        } else {
            None
        };

        let task = ClientTask {
            outgoing,
            outbox: VecDeque::new(),
            pending: PendingRequests::new(),
            pages: PageSet::new(),
            pages_tx,
            events: events.clone(),
            connected: connected.clone(),
            pending_gauge: pending.clone(),
            resync_on_connect: config.resync_on_connect,
        };
        tokio::spawn(task.run(command_rx, incoming, startup));

        Self {
            client_id,
            config,
            commands: command_tx,
            pages: pages_rx,
            events,
            connected,
            pending,
        }
    }

    /// Responder for the initial `listPages`. With a timeout, a watcher drops
    /// the reply when it elapses so the slot is released like any other.
    fn startup_sync(commands: &mpsc::Sender<Command>, timeout: Option<Duration>) -> Responder {
        let Some(after) = timeout else {
            return Responder::SyncPages(None);
        };
        let (reply, rx) = oneshot::channel();
        let commands = commands.downgrade();
        tokio::spawn(async move {
            if tokio::time::timeout(after, rx).await.is_err() {
                log::warn!("Initial page list sync timed out after {after:?}");
                if let Some(commands) = commands.upgrade() {
                    let _ = commands.try_send(Command::ReleaseAbandoned);
                }
            }
        });
        Responder::SyncPages(Some(reply))
    }

    /// Identifier this client stamps on its own updates.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Whether a transport is attached and has not closed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn index(&self) -> Index<'_> {
        Index::new(self)
    }

    // ─── Raw calls ───────────────────────────────────────────────────

    /// Issue a correlated request and wait for its payload.
    pub async fn call(&self, kind: RequestKind, args: Vec<Value>) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Call { kind, args, reply }).await?;
        self.wait(kind, rx).await
    }

    /// [`PageClient::call`] with the payload deserialized into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, kind: RequestKind, args: Vec<Value>) -> Result<T> {
        let payload = self.call(kind, args).await?;
        serde_json::from_value(payload).map_err(|e| SyncError::Payload(format!("{kind}: {e}")))
    }

    /// Send an uncorrelated message. Nothing is awaited beyond the write queue.
    pub async fn notify(&self, kind: RequestKind, args: Vec<Value>) -> Result<()> {
        self.send(Command::Notify { kind, args }).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::TransportUnavailable)
    }

    async fn wait<T>(&self, kind: RequestKind, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        let outcome = match self.config.request_timeout {
            Some(after) => match tokio::time::timeout(after, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let _ = self.commands.try_send(Command::ReleaseAbandoned);
                    return Err(SyncError::Timeout { kind, after });
                }
            },
            None => rx.await,
        };
        // The task dropped the responder: it shut down before answering.
        outcome.unwrap_or(Err(SyncError::Disconnected))
    }

    // ─── Page registry ───────────────────────────────────────────────

    /// Snapshot of the known pages, sorted by name. No network traffic.
    pub fn list_pages(&self) -> Vec<PageMeta> {
        self.pages.borrow().snapshot()
    }

    /// The whole registry as last published by the client task.
    pub fn page_set(&self) -> Arc<PageSet> {
        self.pages.borrow().clone()
    }

    pub fn page_state(&self, name: &str) -> PageState {
        self.pages.borrow().state(name)
    }

    /// Fetch the page list from the server and replace the registry with it.
    pub async fn refresh_pages(&self) -> Result<Vec<PageMeta>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SyncPages { reply }).await?;
        self.wait(RequestKind::ListPages, rx).await
    }

    /// Request full collaborative state and register interest in the page.
    pub async fn open_page(&self, name: &str) -> Result<CollabDocument> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::OpenPage {
            name: name.to_string(),
            reply,
        })
        .await?;
        let opened = self.wait(RequestKind::OpenPage, rx).await?;
        Ok(CollabDocument::from_opened(name, opened))
    }

    /// Unregister interest in the page. Fire-and-forget.
    pub async fn close_page(&self, name: &str) {
        let command = Command::ClosePage {
            name: name.to_string(),
        };
        if self.send(command).await.is_err() {
            log::warn!("close_page({name}) dropped: client task is gone");
        }
    }

    pub async fn read_page(&self, name: &str) -> Result<PageData> {
        self.call_as(RequestKind::ReadPage, vec![json!(name)]).await
    }

    pub async fn write_page(&self, name: &str, text: &str) -> Result<PageMeta> {
        self.call_as(RequestKind::WritePage, vec![json!(name), json!(text)])
            .await
    }

    pub async fn delete_page(&self, name: &str) -> Result<()> {
        self.call(RequestKind::DeletePage, vec![json!(name)]).await?;
        Ok(())
    }

    pub async fn get_page_meta(&self, name: &str) -> Result<PageMeta> {
        self.call_as(RequestKind::GetPageMeta, vec![json!(name)]).await
    }

    // ─── Update exchange ─────────────────────────────────────────────

    /// An update authored by this client.
    pub fn local_update(&self, changes: ChangeSet) -> Update {
        Update::new(changes, self.client_id.clone())
    }

    /// Push local updates made on top of `version`.
    ///
    /// Returns whether the server accepted them. Without a transport this
    /// returns `false` and sends nothing.
    pub async fn push_updates(&self, page: &str, version: u64, updates: &[Update]) -> Result<bool> {
        if !self.is_connected() {
            return Ok(false);
        }
        let wire = updates
            .iter()
            .map(|u| Ok(serde_json::to_value(u.to_wire()?)?))
            .collect::<Result<Vec<_>>>()?;

        let args = vec![json!(page), json!(version), Value::Array(wire)];
        match self.call(RequestKind::PushUpdates, args).await {
            Ok(accepted) => Ok(accepted.as_bool().unwrap_or(false)),
            Err(SyncError::TransportUnavailable) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All updates strictly after `version`, in the order they must be applied.
    pub async fn pull_updates(&self, page: &str, version: u64) -> Result<Vec<Update>> {
        let wire: Vec<WireUpdate> = self
            .call_as(RequestKind::PullUpdates, vec![json!(page), json!(version)])
            .await?;
        wire.into_iter().map(Update::from_wire).collect()
    }

    /// Pull everything after the document's version and apply it in order.
    /// Returns the number of updates applied.
    pub async fn sync_document(&self, doc: &mut CollabDocument) -> Result<usize> {
        let from = doc.version();
        let updates = self.pull_updates(doc.name(), from).await?;
        doc.apply_updates(from, &updates)?;
        Ok(updates.len())
    }
}

/// Single owner of all protocol state.
struct ClientTask {
    outgoing: Option<mpsc::Sender<ClientFrame>>,
    /// Frames waiting for room in the outgoing queue, in call order
    outbox: VecDeque<ClientFrame>,
    pending: PendingRequests<Responder>,
    pages: PageSet,
    pages_tx: watch::Sender<Arc<PageSet>>,
    events: Arc<EventBus>,
    connected: Arc<AtomicBool>,
    pending_gauge: Arc<AtomicUsize>,
    resync_on_connect: bool,
}

enum Step {
    Command(Option<Command>),
    Frame(Option<ServerFrame>),
    Writable(std::result::Result<OwnedPermit<ClientFrame>, SendError<()>>),
}

async fn next_frame(incoming: &mut Option<mpsc::Receiver<ServerFrame>>) -> Option<ServerFrame> {
    match incoming {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn reserve(
    outgoing: Option<mpsc::Sender<ClientFrame>>,
) -> std::result::Result<OwnedPermit<ClientFrame>, SendError<()>> {
    match outgoing {
        Some(tx) => tx.reserve_owned().await,
        None => std::future::pending().await,
    }
}

impl ClientTask {
    /// Incoming frames are read on every turn; writes never block the loop.
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut incoming: Option<mpsc::Receiver<ServerFrame>>,
        startup: Option<Responder>,
    ) {
        if let Some(responder) = startup {
            self.dispatch(RequestKind::ListPages, Vec::new(), responder);
            self.update_gauge();
        }

        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                frame = next_frame(&mut incoming) => Step::Frame(frame),
                permit = reserve(self.outgoing.clone()), if !self.outbox.is_empty() => {
                    Step::Writable(permit)
                }
            };
            match step {
                Step::Command(Some(command)) => self.handle_command(command),
                Step::Command(None) => break,
                Step::Frame(Some(frame)) => self.handle_frame(frame),
                Step::Frame(None) => {
                    incoming = None;
                    self.on_disconnect();
                }
                Step::Writable(Ok(permit)) => self.flush(permit),
                Step::Writable(Err(_)) => self.on_write_closed(),
            }
            self.update_gauge();
        }
        log::debug!("Client task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Call { kind, args, reply } => {
                self.dispatch(kind, args, Responder::Caller(reply));
            }
            Command::OpenPage { name, reply } => {
                let args = vec![json!(name)];
                self.dispatch(RequestKind::OpenPage, args, Responder::OpenPage { name, reply });
            }
            Command::ClosePage { name } => {
                self.pages.mark_closed(&name);
                self.publish();
                self.notify(RequestKind::ClosePage, vec![json!(name)]);
            }
            Command::Notify { kind, args } => self.notify(kind, args),
            Command::SyncPages { reply } => {
                self.dispatch(RequestKind::ListPages, Vec::new(), Responder::SyncPages(Some(reply)));
            }
            Command::ReleaseAbandoned => {
                let released = self.pending.release_where(Responder::is_abandoned);
                if released > 0 {
                    log::debug!("Released {released} abandoned request(s)");
                }
            }
        }
    }

    /// Register a slot, then queue the request frame.
    fn dispatch(&mut self, kind: RequestKind, args: Vec<Value>, responder: Responder) {
        self.pending.release_where(Responder::is_abandoned);

        if self.outgoing.is_none() {
            self.complete(responder, Err(SyncError::TransportUnavailable));
            return;
        }

        let id = self.pending.register(kind, responder);
        log::debug!("→ {kind} #{id}");
        self.outbox.push_back(ClientFrame::Request {
            id,
            event: kind,
            args,
        });
    }

    fn notify(&mut self, kind: RequestKind, args: Vec<Value>) {
        if self.outgoing.is_some() {
            self.outbox.push_back(ClientFrame::Notify { event: kind, args });
        } else {
            log::warn!("{kind} not sent: no transport attached");
        }
    }

    /// Write the front frame into the reserved slot, then as many more as fit.
    fn flush(&mut self, permit: OwnedPermit<ClientFrame>) {
        let Some(frame) = self.outbox.pop_front() else {
            return;
        };
        permit.send(frame);

        let mut closed = false;
        if let Some(outgoing) = &self.outgoing {
            while let Some(frame) = self.outbox.pop_front() {
                match outgoing.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(frame)) => {
                        self.outbox.push_front(frame);
                        break;
                    }
                    Err(TrySendError::Closed(frame)) => {
                        self.outbox.push_front(frame);
                        closed = true;
                        break;
                    }
                }
            }
        }
        if closed {
            self.on_write_closed();
        }
    }

    /// The outgoing queue closed: unsent requests fail, later calls fail fast.
    fn on_write_closed(&mut self) {
        log::warn!("Outgoing queue closed with {} frame(s) unsent", self.outbox.len());
        self.outgoing = None;
        self.connected.store(false, Ordering::Release);
        for frame in std::mem::take(&mut self.outbox) {
            if let ClientFrame::Request { id, .. } = frame {
                if let Some(pending) = self.pending.resolve(id) {
                    self.complete(pending.responder, Err(SyncError::TransportUnavailable));
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Response { id, args } => match self.pending.resolve(id) {
                Some(pending) => {
                    log::debug!("← {} #{id}", pending.kind);
                    let outcome = settle(pending.kind, args);
                    self.complete(pending.responder, outcome);
                }
                None => log::debug!("Response #{id} has no pending request"),
            },
            ServerFrame::Event { event, args } => match ServerEvent::from_wire(&event, args) {
                Ok(Some(event)) => self.handle_event(event),
                Ok(None) => log::debug!("Ignoring unknown server event {event}"),
                Err(e) => log::warn!("Dropping malformed {event} event: {e}"),
            },
        }
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connect => {
                self.events.emit(&ClientEvent::Connected);
                if self.resync_on_connect {
                    self.dispatch(RequestKind::ListPages, Vec::new(), Responder::SyncPages(None));
                }
            }
            ServerEvent::CursorSnapshot { page, cursors } => {
                self.events.emit(&ClientEvent::CursorSnapshot { page, cursors });
            }
            ServerEvent::PageCreated(meta) => {
                self.pages.insert(meta.clone());
                self.publish();
                self.events.emit(&ClientEvent::PageCreated(meta));
                self.emit_list_updated();
            }
            ServerEvent::PageDeleted(name) => {
                if self.pages.is_open(&name) {
                    log::warn!("Page {name} deleted while a session is open on it");
                }
                self.pages.remove(&name);
                self.publish();
                self.events.emit(&ClientEvent::PageDeleted(name));
                self.emit_list_updated();
            }
            ServerEvent::PageChanged(meta) => {
                self.events.emit(&ClientEvent::PageChanged(meta));
            }
        }
    }

    fn complete(&mut self, responder: Responder, outcome: Result<Value>) {
        match responder {
            Responder::Caller(reply) => {
                let _ = reply.send(outcome);
            }
            Responder::OpenPage { name, reply } => {
                let opened = outcome.and_then(|payload| {
                    serde_json::from_value::<OpenedPage>(payload)
                        .map_err(|e| SyncError::Payload(format!("{}: {e}", RequestKind::OpenPage)))
                });
                if opened.is_ok() {
                    self.pages.mark_open(&name);
                    self.publish();
                }
                let _ = reply.send(opened);
            }
            Responder::SyncPages(reply) => {
                let listed = outcome.and_then(|payload| {
                    serde_json::from_value::<Vec<PageMeta>>(payload).map_err(SyncError::from)
                });
                match listed {
                    Ok(pages) => {
                        log::info!("Page list synced: {} page(s)", pages.len());
                        self.pages.replace_all(pages);
                        self.publish();
                        let snapshot = self.emit_list_updated();
                        if let Some(reply) = reply {
                            let _ = reply.send(Ok(snapshot));
                        }
                    }
                    Err(e) => {
                        log::warn!("Page list sync failed: {e}");
                        if let Some(reply) = reply {
                            let _ = reply.send(Err(e));
                        }
                    }
                }
            }
        }
    }

    fn on_disconnect(&mut self) {
        log::info!("Transport closed, failing {} pending request(s)", self.pending.len());
        self.outgoing = None;
        self.outbox.clear();
        self.connected.store(false, Ordering::Release);
        for pending in self.pending.drain() {
            self.complete(pending.responder, Err(SyncError::Disconnected));
        }
        self.events.emit(&ClientEvent::Disconnected);
    }

    fn emit_list_updated(&self) -> Vec<PageMeta> {
        let snapshot = self.pages.snapshot();
        self.events
            .emit(&ClientEvent::PageListUpdated(snapshot.clone()));
        snapshot
    }

    fn publish(&self) {
        self.pages_tx.send_replace(Arc::new(self.pages.clone()));
    }

    fn update_gauge(&self) {
        self.pending_gauge.store(self.pending.len(), Ordering::Release);
    }
}
