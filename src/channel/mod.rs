pub mod ws;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

use crate::api::events::{EventKind, InboundEvent, OutboundEvent};
use crate::error::{Result, SyncError};

/// Both halves of one live connection, as text frames.
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// How long a handshake may take before it counts as failed.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens connections to the push server.
pub trait Transport: Clone + Send + Sync + 'static {
    fn open(&self, token: &str) -> impl Future<Output = Result<Link>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What the channel hands to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    Connected,
    Disconnected,
    ConnectFailed(String),
    Event(InboundEvent),
}

pub type Listener = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    by_kind: HashMap<EventKind, Vec<Listener>>,
}

impl Listeners {
    fn add(&mut self, kind: EventKind, listener: Listener) -> bool {
        let list = self.by_kind.entry(kind).or_default();
        if list.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        list.push(listener);
        true
    }

    fn remove(&mut self, kind: EventKind, listener: &Listener) -> bool {
        let Some(list) = self.by_kind.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| !Arc::ptr_eq(l, listener));
        before != list.len()
    }

    fn dispatch(&self, event: &InboundEvent) {
        if let Some(list) = self.by_kind.get(&event.kind()) {
            for l in list {
                l(event);
            }
        }
    }
}

/// One push-channel connection plus the set of topics this client wants joined.
///
/// The topic set survives a disconnect; every transition into `Connected`
/// re-joins it, since the server drops subscriptions with the connection.
pub struct ChannelClient<T> {
    transport: T,
    state: ConnectionState,
    link: Option<Link>,
    connecting: Option<JoinHandle<Result<Link>>>,
    connect_timeout: Duration,
    topics: BTreeSet<String>,
    listeners: Listeners,
    pending: VecDeque<ChannelSignal>,
}

impl<T: Transport> ChannelClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            link: None,
            connecting: None,
            connect_timeout: CONNECT_TIMEOUT,
            topics: BTreeSet::new(),
            listeners: Listeners::default(),
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(String::as_str)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Starts a handshake in the background and returns at once. No-op unless
    /// disconnected. The outcome arrives from [`next_signal`](Self::next_signal)
    /// as [`ChannelSignal::Connected`] or [`ChannelSignal::ConnectFailed`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&mut self, token: &str) {
        if self.state != ConnectionState::Disconnected {
            return;
        }
        self.state = ConnectionState::Connecting;
        let transport = self.transport.clone();
        let token = token.to_string();
        let timeout = self.connect_timeout;
        self.connecting = Some(tokio::spawn(async move {
            match tokio::time::timeout(timeout, transport.open(&token)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Channel(format!(
                    "handshake timed out after {:?}",
                    timeout
                ))),
            }
        }));
    }

    fn finish_connect(&mut self, outcome: std::result::Result<Result<Link>, JoinError>) {
        let outcome = outcome.unwrap_or_else(|e| Err(SyncError::Channel(e.to_string())));
        match outcome {
            Ok(link) => {
                self.link = Some(link);
                self.state = ConnectionState::Connected;
                log::info!("channel connected");
                self.resubscribe();
                self.pending.push_back(ChannelSignal::Connected);
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                log::warn!("channel connect failed: {}", e);
                self.pending.push_back(ChannelSignal::ConnectFailed(e.to_string()));
            }
        }
    }

    fn resubscribe(&mut self) {
        let topics: Vec<String> = self.topics.iter().cloned().collect();
        for conversation_id in topics {
            log::debug!("re-joining {}", conversation_id);
            if let Err(e) = self.emit(OutboundEvent::JoinConversation { conversation_id }) {
                log::warn!("re-join failed: {}", e);
            }
        }
    }

    /// Drops the connection. Topics stay recorded for the next connect.
    pub fn disconnect(&mut self) {
        if let Some(handshake) = self.connecting.take() {
            handshake.abort();
        }
        if self.link.take().is_some() {
            log::info!("channel disconnected");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Joins a conversation's topic, or records it to join once connected.
    pub fn subscribe(&mut self, conversation_id: &str) {
        if !self.topics.insert(conversation_id.to_string()) {
            return;
        }
        if self.is_connected() {
            let join = OutboundEvent::JoinConversation {
                conversation_id: conversation_id.to_string(),
            };
            if let Err(e) = self.emit(join) {
                log::warn!("join {} failed: {}", conversation_id, e);
            }
        }
    }

    /// Leaves a topic. Calling it for a topic not joined does nothing.
    pub fn unsubscribe(&mut self, conversation_id: &str) {
        if !self.topics.remove(conversation_id) {
            return;
        }
        if self.is_connected() {
            let leave = OutboundEvent::LeaveConversation {
                conversation_id: conversation_id.to_string(),
            };
            if let Err(e) = self.emit(leave) {
                log::warn!("leave {} failed: {}", conversation_id, e);
            }
        }
    }

    /// Fire-and-forget. Fails only when there is no live connection to write to.
    pub fn emit(&mut self, event: OutboundEvent) -> Result<()> {
        let Some(link) = self.link.as_ref() else {
            return Err(SyncError::Channel("not connected".into()));
        };
        let frame = event.encode()?;
        if link.outgoing.send(frame).is_err() {
            self.drop_link();
            return Err(SyncError::Channel("connection closed".into()));
        }
        log::debug!("emitted {}", event.name());
        Ok(())
    }

    fn drop_link(&mut self) {
        if self.link.take().is_some() {
            self.state = ConnectionState::Disconnected;
            log::info!("channel connection lost");
            self.pending.push_back(ChannelSignal::Disconnected);
        }
    }

    /// Registers a listener. The same `Arc` registered twice is delivered once.
    pub fn on(&mut self, kind: EventKind, listener: Listener) -> bool {
        self.listeners.add(kind, listener)
    }

    pub fn off(&mut self, kind: EventKind, listener: &Listener) -> bool {
        self.listeners.remove(kind, listener)
    }

    /// Waits for the next connection transition or inbound event.
    ///
    /// Also completes a handshake started by [`connect`](Self::connect).
    /// Pends forever while disconnected with nothing queued. Cancel-safe.
    pub async fn next_signal(&mut self) -> ChannelSignal {
        loop {
            if let Some(signal) = self.pending.pop_front() {
                return signal;
            }
            if let Some(handshake) = self.connecting.as_mut() {
                let outcome = handshake.await;
                self.connecting = None;
                self.finish_connect(outcome);
                continue;
            }
            let Some(link) = self.link.as_mut() else {
                return std::future::pending().await;
            };
            match link.incoming.recv().await {
                Some(text) => match InboundEvent::decode(&text) {
                    Ok(Some(event)) => {
                        self.listeners.dispatch(&event);
                        return ChannelSignal::Event(event);
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        log::warn!("dropping malformed channel frame: {}", e);
                        continue;
                    }
                },
                None => self.drop_link(),
            }
        }
    }
}
