#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatsync::api::events::{InboundEvent, OutboundEvent};
use chatsync::api::models::{Conversation, Message, Participant};
use chatsync::channel::{Link, Transport};
use chatsync::snapshot::SnapshotSource;
use chatsync::{SyncEngine, SyncError, SyncSettings};
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Notify, mpsc};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn user(id: &str) -> Participant {
    Participant::new(id, format!("user {}", id))
}

pub fn msg(id: &str, conv: &str, from: &str, secs: i64) -> Message {
    Message {
        id: id.into(),
        conversation_id: conv.into(),
        sender: user(from),
        text: format!("text {}", id),
        created_at: at(secs),
        read: false,
    }
}

pub fn conv(id: &str, other: &str, secs: i64) -> Conversation {
    let mut c = Conversation::new(id, user(other));
    c.last_message_at = Some(at(secs));
    c
}

pub fn ids(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.id.as_str()).collect()
}

#[derive(Default)]
struct SourceState {
    conversations: Vec<Conversation>,
    histories: HashMap<String, Vec<Message>>,
    with_user: HashMap<String, Conversation>,
    gates: HashMap<String, Arc<Notify>>,
    failing: HashSet<String>,
    calls: Vec<String>,
}

/// In-memory REST backend. History fetches can be held on a gate.
#[derive(Clone, Default)]
pub struct FakeSource {
    state: Arc<Mutex<SourceState>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_conversation(&self, c: Conversation) {
        self.state.lock().unwrap().conversations.push(c);
    }

    pub fn set_history(&self, conversation_id: &str, messages: Vec<Message>) {
        self.state
            .lock()
            .unwrap()
            .histories
            .insert(conversation_id.into(), messages);
    }

    pub fn add_with_user(&self, user_id: &str, c: Conversation) {
        self.state.lock().unwrap().with_user.insert(user_id.into(), c);
    }

    /// Holds `messages(conversation_id)` until the returned gate is notified.
    pub fn gate(&self, conversation_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(conversation_id.into(), gate.clone());
        gate
    }

    /// Makes calls named like `conversations`, `messages:c1` or `mark_read:c1` fail.
    pub fn fail(&self, call: &str) {
        self.state.lock().unwrap().failing.insert(call.into());
    }

    pub fn recover(&self, call: &str) {
        self.state.lock().unwrap().failing.remove(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) -> Result<(), SyncError> {
        let mut state = self.state.lock().unwrap();
        let failing = state.failing.contains(&call);
        state.calls.push(call.clone());
        if failing {
            Err(SyncError::Network(format!("{} unavailable", call)))
        } else {
            Ok(())
        }
    }
}

impl SnapshotSource for FakeSource {
    async fn conversations(&self) -> chatsync::Result<Vec<Conversation>> {
        self.record("conversations".into())?;
        Ok(self.state.lock().unwrap().conversations.clone())
    }

    async fn messages(&self, conversation_id: &str) -> chatsync::Result<Vec<Message>> {
        let gate = self.state.lock().unwrap().gates.get(conversation_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.record(format!("messages:{}", conversation_id))?;
        let state = self.state.lock().unwrap();
        Ok(state.histories.get(conversation_id).cloned().unwrap_or_default())
    }

    async fn mark_read(&self, conversation_id: &str) -> chatsync::Result<()> {
        self.record(format!("mark_read:{}", conversation_id))
    }

    async fn conversation_with(&self, user_id: &str) -> chatsync::Result<Conversation> {
        self.record(format!("with:{}", user_id))?;
        self.state
            .lock()
            .unwrap()
            .with_user
            .get(user_id)
            .cloned()
            .ok_or_else(|| SyncError::Network("HTTP 404".into()))
    }

    async fn current_user(&self) -> chatsync::Result<Participant> {
        Ok(user("me"))
    }
}

#[derive(Default)]
struct ServerState {
    refuse: bool,
    stall: bool,
    connects: usize,
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: Option<mpsc::UnboundedReceiver<String>>,
    sent: Vec<OutboundEvent>,
}

impl ServerState {
    fn collect(&mut self) {
        if let Some(rx) = self.from_client.as_mut() {
            while let Ok(frame) = rx.try_recv() {
                if let Some(event) = OutboundEvent::decode(&frame).unwrap() {
                    self.sent.push(event);
                }
            }
        }
    }
}

/// Push server stand-in. Records everything the client emits.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<ServerState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        let t = Self::default();
        t.set_refuse(true);
        t
    }

    /// Handshakes never complete.
    pub fn stalled() -> Self {
        let t = Self::default();
        t.state.lock().unwrap().stall = true;
        t
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.state.lock().unwrap().refuse = refuse;
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn push(&self, event: InboundEvent) {
        let state = self.state.lock().unwrap();
        let tx = state.to_client.as_ref().expect("no live connection");
        tx.send(event.encode().unwrap()).unwrap();
    }

    pub fn sent(&self) -> Vec<OutboundEvent> {
        let mut state = self.state.lock().unwrap();
        state.collect();
        state.sent.clone()
    }

    /// Server side hangs up.
    pub fn drop_connection(&self) {
        let mut state = self.state.lock().unwrap();
        state.collect();
        state.to_client = None;
        state.from_client = None;
    }
}

impl Transport for FakeTransport {
    async fn open(&self, _token: &str) -> chatsync::Result<Link> {
        let stall = self.state.lock().unwrap().stall;
        if stall {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        if state.refuse {
            return Err(SyncError::Channel("connection refused".into()));
        }
        state.collect();
        state.connects += 1;
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        state.to_client = Some(in_tx);
        state.from_client = Some(out_rx);
        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

pub type Engine = SyncEngine<FakeSource, FakeTransport>;

pub fn engine(source: &FakeSource, transport: &FakeTransport) -> Engine {
    engine_with(source, transport, SyncSettings::default())
}

pub fn engine_with(source: &FakeSource, transport: &FakeTransport, settings: SyncSettings) -> Engine {
    SyncEngine::new("me", "token", source.clone(), transport.clone(), settings)
}

/// Steps the engine until nothing has happened for a short while.
pub async fn settle(engine: &mut Engine) {
    while tokio::time::timeout(Duration::from_millis(50), engine.step())
        .await
        .is_ok()
    {}
}

pub fn join(id: &str) -> OutboundEvent {
    OutboundEvent::JoinConversation {
        conversation_id: id.into(),
    }
}

pub fn leave(id: &str) -> OutboundEvent {
    OutboundEvent::LeaveConversation {
        conversation_id: id.into(),
    }
}

pub fn typing(id: &str, is_typing: bool) -> OutboundEvent {
    OutboundEvent::Typing {
        conversation_id: id.into(),
        is_typing,
    }
}
