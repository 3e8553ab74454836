//! Reconciles snapshot loads, push-channel events and local actions into the
//! [`ConversationStore`].
//!
//! Everything runs on one task. Handlers finish before the next input is
//! looked at, so the store is only ever observed between whole handlers.
//! Snapshot fetches run on spawned tasks and come back tagged with the
//! generation they were started under; anything from an older generation
//! is dropped.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, sleep_until};

use crate::api::events::{InboundEvent, OutboundEvent};
use crate::api::models::{Conversation, Message};
use crate::channel::{CONNECT_TIMEOUT, ChannelClient, ChannelSignal, ConnectionState, Transport};
use crate::config::AppConfig;
use crate::error::{Result, SyncError};
use crate::snapshot::{MessageSnapshot, SnapshotLoader, SnapshotSource};
use crate::store::ConversationStore;
use crate::typing::{TYPING_DEBOUNCE, TYPING_INDICATOR_TTL, TypingTracker};

/// Subscription lifecycle of the open conversation.
///
/// `Subscribing` covers the window between joining the topic and the history
/// snapshot landing; live messages for the conversation are buffered then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    Idle,
    Subscribing { conversation_id: String, generation: u64 },
    Active { conversation_id: String },
    Unsubscribing { conversation_id: String },
}

impl Subscription {
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Subscription::Idle => None,
            Subscription::Subscribing { conversation_id, .. }
            | Subscription::Active { conversation_id }
            | Subscription::Unsubscribing { conversation_id } => Some(conversation_id),
        }
    }
}

/// Something the UI should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ConversationsChanged,
    MessagesChanged,
    TypingChanged(Option<String>),
    Connection(ConnectionState),
    Error(String),
    /// Put `draft` back into the input box.
    SendFailed { draft: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(String),
    OpenWithUser(String),
    Close,
    Send(String),
    Keystroke,
    Refresh,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub typing_debounce: Duration,
    pub typing_indicator: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    pub connect_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            typing_debounce: TYPING_DEBOUNCE,
            typing_indicator: TYPING_INDICATOR_TTL,
            reconnect_min: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

impl From<&AppConfig> for SyncSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            typing_debounce: config.typing_debounce(),
            typing_indicator: config.typing_indicator(),
            reconnect_min: config.reconnect_min(),
            reconnect_max: config.reconnect_max(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

enum LoadOutcome {
    Conversations(Result<Vec<Conversation>>),
    Messages {
        generation: u64,
        result: Result<MessageSnapshot>,
    },
    Started {
        generation: u64,
        result: Result<Conversation>,
    },
}

enum Wake {
    Command(Option<Command>),
    Signal(ChannelSignal),
    Load(std::result::Result<LoadOutcome, JoinError>),
    Timer,
}

pub struct SyncEngine<S, T> {
    me: String,
    token: String,
    settings: SyncSettings,
    store: ConversationStore,
    loader: SnapshotLoader<S>,
    channel: ChannelClient<T>,
    typing: TypingTracker,
    subscription: Subscription,
    generation: u64,
    buffered: Vec<Message>,
    /// A read receipt for the open conversation arrived before its history.
    receipt_pending: bool,
    loads: JoinSet<LoadOutcome>,
    reconnect_at: Option<Instant>,
    backoff: Duration,
    connected_before: bool,
    notices: VecDeque<Notice>,
}

impl<S: SnapshotSource, T: Transport> SyncEngine<S, T> {
    pub fn new(me: &str, token: &str, source: S, transport: T, settings: SyncSettings) -> Self {
        Self {
            me: me.to_string(),
            token: token.to_string(),
            typing: TypingTracker::new(settings.typing_debounce, settings.typing_indicator),
            backoff: settings.reconnect_min,
            channel: ChannelClient::new(transport).with_connect_timeout(settings.connect_timeout),
            settings,
            store: ConversationStore::new(),
            loader: SnapshotLoader::new(source),
            subscription: Subscription::Idle,
            generation: 0,
            buffered: Vec::new(),
            receipt_pending: false,
            loads: JoinSet::new(),
            reconnect_at: None,
            connected_before: false,
            notices: VecDeque::new(),
        }
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn typing_indicator(&self) -> Option<&str> {
        self.typing.indicator()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn channel_mut(&mut self) -> &mut ChannelClient<T> {
        &mut self.channel
    }

    /// When the next reconnect attempt is due, if one is scheduled.
    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.push_back(notice);
    }

    /// Kicks off the conversation list fetch and the channel handshake.
    /// Neither is awaited here; both complete through [`step`](Self::step).
    pub fn start(&mut self) {
        self.refresh_conversations();
        self.connect();
    }

    fn connect(&mut self) {
        self.channel.connect(&self.token);
        if self.channel.state() == ConnectionState::Connecting {
            self.notify(Notice::Connection(ConnectionState::Connecting));
        }
    }

    /// Runs until a `Shutdown` command arrives or the command sender is dropped.
    /// `on_notice` sees the engine in the state that produced each notice.
    pub async fn run<F>(mut self, mut commands: mpsc::UnboundedReceiver<Command>, mut on_notice: F)
    where
        F: FnMut(&Self, Notice),
    {
        self.start();
        loop {
            for notice in self.drain_notices() {
                on_notice(&self, notice);
            }
            let wake = self.wait(Some(&mut commands)).await;
            if !self.dispatch(wake) {
                break;
            }
        }
        self.shutdown();
        for notice in self.drain_notices() {
            on_notice(&self, notice);
        }
    }

    /// Handles the next channel signal, finished load or due timer.
    pub async fn step(&mut self) {
        let wake = self.wait(None).await;
        self.dispatch(wake);
    }

    async fn wait(&mut self, commands: Option<&mut mpsc::UnboundedReceiver<Command>>) -> Wake {
        let deadline = self.next_deadline();
        let next_command = async {
            match commands {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            cmd = next_command => Wake::Command(cmd),
            signal = self.channel.next_signal() => Wake::Signal(signal),
            Some(done) = self.loads.join_next() => Wake::Load(done),
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => Wake::Timer,
        }
    }

    fn dispatch(&mut self, wake: Wake) -> bool {
        match wake {
            Wake::Command(None) | Wake::Command(Some(Command::Shutdown)) => return false,
            Wake::Command(Some(cmd)) => self.handle_command(cmd),
            Wake::Signal(signal) => self.handle_signal(signal, Instant::now()),
            Wake::Load(Ok(outcome)) => self.apply_load(outcome),
            Wake::Load(Err(e)) => log::warn!("snapshot task failed: {}", e),
            Wake::Timer => self.tick(Instant::now()),
        }
        true
    }

    pub fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Open(id) => self.open_conversation(&id),
            Command::OpenWithUser(user_id) => self.open_with_user(&user_id),
            Command::Close => self.close_conversation(),
            Command::Send(text) => {
                let _ = self.send_message(&text);
            }
            Command::Keystroke => self.keystroke(Instant::now()),
            Command::Refresh => self.refresh(),
            Command::Shutdown => self.shutdown(),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.typing.next_deadline(), self.reconnect_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ---- local actions ----

    /// Makes `conversation_id` the open conversation.
    ///
    /// The previous topic is left before the new one is joined. The history
    /// fetch is started, then the topic is joined; messages that arrive for it
    /// before the history lands are held back and replayed on top of it.
    pub fn open_conversation(&mut self, conversation_id: &str) {
        if self.subscription.conversation_id() == Some(conversation_id) {
            return;
        }
        self.release_subscription();
        self.store.set_active_conversation(Some(conversation_id));

        self.generation += 1;
        let generation = self.generation;
        self.spawn_history(conversation_id, generation);
        self.subscription = Subscription::Subscribing {
            conversation_id: conversation_id.to_string(),
            generation,
        };
        self.channel.subscribe(conversation_id);
        log::debug!("opening {} (generation {})", conversation_id, generation);
        self.notify(Notice::MessagesChanged);
    }

    pub fn close_conversation(&mut self) {
        self.release_subscription();
        self.store.set_active_conversation(None);
        self.generation += 1;
        self.notify(Notice::MessagesChanged);
    }

    /// Fetches (or creates) the conversation with `user_id` and opens it.
    pub fn open_with_user(&mut self, user_id: &str) {
        let loader = self.loader.clone();
        let user_id = user_id.to_string();
        let generation = self.generation;
        self.loads.spawn(async move {
            LoadOutcome::Started {
                generation,
                result: loader.source().conversation_with(&user_id).await,
            }
        });
    }

    /// Emits the message over the channel. Nothing is inserted locally: the
    /// message shows up when the server echoes it back as `new-message`.
    /// Fails fast while disconnected.
    pub fn send_message(&mut self, draft: &str) -> Result<()> {
        let text = draft.trim();
        if text.is_empty() {
            return Ok(());
        }
        let Some(conversation_id) = self.store.active_conversation().map(str::to_string) else {
            return Err(self.send_failed(draft, "no conversation is open"));
        };
        let receiver_id = self
            .store
            .conversation(&conversation_id)
            .map(|c| c.other.id.clone())
            .unwrap_or_default();
        if receiver_id.is_empty() {
            return Err(self.send_failed(draft, "recipient unknown"));
        }

        let event = OutboundEvent::SendMessage {
            conversation_id,
            text: text.to_string(),
            receiver_id,
        };
        match self.channel.emit(event) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.send_failed(draft, e)),
        }
    }

    fn send_failed(&mut self, draft: &str, reason: impl ToString) -> SyncError {
        let err = SyncError::send_failure(draft, reason);
        log::warn!("{}", err);
        if let SyncError::SendFailure { draft, reason } = &err {
            self.notify(Notice::SendFailed {
                draft: draft.clone(),
                reason: reason.clone(),
            });
        }
        err
    }

    pub fn keystroke(&mut self, now: Instant) {
        let Some(conversation_id) = self.store.active_conversation().map(str::to_string) else {
            return;
        };
        let event = self.typing.keystroke(&conversation_id, now);
        if let Err(e) = self.channel.emit(event) {
            log::debug!("typing not sent: {}", e);
        }
    }

    /// Reloads the conversation list and the open conversation's history.
    pub fn refresh(&mut self) {
        self.refresh_conversations();
        self.resnapshot_active();
    }

    pub fn shutdown(&mut self) {
        self.release_subscription();
        self.loads.abort_all();
        self.reconnect_at = None;
        self.channel.disconnect();
    }

    fn release_subscription(&mut self) {
        let conversation_id = match std::mem::replace(&mut self.subscription, Subscription::Idle) {
            Subscription::Idle => return,
            Subscription::Subscribing { conversation_id, .. }
            | Subscription::Active { conversation_id }
            | Subscription::Unsubscribing { conversation_id } => conversation_id,
        };

        let had_indicator = self.typing.indicator().is_some();
        if let Some(stop) = self.typing.clear() {
            if let Err(e) = self.channel.emit(stop) {
                log::debug!("typing stop not sent: {}", e);
            }
        }
        if had_indicator {
            self.notify(Notice::TypingChanged(None));
        }

        self.subscription = Subscription::Unsubscribing {
            conversation_id: conversation_id.clone(),
        };
        self.channel.unsubscribe(&conversation_id);
        self.buffered.clear();
        self.receipt_pending = false;
        self.subscription = Subscription::Idle;
    }

    fn refresh_conversations(&mut self) {
        let loader = self.loader.clone();
        self.loads
            .spawn(async move { LoadOutcome::Conversations(loader.load_conversations().await) });
    }

    fn spawn_history(&mut self, conversation_id: &str, generation: u64) {
        let loader = self.loader.clone();
        let conversation_id = conversation_id.to_string();
        self.loads.spawn(async move {
            LoadOutcome::Messages {
                generation,
                result: loader.load_messages(&conversation_id).await,
            }
        });
    }

    /// Re-fetches the open conversation's history without leaving its topic.
    fn resnapshot_active(&mut self) {
        let Some(conversation_id) = self.subscription.conversation_id().map(str::to_string) else {
            return;
        };
        self.generation += 1;
        let generation = self.generation;
        self.buffered.clear();
        self.spawn_history(&conversation_id, generation);
        self.subscription = Subscription::Subscribing {
            conversation_id,
            generation,
        };
    }

    // ---- snapshot results ----

    fn apply_load(&mut self, outcome: LoadOutcome) {
        match outcome {
            LoadOutcome::Conversations(Ok(list)) => {
                self.store.replace_conversations(list);
                self.notify(Notice::ConversationsChanged);
            }
            LoadOutcome::Conversations(Err(e)) => {
                log::warn!("conversation list fetch failed: {}", e);
                self.notify(Notice::Error(format!("Failed to load conversations: {}", e)));
            }
            LoadOutcome::Messages { generation, result } => self.apply_history(generation, result),
            LoadOutcome::Started { generation, result } => match result {
                Ok(conversation) => {
                    let id = conversation.id.clone();
                    self.store.upsert_conversation(conversation);
                    self.notify(Notice::ConversationsChanged);
                    if generation == self.generation {
                        self.open_conversation(&id);
                    } else {
                        log::debug!("not opening {}: another conversation was opened meanwhile", id);
                    }
                }
                Err(e) => {
                    log::warn!("starting conversation failed: {}", e);
                    self.notify(Notice::Error(format!("Failed to start conversation: {}", e)));
                }
            },
        }
    }

    fn apply_history(&mut self, generation: u64, result: Result<MessageSnapshot>) {
        let conversation_id = match &self.subscription {
            Subscription::Subscribing {
                conversation_id,
                generation: current,
            } if *current == generation => conversation_id.clone(),
            _ => {
                log::debug!("discarding stale history snapshot (generation {})", generation);
                return;
            }
        };

        match result {
            Ok(snapshot) => {
                let added = self.store.merge_history(&conversation_id, snapshot.messages);
                log::debug!("history for {}: {} messages", conversation_id, added);
                if self.receipt_pending {
                    self.store.mark_own_messages_read(&conversation_id, &self.me);
                }
                if snapshot.marked_read {
                    self.store.mark_conversation_read(&conversation_id);
                    self.notify(Notice::ConversationsChanged);
                } else {
                    self.notify(Notice::Error("Failed to mark conversation read".into()));
                }
            }
            Err(e) => {
                // live messages still get applied; Refresh retries the history
                log::warn!("history fetch for {} failed: {}", conversation_id, e);
                self.notify(Notice::Error(format!("Failed to load messages: {}", e)));
            }
        }

        for message in std::mem::take(&mut self.buffered) {
            self.store.append_message(message);
        }
        self.receipt_pending = false;
        self.subscription = Subscription::Active { conversation_id };
        self.notify(Notice::MessagesChanged);
    }

    // ---- channel ----

    pub fn handle_signal(&mut self, signal: ChannelSignal, now: Instant) {
        match signal {
            ChannelSignal::Connected => {
                self.reconnect_at = None;
                self.backoff = self.settings.reconnect_min;
                self.notify(Notice::Connection(ConnectionState::Connected));
                if self.connected_before {
                    // anything pushed while we were away only exists in the snapshots
                    self.refresh();
                }
                self.connected_before = true;
            }
            ChannelSignal::Disconnected => {
                self.notify(Notice::Connection(ConnectionState::Disconnected));
                self.schedule_reconnect(now);
            }
            ChannelSignal::ConnectFailed(reason) => {
                self.notify(Notice::Error(format!("Connection failed: {}", reason)));
                self.schedule_reconnect(now);
            }
            ChannelSignal::Event(event) => self.handle_event(event, now),
        }
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        if self.reconnect_at.is_some() {
            return;
        }
        log::info!("reconnecting in {:?}", self.backoff);
        self.reconnect_at = Some(now + self.backoff);
        self.backoff = (self.backoff * 2).min(self.settings.reconnect_max);
    }

    pub fn handle_event(&mut self, event: InboundEvent, now: Instant) {
        let for_open = event
            .conversation_id()
            .is_some_and(|id| self.store.active_conversation() == Some(id));
        match event {
            InboundEvent::NewMessage(message) => self.on_new_message(message),
            InboundEvent::UserTyping(notice) => {
                if !for_open || notice.user_id == self.me {
                    return;
                }
                if notice.is_typing {
                    self.typing.remote_started(&notice.user_name, now);
                    self.notify(Notice::TypingChanged(Some(notice.user_name)));
                } else if self.typing.remote_stopped() {
                    self.notify(Notice::TypingChanged(None));
                }
            }
            InboundEvent::MessagesRead(receipt) => {
                if !for_open {
                    return;
                }
                if matches!(self.subscription, Subscription::Subscribing { .. }) {
                    self.receipt_pending = true;
                }
                let mut flipped = self
                    .store
                    .mark_own_messages_read(&receipt.conversation_id, &self.me);
                for m in self.buffered.iter_mut() {
                    if m.conversation_id == receipt.conversation_id && m.is_from(&self.me) && !m.read {
                        m.read = true;
                        flipped += 1;
                    }
                }
                if flipped > 0 {
                    self.notify(Notice::MessagesChanged);
                }
            }
            InboundEvent::Error(e) => {
                log::warn!("server error: {}", e.message);
                let message = if e.message.is_empty() {
                    "Socket error".to_string()
                } else {
                    e.message
                };
                self.notify(Notice::Error(message));
            }
        }
    }

    fn on_new_message(&mut self, message: Message) {
        if !self.store.record_preview(&message, &self.me) {
            log::debug!("message for unlisted conversation {}", message.conversation_id);
            self.refresh_conversations();
        }
        self.notify(Notice::ConversationsChanged);

        if self.subscription.conversation_id() != Some(message.conversation_id.as_str()) {
            return;
        }
        if matches!(self.subscription, Subscription::Subscribing { .. }) {
            self.buffered.push(message);
        } else if self.store.append_message(message) {
            self.notify(Notice::MessagesChanged);
        }
    }

    // ---- timers ----

    /// Fires whatever is due at `now`: the local typing stop, the remote
    /// indicator timeout and a pending reconnect.
    pub fn tick(&mut self, now: Instant) {
        let expired = self.typing.expire(now);
        if let Some(stop) = expired.stop_typing {
            if let Err(e) = self.channel.emit(stop) {
                log::debug!("typing stop not sent: {}", e);
            }
        }
        if expired.indicator_hidden {
            self.notify(Notice::TypingChanged(None));
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            self.connect();
        }
    }
}
