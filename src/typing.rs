use std::time::Duration;

use tokio::time::Instant;

use crate::api::events::OutboundEvent;

pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(1000);
pub const TYPING_INDICATOR_TTL: Duration = Duration::from_millis(3000);

#[derive(Debug)]
struct LocalTyping {
    conversation_id: String,
    stop_at: Instant,
}

#[derive(Debug)]
struct RemoteTyping {
    user_name: String,
    hide_at: Instant,
}

/// What fell due on a call to [`TypingTracker::expire`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Expired {
    pub stop_typing: Option<OutboundEvent>,
    pub indicator_hidden: bool,
}

/// Local "I am typing" debounce and the remote typing indicator.
///
/// Timers are plain deadlines owned here; the caller sleeps until
/// [`next_deadline`](Self::next_deadline) and calls [`expire`](Self::expire).
#[derive(Debug)]
pub struct TypingTracker {
    debounce: Duration,
    indicator_ttl: Duration,
    local: Option<LocalTyping>,
    remote: Option<RemoteTyping>,
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(TYPING_DEBOUNCE, TYPING_INDICATOR_TTL)
    }
}

impl TypingTracker {
    pub fn new(debounce: Duration, indicator_ttl: Duration) -> Self {
        Self {
            debounce,
            indicator_ttl,
            local: None,
            remote: None,
        }
    }

    /// Every keystroke emits `typing: true` and pushes the pending
    /// `typing: false` out to `now + debounce`.
    pub fn keystroke(&mut self, conversation_id: &str, now: Instant) -> OutboundEvent {
        self.local = Some(LocalTyping {
            conversation_id: conversation_id.to_string(),
            stop_at: now + self.debounce,
        });
        OutboundEvent::Typing {
            conversation_id: conversation_id.to_string(),
            is_typing: true,
        }
    }

    pub fn remote_started(&mut self, user_name: &str, now: Instant) {
        self.remote = Some(RemoteTyping {
            user_name: user_name.to_string(),
            hide_at: now + self.indicator_ttl,
        });
    }

    /// Returns true when an indicator was showing.
    pub fn remote_stopped(&mut self) -> bool {
        self.remote.take().is_some()
    }

    /// Name of the user shown as typing, if any.
    pub fn indicator(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.user_name.as_str())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let local = self.local.as_ref().map(|l| l.stop_at);
        let remote = self.remote.as_ref().map(|r| r.hide_at);
        match (local, remote) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn expire(&mut self, now: Instant) -> Expired {
        let mut expired = Expired::default();
        if self.local.as_ref().is_some_and(|l| l.stop_at <= now) {
            expired.stop_typing = self.local.take().map(|l| OutboundEvent::Typing {
                conversation_id: l.conversation_id,
                is_typing: false,
            });
        }
        if self.remote.as_ref().is_some_and(|r| r.hide_at <= now) {
            self.remote = None;
            expired.indicator_hidden = true;
        }
        expired
    }

    /// Drops both timers. A pending local stop is returned so it can be sent
    /// before the conversation's topic is left.
    pub fn clear(&mut self) -> Option<OutboundEvent> {
        self.remote = None;
        self.local.take().map(|l| OutboundEvent::Typing {
            conversation_id: l.conversation_id,
            is_typing: false,
        })
    }
}
