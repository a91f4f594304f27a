//! # Recording Session State
//!
//! One `Session` exists per live recording connection. It is owned by the
//! connection's actor and never shared, so none of its fields need locking.
//!
//! ## Session Lifecycle:
//! 1. **Open**: Accepting audio payload and control signals
//! 2. **Finalizing**: Sink closed, upload and metadata write pending
//! 3. **Done**: Finalization handled (successfully or not), artifact removed
//!
//! Entering `Finalizing` happens at most once no matter how many triggers
//! (explicit done, timer expiry, disconnect) arrive; `begin_finalizing` reports
//! whether the caller won that transition.

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Opaque per-connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Finalizing,
    Done,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Finalizing => "finalizing",
            SessionState::Done => "done",
        }
    }
}

/// What caused a session to leave `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeTrigger {
    /// The client sent `{"done": true}`
    Done,
    /// The maximum session duration elapsed
    Timeout,
    /// The socket closed, errored or went silent
    Disconnect,
    /// Writing payload to the artifact failed
    SinkFailure,
}

impl FinalizeTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeTrigger::Done => "done",
            FinalizeTrigger::Timeout => "timeout",
            FinalizeTrigger::Disconnect => "disconnect",
            FinalizeTrigger::SinkFailure => "sink_failure",
        }
    }
}

/// Everything the finalization pipeline needs to know about a session once it
/// stops accepting input. Detached from `Session` so it can move to another task.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub session_id: SessionId,
    pub user_id: Option<i64>,
    pub conversation_id: Option<i64>,
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    started_at: DateTime<Utc>,
    user_id: Option<i64>,
    conversation_id: Option<i64>,
    clean_finish: bool,
    state: SessionState,
    trigger: Option<FinalizeTrigger>,
}

impl Session {
    /// Start a new session for a caller resolved at connection open.
    pub fn open(user_id: Option<i64>) -> Self {
        Self {
            id: SessionId::generate(),
            started_at: Utc::now(),
            user_id,
            conversation_id: None,
            clean_finish: false,
            state: SessionState::Open,
            trigger: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn conversation_id(&self) -> Option<i64> {
        self.conversation_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn trigger(&self) -> Option<FinalizeTrigger> {
        self.trigger
    }

    pub fn clean_finish(&self) -> bool {
        self.clean_finish
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Bind the session to a conversation. Last value wins while open;
    /// returns false (and changes nothing) once finalization has begun.
    pub fn bind_conversation(&mut self, conversation_id: i64) -> bool {
        if !self.is_open() {
            return false;
        }
        self.conversation_id = Some(conversation_id);
        true
    }

    /// Move `Open → Finalizing`. Only the first caller gets `true`.
    ///
    /// `clean_finish` is decided here and nowhere else: it is true iff the
    /// winning trigger is an explicit done signal.
    pub fn begin_finalizing(&mut self, trigger: FinalizeTrigger) -> bool {
        if !self.is_open() {
            return false;
        }
        self.state = SessionState::Finalizing;
        self.trigger = Some(trigger);
        self.clean_finish = trigger == FinalizeTrigger::Done;
        true
    }

    /// Move `Finalizing → Done`.
    pub fn complete(&mut self) -> bool {
        if self.state != SessionState::Finalizing {
            return false;
        }
        self.state = SessionState::Done;
        true
    }

    pub fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            session_id: self.id.clone(),
            user_id: self.user_id,
            conversation_id: self.conversation_id,
            interrupted: !self.clean_finish,
            started_at: self.started_at,
        }
    }
}
