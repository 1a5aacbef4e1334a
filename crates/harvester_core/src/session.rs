use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Item;

/// Run-local session identifier, allocated in pull order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Opaque handle to one execution context (for instance a rendering tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextHandle(String);

impl ContextHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Opening,
    AwaitingReady,
    Collecting,
    Uploading,
    Closing,
}

impl Phase {
    /// The phase that follows `self` on the happy path.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Opening => Some(Phase::AwaitingReady),
            Phase::AwaitingReady => Some(Phase::Collecting),
            Phase::Collecting => Some(Phase::Uploading),
            Phase::Uploading => Some(Phase::Closing),
            Phase::Closing => None,
        }
    }

    /// Whether a stop request is still honoured in this phase.
    ///
    /// Once a session starts uploading it runs to completion.
    pub fn accepts_cancellation(self) -> bool {
        matches!(
            self,
            Phase::Opening | Phase::AwaitingReady | Phase::Collecting
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Opening => "opening",
            Phase::AwaitingReady => "awaiting-ready",
            Phase::Collecting => "collecting",
            Phase::Uploading => "uploading",
            Phase::Closing => "closing",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("session {session} cannot move from {from} to {to}")]
pub struct PhaseError {
    pub session: SessionId,
    pub from: Phase,
    pub to: Phase,
}

/// Bookkeeping for one item being processed in one execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    item: Item,
    context: Option<ContextHandle>,
    phase: Phase,
    started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, item: Item, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            item,
            context: None,
            phase: Phase::Opening,
            started_at,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    pub fn context(&self) -> Option<&ContextHandle> {
        self.context.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn attach_context(&mut self, handle: ContextHandle) {
        self.context = Some(handle);
    }

    /// Moves the session forward.
    ///
    /// Phases advance strictly in order, except that `Closing` may be entered
    /// from any earlier phase when the session fails.
    pub fn advance(&mut self, to: Phase) -> Result<(), PhaseError> {
        let allowed = self.phase.next() == Some(to) || (to == Phase::Closing && self.phase < to);
        if !allowed {
            return Err(PhaseError {
                session: self.id,
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }
}
