use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{ContextHandle, HaltReason, ItemId, Phase, Session, SessionId};

/// Read-only copy of the run state handed to the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStateSnapshot {
    pub running: bool,
    pub stop_requested: bool,
    pub sessions: Vec<SessionView>,
    pub collected_count: u64,
    pub processed_count: u64,
    pub failed_count: u64,
    pub uploaded_count: u64,
    pub pulled_count: u64,
    pub errors: Vec<String>,
    pub consecutive_errors: u32,
    pub halt_reason: Option<HaltReason>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStateSnapshot {
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: SessionId,
    pub item_id: ItemId,
    pub display_name: String,
    pub phase: Phase,
    pub context: Option<ContextHandle>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: i64,
}

impl SessionView {
    pub(crate) fn from_session(session: &Session, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session.id(),
            item_id: session.item().id.clone(),
            display_name: session.item().display_name.clone(),
            phase: session.phase(),
            context: session.context().cloned(),
            started_at: session.started_at(),
            elapsed_ms: (now - session.started_at()).num_milliseconds().max(0),
        }
    }
}
