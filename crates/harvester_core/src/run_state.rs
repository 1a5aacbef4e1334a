use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{pull_backoff, FailureCeiling};
use crate::snapshot::{RunStateSnapshot, SessionView};
use crate::{ContextHandle, HarvestConfig, Item, Phase, PhaseError, Session, SessionId};

/// Why the most recent run stopped pulling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HaltReason {
    QueueExhausted,
    StopRequested,
    FailureCeiling,
}

/// What the control loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStep {
    /// Leave the pull loop and drain.
    Halt,
    /// Every slot is busy; sleep one poll interval.
    WaitForSlot,
    Pull,
}

/// Decision taken after a failed pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullVerdict {
    Retry { backoff: Duration },
    Halt,
}

/// Terminal result of one session, folded into the run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Products returned by a successful collection.
    pub collected: u64,
    /// Products accepted by the result sink.
    pub uploaded: u64,
    pub failure: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("all {max} session slots are in use")]
pub struct SlotsFull {
    pub max: usize,
}

/// State of one `start`..`stop` cycle.
///
/// Invariants: `slots.len() <= config.max_concurrency`, and a run that is not
/// `running` has no slots left.
#[derive(Debug, Clone)]
pub struct RunState {
    running: bool,
    stop_requested: bool,
    slots: BTreeMap<SessionId, Session>,
    collected_count: u64,
    processed_count: u64,
    failed_count: u64,
    uploaded_count: u64,
    pulled_count: u64,
    errors: VecDeque<String>,
    error_capacity: usize,
    ceiling: FailureCeiling,
    halt_reason: Option<HaltReason>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    next_session: u64,
}

impl Default for RunState {
    fn default() -> Self {
        Self::idle()
    }
}

impl RunState {
    pub fn idle() -> Self {
        let config = HarvestConfig::default();
        Self {
            running: false,
            stop_requested: false,
            slots: BTreeMap::new(),
            collected_count: 0,
            processed_count: 0,
            failed_count: 0,
            uploaded_count: 0,
            pulled_count: 0,
            errors: VecDeque::new(),
            error_capacity: config.error_log_capacity,
            ceiling: FailureCeiling::new(config.max_consecutive_errors),
            halt_reason: None,
            started_at: None,
            finished_at: None,
            next_session: 1,
        }
    }

    /// Resets every counter and marks the run as active.
    pub fn begin(&mut self, config: &HarvestConfig, now: DateTime<Utc>) {
        *self = Self {
            running: true,
            error_capacity: config.error_log_capacity,
            ceiling: FailureCeiling::new(config.max_consecutive_errors),
            started_at: Some(now),
            ..Self::idle()
        };
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn active_sessions(&self) -> usize {
        self.slots.len()
    }

    pub fn collected_count(&self) -> u64 {
        self.collected_count
    }

    pub fn processed_count(&self) -> u64 {
        self.processed_count
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.ceiling.consecutive()
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.halt_reason
    }

    pub fn next_step(&self, config: &HarvestConfig) -> LoopStep {
        if self.stop_requested {
            LoopStep::Halt
        } else if self.slots.len() >= config.max_concurrency {
            LoopStep::WaitForSlot
        } else {
            LoopStep::Pull
        }
    }

    /// Binds a freshly pulled item to a new session.
    pub fn open_session(
        &mut self,
        item: Item,
        config: &HarvestConfig,
        now: DateTime<Utc>,
    ) -> Result<SessionId, SlotsFull> {
        if self.slots.len() >= config.max_concurrency {
            return Err(SlotsFull {
                max: config.max_concurrency,
            });
        }
        let id = SessionId(self.next_session);
        self.next_session += 1;
        self.pulled_count += 1;
        self.slots.insert(id, Session::new(id, item, now));
        Ok(id)
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.slots.get(&id)
    }

    /// Advances a live session. Unknown ids are ignored.
    pub fn advance(&mut self, id: SessionId, to: Phase) -> Result<(), PhaseError> {
        match self.slots.get_mut(&id) {
            Some(session) => session.advance(to),
            None => Ok(()),
        }
    }

    pub fn attach_context(&mut self, id: SessionId, handle: ContextHandle) {
        if let Some(session) = self.slots.get_mut(&id) {
            session.attach_context(handle);
        }
    }

    /// Contexts of sessions that still honour a stop request.
    pub fn cancellable_contexts(&self) -> Vec<(SessionId, ContextHandle)> {
        self.slots
            .values()
            .filter(|s| s.phase().accepts_cancellation())
            .filter_map(|s| s.context().map(|handle| (s.id(), handle.clone())))
            .collect()
    }

    /// Removes a session from the table and credits its outcome.
    ///
    /// Returns `false` if the session was already gone.
    pub fn finish_session(&mut self, id: SessionId, outcome: &SessionOutcome) -> bool {
        let Some(session) = self.slots.remove(&id) else {
            return false;
        };
        self.processed_count += 1;
        self.collected_count += outcome.collected;
        self.uploaded_count += outcome.uploaded;
        if let Some(message) = &outcome.failure {
            self.failed_count += 1;
            let entry = format!("{}: {}", session.item().label(), message);
            self.push_error(entry);
        }
        true
    }

    /// Any successful pull, with or without an item, clears the failure streak.
    pub fn record_pull_success(&mut self) {
        self.ceiling.reset();
    }

    pub fn record_pull_error(
        &mut self,
        message: impl Into<String>,
        config: &HarvestConfig,
    ) -> PullVerdict {
        self.push_error(message.into());
        if self.ceiling.record_failure() {
            self.stop_requested = true;
            self.halt_reason.get_or_insert(HaltReason::FailureCeiling);
            PullVerdict::Halt
        } else {
            PullVerdict::Retry {
                backoff: pull_backoff(config),
            }
        }
    }

    /// Records a session-phase or internal error that does not count
    /// toward the failure ceiling.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.push_error(message.into());
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
        self.halt_reason.get_or_insert(HaltReason::StopRequested);
    }

    pub fn mark_exhausted(&mut self) {
        self.stop_requested = true;
        self.halt_reason.get_or_insert(HaltReason::QueueExhausted);
    }

    /// Ends the run. Must only be called once every session has drained.
    pub fn finish_run(&mut self, now: DateTime<Utc>) {
        debug_assert!(self.slots.is_empty(), "run finished with live sessions");
        self.running = false;
        self.finished_at = Some(now);
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> RunStateSnapshot {
        RunStateSnapshot {
            running: self.running,
            stop_requested: self.stop_requested,
            sessions: self
                .slots
                .values()
                .map(|s| SessionView::from_session(s, now))
                .collect(),
            collected_count: self.collected_count,
            processed_count: self.processed_count,
            failed_count: self.failed_count,
            uploaded_count: self.uploaded_count,
            pulled_count: self.pulled_count,
            errors: self.errors.iter().cloned().collect(),
            consecutive_errors: self.ceiling.consecutive(),
            halt_reason: self.halt_reason,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    fn push_error(&mut self, entry: String) {
        if self.error_capacity == 0 {
            return;
        }
        while self.errors.len() >= self.error_capacity {
            self.errors.pop_front();
        }
        self.errors.push_back(entry);
    }
}
