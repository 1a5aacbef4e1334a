//! Harvester core: pure run-state bookkeeping, session phases and run policy.
mod config;
mod item;
mod policy;
mod run_state;
mod session;
mod snapshot;

pub use config::{ConfigError, HarvestConfig};
pub use item::{Item, ItemId, ItemStatus, StatusReport};
pub use policy::{pull_backoff, FailureCeiling};
pub use run_state::{HaltReason, LoopStep, PullVerdict, RunState, SessionOutcome, SlotsFull};
pub use session::{ContextHandle, Phase, PhaseError, Session, SessionId};
pub use snapshot::{RunStateSnapshot, SessionView};
