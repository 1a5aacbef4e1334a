use std::sync::Once;
use std::time::Duration;

use chrono::Utc;
use harvester_core::{
    ContextHandle, HaltReason, HarvestConfig, Item, ItemId, LoopStep, Phase, PullVerdict,
    RunState, SessionOutcome,
};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

fn item(id: &str) -> Item {
    Item {
        id: ItemId::new(id),
        source_url: format!("https://shop.example/category/{id}"),
        display_name: format!("Category {id}"),
        target_count: 50,
        priority: 0,
    }
}

fn config(max_concurrency: usize) -> HarvestConfig {
    HarvestConfig {
        max_concurrency,
        max_consecutive_errors: 3,
        pull_interval_ms: 100,
        error_log_capacity: 4,
        ..HarvestConfig::default()
    }
}

fn running(config: &HarvestConfig) -> RunState {
    let mut state = RunState::idle();
    state.begin(config, Utc::now());
    state
}

#[test]
fn open_session_never_exceeds_max_concurrency() {
    init_logging();
    let config = config(2);
    let mut state = running(&config);

    assert_eq!(state.next_step(&config), LoopStep::Pull);
    state.open_session(item("a"), &config, Utc::now()).unwrap();
    state.open_session(item("b"), &config, Utc::now()).unwrap();
    assert_eq!(state.next_step(&config), LoopStep::WaitForSlot);

    let err = state.open_session(item("c"), &config, Utc::now()).unwrap_err();
    assert_eq!(err.max, 2);
    assert_eq!(state.active_sessions(), 2);
}

#[test]
fn finishing_a_session_frees_its_slot_and_credits_counters() {
    init_logging();
    let config = config(1);
    let mut state = running(&config);
    let id = state.open_session(item("a"), &config, Utc::now()).unwrap();

    let outcome = SessionOutcome {
        collected: 10,
        uploaded: 0,
        failure: Some("upload rejected".to_string()),
    };
    assert!(state.finish_session(id, &outcome));
    assert!(!state.finish_session(id, &outcome));

    let snapshot = state.snapshot(Utc::now());
    assert_eq!(snapshot.active_sessions(), 0);
    assert_eq!(snapshot.collected_count, 10);
    assert_eq!(snapshot.processed_count, 1);
    assert_eq!(snapshot.failed_count, 1);
    assert_eq!(snapshot.errors, vec!["Category a: upload rejected".to_string()]);
    assert_eq!(state.next_step(&config), LoopStep::Pull);
}

#[test]
fn three_consecutive_pull_errors_halt_the_run() {
    init_logging();
    let config = config(2);
    let mut state = running(&config);

    assert_eq!(
        state.record_pull_error("connection refused", &config),
        PullVerdict::Retry {
            backoff: Duration::from_millis(200)
        }
    );
    assert_eq!(
        state.record_pull_error("connection refused", &config),
        PullVerdict::Retry {
            backoff: Duration::from_millis(200)
        }
    );
    assert_eq!(
        state.record_pull_error("connection refused", &config),
        PullVerdict::Halt
    );
    assert!(state.stop_requested());
    assert_eq!(state.halt_reason(), Some(HaltReason::FailureCeiling));
    assert_eq!(state.next_step(&config), LoopStep::Halt);
}

#[test]
fn successful_pull_resets_the_error_streak() {
    init_logging();
    let config = config(2);
    let mut state = running(&config);

    state.record_pull_error("timeout", &config);
    state.record_pull_error("timeout", &config);
    state.record_pull_success();
    assert_eq!(state.consecutive_errors(), 0);

    assert!(matches!(
        state.record_pull_error("timeout", &config),
        PullVerdict::Retry { .. }
    ));
    assert!(!state.stop_requested());
}

#[test]
fn session_failures_do_not_touch_the_ceiling() {
    init_logging();
    let config = config(3);
    let mut state = running(&config);
    for name in ["a", "b", "c"] {
        let id = state.open_session(item(name), &config, Utc::now()).unwrap();
        state.finish_session(
            id,
            &SessionOutcome {
                failure: Some("collector timed out".to_string()),
                ..SessionOutcome::default()
            },
        );
    }
    assert_eq!(state.consecutive_errors(), 0);
    assert!(!state.stop_requested());
}

#[test]
fn error_log_keeps_only_the_most_recent_entries() {
    init_logging();
    let config = config(1);
    let mut state = running(&config);
    for n in 0..6 {
        state.record_error(format!("error {n}"));
    }
    let errors = state.snapshot(Utc::now()).errors;
    assert_eq!(errors, vec!["error 2", "error 3", "error 4", "error 5"]);
}

#[test]
fn first_halt_reason_wins() {
    init_logging();
    let config = config(1);
    let mut state = running(&config);
    state.mark_exhausted();
    state.request_stop();
    assert_eq!(state.halt_reason(), Some(HaltReason::QueueExhausted));
}

#[test]
fn begin_resets_previous_run() {
    init_logging();
    let config = config(1);
    let mut state = running(&config);
    let id = state.open_session(item("a"), &config, Utc::now()).unwrap();
    state.finish_session(
        id,
        &SessionOutcome {
            collected: 3,
            ..SessionOutcome::default()
        },
    );
    state.request_stop();
    state.finish_run(Utc::now());
    assert!(!state.is_running());

    state.begin(&config, Utc::now());
    let snapshot = state.snapshot(Utc::now());
    assert!(snapshot.running);
    assert!(!snapshot.stop_requested);
    assert_eq!(snapshot.collected_count, 0);
    assert_eq!(snapshot.halt_reason, None);
    assert!(snapshot.finished_at.is_none());
}

#[test]
fn cancellable_contexts_skip_uploading_and_unopened_sessions() {
    init_logging();
    let config = config(3);
    let mut state = running(&config);
    let opening = state.open_session(item("a"), &config, Utc::now()).unwrap();
    let collecting = state.open_session(item("b"), &config, Utc::now()).unwrap();
    let uploading = state.open_session(item("c"), &config, Utc::now()).unwrap();

    for id in [collecting, uploading] {
        state.attach_context(id, ContextHandle::new(format!("tab-{id}")));
        state.advance(id, Phase::AwaitingReady).unwrap();
        state.advance(id, Phase::Collecting).unwrap();
    }
    state.advance(uploading, Phase::Uploading).unwrap();

    let contexts = state.cancellable_contexts();
    assert_eq!(contexts, vec![(collecting, ContextHandle::new("tab-s2"))]);
    assert_eq!(state.session(opening).unwrap().phase(), Phase::Opening);
}

#[test]
fn snapshot_serializes_for_the_status_surface() {
    init_logging();
    let config = config(1);
    let mut state = running(&config);
    state.open_session(item("a"), &config, Utc::now()).unwrap();

    let json = serde_json::to_value(state.snapshot(Utc::now())).unwrap();
    assert_eq!(json["running"], true);
    assert_eq!(json["sessions"][0]["itemId"], "a");
    assert_eq!(json["sessions"][0]["phase"], "opening");
    assert_eq!(json["haltReason"], serde_json::Value::Null);
}
