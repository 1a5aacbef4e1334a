use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use engine_logging::{engine_debug, engine_error, engine_info, engine_warn};
use futures_util::future::join_all;
use harvester_core::{
    HarvestConfig, Item, LoopStep, PullVerdict, RunState, RunStateSnapshot, SessionId,
    SessionOutcome, StatusReport,
};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::session::{lock_state, SessionDriver};
use crate::{Capabilities, StartError};

/// Runs harvest cycles against one set of capabilities.
///
/// Cloning is cheap; every clone controls the same run. Only one run can be
/// active at a time; independent runs need independent orchestrators.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    caps: Capabilities,
    state: Arc<Mutex<RunState>>,
    control: Mutex<Option<RunControl>>,
    running: watch::Sender<bool>,
}

struct RunControl {
    /// Stops the pull loop.
    stop: CancellationToken,
    /// Advisory signal for live sessions.
    sessions: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(caps: Capabilities) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                caps,
                state: Arc::new(Mutex::new(RunState::idle())),
                control: Mutex::new(None),
                running,
            }),
        }
    }

    /// Starts a run and returns immediately; the control loop runs on the
    /// current tokio runtime.
    pub fn start(&self, config: HarvestConfig) -> Result<(), StartError> {
        let mut control = lock_control(&self.inner.control);
        let mut state = lock_state(&self.inner.state);
        if state.is_running() {
            return Err(StartError::AlreadyRunning);
        }
        if self.inner.caps.credentials.token().is_none() {
            return Err(StartError::MissingCredentials);
        }
        config.validate()?;

        engine_info!("starting harvest run: {:?}", config);
        state.begin(&config, Utc::now());
        self.inner.running.send_replace(true);
        drop(state);

        let stop = CancellationToken::new();
        let sessions = CancellationToken::new();
        let control_loop = ControlLoop {
            inner: Arc::clone(&self.inner),
            config: Arc::new(config),
            stop: stop.clone(),
            session_cancel: sessions.clone(),
            tasks: BTreeMap::new(),
        };
        let task = tokio::spawn(control_loop.run());
        *control = Some(RunControl {
            stop,
            sessions,
            task: Some(task),
        });
        Ok(())
    }

    /// Requests a stop and waits until every session has drained.
    ///
    /// Calling this on an orchestrator that is not running does nothing.
    pub async fn stop(&self) {
        let (task, contexts) = {
            let mut control = lock_control(&self.inner.control);
            let mut state = lock_state(&self.inner.state);
            let Some(run) = control.as_mut() else {
                return;
            };
            if !state.is_running() {
                return;
            }
            state.request_stop();
            run.stop.cancel();
            run.sessions.cancel();
            (run.task.take(), state.cancellable_contexts())
        };

        engine_info!(
            "stop requested; signalling {} live sessions",
            contexts.len()
        );
        let bridge = &self.inner.caps.bridge;
        let results = join_all(contexts.iter().map(|(_, handle)| bridge.cancel(handle))).await;
        for ((session, handle), result) in contexts.iter().zip(results) {
            if let Err(err) = result {
                engine_debug!(
                    "session {} cancel signal to {} not delivered: {}",
                    session,
                    handle,
                    err
                );
            }
        }

        self.wait().await;
        if let Some(task) = task {
            if let Err(err) = task.await {
                engine_error!("control loop ended abnormally: {}", err);
            }
        }
    }

    /// Waits until the current run, if any, has fully drained.
    pub async fn wait(&self) {
        let mut running = self.inner.running.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = running.wait_for(|active| !*active).await;
    }

    /// Read-only copy of the current run state.
    pub fn state(&self) -> RunStateSnapshot {
        lock_state(&self.inner.state).snapshot(Utc::now())
    }

    pub fn is_running(&self) -> bool {
        lock_state(&self.inner.state).is_running()
    }
}

fn lock_control(control: &Mutex<Option<RunControl>>) -> MutexGuard<'_, Option<RunControl>> {
    control.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The pull loop of one run. Owns the task handle of every session it spawned.
struct ControlLoop {
    inner: Arc<Inner>,
    config: Arc<HarvestConfig>,
    stop: CancellationToken,
    session_cancel: CancellationToken,
    tasks: BTreeMap<SessionId, JoinHandle<()>>,
}

impl ControlLoop {
    async fn run(mut self) {
        loop {
            self.reap_finished().await;

            let step = lock_state(&self.inner.state).next_step(&self.config);
            match step {
                LoopStep::Halt => break,
                LoopStep::WaitForSlot => {
                    self.pause(self.config.poll_interval()).await;
                    continue;
                }
                LoopStep::Pull => {}
            }

            match self.inner.caps.work_source.next_item().await {
                Ok(Some(item)) => {
                    lock_state(&self.inner.state).record_pull_success();
                    self.launch(item).await;
                    self.pause(self.config.pull_interval()).await;
                }
                Ok(None) => {
                    let exhausted = {
                        let mut state = lock_state(&self.inner.state);
                        state.record_pull_success();
                        let exhausted = state.active_sessions() == 0;
                        if exhausted {
                            state.mark_exhausted();
                        }
                        exhausted
                    };
                    if exhausted {
                        engine_info!("work source has no more items");
                    } else {
                        self.pause(self.config.poll_interval()).await;
                    }
                }
                Err(err) => {
                    let verdict = lock_state(&self.inner.state)
                        .record_pull_error(format!("pull failed: {err}"), &self.config);
                    match verdict {
                        PullVerdict::Retry { backoff } => {
                            engine_warn!("pull failed: {}; retrying in {:?}", err, backoff);
                            self.pause(backoff).await;
                        }
                        PullVerdict::Halt => {
                            engine_error!(
                                "pull failed: {}; {} consecutive failures, halting run",
                                err,
                                self.config.max_consecutive_errors
                            );
                        }
                    }
                }
            }
        }

        self.drain().await;

        let mut state = lock_state(&self.inner.state);
        state.finish_run(Utc::now());
        self.inner.running.send_replace(false);
        engine_info!(
            "harvest run finished: reason={:?} processed={} collected={}",
            state.halt_reason(),
            state.processed_count(),
            state.collected_count()
        );
    }

    async fn launch(&mut self, item: Item) {
        if lock_state(&self.inner.state).stop_requested() {
            // No status report: the work source offers unreported items again.
            engine_info!("stop requested; leaving item {} for a later run", item.id);
            return;
        }

        engine_info!("pulled item {} ({})", item.id, item.label());
        let opened = {
            let mut state = lock_state(&self.inner.state);
            match state.open_session(item.clone(), &self.config, Utc::now()) {
                Ok(id) => Some(id),
                Err(err) => {
                    state.record_error(format!("item {} not started: {err}", item.id));
                    None
                }
            }
        };
        let Some(id) = opened else {
            return;
        };

        if let Err(err) = self
            .inner
            .caps
            .work_source
            .report_status(&item.id, &StatusReport::collecting())
            .await
        {
            engine_warn!("could not mark item {} as collecting: {}", item.id, err);
        }

        let driver = SessionDriver::new(
            id,
            item,
            Arc::clone(&self.config),
            self.inner.caps.clone(),
            Arc::clone(&self.inner.state),
            self.session_cancel.clone(),
        );
        self.tasks.insert(id, tokio::spawn(driver.run()));
    }

    async fn reap_finished(&mut self) {
        let finished: Vec<SessionId> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            if let Some(task) = self.tasks.remove(&id) {
                let result = task.await;
                self.observe(id, result);
            }
        }
    }

    async fn drain(&mut self) {
        if !self.tasks.is_empty() {
            engine_info!("draining {} in-flight sessions", self.tasks.len());
        }
        let tasks = std::mem::take(&mut self.tasks);
        for (id, task) in tasks {
            let result = task.await;
            self.observe(id, result);
        }
        engine_debug!("drain complete");
    }

    /// A driver that panicked never removed its slot; do it here.
    fn observe(&self, id: SessionId, result: Result<(), JoinError>) {
        if let Err(err) = result {
            engine_error!("session {} task failed: {}", id, err);
            let outcome = SessionOutcome {
                failure: Some(format!("session task failed: {err}")),
                ..SessionOutcome::default()
            };
            lock_state(&self.inner.state).finish_session(id, &outcome);
        }
    }

    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stop.cancelled() => {}
        }
    }
}
