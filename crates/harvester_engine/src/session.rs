use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use engine_logging::{engine_debug, engine_info, engine_warn};
use harvester_core::{
    ContextHandle, HarvestConfig, Item, Phase, RunState, SessionId, SessionOutcome, StatusReport,
};
use tokio_util::sync::CancellationToken;

use crate::{Capabilities, CapabilityErrorKind, CollectCommand, Product, SessionFailure};

pub(crate) fn lock_state(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives one item through open -> ready -> collect -> upload -> close and
/// reports the result. Owns its context handle for the whole lifetime.
pub(crate) struct SessionDriver {
    id: SessionId,
    item: Item,
    config: Arc<HarvestConfig>,
    caps: Capabilities,
    state: Arc<Mutex<RunState>>,
    cancel: CancellationToken,
}

impl SessionDriver {
    pub(crate) fn new(
        id: SessionId,
        item: Item,
        config: Arc<HarvestConfig>,
        caps: Capabilities,
        state: Arc<Mutex<RunState>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            item,
            config,
            caps,
            state,
            cancel,
        }
    }

    pub(crate) async fn run(self) {
        engine_info!(
            "session {} started: item={} url={}",
            self.id,
            self.item.id,
            self.item.source_url
        );

        let mut context = None;
        let mut outcome = SessionOutcome::default();
        let mut failure = None;
        let mut collected = false;

        match self.open_and_collect(&mut context).await {
            Ok(products) => {
                collected = true;
                outcome.collected = products.len() as u64;
                match self.upload(&products).await {
                    Ok(uploaded) => outcome.uploaded = uploaded,
                    Err(err) => failure = Some(err),
                }
            }
            Err(err) => failure = Some(err),
        }

        self.close(context, collected).await;

        if let Some(err) = &failure {
            engine_warn!("session {} failed: item={} {}", self.id, self.item.id, err);
        }
        outcome.failure = failure.map(|err| err.to_string());
        self.report(&outcome).await;

        lock_state(&self.state).finish_session(self.id, &outcome);
        engine_info!(
            "session {} finished: item={} collected={} uploaded={}",
            self.id,
            self.item.id,
            outcome.collected,
            outcome.uploaded
        );
    }

    async fn open_and_collect(
        &self,
        context: &mut Option<ContextHandle>,
    ) -> Result<Vec<Product>, SessionFailure> {
        let handle = match self.caps.contexts.open(&self.item.source_url).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                return Err(SessionFailure::ContextCreationFailed {
                    reason: "no handle returned".to_string(),
                })
            }
            Err(err) => {
                return Err(SessionFailure::ContextCreationFailed {
                    reason: err.to_string(),
                })
            }
        };
        *context = Some(handle.clone());
        lock_state(&self.state).attach_context(self.id, handle.clone());

        self.enter(Phase::AwaitingReady);
        self.await_ready(&handle).await;

        if self.cancel.is_cancelled() {
            return Err(SessionFailure::Cancelled);
        }

        self.enter(Phase::Collecting);
        self.collect(&handle).await
    }

    /// Ready is advisory: a context that never signals may still hold
    /// usable data, so every path falls through to collection.
    async fn await_ready(&self, handle: &ContextHandle) {
        let ceiling = self.config.ready_timeout();
        let wait = tokio::time::timeout(ceiling, self.caps.contexts.await_ready(handle, ceiling));
        tokio::select! {
            result = wait => match result {
                Ok(Ok(true)) => engine_debug!("session {} context {} ready", self.id, handle),
                Ok(Ok(false)) | Err(_) => engine_warn!(
                    "session {} context {} not ready after {:?}; collecting anyway",
                    self.id,
                    handle,
                    ceiling
                ),
                Ok(Err(err)) => engine_warn!(
                    "session {} ready signal failed: {}; collecting anyway",
                    self.id,
                    err
                ),
            },
            _ = self.cancel.cancelled() => {
                engine_debug!("session {} ready wait interrupted by stop", self.id);
            }
        }
    }

    async fn collect(&self, handle: &ContextHandle) -> Result<Vec<Product>, SessionFailure> {
        let limit = self.config.per_item_timeout();
        let command = CollectCommand::auto(self.item.target_count);
        let reply = tokio::time::timeout(limit, self.caps.bridge.send(handle, &command, limit)).await;

        match reply {
            Err(_) => Err(SessionFailure::CollectionTimedOut(limit)),
            Ok(Err(err)) if err.kind == CapabilityErrorKind::Timeout => {
                Err(SessionFailure::CollectionTimedOut(limit))
            }
            Ok(Err(err)) => Err(SessionFailure::Bridge(err)),
            Ok(Ok(reply)) if !reply.success => Err(SessionFailure::CollectionRejected(
                reply
                    .error
                    .unwrap_or_else(|| "no error message".to_string()),
            )),
            Ok(Ok(reply)) => {
                engine_debug!(
                    "session {} collected {} products",
                    self.id,
                    reply.products.len()
                );
                Ok(reply.products)
            }
        }
    }

    async fn upload(&self, products: &[Product]) -> Result<u64, SessionFailure> {
        self.enter(Phase::Uploading);
        if products.is_empty() {
            engine_debug!("session {} has no products; skipping upload", self.id);
            return Ok(0);
        }
        if !self.config.auto_upload {
            engine_debug!("session {} auto upload disabled", self.id);
            return Ok(0);
        }
        self.caps
            .sink
            .upload(&self.item, products)
            .await
            .map_err(SessionFailure::Upload)
    }

    /// Always runs. Close failures mean the context is already gone and
    /// are only logged.
    async fn close(&self, context: Option<ContextHandle>, collected: bool) {
        self.enter(Phase::Closing);
        let Some(handle) = context else {
            return;
        };
        if collected {
            if !self.config.close_context_after_collect {
                engine_debug!("session {} leaving context {} open", self.id, handle);
                return;
            }
            // Lets in-context persistence settle; not shortened by a stop.
            tokio::time::sleep(self.config.close_grace()).await;
        }
        if let Err(err) = self.caps.contexts.close(&handle).await {
            engine_debug!("session {} ignoring close failure for {}: {}", self.id, handle, err);
        }
    }

    async fn report(&self, outcome: &SessionOutcome) {
        let report = match &outcome.failure {
            Some(message) => StatusReport::failed(message.clone()),
            None => StatusReport::completed(outcome.collected),
        };
        if let Err(err) = self
            .caps
            .work_source
            .report_status(&self.item.id, &report)
            .await
        {
            engine_warn!(
                "session {} could not report {} for item {}: {}",
                self.id,
                report.status,
                self.item.id,
                err
            );
        }
    }

    fn enter(&self, phase: Phase) {
        let mut state = lock_state(&self.state);
        if let Err(err) = state.advance(self.id, phase) {
            state.record_error(err.to_string());
            return;
        }
        engine_debug!("session {} -> {}", self.id, phase);
    }
}
