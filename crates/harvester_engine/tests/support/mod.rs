//! In-memory capabilities shared by the orchestrator tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use harvester_core::{ContextHandle, HarvestConfig, Item, ItemId, StatusReport};
use harvester_engine::{
    Capabilities, CapabilityError, CapabilityErrorKind, CollectCommand, CollectReply,
    CollectorBridge, ContextManager, Product, ResultSink, StaticCredentials, WorkSource,
};
use serde_json::json;

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(engine_logging::initialize_for_tests);
}

pub fn item(id: &str, target_count: u32) -> Item {
    Item {
        id: ItemId::new(id),
        source_url: format!("https://shop.test/{id}"),
        display_name: format!("Item {id}"),
        target_count,
        priority: 0,
    }
}

/// Short intervals so a paused clock gets through a run quickly.
pub fn fast_config() -> HarvestConfig {
    HarvestConfig {
        max_concurrency: 2,
        per_item_timeout_ms: 1_000,
        pull_interval_ms: 10,
        max_consecutive_errors: 3,
        auto_upload: true,
        close_context_after_collect: true,
        ready_timeout_ms: 200,
        close_grace_ms: 0,
        poll_interval_ms: 10,
        error_log_capacity: 50,
    }
}

pub fn capabilities(
    source: &Arc<FakeWorkSource>,
    browser: &Arc<FakeBrowser>,
    sink: &Arc<RecordingSink>,
) -> Capabilities {
    Capabilities {
        work_source: source.clone(),
        contexts: browser.clone(),
        bridge: browser.clone(),
        sink: sink.clone(),
        credentials: Arc::new(StaticCredentials::new("test-token")),
    }
}

pub enum Pull {
    Item(Item),
    Empty,
    Fail,
}

#[derive(Default)]
struct SourceState {
    queue: VecDeque<Pull>,
    endless: bool,
    generated: u64,
    pulls: usize,
    reports: Vec<(ItemId, StatusReport)>,
}

#[derive(Default)]
pub struct FakeWorkSource {
    state: Mutex<SourceState>,
    fail_reports: bool,
    pull_delay: Duration,
    report_delay: Duration,
}

impl FakeWorkSource {
    /// Serves `pulls` in order, then reports an empty queue forever.
    pub fn scripted(pulls: Vec<Pull>) -> Self {
        Self {
            state: Mutex::new(SourceState {
                queue: pulls.into(),
                ..SourceState::default()
            }),
            ..Self::default()
        }
    }

    pub fn with_items(items: Vec<Item>) -> Self {
        Self::scripted(items.into_iter().map(Pull::Item).collect())
    }

    /// Never runs dry: every pull yields a fresh item.
    pub fn endless() -> Self {
        let source = Self::default();
        source.state.lock().unwrap().endless = true;
        source
    }

    pub fn failing_reports(mut self) -> Self {
        self.fail_reports = true;
        self
    }

    /// Every pull takes this long before answering.
    pub fn pull_delay(mut self, millis: u64) -> Self {
        self.pull_delay = Duration::from_millis(millis);
        self
    }

    /// Every status report is recorded only after this delay.
    pub fn report_delay(mut self, millis: u64) -> Self {
        self.report_delay = Duration::from_millis(millis);
        self
    }

    pub fn pull_count(&self) -> usize {
        self.state.lock().unwrap().pulls
    }

    pub fn reports(&self) -> Vec<(ItemId, StatusReport)> {
        self.state.lock().unwrap().reports.clone()
    }

    pub fn reports_for(&self, id: &str) -> Vec<StatusReport> {
        self.reports()
            .into_iter()
            .filter(|(item, _)| item.as_str() == id)
            .map(|(_, report)| report)
            .collect()
    }

    pub fn final_report(&self, id: &str) -> Option<StatusReport> {
        self.reports_for(id).pop()
    }
}

#[async_trait::async_trait]
impl WorkSource for FakeWorkSource {
    async fn next_item(&self) -> Result<Option<Item>, CapabilityError> {
        tokio::time::sleep(self.pull_delay).await;
        let mut state = self.state.lock().unwrap();
        state.pulls += 1;
        match state.queue.pop_front() {
            Some(Pull::Item(item)) => Ok(Some(item)),
            Some(Pull::Empty) => Ok(None),
            Some(Pull::Fail) => Err(CapabilityError::new(
                CapabilityErrorKind::HttpStatus(503),
                "backend unavailable",
            )),
            None if state.endless => {
                state.generated += 1;
                Ok(Some(item(&format!("e{}", state.generated), 3)))
            }
            None => Ok(None),
        }
    }

    async fn report_status(
        &self,
        item_id: &ItemId,
        report: &StatusReport,
    ) -> Result<(), CapabilityError> {
        tokio::time::sleep(self.report_delay).await;
        self.state
            .lock()
            .unwrap()
            .reports
            .push((item_id.clone(), report.clone()));
        if self.fail_reports {
            return Err(CapabilityError::new(CapabilityErrorKind::Network, "report lost"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum CollectPlan {
    Products { count: usize, delay: Duration },
    /// Never replies.
    Hang,
    Reject(&'static str),
    Fail(CapabilityErrorKind),
}

impl CollectPlan {
    pub fn products(count: usize, delay_ms: u64) -> Self {
        CollectPlan::Products {
            count,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyPlan {
    Immediate,
    NotReady,
    Never,
}

struct BrowserState {
    next_handle: u64,
    open: BTreeMap<String, String>,
    max_open: usize,
    opened_urls: Vec<String>,
    closed: Vec<String>,
    cancelled: Vec<String>,
    sends: usize,
    max_sending: usize,
    sending: usize,
}

/// Context manager and collector bridge backed by plain maps.
pub struct FakeBrowser {
    state: Mutex<BrowserState>,
    default_plan: CollectPlan,
    plans: HashMap<String, CollectPlan>,
    fail_open: HashSet<String>,
    ready: ReadyPlan,
}

impl FakeBrowser {
    pub fn new(default_plan: CollectPlan) -> Self {
        Self {
            state: Mutex::new(BrowserState {
                next_handle: 0,
                open: BTreeMap::new(),
                max_open: 0,
                opened_urls: Vec::new(),
                closed: Vec::new(),
                cancelled: Vec::new(),
                sends: 0,
                max_sending: 0,
                sending: 0,
            }),
            default_plan,
            plans: HashMap::new(),
            fail_open: HashSet::new(),
            ready: ReadyPlan::Immediate,
        }
    }

    pub fn plan_for(mut self, item_id: &str, plan: CollectPlan) -> Self {
        self.plans.insert(item(item_id, 0).source_url, plan);
        self
    }

    pub fn fail_open_for(mut self, item_id: &str) -> Self {
        self.fail_open.insert(item(item_id, 0).source_url);
        self
    }

    pub fn ready(mut self, ready: ReadyPlan) -> Self {
        self.ready = ready;
        self
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    pub fn max_open(&self) -> usize {
        self.state.lock().unwrap().max_open
    }

    pub fn max_sending(&self) -> usize {
        self.state.lock().unwrap().max_sending
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.state.lock().unwrap().opened_urls.clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub fn send_count(&self) -> usize {
        self.state.lock().unwrap().sends
    }

    fn plan(&self, handle: &ContextHandle) -> CollectPlan {
        let state = self.state.lock().unwrap();
        state
            .open
            .get(handle.as_str())
            .and_then(|url| self.plans.get(url))
            .cloned()
            .unwrap_or_else(|| self.default_plan.clone())
    }
}

#[async_trait::async_trait]
impl ContextManager for FakeBrowser {
    async fn open(&self, url: &str) -> Result<Option<ContextHandle>, CapabilityError> {
        let mut state = self.state.lock().unwrap();
        state.opened_urls.push(url.to_string());
        if self.fail_open.contains(url) {
            return Err(CapabilityError::new(CapabilityErrorKind::Rejected, "tab refused"));
        }
        state.next_handle += 1;
        let handle = format!("tab-{}", state.next_handle);
        state.open.insert(handle.clone(), url.to_string());
        state.max_open = state.max_open.max(state.open.len());
        Ok(Some(ContextHandle::new(handle)))
    }

    async fn await_ready(
        &self,
        _handle: &ContextHandle,
        _timeout: Duration,
    ) -> Result<bool, CapabilityError> {
        match self.ready {
            ReadyPlan::Immediate => Ok(true),
            ReadyPlan::NotReady => Ok(false),
            ReadyPlan::Never => std::future::pending().await,
        }
    }

    async fn close(&self, handle: &ContextHandle) -> Result<(), CapabilityError> {
        let mut state = self.state.lock().unwrap();
        if state.open.remove(handle.as_str()).is_none() {
            return Err(CapabilityError::new(
                CapabilityErrorKind::Unavailable,
                format!("{handle} already closed"),
            ));
        }
        state.closed.push(handle.as_str().to_string());
        Ok(())
    }
}

/// Decrements the in-flight counter even when the send future is dropped.
struct Sending<'a>(&'a Mutex<BrowserState>);

impl Drop for Sending<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap().sending -= 1;
    }
}

#[async_trait::async_trait]
impl CollectorBridge for FakeBrowser {
    async fn send(
        &self,
        handle: &ContextHandle,
        command: &CollectCommand,
        _timeout: Duration,
    ) -> Result<CollectReply, CapabilityError> {
        let plan = self.plan(handle);
        let _sending = {
            let mut state = self.state.lock().unwrap();
            state.sends += 1;
            state.sending += 1;
            state.max_sending = state.max_sending.max(state.sending);
            Sending(&self.state)
        };
        match plan {
            CollectPlan::Products { count, delay } => {
                tokio::time::sleep(delay).await;
                let products: Vec<Product> = (0..count)
                    .map(|n| json!({ "sku": format!("{handle}-{n}"), "target": command.target_count }))
                    .collect();
                Ok(CollectReply::products(products))
            }
            CollectPlan::Hang => std::future::pending().await,
            CollectPlan::Reject(reason) => Ok(CollectReply::failure(reason)),
            CollectPlan::Fail(kind) => Err(CapabilityError::new(kind, "bridge broke")),
        }
    }

    async fn cancel(&self, handle: &ContextHandle) -> Result<(), CapabilityError> {
        self.state
            .lock()
            .unwrap()
            .cancelled
            .push(handle.as_str().to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    uploads: Mutex<Vec<(ItemId, usize)>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<(ItemId, usize)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ResultSink for RecordingSink {
    async fn upload(&self, item: &Item, products: &[Product]) -> Result<u64, CapabilityError> {
        self.uploads
            .lock()
            .unwrap()
            .push((item.id.clone(), products.len()));
        if self.fail {
            return Err(CapabilityError::new(CapabilityErrorKind::HttpStatus(500), "sink down"));
        }
        Ok(products.len() as u64)
    }
}
