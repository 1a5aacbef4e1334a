//! The external capabilities the orchestrator drives.
//!
//! Each trait is a seam: the binary plugs in the HTTP adapters from
//! [`crate::http`], tests plug in in-memory fakes.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use harvester_core::{ContextHandle, Item, ItemId, StatusReport};
use serde::{Deserialize, Serialize};

/// One collected record. The orchestrator never looks inside it.
pub type Product = serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityError {
    pub kind: CapabilityErrorKind,
    pub message: String,
}

impl CapabilityError {
    pub fn new(kind: CapabilityErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for CapabilityError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityErrorKind {
    Network,
    HttpStatus(u16),
    Timeout,
    /// A request could not be built (bad base url, unserializable body).
    InvalidRequest,
    InvalidResponse,
    /// The remote side answered with a negative acknowledgement.
    Rejected,
    /// The handle was already invalidated externally.
    Unavailable,
}

impl fmt::Display for CapabilityErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityErrorKind::Network => write!(f, "network error"),
            CapabilityErrorKind::HttpStatus(code) => write!(f, "http status {code}"),
            CapabilityErrorKind::Timeout => write!(f, "timeout"),
            CapabilityErrorKind::InvalidRequest => write!(f, "invalid request"),
            CapabilityErrorKind::InvalidResponse => write!(f, "invalid response"),
            CapabilityErrorKind::Rejected => write!(f, "rejected"),
            CapabilityErrorKind::Unavailable => write!(f, "unavailable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectMode {
    Auto,
}

/// Command delivered to the in-context collector agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectCommand {
    pub target_count: u32,
    pub mode: CollectMode,
}

impl CollectCommand {
    pub fn auto(target_count: u32) -> Self {
        Self {
            target_count,
            mode: CollectMode::Auto,
        }
    }
}

/// Reply from the in-context collector agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectReply {
    pub success: bool,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CollectReply {
    pub fn products(products: Vec<Product>) -> Self {
        Self {
            success: true,
            products,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            products: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Backend queue that hands out items and receives their status.
#[async_trait::async_trait]
pub trait WorkSource: Send + Sync {
    /// Returns `Ok(None)` when no item is currently available.
    async fn next_item(&self) -> Result<Option<Item>, CapabilityError>;

    async fn report_status(
        &self,
        item_id: &ItemId,
        report: &StatusReport,
    ) -> Result<(), CapabilityError>;
}

/// Creates and tears down isolated rendering contexts.
#[async_trait::async_trait]
pub trait ContextManager: Send + Sync {
    /// Opens a background context for `url`. `Ok(None)` means no handle was produced.
    async fn open(&self, url: &str) -> Result<Option<ContextHandle>, CapabilityError>;

    /// Resolves `true` once the context reports ready, `false` if it gave up first.
    async fn await_ready(
        &self,
        handle: &ContextHandle,
        timeout: Duration,
    ) -> Result<bool, CapabilityError>;

    async fn close(&self, handle: &ContextHandle) -> Result<(), CapabilityError>;
}

/// Request/response channel to the collector agent running inside a context.
#[async_trait::async_trait]
pub trait CollectorBridge: Send + Sync {
    async fn send(
        &self,
        handle: &ContextHandle,
        command: &CollectCommand,
        timeout: Duration,
    ) -> Result<CollectReply, CapabilityError>;

    /// Asks the agent to wind down. Advisory only.
    async fn cancel(&self, handle: &ContextHandle) -> Result<(), CapabilityError>;
}

/// Durable destination for collected products.
#[async_trait::async_trait]
pub trait ResultSink: Send + Sync {
    /// Stores the products and returns how many were accepted.
    async fn upload(&self, item: &Item, products: &[Product]) -> Result<u64, CapabilityError>;
}

/// Supplies the bearer token used against the backend.
pub trait CredentialProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// The set of collaborators one orchestrator works with.
#[derive(Clone)]
pub struct Capabilities {
    pub work_source: Arc<dyn WorkSource>,
    pub contexts: Arc<dyn ContextManager>,
    pub bridge: Arc<dyn CollectorBridge>,
    pub sink: Arc<dyn ResultSink>,
    pub credentials: Arc<dyn CredentialProvider>,
}
