use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned to an item by the work source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One catalog page to harvest, as handed out by the work source.
///
/// Items are immutable once fetched and are never cached past the session
/// that processes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub source_url: String,
    #[serde(default)]
    pub display_name: String,
    pub target_count: u32,
    #[serde(default)]
    pub priority: i32,
}

impl Item {
    /// Name used in logs and error entries; falls back to the id.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            self.id.as_str()
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// The item has been bound to a session.
    Collecting,
    Completed,
    Failed,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Collecting => write!(f, "collecting"),
            ItemStatus::Completed => write!(f, "completed"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Body of a status update sent back to the work source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusReport {
    pub fn collecting() -> Self {
        Self {
            status: ItemStatus::Collecting,
            product_count: None,
            error_message: None,
        }
    }

    pub fn completed(product_count: u64) -> Self {
        Self {
            status: ItemStatus::Completed,
            product_count: Some(product_count),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ItemStatus::Failed,
            product_count: None,
            error_message: Some(message.into()),
        }
    }
}
