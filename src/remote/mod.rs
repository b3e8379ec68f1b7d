//! Remote file store seam
//!
//! The engine only talks to the store through [`RemoteStore`]: list a
//! folder, read an item, read and patch its custom fields. Implementations:
//! - [`graph::GraphStoreClient`]: authenticated HTTP client for the drive API
//! - [`memory::InMemoryStore`]: fixture-backed store for offline runs and tests
//!
//! A folder that does not exist lists as empty; folders are created lazily
//! by evidence uploads, so absence means "no evidence yet".

pub mod graph;
pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use graph::GraphStoreClient;
pub use memory::{FailureMode, InMemoryStore};

/// Custom field name holding the assessment status
pub const FIELD_STATUS: &str = "AssessmentStatus";
/// Custom field name holding assessor feedback
pub const FIELD_FEEDBACK: &str = "AssessorFeedback";
/// Custom field name holding the assessor's display name
pub const FIELD_ASSESSOR: &str = "AssessorName";

/// Custom fields of a remote file
pub type FieldMap = HashMap<String, String>;

/// A child entry of a remote folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    pub is_folder: bool,
    #[serde(default)]
    pub web_url: Option<String>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Folder path containing the item, relative to the drive root
    #[serde(default)]
    pub parent_path: Option<String>,
}

impl DriveItem {
    /// Upload time: creation time when the store reports it, else last modification
    pub fn uploaded_at(&self) -> DateTime<Utc> {
        self.created.unwrap_or(self.last_modified)
    }
}

/// Operations the engine needs from the remote file store.
///
/// Every call is idempotent. Listing a missing folder returns an empty
/// vector; network and auth failures surface as
/// [`PortfolioError::RemoteUnavailable`](crate::error::PortfolioError::RemoteUnavailable).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List direct children of a folder path (e.g. `Evidence/netp3_01`)
    async fn list_children(&self, site: &str, path: &str) -> Result<Vec<DriveItem>>;

    /// Read item metadata
    async fn get_item(&self, site: &str, item_id: &str) -> Result<DriveItem>;

    /// Read the custom fields of an item
    async fn get_fields(&self, site: &str, item_id: &str) -> Result<FieldMap>;

    /// Patch custom fields of an item in one request
    async fn patch_fields(&self, site: &str, item_id: &str, fields: FieldMap) -> Result<()>;
}

/// Join a folder path and a child name
pub fn join_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_matches('/');
    let child = child.trim_matches('/');
    if parent.is_empty() {
        child.to_string()
    } else if child.is_empty() {
        parent.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("Evidence", "netp3_01"), "Evidence/netp3_01");
        assert_eq!(join_path("/Evidence/", "/1_1/"), "Evidence/1_1");
        assert_eq!(join_path("", "Evidence"), "Evidence");
        assert_eq!(join_path("Evidence", ""), "Evidence");
    }
}
