//! In-memory remote store
//!
//! Holds a folder tree per site. Used by the CLI `--fixture` mode and by
//! tests, which rely on its call counters and injected failures.

use super::{join_path, DriveItem, FieldMap, RemoteStore, FIELD_ASSESSOR, FIELD_FEEDBACK, FIELD_STATUS};
use crate::error::{PortfolioError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// Injected behaviour for a listing path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Listing fails with `RemoteUnavailable`
    Unavailable,
    /// Listing succeeds after sleeping
    Delay(Duration),
}

#[derive(Debug, Default)]
struct SiteTree {
    /// Folder path -> child ids in insertion order
    children: HashMap<String, Vec<String>>,
    items: HashMap<String, DriveItem>,
    fields: HashMap<String, FieldMap>,
}

impl SiteTree {
    fn ensure_folder(&mut self, site: &str, path: &str) {
        let path = path.trim_matches('/');
        if path.is_empty() || self.children.contains_key(path) {
            return;
        }

        let (parent, name) = match path.rsplit_once('/') {
            Some((parent, name)) => (parent, name),
            None => ("", path),
        };
        self.ensure_folder(site, parent);

        let id = format!("folder:{}:{}", site, path);
        self.items.insert(
            id.clone(),
            DriveItem {
                id: id.clone(),
                name: name.to_string(),
                is_folder: true,
                web_url: None,
                last_modified: DateTime::<Utc>::default(),
                created: None,
                mime_type: None,
                parent_path: Some(parent.to_string()),
            },
        );
        self.children.entry(parent.to_string()).or_default().push(id);
        self.children.insert(path.to_string(), Vec::new());
    }
}

/// Fixture-backed [`RemoteStore`]
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sites: RwLock<HashMap<String, SiteTree>>,
    failures: RwLock<HashMap<(String, String), FailureMode>>,
    next_id: AtomicU64,
    list_calls: AtomicUsize,
    item_calls: AtomicUsize,
    field_calls: AtomicUsize,
    patch_calls: AtomicUsize,
}

/// One file in a JSON fixture
#[derive(Debug, Deserialize)]
struct FixtureFile {
    path: String,
    name: String,
    uploaded_at: DateTime<Utc>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    assessor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    sites: HashMap<String, Vec<FixtureFile>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a fixture of the form `{ "sites": { "<site>": [ { "path", "name", "uploaded_at", ... } ] } }`
    pub fn from_fixture_json(json: &str) -> Result<Self> {
        let fixture: Fixture = serde_json::from_str(json)?;
        let store = Self::new();
        for (site, files) in fixture.sites {
            for file in files {
                let id = store.add_file(&site, &file.path, &file.name, file.uploaded_at);
                let mut fields = FieldMap::new();
                if let Some(status) = file.status {
                    fields.insert(FIELD_STATUS.to_string(), status);
                }
                if let Some(feedback) = file.feedback {
                    fields.insert(FIELD_FEEDBACK.to_string(), feedback);
                }
                if let Some(assessor) = file.assessor {
                    fields.insert(FIELD_ASSESSOR.to_string(), assessor);
                }
                store.set_fields(&site, &id, fields);
                if let Some(mime) = file.mime_type {
                    store.with_item(&site, &id, |item| item.mime_type = Some(mime));
                }
            }
        }
        Ok(store)
    }

    /// Create an empty folder (and its parents)
    pub fn add_folder(&self, site: &str, path: &str) {
        if let Ok(mut sites) = self.sites.write() {
            sites.entry(site.to_string()).or_default().ensure_folder(site, path);
        }
    }

    /// Add a file under `folder`, creating folders as needed. Returns the file id.
    pub fn add_file(&self, site: &str, folder: &str, name: &str, uploaded_at: DateTime<Utc>) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-{:04}", site, n);
        let folder = folder.trim_matches('/').to_string();

        if let Ok(mut sites) = self.sites.write() {
            let tree = sites.entry(site.to_string()).or_default();
            tree.ensure_folder(site, &folder);
            tree.items.insert(
                id.clone(),
                DriveItem {
                    id: id.clone(),
                    name: name.to_string(),
                    is_folder: false,
                    web_url: Some(format!(
                        "https://files.example.test/{}/{}",
                        site,
                        join_path(&folder, name)
                    )),
                    last_modified: uploaded_at,
                    created: Some(uploaded_at),
                    mime_type: None,
                    parent_path: Some(folder.clone()),
                },
            );
            tree.children.entry(folder).or_default().push(id.clone());
        }
        id
    }

    /// Replace the custom fields of an item
    pub fn set_fields(&self, site: &str, id: &str, fields: FieldMap) {
        if let Ok(mut sites) = self.sites.write() {
            sites
                .entry(site.to_string())
                .or_default()
                .fields
                .insert(id.to_string(), fields);
        }
    }

    fn with_item(&self, site: &str, id: &str, update: impl FnOnce(&mut DriveItem)) {
        if let Ok(mut sites) = self.sites.write() {
            if let Some(item) = sites.get_mut(site).and_then(|t| t.items.get_mut(id)) {
                update(item);
            }
        }
    }

    /// Make listings of `path` on `site` fail or stall
    pub fn inject(&self, site: &str, path: &str, mode: FailureMode) {
        if let Ok(mut failures) = self.failures.write() {
            failures.insert((site.to_string(), path.trim_matches('/').to_string()), mode);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.write() {
            failures.clear();
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn field_calls(&self) -> usize {
        self.field_calls.load(Ordering::SeqCst)
    }

    pub fn patch_calls(&self) -> usize {
        self.patch_calls.load(Ordering::SeqCst)
    }

    /// Every call made against the store
    pub fn total_calls(&self) -> usize {
        self.list_calls()
            + self.item_calls.load(Ordering::SeqCst)
            + self.field_calls()
            + self.patch_calls()
    }

    fn failure_for(&self, site: &str, path: &str) -> Option<FailureMode> {
        self.failures
            .read()
            .ok()?
            .get(&(site.to_string(), path.to_string()))
            .copied()
    }

    fn read_tree<T>(&self, site: &str, read: impl FnOnce(Option<&SiteTree>) -> T) -> Result<T> {
        let sites = self
            .sites
            .read()
            .map_err(|_| PortfolioError::Other("store lock poisoned".to_string()))?;
        Ok(read(sites.get(site)))
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn list_children(&self, site: &str, path: &str) -> Result<Vec<DriveItem>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let path = path.trim_matches('/');

        match self.failure_for(site, path) {
            Some(FailureMode::Unavailable) => {
                return Err(PortfolioError::RemoteUnavailable(format!(
                    "injected failure listing {}",
                    path
                )))
            }
            Some(FailureMode::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        self.read_tree(site, |tree| {
            let Some(tree) = tree else {
                return Vec::new();
            };
            let children = tree
                .children
                .get(path)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| tree.items.get(id).cloned())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            debug!("Listed {} children of {} on {}", children.len(), path, site);
            children
        })
    }

    async fn get_item(&self, site: &str, item_id: &str) -> Result<DriveItem> {
        self.item_calls.fetch_add(1, Ordering::SeqCst);
        self.read_tree(site, |tree| tree.and_then(|t| t.items.get(item_id).cloned()))?
            .ok_or_else(|| PortfolioError::NotFound(item_id.to_string()))
    }

    async fn get_fields(&self, site: &str, item_id: &str) -> Result<FieldMap> {
        self.field_calls.fetch_add(1, Ordering::SeqCst);
        self.read_tree(site, |tree| {
            tree.and_then(|t| {
                t.items
                    .contains_key(item_id)
                    .then(|| t.fields.get(item_id).cloned().unwrap_or_default())
            })
        })?
        .ok_or_else(|| PortfolioError::NotFound(item_id.to_string()))
    }

    async fn patch_fields(&self, site: &str, item_id: &str, fields: FieldMap) -> Result<()> {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);
        let mut sites = self
            .sites
            .write()
            .map_err(|_| PortfolioError::Other("store lock poisoned".to_string()))?;
        let tree = sites
            .get_mut(site)
            .filter(|t| t.items.contains_key(item_id))
            .ok_or_else(|| PortfolioError::NotFound(item_id.to_string()))?;
        tree.fields
            .entry(item_id.to_string())
            .or_default()
            .extend(fields);
        Ok(())
    }
}
