//! Evidence indexer
//!
//! Walks `Evidence/<unit>/<criteria>/<file>` on one site and produces a flat
//! list of evidence items tagged with the unit and criteria their folders
//! encode. The folder layout is treated as a best-effort hint, not a schema:
//! - files directly inside a unit folder are kept, tagged with no criteria
//! - criteria folders whose names cannot be parsed keep their files, untagged
//! - a folder that fails to list becomes a [`ScanGap`]; siblings still load
//!
//! Traversal stops at the criteria level. Listings run on a bounded pool
//! sized by `scan.max_concurrency`, shared by every clone of the indexer so
//! concurrent site scans stay under the same limit. Every remote call has
//! its own timeout. A file deleted between listing and status read is
//! skipped. The indexer never writes to the store.

use crate::assessment::AssessmentStatusStore;
use crate::cache::{CacheManager, FolderKey};
use crate::catalogue::Catalogue;
use crate::config::ScanSettings;
use crate::error::{PortfolioError, Result};
use crate::remote::{join_path, DriveItem, RemoteStore};
use crate::types::{EvidenceItem, EvidenceKind, GapLevel, IndexedEvidence, ScanGap};
use crate::utils::codes::{split_criteria_folder, unit_folder_matches};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// What part of a site to index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanScope {
    /// One unit, matched against folder names by code
    Unit(String),
    /// Every unit folder on the site
    SiteWide,
}

impl ScanScope {
    fn includes(&self, folder_name: &str) -> bool {
        match self {
            ScanScope::Unit(code) => unit_folder_matches(code, folder_name),
            ScanScope::SiteWide => true,
        }
    }

    fn unit_code(&self) -> Option<String> {
        match self {
            ScanScope::Unit(code) => Some(code.clone()),
            ScanScope::SiteWide => None,
        }
    }
}

/// Limits applied to one scan
#[derive(Debug, Clone)]
pub struct ScanLimits {
    pub evidence_root: String,
    pub max_concurrency: usize,
    pub call_timeout: Duration,
}

impl From<&ScanSettings> for ScanLimits {
    fn from(settings: &ScanSettings) -> Self {
        Self {
            evidence_root: settings.evidence_root.trim_matches('/').to_string(),
            max_concurrency: settings.max_concurrency.max(1),
            call_timeout: settings.call_timeout(),
        }
    }
}

/// Build an evidence item from a remote file and the folder it was found in
pub fn evidence_from_drive(
    file: &DriveItem,
    folder_path: &str,
    unit_code: &str,
    criteria_codes: &[String],
) -> EvidenceItem {
    EvidenceItem {
        id: file.id.clone(),
        name: file.name.clone(),
        kind: EvidenceKind::infer(file.mime_type.as_deref(), &file.name),
        uploaded_at: file.uploaded_at(),
        folder_path: folder_path.trim_matches('/').to_string(),
        unit_code: unit_code.to_string(),
        criteria_codes: criteria_codes.to_vec(),
        status: Default::default(),
        assessor_name: None,
        assessor_feedback: None,
        web_url: file.web_url.clone(),
    }
}

/// A criteria folder waiting to be scanned
struct CriteriaFolder {
    unit_code: String,
    unit_folder: String,
    path: String,
    name: String,
    criteria_codes: Vec<String>,
}

enum Scanned {
    Items(Vec<EvidenceItem>),
    Gap(ScanGap),
}

/// Discovers evidence on the remote store
#[derive(Clone)]
pub struct EvidenceIndexer {
    store: Arc<dyn RemoteStore>,
    statuses: AssessmentStatusStore,
    catalogue: Arc<Catalogue>,
    caches: Arc<CacheManager>,
    limits: ScanLimits,
    pool: Arc<Semaphore>,
}

impl EvidenceIndexer {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        catalogue: Arc<Catalogue>,
        caches: Arc<CacheManager>,
        limits: ScanLimits,
    ) -> Self {
        Self {
            statuses: AssessmentStatusStore::new(Arc::clone(&store)),
            store,
            catalogue,
            caches,
            pool: Arc::new(Semaphore::new(limits.max_concurrency)),
            limits,
        }
    }

    pub fn limits(&self) -> &ScanLimits {
        &self.limits
    }

    /// Index evidence for a scope on one site.
    ///
    /// Never fails as a whole: unreachable folders are reported in
    /// [`IndexedEvidence::gaps`] alongside whatever was collected.
    pub async fn index_evidence(&self, site: &str, scope: &ScanScope) -> IndexedEvidence {
        let root = self.limits.evidence_root.clone();
        let mut indexed = IndexedEvidence::default();

        let root_listing = {
            let _permit = self.pool.acquire().await;
            self.within(&root, self.store.list_children(site, &root)).await
        };
        let unit_folders: Vec<DriveItem> = match root_listing {
            Ok(children) => children
                .into_iter()
                .filter(|child| child.is_folder && scope.includes(&child.name))
                .collect(),
            Err(e) => {
                warn!("Could not list {} on {}: {}", root, site, e);
                indexed.gaps.push(ScanGap {
                    path: root,
                    level: GapLevel::Root,
                    unit_code: scope.unit_code(),
                    criteria_codes: Vec::new(),
                    reason: e.to_string(),
                });
                return indexed;
            }
        };

        if unit_folders.is_empty() {
            debug!("No unit folders for {:?} on {}", scope, site);
            return indexed;
        }

        // Unit folders: split children into criteria folders and direct files
        let mut listings = JoinSet::new();
        for folder in unit_folders {
            let this = self.clone();
            let site = site.to_string();
            let pool = Arc::clone(&self.pool);
            let unit_path = join_path(&root, &folder.name);
            listings.spawn(async move {
                let _permit = pool.acquire_owned().await;
                let listing = this
                    .within(&unit_path, this.store.list_children(&site, &unit_path))
                    .await;
                (folder.name, unit_path, listing)
            });
        }

        let mut criteria_folders = Vec::new();
        let mut direct_files = Vec::new();
        while let Some(joined) = listings.join_next().await {
            let (unit_folder, unit_path, listing) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!("Unit folder scan task on {} failed: {}", site, e);
                    continue;
                }
            };
            let unit_code = self.resolve_unit_code(&unit_folder);

            let children = match listing {
                Ok(children) => children,
                Err(e) => {
                    warn!("Could not list unit folder {} on {}: {}", unit_path, site, e);
                    indexed.gaps.push(ScanGap {
                        path: unit_path,
                        level: GapLevel::Unit,
                        unit_code: Some(unit_code),
                        criteria_codes: Vec::new(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for child in children {
                if !child.is_folder {
                    direct_files.push((unit_code.clone(), unit_path.clone(), child));
                    continue;
                }

                let path = join_path(&unit_path, &child.name);
                let criteria_codes = match split_criteria_folder(&child.name) {
                    Ok(codes) => codes,
                    Err(e) => {
                        warn!("{} on {}; its files will be listed as unmatched", e, site);
                        indexed.malformed_folders.push(path.clone());
                        Vec::new()
                    }
                };
                criteria_folders.push(CriteriaFolder {
                    unit_code: unit_code.clone(),
                    unit_folder: unit_folder.clone(),
                    path,
                    name: child.name,
                    criteria_codes,
                });
            }
        }

        // Criteria folders (cached) and direct files, on the same pool
        let mut scans: JoinSet<Scanned> = JoinSet::new();
        for folder in criteria_folders {
            let this = self.clone();
            let site = site.to_string();
            let pool = Arc::clone(&self.pool);
            scans.spawn(async move {
                let _permit = pool.acquire_owned().await;
                this.scan_criteria_folder_cached(&site, folder).await
            });
        }
        for (unit_code, unit_path, file) in direct_files {
            let this = self.clone();
            let site = site.to_string();
            let pool = Arc::clone(&self.pool);
            scans.spawn(async move {
                let _permit = pool.acquire_owned().await;
                this.scan_direct_file(&site, &unit_code, &unit_path, &file).await
            });
        }

        while let Some(joined) = scans.join_next().await {
            match joined {
                Ok(Scanned::Items(items)) => indexed.items.extend(items),
                Ok(Scanned::Gap(gap)) => indexed.gaps.push(gap),
                Err(e) => warn!("Evidence scan task on {} failed: {}", site, e),
            }
        }

        indexed.items.sort_by(|a, b| {
            (&a.unit_code, &a.folder_path, a.uploaded_at, &a.name)
                .cmp(&(&b.unit_code, &b.folder_path, b.uploaded_at, &b.name))
        });
        indexed.gaps.sort_by(|a, b| a.path.cmp(&b.path));
        indexed.malformed_folders.sort();

        info!(
            "Indexed {} evidence item(s) for {:?} on {} ({} gap(s), {} malformed folder(s))",
            indexed.items.len(),
            scope,
            site,
            indexed.gaps.len(),
            indexed.malformed_folders.len()
        );
        indexed
    }

    /// Tag a single remote file from its parent path (`Evidence/<unit>/<criteria>`)
    pub fn tag_drive_item(&self, file: &DriveItem) -> EvidenceItem {
        let parent = file
            .parent_path
            .as_deref()
            .unwrap_or_default()
            .trim_matches('/');
        let relative = parent
            .strip_prefix(self.limits.evidence_root.as_str())
            .unwrap_or_default();

        let mut segments = relative.split('/').filter(|s| !s.is_empty());
        let unit_code = segments
            .next()
            .map(|folder| self.resolve_unit_code(folder))
            .unwrap_or_default();
        let criteria_codes = segments
            .next()
            .and_then(|folder| split_criteria_folder(folder).ok())
            .unwrap_or_default();

        evidence_from_drive(file, parent, &unit_code, &criteria_codes)
    }

    fn resolve_unit_code(&self, folder_name: &str) -> String {
        self.catalogue
            .unit_for_folder(folder_name)
            .map(|unit| unit.code.clone())
            .unwrap_or_else(|| folder_name.to_string())
    }

    async fn scan_criteria_folder_cached(&self, site: &str, folder: CriteriaFolder) -> Scanned {
        let key = FolderKey {
            site: site.to_string(),
            unit_folder: folder.unit_folder.clone(),
            criteria_folder: folder.name.clone(),
        };

        let scanned = self
            .caches
            .folders
            .get_or_try_compute(key, || self.scan_criteria_folder(site, &folder))
            .await;

        match scanned {
            Ok((items, _hit)) => Scanned::Items(items),
            Err(e) => {
                warn!("Could not scan {} on {}: {}", folder.path, site, e);
                Scanned::Gap(ScanGap {
                    path: folder.path,
                    level: GapLevel::CriteriaFolder,
                    unit_code: Some(folder.unit_code),
                    criteria_codes: folder.criteria_codes,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// List one criteria folder and read each file's status
    async fn scan_criteria_folder(
        &self,
        site: &str,
        folder: &CriteriaFolder,
    ) -> Result<Vec<EvidenceItem>> {
        let children = self
            .within(&folder.path, self.store.list_children(site, &folder.path))
            .await?;

        let mut items = Vec::with_capacity(children.len());
        for child in children {
            if child.is_folder {
                debug!(
                    "Skipping {}/{}: nested below criteria level",
                    folder.path, child.name
                );
                continue;
            }
            let item =
                evidence_from_drive(&child, &folder.path, &folder.unit_code, &folder.criteria_codes);
            let path = item.remote_path();
            match self.within(&path, self.statuses.fetch_status(site, item)).await {
                Ok(item) => items.push(item),
                Err(PortfolioError::NotFound(_)) => {
                    debug!("Skipping {} on {}: removed after listing", path, site);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(items)
    }

    async fn scan_direct_file(
        &self,
        site: &str,
        unit_code: &str,
        unit_path: &str,
        file: &DriveItem,
    ) -> Scanned {
        let item = evidence_from_drive(file, unit_path, unit_code, &[]);
        let path = item.remote_path();
        match self.within(&path, self.statuses.fetch_status(site, item)).await {
            Ok(item) => Scanned::Items(vec![item]),
            Err(PortfolioError::NotFound(_)) => {
                debug!("Skipping {} on {}: removed after listing", path, site);
                Scanned::Items(Vec::new())
            }
            Err(e) => {
                warn!("Could not read status of {} on {}: {}", path, site, e);
                Scanned::Gap(ScanGap {
                    path,
                    level: GapLevel::File,
                    unit_code: Some(unit_code.to_string()),
                    criteria_codes: Vec::new(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Apply the per-call timeout; expiry reads as `RemoteUnavailable`
    async fn within<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.limits.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PortfolioError::RemoteUnavailable(format!(
                "{} timed out after {}s",
                what,
                self.limits.call_timeout.as_secs()
            ))),
        }
    }
}
