//! Assessor dashboard across candidate sites
//!
//! Each configured site is scanned on its own task with its own
//! cancellation token and timeout, so one slow or unreachable site shows up
//! as incomplete while the others render. Complete site scans are cached
//! for the dashboard TTL; incomplete ones are not.

use crate::cache::CacheManager;
use crate::config::SiteConfig;
use crate::error::{PortfolioError, Result};
use crate::indexer::{EvidenceIndexer, ScanScope};
use crate::types::{AssessmentStatus, EvidenceItem, GapLevel, ScanGap};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scan summary for one candidate site
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteDashboard {
    pub site_id: String,
    pub candidate: String,
    pub evidence_count: usize,
    pub approved_count: usize,
    pub unmatched_count: usize,
    /// Items awaiting an assessor, oldest first
    pub pending: Vec<EvidenceItem>,
    pub gaps: Vec<ScanGap>,
}

impl SiteDashboard {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }

    /// Placeholder for a site whose scan never finished
    fn unfinished(site: &SiteConfig, evidence_root: &str, reason: String) -> Self {
        Self {
            site_id: site.id.clone(),
            candidate: site.candidate.clone(),
            evidence_count: 0,
            approved_count: 0,
            unmatched_count: 0,
            pending: Vec::new(),
            gaps: vec![ScanGap {
                path: evidence_root.to_string(),
                level: GapLevel::Root,
                unit_code: None,
                criteria_codes: Vec::new(),
                reason,
            }],
        }
    }
}

/// Which sites a dashboard request covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteScope {
    All,
    Site(String),
}

/// A pending item with the site it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingEvidence {
    pub site_id: String,
    pub candidate: String,
    pub item: EvidenceItem,
}

/// Aggregate dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    /// One entry per site in configuration order
    pub candidates: Vec<SiteDashboard>,
    pub pending_evidence: Vec<PendingEvidence>,
    pub pending_evidence_count: usize,
    /// Sites whose scan was cut short
    pub incomplete_sites: Vec<String>,
}

/// Builds dashboards over the configured sites
pub struct DashboardScanner {
    indexer: EvidenceIndexer,
    caches: Arc<CacheManager>,
    sites: Vec<SiteConfig>,
    site_timeout: Duration,
    max_concurrency: usize,
    /// Running scans per site, tagged with a scan id so overlapping
    /// requests for one site can deregister independently
    active: Mutex<HashMap<String, Vec<(u64, CancellationToken)>>>,
    next_scan: AtomicU64,
}

impl DashboardScanner {
    pub fn new(
        indexer: EvidenceIndexer,
        caches: Arc<CacheManager>,
        sites: Vec<SiteConfig>,
        site_timeout: Duration,
    ) -> Self {
        let max_concurrency = indexer.limits().max_concurrency;
        Self {
            indexer,
            caches,
            sites,
            site_timeout,
            max_concurrency,
            active: Mutex::new(HashMap::new()),
            next_scan: AtomicU64::new(0),
        }
    }

    pub fn sites(&self) -> &[SiteConfig] {
        &self.sites
    }

    /// Cancel every in-flight scan of one site. Other sites are unaffected.
    ///
    /// Returns `false` when no scan of that site is running.
    pub fn cancel_site(&self, site_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(site_id) {
            Some(scans) if !scans.is_empty() => {
                info!("Cancelling {} dashboard scan(s) of {}", scans.len(), site_id);
                for (_, token) in scans {
                    token.cancel();
                }
                true
            }
            _ => false,
        }
    }

    pub async fn get_dashboard(self: &Arc<Self>, scope: &SiteScope) -> Result<Dashboard> {
        let sites: Vec<SiteConfig> = match scope {
            SiteScope::All => self.sites.clone(),
            SiteScope::Site(id) => vec![self
                .sites
                .iter()
                .find(|s| &s.id == id)
                .cloned()
                .ok_or_else(|| PortfolioError::UnknownSite(id.clone()))?],
        };

        let pool = Arc::new(Semaphore::new(self.max_concurrency));
        let mut scans = JoinSet::new();
        for (position, site) in sites.iter().cloned().enumerate() {
            let this = Arc::clone(self);
            let pool = Arc::clone(&pool);
            let (scan_id, token) = self.register(&site.id);
            scans.spawn(async move {
                let _permit = pool.acquire_owned().await;
                let dashboard = this.scan_site_bounded(&site, token).await;
                this.unregister(&site.id, scan_id);
                (position, dashboard)
            });
        }

        let mut candidates: Vec<(usize, SiteDashboard)> = Vec::with_capacity(sites.len());
        while let Some(joined) = scans.join_next().await {
            match joined {
                Ok(done) => candidates.push(done),
                Err(e) => warn!("Dashboard scan task failed: {}", e),
            }
        }
        candidates.sort_by_key(|(position, _)| *position);
        let candidates: Vec<SiteDashboard> =
            candidates.into_iter().map(|(_, dashboard)| dashboard).collect();

        let mut pending_evidence: Vec<PendingEvidence> = candidates
            .iter()
            .flat_map(|site| {
                site.pending.iter().map(move |item| PendingEvidence {
                    site_id: site.site_id.clone(),
                    candidate: site.candidate.clone(),
                    item: item.clone(),
                })
            })
            .collect();
        pending_evidence.sort_by(|a, b| {
            (a.item.uploaded_at, &a.site_id, &a.item.id)
                .cmp(&(b.item.uploaded_at, &b.site_id, &b.item.id))
        });

        let incomplete_sites: Vec<String> = candidates
            .iter()
            .filter(|site| !site.is_complete())
            .map(|site| site.site_id.clone())
            .collect();

        Ok(Dashboard {
            pending_evidence_count: pending_evidence.len(),
            candidates,
            pending_evidence,
            incomplete_sites,
        })
    }

    /// Scan one site, cut short by its own token or the site timeout
    async fn scan_site_bounded(&self, site: &SiteConfig, token: CancellationToken) -> SiteDashboard {
        let root = self.indexer.limits().evidence_root.clone();
        let scan = tokio::time::timeout(self.site_timeout, self.cached_site_scan(site));

        tokio::select! {
            _ = token.cancelled() => {
                warn!("Dashboard scan of {} cancelled", site.id);
                SiteDashboard::unfinished(site, &root, "scan cancelled".to_string())
            }
            outcome = scan => match outcome {
                Ok(Ok(dashboard)) => dashboard,
                Ok(Err(e)) => {
                    warn!("Dashboard scan of {} failed: {}", site.id, e);
                    SiteDashboard::unfinished(site, &root, e.to_string())
                }
                Err(_) => {
                    warn!(
                        "Dashboard scan of {} timed out after {}s",
                        site.id,
                        self.site_timeout.as_secs()
                    );
                    SiteDashboard::unfinished(
                        site,
                        &root,
                        format!("site scan timed out after {}s", self.site_timeout.as_secs()),
                    )
                }
            }
        }
    }

    async fn cached_site_scan(&self, site: &SiteConfig) -> Result<SiteDashboard> {
        let (dashboard, hit) = self
            .caches
            .dashboards
            .get_or_try_compute_if(
                site.id.clone(),
                || async { Ok(self.scan_site(site).await) },
                |dashboard| dashboard.is_complete(),
            )
            .await?;
        debug!("Dashboard for {} (cached: {})", site.id, hit);
        Ok(dashboard)
    }

    async fn scan_site(&self, site: &SiteConfig) -> SiteDashboard {
        let indexed = self.indexer.index_evidence(&site.id, &ScanScope::SiteWide).await;

        let mut pending: Vec<EvidenceItem> = indexed
            .items
            .iter()
            .filter(|item| item.status == AssessmentStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| (a.uploaded_at, &a.id).cmp(&(b.uploaded_at, &b.id)));

        SiteDashboard {
            site_id: site.id.clone(),
            candidate: site.candidate.clone(),
            evidence_count: indexed.items.len(),
            approved_count: indexed.items.iter().filter(|i| i.is_approved()).count(),
            unmatched_count: indexed.unmatched().count(),
            pending,
            gaps: indexed.gaps,
        }
    }

    fn register(&self, site_id: &str) -> (u64, CancellationToken) {
        let scan_id = self.next_scan.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active
            .entry(site_id.to_string())
            .or_default()
            .push((scan_id, token.clone()));
        (scan_id, token)
    }

    fn unregister(&self, site_id: &str, scan_id: u64) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(scans) = active.get_mut(site_id) {
            scans.retain(|(id, _)| *id != scan_id);
            if scans.is_empty() {
                active.remove(site_id);
            }
        }
    }
}
