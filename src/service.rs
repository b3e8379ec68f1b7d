//! Query API over the engine
//!
//! [`AssessmentService`] wires the remote store, catalogue, caches, indexer,
//! status store, dashboard scanner and compiler together and exposes the
//! operations the presentation layer calls.

use crate::assessment::{AssessmentStatusStore, AssessmentUpdate};
use crate::cache::CacheManager;
use crate::catalogue::{Catalogue, Unit};
use crate::config::{EngineConfig, SiteConfig};
use crate::dashboard::{Dashboard, DashboardScanner, SiteScope};
use crate::error::{PortfolioError, Result};
use crate::indexer::{EvidenceIndexer, ScanLimits, ScanScope};
use crate::reconcile::{compute_completion, summarize};
use crate::remote::{GraphStoreClient, RemoteStore};
use crate::report::{PortfolioCompiler, ReportHeader};
use crate::types::{CriterionCompletion, EvidenceItem, ScanGap, UnitProgress};
use crate::utils::codes::unit_folder_matches;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Completion of one unit on one site
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitCompletion {
    pub site_id: String,
    pub unit_code: String,
    pub unit_title: String,
    pub criteria: Vec<CriterionCompletion>,
    /// Items in the unit's folder not filed under any criterion
    pub unmatched: Vec<EvidenceItem>,
    pub malformed_folders: Vec<String>,
    pub gaps: Vec<ScanGap>,
    pub progress: UnitProgress,
}

/// Entry point for completion, dashboard, assessment and report queries
pub struct AssessmentService {
    catalogue: Arc<Catalogue>,
    store: Arc<dyn RemoteStore>,
    caches: Arc<CacheManager>,
    indexer: EvidenceIndexer,
    statuses: AssessmentStatusStore,
    dashboards: Arc<DashboardScanner>,
    compiler: PortfolioCompiler,
    sites: Vec<SiteConfig>,
}

impl AssessmentService {
    pub fn new(config: &EngineConfig, catalogue: Catalogue, store: Arc<dyn RemoteStore>) -> Self {
        let catalogue = Arc::new(catalogue);
        let caches = Arc::new(CacheManager::new(&config.cache));
        let indexer = EvidenceIndexer::new(
            Arc::clone(&store),
            Arc::clone(&catalogue),
            Arc::clone(&caches),
            ScanLimits::from(&config.scan),
        );
        let dashboards = Arc::new(DashboardScanner::new(
            indexer.clone(),
            Arc::clone(&caches),
            config.sites.clone(),
            config.scan.site_timeout(),
        ));

        Self {
            compiler: PortfolioCompiler::new(Arc::clone(&caches.log_sheets)),
            statuses: AssessmentStatusStore::new(Arc::clone(&store)),
            catalogue,
            store,
            caches,
            indexer,
            dashboards,
            sites: config.sites.clone(),
        }
    }

    /// Build a service backed by the HTTP store and the configured catalogue
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let catalogue_path = config.catalogue_path.as_ref().ok_or_else(|| {
            PortfolioError::Config(::config::ConfigError::NotFound("catalogue_path".to_string()))
        })?;
        let catalogue = Catalogue::from_file(catalogue_path)?;
        let store: Arc<dyn RemoteStore> = Arc::new(GraphStoreClient::new(&config.remote)?);
        Ok(Self::new(config, catalogue, store))
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn caches(&self) -> &CacheManager {
        &self.caches
    }

    /// Occasion-aware completion of one unit on a site
    pub async fn get_completion(&self, site: &str, unit_code: &str) -> Result<UnitCompletion> {
        let unit = self.catalogue.require_unit(unit_code)?;
        let indexed = self
            .indexer
            .index_evidence(site, &ScanScope::Unit(unit.code.clone()))
            .await;

        let criteria = compute_completion(
            unit,
            &indexed.items,
            &indexed.gaps,
            &self.catalogue.cross_references_for(&unit.code),
        );
        let progress = summarize(unit, &criteria);
        debug!(
            "{} on {}: {}/{} criteria complete",
            unit.code, site, progress.completed, progress.total
        );

        Ok(UnitCompletion {
            site_id: site.to_string(),
            unit_code: unit.code.clone(),
            unit_title: unit.title.clone(),
            unmatched: indexed.unmatched().cloned().collect(),
            malformed_folders: indexed.malformed_folders,
            gaps: indexed.gaps,
            criteria,
            progress,
        })
    }

    /// Candidates and pending evidence across the sites in scope
    pub async fn get_dashboard(&self, scope: &SiteScope) -> Result<Dashboard> {
        self.dashboards.get_dashboard(scope).await
    }

    /// Cancel a running dashboard scan of one site
    pub fn cancel_site_scan(&self, site: &str) -> bool {
        self.dashboards.cancel_site(site)
    }

    /// Record an assessor's decision and return the stored state.
    ///
    /// Cached scans of the site are dropped so the next view re-reads the
    /// store. Write failures are returned to the caller unretried.
    pub async fn set_assessment(
        &self,
        site: &str,
        evidence_id: &str,
        update: AssessmentUpdate,
    ) -> Result<EvidenceItem> {
        let file = self.store.get_item(site, evidence_id).await?;
        if file.is_folder {
            return Err(PortfolioError::NotFound(format!(
                "{} is a folder, not an evidence file",
                evidence_id
            )));
        }

        let item = self.indexer.tag_drive_item(&file);
        let stored = self.statuses.update_status(site, &item, &update).await?;
        self.caches.invalidate_site(site);
        Ok(stored)
    }

    /// Compile an HTML portfolio for `unit_codes` (all catalogue units when empty)
    pub async fn compile_portfolio(
        &self,
        site: &str,
        unit_codes: &[String],
        generated_at: DateTime<Utc>,
    ) -> Result<String> {
        let units: Vec<&Unit> = if unit_codes.is_empty() {
            self.catalogue.units().iter().collect()
        } else {
            unit_codes
                .iter()
                .map(|code| self.catalogue.require_unit(code))
                .collect::<Result<_>>()?
        };

        let scope = match units.as_slice() {
            [unit] => ScanScope::Unit(unit.code.clone()),
            _ => ScanScope::SiteWide,
        };
        let mut indexed = self.indexer.index_evidence(site, &scope).await;
        indexed
            .items
            .retain(|item| units.iter().any(|u| unit_folder_matches(&u.code, &item.unit_code)));

        let candidate = self
            .sites
            .iter()
            .find(|s| s.id == site)
            .map(|s| s.candidate.clone())
            .unwrap_or_else(|| site.to_string());

        let header = ReportHeader {
            candidate,
            site_id: site.to_string(),
            generated_at,
        };
        let html = self
            .compiler
            .compile(&header, &self.catalogue, &units, &indexed)?;
        info!("Portfolio for {} compiled ({} bytes)", site, html.len());
        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryStore;
    use crate::types::AssessmentStatus;
    use chrono::TimeZone;

    fn catalogue() -> Catalogue {
        Catalogue::from_json_str(
            r#"{ "units": [
                { "code": "NETP3-01", "learning_outcomes": [ { "number": 1, "criteria": [
                    { "code": "1.1", "description": "Identify hazards" },
                    { "code": "1.2", "description": "Use PPE" } ] } ] },
                { "code": "NETP3-02", "learning_outcomes": [ { "number": 1, "criteria": [
                    { "code": "1.1", "description": "Plan work" } ] } ] } ],
                "two_occasion_units": ["NETP3-01"] }"#,
        )
        .unwrap()
    }

    fn service(store: Arc<InMemoryStore>) -> AssessmentService {
        let mut config = EngineConfig::default();
        config.sites = vec![SiteConfig {
            id: "site-a".to_string(),
            candidate: "Jo Bloggs".to_string(),
        }];
        AssessmentService::new(&config, catalogue(), store)
    }

    fn update(status: AssessmentStatus) -> AssessmentUpdate {
        AssessmentUpdate {
            status,
            feedback: None,
            assessor_name: "Sam Jones".to_string(),
        }
    }

    #[tokio::test]
    async fn test_unknown_unit() {
        let service = service(Arc::new(InMemoryStore::new()));
        let err = service.get_completion("site-a", "NOPE-99").await.unwrap_err();
        assert!(matches!(err, PortfolioError::UnknownUnit(_)));
    }

    #[tokio::test]
    async fn test_set_assessment_updates_completion() {
        let store = Arc::new(InMemoryStore::new());
        let t = |d| Utc.with_ymd_and_hms(2024, 3, d, 9, 0, 0).unwrap();
        let first = store.add_file("site-a", "Evidence/netp3_01/1_1", "a.jpg", t(1));
        let second = store.add_file("site-a", "Evidence/netp3_01/1_1", "b.jpg", t(2));
        let service = service(Arc::clone(&store));

        let before = service.get_completion("site-a", "NETP3-01").await.unwrap();
        assert_eq!(before.progress.completed, 0);

        for id in [&first, &second] {
            let stored = service
                .set_assessment("site-a", id, update(AssessmentStatus::Approved))
                .await
                .unwrap();
            assert_eq!(stored.status, AssessmentStatus::Approved);
            assert_eq!(stored.criteria_codes, vec!["1.1"]);
        }

        let after = service.get_completion("site-a", "NETP3-01").await.unwrap();
        let c = after.criteria.iter().find(|c| c.criterion_code == "1.1").unwrap();
        assert!(c.is_complete);
        assert_eq!(after.progress.completed, 1);
    }

    #[tokio::test]
    async fn test_set_assessment_rejects_folders() {
        let store = Arc::new(InMemoryStore::new());
        store.add_folder("site-a", "Evidence/netp3_01");
        let service = service(Arc::clone(&store));
        let err = service
            .set_assessment(
                "site-a",
                "folder:site-a:Evidence/netp3_01",
                update(AssessmentStatus::Approved),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortfolioError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_compile_portfolio_scopes_units() {
        let store = Arc::new(InMemoryStore::new());
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        store.add_file("site-a", "Evidence/netp3_01/1_1", "mine.jpg", t);
        store.add_file("site-a", "Evidence/netp3_02/1_1", "other.jpg", t);
        let service = service(Arc::clone(&store));

        let html = service
            .compile_portfolio("site-a", &["NETP3-01".to_string()], t)
            .await
            .unwrap();
        assert!(html.contains("Jo Bloggs"));
        assert!(html.contains("mine.jpg"));
        assert!(!html.contains("other.jpg"));

        let err = service
            .compile_portfolio("site-a", &["NOPE".to_string()], t)
            .await
            .unwrap_err();
        assert!(matches!(err, PortfolioError::UnknownUnit(_)));
    }
}
