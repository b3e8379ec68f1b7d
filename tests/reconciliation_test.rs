//! End-to-end reconciliation over the in-memory store
//!
//! Covers occasion policy, combined folders, unmatched evidence, cross
//! references and partial scan failures.

mod common;

use async_trait::async_trait;
use common::*;
use portfolio_core::remote::{DriveItem, FailureMode, FieldMap};
use portfolio_core::{
    AssessmentService, CriterionCompletion, InMemoryStore, PortfolioError, RemoteStore, Result,
};
use std::sync::Arc;
use std::time::Duration;

/// Store where one file disappears between listing and its field read
struct DeletedAfterListing {
    inner: Arc<InMemoryStore>,
    deleted_id: String,
}

#[async_trait]
impl RemoteStore for DeletedAfterListing {
    async fn list_children(&self, site: &str, path: &str) -> Result<Vec<DriveItem>> {
        self.inner.list_children(site, path).await
    }

    async fn get_item(&self, site: &str, item_id: &str) -> Result<DriveItem> {
        self.inner.get_item(site, item_id).await
    }

    async fn get_fields(&self, site: &str, item_id: &str) -> Result<FieldMap> {
        if item_id == self.deleted_id {
            return Err(PortfolioError::NotFound(item_id.to_string()));
        }
        self.inner.get_fields(site, item_id).await
    }

    async fn patch_fields(&self, site: &str, item_id: &str, fields: FieldMap) -> Result<()> {
        self.inner.patch_fields(site, item_id, fields).await
    }
}

fn criterion<'a>(criteria: &'a [CriterionCompletion], code: &str) -> &'a CriterionCompletion {
    criteria
        .iter()
        .find(|c| c.criterion_code == code)
        .unwrap_or_else(|| panic!("criterion {} missing", code))
}

#[tokio::test]
async fn test_two_occasion_unit_complete_with_two_approvals() {
    let (store, service) = create_test_service();
    add_assessed(&store, "Evidence/netp3_01/1_1", "second.jpg", 8, "Approved", None);
    add_assessed(&store, "Evidence/netp3_01/1_1", "first.jpg", 2, "Approved", None);

    let completion = service.get_completion(SITE, "NETP3-01").await.unwrap();
    let c = criterion(&completion.criteria, "1.1");
    assert_eq!(c.first_occasion_approved, Some(true));
    assert_eq!(c.second_occasion_approved, Some(true));
    assert!(c.is_complete);
    assert_eq!(c.occasion(1).unwrap().name, "first.jpg");
    assert_eq!(completion.progress.completed, 1);
    assert_eq!(completion.progress.total, 10);
}

#[tokio::test]
async fn test_two_occasion_unit_incomplete_with_one_approval() {
    let (store, service) = create_test_service();
    add_assessed(&store, "Evidence/netp3_01/1_1", "only.jpg", 2, "Approved", None);

    let completion = service.get_completion(SITE, "NETP3-01").await.unwrap();
    let c = criterion(&completion.criteria, "1.1");
    assert_eq!(c.first_occasion_approved, Some(true));
    assert_eq!(c.second_occasion_approved, None);
    assert!(!c.is_complete);
}

#[tokio::test]
async fn test_one_occasion_unit_and_spelling_variants() {
    let (store, service) = create_test_service();
    add_assessed(&store, "Evidence/NETP305/1_1", "termination.jpg", 2, "Approved", None);

    let completion = service.get_completion(SITE, "netp3_05").await.unwrap();
    assert_eq!(completion.unit_code, "NETP3-05");
    assert!(criterion(&completion.criteria, "1.1").is_complete);
}

#[tokio::test]
async fn test_zero_evidence_reports_no_occasions() {
    let (_store, service) = create_test_service();

    let completion = service.get_completion(SITE, "NETP3-01").await.unwrap();
    let c = criterion(&completion.criteria, "2.1");
    assert!(c.evidence.is_empty());
    assert_eq!(c.first_occasion_approved, None);
    assert_eq!(c.second_occasion_approved, None);
    assert!(!c.is_complete);
    assert!(completion.gaps.is_empty());
}

#[tokio::test]
async fn test_combined_folder_counts_for_each_criterion() {
    let (store, service) = create_test_service();
    add_assessed(&store, "Evidence/netp3_01/1_1_1_2", "combined.jpg", 3, "Approved", None);

    let completion = service.get_completion(SITE, "NETP3-01").await.unwrap();
    for code in ["1.1", "1.2"] {
        let c = criterion(&completion.criteria, code);
        assert_eq!(c.first_occasion_approved, Some(true), "criterion {}", code);
        assert_eq!(c.evidence[0].name, "combined.jpg");
    }
    assert!(criterion(&completion.criteria, "1.3").evidence.is_empty());
}

#[tokio::test]
async fn test_unmatched_and_malformed_evidence_surfaced() {
    let (store, service) = create_test_service();
    add_assessed(&store, "Evidence/netp3_01", "loose-notes.pdf", 3, "Pending", None);
    add_assessed(&store, "Evidence/netp3_01/site photos", "misc.jpg", 4, "Pending", None);

    let completion = service.get_completion(SITE, "NETP3-01").await.unwrap();
    let unmatched: Vec<&str> = completion.unmatched.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(unmatched.len(), 2);
    assert!(unmatched.contains(&"loose-notes.pdf"));
    assert!(unmatched.contains(&"misc.jpg"));
    assert_eq!(
        completion.malformed_folders,
        vec!["Evidence/netp3_01/site photos".to_string()]
    );
    assert!(completion.criteria.iter().all(|c| c.evidence.is_empty()));
}

#[tokio::test]
async fn test_cross_reference_counts_approved_evidence() {
    let (store, service) = create_test_service();
    add_assessed(&store, "Evidence/netp3_05/1_1", "observation.pdf", 3, "Approved", None);

    let completion = service.get_completion(SITE, "NETP3-05").await.unwrap();
    assert!(criterion(&completion.criteria, "1.1").is_complete);
    assert!(criterion(&completion.criteria, "1.2").is_complete);
    assert_eq!(completion.progress.percent(), 100);
}

#[tokio::test(start_paused = true)]
async fn test_one_folder_timeout_leaves_nine_criteria() {
    let (store, service) = create_test_service();
    let folders = [
        "1_1", "1_2", "1_3", "1_4", "1_5", "2_1", "2_2", "2_3", "2_4", "2_5",
    ];
    for (day, folder) in folders.iter().enumerate() {
        add_assessed(
            &store,
            &format!("Evidence/netp3_01/{}", folder),
            "evidence.jpg",
            day as u32 + 1,
            "Approved",
            None,
        );
    }
    store.inject(
        SITE,
        "Evidence/netp3_01/2_3",
        FailureMode::Delay(Duration::from_secs(120)),
    );

    let completion = service.get_completion(SITE, "NETP3-01").await.unwrap();
    let populated = completion
        .criteria
        .iter()
        .filter(|c| !c.evidence.is_empty())
        .count();
    assert_eq!(populated, 9);

    let slow = criterion(&completion.criteria, "2.3");
    assert!(slow.scan_incomplete);
    assert!(slow.evidence.is_empty());
    assert_eq!(
        completion
            .criteria
            .iter()
            .filter(|c| c.scan_incomplete)
            .count(),
        1
    );
    assert!(completion.progress.scan_incomplete);
    assert_eq!(completion.gaps.len(), 1);
}

#[tokio::test]
async fn test_unreachable_root_is_partial_not_fatal() {
    let (store, service) = create_test_service();
    add_assessed(&store, "Evidence/netp3_01/1_1", "a.jpg", 1, "Approved", None);
    store.inject(SITE, "Evidence", FailureMode::Unavailable);

    let completion = service.get_completion(SITE, "NETP3-01").await.unwrap();
    assert!(completion.criteria.iter().all(|c| c.scan_incomplete));
    assert!(completion.criteria.iter().all(|c| c.evidence.is_empty()));
}

#[tokio::test]
async fn test_deleted_file_keeps_sibling_evidence() {
    let store = Arc::new(InMemoryStore::new());
    add_assessed(&store, "Evidence/netp3_01/1_1", "first.jpg", 1, "Approved", None);
    let deleted_id = add_assessed(&store, "Evidence/netp3_01/1_1", "second.jpg", 2, "Approved", None);
    let service = AssessmentService::new(
        &engine_config(),
        catalogue(),
        Arc::new(DeletedAfterListing {
            inner: Arc::clone(&store),
            deleted_id,
        }),
    );

    let completion = service.get_completion(SITE, "NETP3-01").await.unwrap();
    let c = criterion(&completion.criteria, "1.1");
    assert_eq!(c.evidence.len(), 1);
    assert_eq!(c.evidence[0].name, "first.jpg");
    assert_eq!(c.first_occasion_approved, Some(true));
    assert!(!c.scan_incomplete);
    assert!(completion.gaps.is_empty());
}

#[tokio::test]
async fn test_prefixed_and_suffixed_unit_folders_are_scanned() {
    for unit_folder in ["Unit_NETP3-01", "netp3_01_evidence"] {
        let (store, service) = create_test_service();
        add_assessed(
            &store,
            &format!("Evidence/{}/1_1", unit_folder),
            "a.jpg",
            1,
            "Approved",
            None,
        );

        let completion = service.get_completion(SITE, "NETP3-01").await.unwrap();
        let c = criterion(&completion.criteria, "1.1");
        assert_eq!(c.evidence.len(), 1, "unit folder {}", unit_folder);
        assert_eq!(c.first_occasion_approved, Some(true));
    }
}
