//! Cache tier behaviour measured through store call counters
//!
//! Uses tokio's paused clock so TTL expiry is exact.

mod common;

use common::*;
use portfolio_core::{AssessmentStatus, AssessmentUpdate, SiteScope};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_folder_scan_reused_within_ttl() {
    let (store, service) = create_test_service();
    add_assessed(&store, "Evidence/netp3_01/1_1", "a.jpg", 1, "Approved", None);
    add_assessed(&store, "Evidence/netp3_01/1_1", "b.jpg", 2, "Pending", None);

    service.get_completion(SITE, "NETP3-01").await.unwrap();
    assert_eq!(store.field_calls(), 2);
    let lists = store.list_calls();

    // Within TTL: criteria folder is not listed again and no status is re-read
    tokio::time::advance(Duration::from_secs(899)).await;
    service.get_completion(SITE, "NETP3-01").await.unwrap();
    assert_eq!(store.field_calls(), 2);
    assert_eq!(store.list_calls() - lists, 2, "only root and unit folder relisted");

    // After TTL: exactly one recompute of the folder
    tokio::time::advance(Duration::from_secs(1)).await;
    service.get_completion(SITE, "NETP3-01").await.unwrap();
    assert_eq!(store.field_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_dashboard_cached_for_an_hour() {
    let (store, service) = create_test_service();
    add_assessed(&store, "Evidence/netp3_01/1_1", "a.jpg", 1, "Pending", None);

    let first = service.get_dashboard(&SiteScope::All).await.unwrap();
    assert_eq!(first.pending_evidence_count, 1);
    let calls = store.total_calls();

    tokio::time::advance(Duration::from_secs(3599)).await;
    let again = service.get_dashboard(&SiteScope::All).await.unwrap();
    assert_eq!(again, first);
    assert_eq!(store.total_calls(), calls);

    tokio::time::advance(Duration::from_secs(1)).await;
    service.get_dashboard(&SiteScope::All).await.unwrap();
    assert!(store.total_calls() > calls);
}

#[tokio::test(start_paused = true)]
async fn test_assessment_invalidates_site_caches() {
    let (store, service) = create_test_service();
    let id = add_assessed(&store, "Evidence/netp3_01/1_1", "a.jpg", 1, "Pending", None);

    let before = service.get_dashboard(&SiteScope::All).await.unwrap();
    assert_eq!(before.pending_evidence_count, 1);

    service
        .set_assessment(
            SITE,
            &id,
            AssessmentUpdate {
                status: AssessmentStatus::Approved,
                feedback: Some("Good clear photo".to_string()),
                assessor_name: "Pat Assessor".to_string(),
            },
        )
        .await
        .unwrap();

    let after = service.get_dashboard(&SiteScope::All).await.unwrap();
    assert_eq!(after.pending_evidence_count, 0);
    assert_eq!(after.candidates[0].approved_count, 1);
}

#[tokio::test]
async fn test_log_sheet_numbers_survive_invalidation() {
    let (store, service) = create_test_service();
    add_assessed(&store, "Evidence/netp3_01/1_1", "a.jpg", 1, "Approved", None);

    let units = vec!["NETP3-01".to_string()];
    let first = service.compile_portfolio(SITE, &units, at(20)).await.unwrap();
    service.caches().invalidate_site(SITE);
    let second = service.compile_portfolio(SITE, &units, at(20)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(service.caches().log_sheets.lookup("NETP3-01", "1.1", 1), Some(1));
    assert_eq!(service.caches().log_sheets.issued(), 1);
}
