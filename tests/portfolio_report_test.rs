//! Portfolio compilation and dashboard through the Query API

mod common;

use common::*;
use portfolio_core::remote::FailureMode;
use portfolio_core::{AssessmentStatus, AssessmentUpdate, PortfolioError, SiteScope};
use std::time::Duration;

#[tokio::test]
async fn test_compiled_report_contents() {
    let (store, service) = create_test_service();
    add_assessed(&store, "Evidence/netp3_01/1_1", "first.jpg", 1, "Approved", None);
    add_assessed(
        &store,
        "Evidence/netp3_01/1_1",
        "second.jpg",
        5,
        "Approved",
        Some("Isolation procedure followed"),
    );
    add_assessed(&store, "Evidence/netp3_01", "unsorted.pdf", 6, "Pending", None);

    let html = service
        .compile_portfolio(SITE, &["NETP3-01".to_string()], at(20))
        .await
        .unwrap();

    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("Candidate: Jo Bloggs"));
    assert!(html.contains("Generated: 2024-03-20 09:00 UTC"));
    assert!(html.contains("<h3>Learning Outcome 1: Work safely</h3>"));
    assert!(html.contains("<th>Occasion 2</th>"));
    assert!(html.contains("Log Sheet 1"));
    assert!(html.contains("Log Sheet 2"));
    assert!(html.contains("No Evidence"));
    assert!(html.contains("Evidence Details"));
    assert!(html.contains("Approved by Pat Assessor (no feedback recorded)"));
    assert!(html.contains("Approved by Pat Assessor with feedback: &ldquo;Isolation procedure followed&rdquo;"));
    assert!(html.contains("requires manual review"));
    assert!(html.contains("Evidence/netp3_01/unsorted.pdf"));
    assert!(html.contains("Log sheet counter: 2 issued, next number 3"));
}

#[tokio::test]
async fn test_catalogue_order_is_preserved() {
    let (_store, service) = create_test_service();
    let html = service.compile_portfolio(SITE, &[], at(20)).await.unwrap();

    let first = html.find("id=\"unit-netp3_01\"").unwrap();
    let second = html.find("id=\"unit-netp3_05\"").unwrap();
    assert!(first < second);
    let lo1 = html.find("Learning Outcome 1: Work safely").unwrap();
    let lo2 = html.find("Learning Outcome 2: Respond to incidents").unwrap();
    assert!(lo1 < lo2);
}

#[tokio::test]
async fn test_invalid_transition_surfaces_to_caller() {
    let (store, service) = create_test_service();
    let id = add_assessed(&store, "Evidence/netp3_01/1_1", "a.jpg", 1, "Approved", None);

    let err = service
        .set_assessment(
            SITE,
            &id,
            AssessmentUpdate {
                status: AssessmentStatus::Rejected,
                feedback: None,
                assessor_name: "Pat Assessor".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidTransition { .. }));
    assert_eq!(store.patch_calls(), 0);

    // Re-open, then reject
    for status in [AssessmentStatus::Pending, AssessmentStatus::Rejected] {
        service
            .set_assessment(
                SITE,
                &id,
                AssessmentUpdate {
                    status,
                    feedback: Some("Photo is blurred".to_string()),
                    assessor_name: "Pat Assessor".to_string(),
                },
            )
            .await
            .unwrap();
    }
    let completion = service.get_completion(SITE, "NETP3-01").await.unwrap();
    let c = completion
        .criteria
        .iter()
        .find(|c| c.criterion_code == "1.1")
        .unwrap();
    assert_eq!(c.first_occasion_approved, Some(false));
    assert_eq!(c.evidence[0].feedback(), Some("Photo is blurred"));
}

#[tokio::test(start_paused = true)]
async fn test_dashboard_renders_despite_unreachable_site() {
    let (store, service) = create_test_service();
    add_assessed(&store, "Evidence/netp3_01/1_1", "a.jpg", 1, "Pending", None);
    store.add_file("site-b", "Evidence/netp3_01/1_1", "b.jpg", at(2));
    store.inject("site-b", "Evidence", FailureMode::Unavailable);

    let dashboard = service.get_dashboard(&SiteScope::All).await.unwrap();
    assert_eq!(dashboard.candidates.len(), 2);
    assert_eq!(dashboard.incomplete_sites, vec!["site-b".to_string()]);
    assert_eq!(dashboard.pending_evidence_count, 1);
    assert_eq!(dashboard.pending_evidence[0].candidate, "Jo Bloggs");

    // The failed site is retried on the next visit
    store.clear_failures();
    tokio::time::advance(Duration::from_secs(1)).await;
    let dashboard = service.get_dashboard(&SiteScope::All).await.unwrap();
    assert!(dashboard.incomplete_sites.is_empty());
    assert_eq!(dashboard.pending_evidence_count, 2);
}
